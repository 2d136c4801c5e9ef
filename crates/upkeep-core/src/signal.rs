use serde::{Deserialize, Serialize};

use crate::{ItemKind, LogAction, UpdateTarget};

/// Error code the host reports when an install is rejected because the
/// destination directory is already present. It is a pre-check, not a failure.
pub const DESTINATION_EXISTS_CODE: &str = "folder_exists";

/// Host lifecycle signals, in the order they normally arrive for one item:
/// pre-update, package-options-init, narration, terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "kebab-case")]
pub enum LifecycleSignal {
    /// Earliest observable moment before any file is touched. An empty target
    /// list means every installed item of `kind`.
    PreUpdate {
        kind: ItemKind,
        #[serde(default)]
        targets: Vec<UpdateTarget>,
    },
    PackageOptionsInit(PackageOptions),
    ProgressNarration {
        text: String,
    },
    /// The host finished one item of a batch and flushed its narration.
    ItemBoundary {
        #[serde(default)]
        target: Option<UpdateTarget>,
    },
    ProcessComplete(CompletionReport),
    AutomaticSweepComplete {
        #[serde(default)]
        results: Vec<SweepResult>,
    },
    ItemDeleted(DeletionReport),
    ProcessShutdown {
        #[serde(default)]
        fatal_error: Option<String>,
    },
}

impl LifecycleSignal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PreUpdate { .. } => "pre-update",
            Self::PackageOptionsInit(_) => "package-options-init",
            Self::ProgressNarration { .. } => "progress-narration",
            Self::ItemBoundary { .. } => "item-boundary",
            Self::ProcessComplete(_) => "process-complete",
            Self::AutomaticSweepComplete { .. } => "automatic-sweep-complete",
            Self::ItemDeleted(_) => "item-deleted",
            Self::ProcessShutdown { .. } => "process-shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageSource {
    #[default]
    Repository,
    Upload,
}

/// What an uploaded package says about itself before it is unpacked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredPackage {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageOptions {
    pub kind: ItemKind,
    #[serde(default)]
    pub target: Option<UpdateTarget>,
    #[serde(default)]
    pub bulk: bool,
    #[serde(default)]
    pub source: PackageSource,
    #[serde(default)]
    pub new_version: Option<String>,
    #[serde(default)]
    pub declared: Option<DeclaredPackage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl OperationError {
    pub fn is_destination_exists(&self) -> bool {
        self.code == DESTINATION_EXISTS_CODE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub target: UpdateTarget,
    #[serde(default)]
    pub error: Option<OperationError>,
}

/// The authoritative "process complete" report. `error` describes a failure of
/// the whole operation; per-item failures ride on each outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub kind: ItemKind,
    #[serde(default = "default_hint")]
    pub action: LogAction,
    #[serde(default)]
    pub bulk: bool,
    #[serde(default)]
    pub items: Vec<ItemOutcome>,
    #[serde(default)]
    pub error: Option<OperationError>,
}

fn default_hint() -> LogAction {
    LogAction::Update
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepResult {
    pub target: UpdateTarget,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionReport {
    pub target: UpdateTarget,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_deleted")]
    pub deleted: bool,
}

fn default_deleted() -> bool {
    true
}
