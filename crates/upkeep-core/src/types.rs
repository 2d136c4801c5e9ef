use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::sanitize;

pub const DEFAULT_TENANT_ID: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum ItemKind {
    Core,
    Plugin,
    Theme,
    Translation,
}

impl ItemKind {
    pub const ALL: [ItemKind; 4] = [Self::Core, Self::Plugin, Self::Theme, Self::Translation];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Plugin => "plugin",
            Self::Theme => "theme",
            Self::Translation => "translation",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "core" => Ok(Self::Core),
            "plugin" => Ok(Self::Plugin),
            "theme" => Ok(Self::Theme),
            "translation" => Ok(Self::Translation),
            _ => Err(anyhow!("invalid kind: {value}")),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Core => "Core",
            Self::Plugin => "Plugin",
            Self::Theme => "Theme",
            Self::Translation => "Translation",
        }
    }
}

impl From<String> for ItemKind {
    fn from(value: String) -> Self {
        sanitize::sanitize_kind(&value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum LogAction {
    Update,
    Downgrade,
    Install,
    SameVersion,
    Failed,
    Uninstall,
}

impl LogAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Downgrade => "downgrade",
            Self::Install => "install",
            Self::SameVersion => "same_version",
            Self::Failed => "failed",
            Self::Uninstall => "uninstall",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "update" => Ok(Self::Update),
            "downgrade" => Ok(Self::Downgrade),
            "install" => Ok(Self::Install),
            "same_version" => Ok(Self::SameVersion),
            "failed" => Ok(Self::Failed),
            "uninstall" => Ok(Self::Uninstall),
            _ => Err(anyhow!("invalid action: {value}")),
        }
    }
}

impl From<String> for LogAction {
    fn from(value: String) -> Self {
        sanitize::sanitize_action(&value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum LogStatus {
    Success,
    Error,
    Cancelled,
}

impl LogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(anyhow!("invalid status: {value}")),
        }
    }
}

impl From<String> for LogStatus {
    fn from(value: String) -> Self {
        sanitize::sanitize_status(&value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum ActorKind {
    System,
    User,
}

impl ActorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            _ => Err(anyhow!("invalid actor kind: {value}")),
        }
    }
}

impl From<String> for ActorKind {
    fn from(value: String) -> Self {
        sanitize::sanitize_actor(&value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum InitiationMode {
    Manual,
    Automatic,
    Upload,
}

impl InitiationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automatic => "automatic",
            Self::Upload => "upload",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "manual" => Ok(Self::Manual),
            "automatic" => Ok(Self::Automatic),
            "upload" => Ok(Self::Upload),
            _ => Err(anyhow!("invalid initiation mode: {value}")),
        }
    }
}

impl From<String> for InitiationMode {
    fn from(value: String) -> Self {
        sanitize::sanitize_initiation(&value)
    }
}

/// Whether an item was acted on alone or as one of several selected together.
/// `None` persists as the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum BatchContext {
    Bulk,
    Single,
    #[serde(rename = "")]
    None,
}

impl BatchContext {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bulk => "bulk",
            Self::Single => "single",
            Self::None => "",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "bulk" => Ok(Self::Bulk),
            "single" => Ok(Self::Single),
            "" => Ok(Self::None),
            _ => Err(anyhow!("invalid batch context: {value}")),
        }
    }

    pub fn from_bulk_flag(bulk: bool) -> Self {
        if bulk {
            Self::Bulk
        } else {
            Self::Single
        }
    }
}

impl From<String> for BatchContext {
    fn from(value: String) -> Self {
        sanitize::sanitize_batch_context(&value)
    }
}

/// A persisted audit row. Rows are never updated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub tenant_id: i64,
    pub kind: ItemKind,
    pub action: LogAction,
    pub item_name: String,
    pub item_slug: String,
    pub version_before: String,
    pub version_after: String,
    pub status: LogStatus,
    pub message: String,
    pub trace: String,
    pub actor_kind: ActorKind,
    pub initiation_mode: InitiationMode,
    pub batch_context: BatchContext,
    pub created_at: String,
}

/// Unsanitized input for one audit row, as assembled by the reconciliation engine
/// or any other caller of the management surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub tenant_id: i64,
    pub kind: ItemKind,
    pub action: LogAction,
    pub item_name: String,
    pub item_slug: String,
    pub version_before: String,
    pub version_after: String,
    pub status: LogStatus,
    pub message: String,
    pub trace: String,
    pub actor_kind: ActorKind,
    pub initiation_mode: InitiationMode,
    pub batch_context: BatchContext,
}

impl LogRecord {
    pub fn new(kind: ItemKind, action: LogAction, status: LogStatus) -> Self {
        Self {
            tenant_id: DEFAULT_TENANT_ID,
            kind,
            action,
            item_name: String::new(),
            item_slug: String::new(),
            version_before: String::new(),
            version_after: String::new(),
            status,
            message: String::new(),
            trace: String::new(),
            actor_kind: ActorKind::System,
            initiation_mode: InitiationMode::Manual,
            batch_context: BatchContext::None,
        }
    }
}

/// A row that has passed through the sanitizer and is ready for insertion.
/// Only [`crate::sanitize_record`] constructs one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogEntry {
    pub(crate) record: LogRecord,
}

impl NewLogEntry {
    pub fn fields(&self) -> &LogRecord {
        &self.record
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub tenant_id: Option<i64>,
    pub kind: Option<ItemKind>,
    pub status: Option<LogStatus>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl SortOrder {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "desc" | "newest" => Ok(Self::NewestFirst),
            "asc" | "oldest" => Ok(Self::OldestFirst),
            _ => Err(anyhow!("invalid sort order: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
    pub order: SortOrder,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32, order: SortOrder) -> Self {
        Self {
            page: sanitize::sanitize_page(page),
            per_page: sanitize::sanitize_per_page(per_page),
            order,
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 20, SortOrder::NewestFirst)
    }
}
