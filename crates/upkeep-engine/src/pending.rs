use std::collections::BTreeMap;

use upkeep_core::{BatchContext, InitiationMode, ItemKind, UpdateTarget};

/// An operation that has started but whose outcome has not been observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    pub key: String,
    pub kind: ItemKind,
    /// `None` for a fresh upload whose identity is unknown until unpacked.
    pub target: Option<UpdateTarget>,
    pub name: String,
    pub slug: String,
    pub version_before: String,
    pub version_after: String,
    pub batch_context: BatchContext,
    pub initiation_mode: InitiationMode,
}

/// Process-lifetime table of pending operations keyed by `{kind}:{identity}`.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    entries: BTreeMap<String, PendingOperation>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starting the same key twice keeps only the latest fields.
    pub fn begin(&mut self, operation: PendingOperation) {
        self.entries.insert(operation.key.clone(), operation);
    }

    pub fn peek(&self, key: &str) -> Option<&PendingOperation> {
        self.entries.get(key)
    }

    pub fn complete(&mut self, key: &str) -> Option<PendingOperation> {
        self.entries.remove(key)
    }

    pub fn keys_of_kind(&self, kind: ItemKind) -> Vec<String> {
        self.entries
            .values()
            .filter(|operation| operation.kind == kind)
            .map(|operation| operation.key.clone())
            .collect()
    }

    pub fn drain_all(&mut self) -> Vec<PendingOperation> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
