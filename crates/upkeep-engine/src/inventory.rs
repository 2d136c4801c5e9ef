use std::cell::RefCell;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use upkeep_core::{ItemKind, UpdateTarget};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledItem {
    pub name: String,
    pub version: String,
}

/// Live view of what the host currently has installed.
///
/// Reads reflect the files on disk at call time, so "before" values must be
/// captured before the host overwrites anything.
pub trait HostInventory {
    fn installed(&self, target: &UpdateTarget) -> Option<InstalledItem>;

    fn installed_of_kind(&self, kind: ItemKind) -> Vec<(UpdateTarget, InstalledItem)>;

    /// Matches an uploaded package's declared name against installed items.
    fn find_by_name(&self, kind: ItemKind, name: &str) -> Option<UpdateTarget> {
        let wanted = name.trim();
        if wanted.is_empty() {
            return None;
        }
        self.installed_of_kind(kind)
            .into_iter()
            .find(|(_, item)| item.name.trim().eq_ignore_ascii_case(wanted))
            .map(|(target, _)| target)
    }
}

/// Inventory held in memory. Mutation goes through `&self` so a host adapter
/// can change it while an engine holds a shared borrow.
#[derive(Debug, Default)]
pub struct MemoryInventory {
    items: RefCell<BTreeMap<UpdateTarget, InstalledItem>>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, target: UpdateTarget, name: impl Into<String>, version: impl Into<String>) {
        self.items.borrow_mut().insert(
            target,
            InstalledItem {
                name: name.into(),
                version: version.into(),
            },
        );
    }

    pub fn remove(&self, target: &UpdateTarget) -> Option<InstalledItem> {
        self.items.borrow_mut().remove(target)
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }
}

impl HostInventory for MemoryInventory {
    fn installed(&self, target: &UpdateTarget) -> Option<InstalledItem> {
        self.items.borrow().get(target).cloned()
    }

    fn installed_of_kind(&self, kind: ItemKind) -> Vec<(UpdateTarget, InstalledItem)> {
        self.items
            .borrow()
            .iter()
            .filter(|(target, _)| target.kind() == kind)
            .map(|(target, item)| (target.clone(), item.clone()))
            .collect()
    }
}
