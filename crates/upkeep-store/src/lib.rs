mod audit;
mod layout;
mod log_store;
mod policy;
mod snapshots;

pub use audit::{AuditLog, DeletionEntry, LogPage};
pub use layout::{default_state_root, StateLayout};
pub use log_store::{LogStore, LOG_TABLE};
pub use policy::{AutoUpdatePolicy, Policy, PolicyStore};
pub use snapshots::{SnapshotRecord, SnapshotStore};

pub fn current_unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests;
