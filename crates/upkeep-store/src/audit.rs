use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};
use upkeep_core::{
    sanitize_record, ActorKind, BatchContext, ItemKind, LogAction, LogEntry, LogFilter,
    LogRecord, LogStatus, PageRequest,
};

use crate::{LogStore, StateLayout};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogPage {
    pub entries: Vec<LogEntry>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionEntry {
    pub tenant_id: i64,
    pub kind: ItemKind,
    pub item_name: String,
    pub item_slug: String,
    pub version: String,
    pub succeeded: bool,
    pub actor_kind: ActorKind,
    pub message: String,
    pub trace: String,
}

/// Management surface over the log store.
///
/// Writes are best-effort: a failed insert is logged and counted, never
/// returned as an error, so recording can never hold up the update itself.
pub struct AuditLog {
    store: LogStore,
    write_failures: AtomicU64,
}

impl AuditLog {
    pub fn new(store: LogStore) -> Self {
        Self {
            store,
            write_failures: AtomicU64::new(0),
        }
    }

    pub fn open(layout: &StateLayout) -> Result<Self> {
        layout.ensure_base_dirs()?;
        Ok(Self::new(LogStore::open(layout.database_path())?))
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    /// Sanitizes and inserts one row. `None` means nothing was written.
    pub fn record_operation(&self, record: LogRecord) -> Option<i64> {
        let entry = sanitize_record(record);
        let fields = entry.fields();
        match self.store.insert(&entry) {
            Ok(Some(id)) => {
                debug!(
                    id,
                    kind = fields.kind.as_str(),
                    slug = %fields.item_slug,
                    action = fields.action.as_str(),
                    status = fields.status.as_str(),
                    "recorded update log entry"
                );
                Some(id)
            }
            Ok(None) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    kind = fields.kind.as_str(),
                    slug = %fields.item_slug,
                    "update log table is not provisioned; entry dropped"
                );
                None
            }
            Err(err) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    kind = fields.kind.as_str(),
                    slug = %fields.item_slug,
                    error = %format!("{err:#}"),
                    "failed to record update log entry"
                );
                None
            }
        }
    }

    pub fn record_deletion(&self, deletion: DeletionEntry) -> Option<i64> {
        let status = if deletion.succeeded {
            LogStatus::Success
        } else {
            LogStatus::Error
        };
        let mut record = LogRecord::new(deletion.kind, LogAction::Uninstall, status);
        record.tenant_id = deletion.tenant_id;
        record.item_name = deletion.item_name;
        record.item_slug = deletion.item_slug;
        record.version_before = deletion.version;
        record.message = deletion.message;
        record.trace = deletion.trace;
        record.actor_kind = deletion.actor_kind;
        record.batch_context = BatchContext::Single;
        self.record_operation(record)
    }

    pub fn list_logs(&self, filter: &LogFilter, page: &PageRequest) -> Result<LogPage> {
        let entries = self.store.query(filter, page)?;
        let total = self.store.count(filter)?;
        Ok(LogPage { entries, total })
    }

    pub fn delete_log(&self, id: i64) -> bool {
        match self.store.delete_by_id(id) {
            Ok(deleted) => deleted,
            Err(err) => {
                warn!(id, error = %format!("{err:#}"), "failed to delete update log entry");
                false
            }
        }
    }

    /// Retention cleanup. Storage failures count as zero rows removed.
    pub fn cleanup(&self, retention_days: i64) -> usize {
        match self.store.delete_older_than(retention_days) {
            Ok(deleted) => {
                debug!(retention_days, deleted, "pruned update log entries");
                deleted
            }
            Err(err) => {
                warn!(
                    retention_days,
                    error = %format!("{err:#}"),
                    "failed to prune update log entries"
                );
                0
            }
        }
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }
}
