use tracing::warn;
use upkeep_core::{LogAction, LogRecord, LogStatus, UpdateTarget};
use upkeep_store::SnapshotRecord;

use crate::engine::{first_known, trace_json};
use crate::{CommitReport, PendingOperation, ReconciliationEngine};

/// Leading line of every entry written for an operation that never reported
/// its outcome.
pub const INCOMPLETE_MESSAGE: &str = "Update process started but may not have completed.";

impl ReconciliationEngine<'_> {
    /// End of process. Anything still pending is written as an error entry
    /// so no started operation goes unrecorded. Runs at most once.
    pub fn shutdown(&mut self, fatal_error: Option<&str>) -> Vec<CommitReport> {
        if self.shut_down {
            return Vec::new();
        }
        self.shut_down = true;
        self.narration.stop_capture();

        let fatal_error = fatal_error.map(str::trim).filter(|error| !error.is_empty());
        let mut commits = Vec::new();
        for operation in self.pending.drain_all() {
            let snapshot = self.take_snapshot(&operation.key);
            commits.extend(self.flush_incomplete(
                operation,
                snapshot,
                fatal_error,
                "process-shutdown",
            ));
        }

        self.uploads.clear();
        self.narration.reset();
        commits
    }

    /// Writes one operation whose outcome was never observed.
    pub(crate) fn flush_incomplete(
        &mut self,
        operation: PendingOperation,
        snapshot: Option<SnapshotRecord>,
        fatal_error: Option<&str>,
        signal: &str,
    ) -> Option<CommitReport> {
        let key = operation.key.clone();
        if !self.logged.insert(key.clone()) {
            return None;
        }

        let version_before = first_known([
            snapshot.as_ref().map(|record| record.item_version.as_str()),
            Some(operation.version_before.as_str()),
        ]);
        let version_after = operation.version_after.clone();

        let mut lines = vec![INCOMPLETE_MESSAGE.to_string()];
        if let Some(error) = fatal_error {
            lines.push(format!("Fatal error: {error}"));
        }
        let narration = self.narration.narration_for(&key);
        if !narration.is_empty() {
            lines.push(narration);
        }

        let identity = operation
            .target
            .as_ref()
            .map(UpdateTarget::identity)
            .unwrap_or_else(|| operation.slug.clone());
        warn!(key = %key, signal, "operation never reported completion; recording as incomplete");

        let mut record = LogRecord::new(operation.kind, LogAction::Update, LogStatus::Error);
        record.tenant_id = self.context.tenant_id;
        record.item_name = operation.name;
        record.item_slug = operation.slug;
        record.version_before = version_before.clone();
        record.version_after = version_after.clone();
        record.message = lines.join("\n");
        record.trace = trace_json(signal, operation.kind, &identity);
        record.actor_kind = self.context.actor;
        record.initiation_mode = operation.initiation_mode;
        record.batch_context = operation.batch_context;

        let id = self.commit(record);
        Some(CommitReport {
            key,
            action: LogAction::Update,
            status: LogStatus::Error,
            version_before,
            version_after,
            id,
        })
    }
}

impl Drop for ReconciliationEngine<'_> {
    fn drop(&mut self) {
        if !self.shut_down {
            self.shutdown(None);
        }
    }
}
