use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};
use upkeep_core::{
    classify, sanitize_tenant_id, ActorKind, BatchContext, CompletionReport, DeletionReport,
    InitiationMode, ItemKind, LifecycleSignal, LogAction, LogRecord, LogStatus, OperationError,
    PackageOptions, PackageSource, SweepResult, UpdateTarget, DEFAULT_TENANT_ID,
};
use upkeep_store::{
    current_unix_timestamp, AuditLog, DeletionEntry, Policy, SnapshotRecord, SnapshotStore,
    StateLayout,
};

use crate::feedback::normalize_narration;
use crate::trace::capture_trace;
use crate::{HostInventory, InstalledItem, NarrationSink, PendingBuffer, PendingOperation};

const SWEEP_FAILURE_CODE: &str = "automatic_update_failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineContext {
    pub tenant_id: i64,
    /// Who drives the current process. A system actor means the host's own
    /// scheduler started the work.
    pub actor: ActorKind,
    pub logging_enabled: bool,
    pub snapshot_ttl_secs: u64,
}

impl Default for EngineContext {
    fn default() -> Self {
        Self {
            tenant_id: DEFAULT_TENANT_ID,
            actor: ActorKind::System,
            logging_enabled: true,
            snapshot_ttl_secs: 24 * 3600,
        }
    }
}

impl EngineContext {
    pub fn from_policy(policy: &Policy) -> Self {
        Self {
            logging_enabled: policy.logging_enabled,
            snapshot_ttl_secs: policy.snapshot_ttl_secs(),
            ..Self::default()
        }
    }

    pub fn with_tenant(mut self, tenant_id: i64) -> Self {
        self.tenant_id = sanitize_tenant_id(tenant_id);
        self
    }

    pub fn with_actor(mut self, actor: ActorKind) -> Self {
        self.actor = actor;
        self
    }
}

/// What one reconciliation produced. `id` is `None` when nothing was
/// persisted (logging disabled, or a best-effort write failed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub key: String,
    pub action: LogAction,
    pub status: LogStatus,
    pub version_before: String,
    pub version_after: String,
    pub id: Option<i64>,
}

/// Facts a terminal signal reports about one item.
struct Observation {
    signal: &'static str,
    hint: LogAction,
    batch_context: BatchContext,
    automatic: bool,
    error: Option<OperationError>,
    name: Option<String>,
    version: Option<String>,
    messages: Vec<String>,
}

impl Observation {
    fn completion(report: &CompletionReport, error: Option<OperationError>) -> Self {
        Self {
            signal: "process-complete",
            hint: report.action,
            batch_context: BatchContext::from_bulk_flag(report.bulk),
            automatic: false,
            error,
            name: None,
            version: None,
            messages: Vec::new(),
        }
    }
}

/// Turns the host's lifecycle signals into audit log entries.
///
/// One engine lives for one host process. Every operation it sees begin is
/// committed exactly once: by its terminal signal, by the automatic sweep, or
/// by the shutdown flush.
pub struct ReconciliationEngine<'a> {
    pub(crate) context: EngineContext,
    pub(crate) audit: &'a AuditLog,
    pub(crate) inventory: &'a dyn HostInventory,
    pub(crate) snapshots: SnapshotStore,
    pub(crate) pending: PendingBuffer,
    pub(crate) narration: NarrationSink,
    pub(crate) logged: HashSet<String>,
    pub(crate) uploads: BTreeMap<ItemKind, String>,
    pub(crate) shut_down: bool,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(
        context: EngineContext,
        layout: &StateLayout,
        audit: &'a AuditLog,
        inventory: &'a dyn HostInventory,
    ) -> Self {
        let snapshots = SnapshotStore::new(layout.clone());
        match snapshots.purge_expired(context.snapshot_ttl_secs, current_unix_timestamp()) {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "purged expired version snapshots"),
            Err(err) => warn!(
                error = %format!("{err:#}"),
                "failed to purge expired version snapshots"
            ),
        }

        Self {
            context,
            audit,
            inventory,
            snapshots,
            pending: PendingBuffer::new(),
            narration: NarrationSink::new(),
            logged: HashSet::new(),
            uploads: BTreeMap::new(),
            shut_down: false,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub fn pending(&self) -> &PendingBuffer {
        &self.pending
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn handle(&mut self, signal: LifecycleSignal) -> Vec<CommitReport> {
        if self.shut_down {
            warn!(signal = signal.name(), "signal received after shutdown; ignored");
            return Vec::new();
        }
        debug!(signal = signal.name(), "handling lifecycle signal");

        match signal {
            LifecycleSignal::PreUpdate { kind, targets } => {
                self.pre_update(kind, targets);
                Vec::new()
            }
            LifecycleSignal::PackageOptionsInit(options) => {
                self.package_options_init(options);
                Vec::new()
            }
            LifecycleSignal::ProgressNarration { text } => {
                self.narration.append_chunk(&text);
                Vec::new()
            }
            LifecycleSignal::ItemBoundary { target } => {
                let key = target.as_ref().map(UpdateTarget::key);
                self.narration.item_boundary(key.as_deref());
                Vec::new()
            }
            LifecycleSignal::ProcessComplete(report) => self.process_complete(report),
            LifecycleSignal::AutomaticSweepComplete { results } => {
                self.automatic_sweep_complete(results)
            }
            LifecycleSignal::ItemDeleted(report) => self.item_deleted(report),
            LifecycleSignal::ProcessShutdown { fatal_error } => {
                self.shutdown(fatal_error.as_deref())
            }
        }
    }

    fn pre_update(&mut self, kind: ItemKind, targets: Vec<UpdateTarget>) {
        let targets = if targets.is_empty() {
            self.inventory
                .installed_of_kind(kind)
                .into_iter()
                .map(|(target, _)| target)
                .collect()
        } else {
            targets
        };

        for target in targets {
            if self.ensure_snapshot(&target).is_none() {
                debug!(key = %target.key(), "no installed version to snapshot");
            }
        }
    }

    fn package_options_init(&mut self, options: PackageOptions) {
        self.narration.start_capture();

        let upload = options.source == PackageSource::Upload;
        let initiation_mode = if upload {
            InitiationMode::Upload
        } else {
            self.default_initiation()
        };
        let batch_context = BatchContext::from_bulk_flag(options.bulk);
        let declared_name = options
            .declared
            .as_ref()
            .map(|declared| declared.name.trim().to_string())
            .filter(|name| !name.is_empty());
        let version_after = first_known([
            options.new_version.as_deref(),
            options
                .declared
                .as_ref()
                .and_then(|declared| declared.version.as_deref()),
        ]);

        // An upload naming an installed item replaces it, so its snapshot is
        // taken here, before the package is unpacked.
        let target = options
            .target
            .clone()
            .or_else(|| {
                if upload {
                    declared_name
                        .as_deref()
                        .and_then(|name| self.inventory.find_by_name(options.kind, name))
                } else {
                    None
                }
            })
            .or_else(|| (options.kind == ItemKind::Core).then_some(UpdateTarget::Core));

        let operation = match target {
            Some(target) => {
                let before = self.ensure_snapshot(&target);
                let name = first_known([
                    before.as_ref().map(|item| item.name.as_str()),
                    declared_name.as_deref(),
                ]);
                PendingOperation {
                    key: target.key(),
                    kind: options.kind,
                    slug: target.slug(),
                    name: if name.is_empty() {
                        target.default_name()
                    } else {
                        name
                    },
                    version_before: before.map(|item| item.version).unwrap_or_default(),
                    version_after,
                    batch_context,
                    initiation_mode,
                    target: Some(target),
                }
            }
            None => {
                let Some(name) = declared_name else {
                    warn!(
                        kind = options.kind.as_str(),
                        "package options named no target; operation not tracked"
                    );
                    return;
                };
                let slug = provisional_slug(&name);
                PendingOperation {
                    key: format!("{}:upload:{slug}", options.kind.as_str()),
                    kind: options.kind,
                    target: None,
                    name,
                    slug,
                    version_before: String::new(),
                    version_after,
                    batch_context,
                    initiation_mode,
                }
            }
        };

        debug!(
            key = %operation.key,
            before = %operation.version_before,
            after = %operation.version_after,
            "operation started"
        );
        if upload {
            self.uploads.insert(options.kind, operation.key.clone());
        }
        self.pending.begin(operation);
    }

    fn process_complete(&mut self, report: CompletionReport) -> Vec<CommitReport> {
        self.narration.stop_capture();
        let upload_key = self.uploads.remove(&report.kind);

        if report
            .error
            .as_ref()
            .is_some_and(OperationError::is_destination_exists)
        {
            for item in &report.items {
                self.pending.complete(&item.target.key());
            }
            if report.items.is_empty() {
                for key in self.pending.keys_of_kind(report.kind) {
                    self.pending.complete(&key);
                }
            }
            if let Some(key) = upload_key.as_deref() {
                self.pending.complete(key);
            }
            info!(
                kind = report.kind.as_str(),
                "destination already exists; waiting for the replace decision"
            );
            self.narration.reset();
            return Vec::new();
        }

        let mut work = Vec::new();
        if report.items.is_empty() {
            if let Some(upload_key) = upload_key {
                let pending = self.pending.complete(&upload_key);
                // A fresh upload is only identifiable once it has been unpacked.
                let target = pending.as_ref().and_then(|operation| {
                    operation
                        .target
                        .clone()
                        .or_else(|| self.inventory.find_by_name(report.kind, &operation.name))
                });
                let key = target.as_ref().map(UpdateTarget::key).unwrap_or(upload_key);
                work.push((key, target, pending, report.error.clone()));
            } else {
                let mut keys = self.pending.keys_of_kind(report.kind);
                if keys.is_empty() && report.kind == ItemKind::Core {
                    keys.push(UpdateTarget::Core.key());
                }
                for key in keys {
                    let pending = self.pending.complete(&key);
                    let target = pending
                        .as_ref()
                        .and_then(|operation| operation.target.clone())
                        .or_else(|| (report.kind == ItemKind::Core).then_some(UpdateTarget::Core));
                    work.push((key, target, pending, report.error.clone()));
                }
            }
        } else {
            for item in &report.items {
                let key = item.target.key();
                let mut pending = self.pending.complete(&key);
                if pending.is_none() {
                    if let Some(upload_key) = upload_key.as_deref() {
                        pending = self.pending.complete(upload_key);
                    }
                }
                let error = item.error.clone().or_else(|| report.error.clone());
                work.push((key, Some(item.target.clone()), pending, error));
            }
        }

        if work.is_empty() && report.error.is_some() {
            work.push((
                format!("{}:", report.kind.as_str()),
                None,
                None,
                report.error.clone(),
            ));
        }

        let mut commits = Vec::new();
        for (key, target, pending, error) in work {
            if error
                .as_ref()
                .is_some_and(OperationError::is_destination_exists)
            {
                info!(key = %key, "destination already exists; no entry recorded");
                continue;
            }
            let observation = Observation::completion(&report, error);
            if let Some(commit) = self.reconcile(key, target, report.kind, pending, observation) {
                commits.push(commit);
            }
        }
        self.narration.reset();
        commits
    }

    fn automatic_sweep_complete(&mut self, results: Vec<SweepResult>) -> Vec<CommitReport> {
        self.narration.stop_capture();

        let mut commits = Vec::new();
        for result in results {
            let key = result.target.key();
            let kind = result.target.kind();
            let pending = self.pending.complete(&key);
            let error = (!result.success).then(|| OperationError {
                code: SWEEP_FAILURE_CODE.to_string(),
                message: "The automatic update did not complete.".to_string(),
            });
            let observation = Observation {
                signal: "automatic-sweep-complete",
                hint: LogAction::Update,
                batch_context: BatchContext::None,
                automatic: true,
                error,
                name: result.name,
                version: result.version,
                messages: result.messages,
            };
            if let Some(commit) =
                self.reconcile(key, Some(result.target), kind, pending, observation)
            {
                commits.push(commit);
            }
        }
        self.narration.reset();
        commits
    }

    fn item_deleted(&mut self, report: DeletionReport) -> Vec<CommitReport> {
        let key = report.target.key();
        let snapshot = self.take_snapshot(&key);
        let mut commits = Vec::new();
        if let Some(operation) = self.pending.complete(&key) {
            warn!(key = %key, "item removed while an operation was pending");
            commits.extend(self.flush_incomplete(
                operation,
                snapshot.clone(),
                None,
                "item-deleted",
            ));
        }
        if !self.logged.insert(format!("{key}#uninstall")) {
            debug!(key = %key, "removal already recorded");
            return commits;
        }

        let version = first_known([
            report.version.as_deref(),
            snapshot.as_ref().map(|record| record.item_version.as_str()),
        ]);
        let name = first_known([
            report.name.as_deref(),
            snapshot.as_ref().and_then(|record| record.item_name.as_deref()),
        ]);
        let name = if name.is_empty() {
            report.target.default_name()
        } else {
            name
        };
        let status = if report.deleted {
            LogStatus::Success
        } else {
            LogStatus::Error
        };
        let message = if report.deleted {
            format!("Removed {}.", versioned(&name, &version))
        } else {
            format!("Could not remove {}.", versioned(&name, &version))
        };

        let entry = DeletionEntry {
            tenant_id: self.context.tenant_id,
            kind: report.target.kind(),
            item_name: name,
            item_slug: report.target.slug(),
            version: version.clone(),
            succeeded: report.deleted,
            actor_kind: self.context.actor,
            message,
            trace: trace_json("item-deleted", report.target.kind(), &report.target.identity()),
        };
        let id = if self.context.logging_enabled {
            self.audit.record_deletion(entry)
        } else {
            debug!(key = %key, "logging disabled; removal not recorded");
            None
        };

        commits.push(CommitReport {
            key,
            action: LogAction::Uninstall,
            status,
            version_before: version,
            version_after: String::new(),
            id,
        });
        commits
    }

    fn reconcile(
        &mut self,
        key: String,
        target: Option<UpdateTarget>,
        kind: ItemKind,
        pending: Option<PendingOperation>,
        observed: Observation,
    ) -> Option<CommitReport> {
        let snapshot = self.take_snapshot(&key);
        if !self.logged.insert(key.clone()) {
            debug!(key = %key, signal = observed.signal, "outcome already recorded");
            return None;
        }

        let live = target
            .as_ref()
            .and_then(|target| self.inventory.installed(target));
        let version_before = first_known([
            snapshot.as_ref().map(|record| record.item_version.as_str()),
            pending
                .as_ref()
                .map(|operation| operation.version_before.as_str()),
        ]);
        let version_after = first_known([
            observed.version.as_deref(),
            pending
                .as_ref()
                .map(|operation| operation.version_after.as_str()),
            live.as_ref().map(|item| item.version.as_str()),
        ]);
        let name = first_known([
            observed.name.as_deref(),
            pending.as_ref().map(|operation| operation.name.as_str()),
            live.as_ref().map(|item| item.name.as_str()),
            snapshot.as_ref().and_then(|record| record.item_name.as_deref()),
        ]);
        let name = match (&target, name.is_empty()) {
            (_, false) => name,
            (Some(target), true) => target.default_name(),
            (None, true) => kind.label().to_string(),
        };
        let slug = target
            .as_ref()
            .map(UpdateTarget::slug)
            .or_else(|| pending.as_ref().map(|operation| operation.slug.clone()))
            .unwrap_or_default();

        // Uploading over an installed item is reported by the host as an
        // install; a known prior version makes it an update.
        let hint = if observed.hint == LogAction::Install && !version_before.is_empty() {
            LogAction::Update
        } else {
            observed.hint
        };
        let (action, status) = match observed.error {
            Some(_) => (LogAction::Failed, LogStatus::Error),
            None => (
                classify(&version_before, &version_after, hint),
                LogStatus::Success,
            ),
        };

        let batch_context = pending
            .as_ref()
            .map(|operation| operation.batch_context)
            .unwrap_or(observed.batch_context);
        let (actor_kind, initiation_mode) = if observed.automatic {
            (ActorKind::System, InitiationMode::Automatic)
        } else {
            (
                self.context.actor,
                pending
                    .as_ref()
                    .map(|operation| operation.initiation_mode)
                    .unwrap_or_else(|| self.default_initiation()),
            )
        };

        let narration = if observed.messages.is_empty() {
            self.narration.narration_for(&key)
        } else {
            normalize_narration(&observed.messages.join("\n"))
        };
        let message = compose_message(
            action,
            &name,
            &version_before,
            &version_after,
            observed.error.as_ref(),
            &narration,
        );
        let identity = target
            .as_ref()
            .map(UpdateTarget::identity)
            .unwrap_or_else(|| slug.clone());

        let mut record = LogRecord::new(kind, action, status);
        record.tenant_id = self.context.tenant_id;
        record.item_name = name;
        record.item_slug = slug;
        record.version_before = version_before.clone();
        record.version_after = version_after.clone();
        record.message = message;
        record.trace = trace_json(observed.signal, kind, &identity);
        record.actor_kind = actor_kind;
        record.initiation_mode = initiation_mode;
        record.batch_context = batch_context;

        let id = self.commit(record);
        Some(CommitReport {
            key,
            action,
            status,
            version_before,
            version_after,
            id,
        })
    }

    /// Returns the "before" state for `target`, capturing it now unless an
    /// earlier signal already did.
    fn ensure_snapshot(&self, target: &UpdateTarget) -> Option<InstalledItem> {
        let key = target.key();
        match self.snapshots.peek(&key) {
            Ok(Some(record)) => {
                return Some(InstalledItem {
                    name: record.item_name.unwrap_or_default(),
                    version: record.item_version,
                });
            }
            Ok(None) => {}
            Err(err) => warn!(
                key = %key,
                error = %format!("{err:#}"),
                "failed to read version snapshot"
            ),
        }

        let item = self.inventory.installed(target)?;
        if let Err(err) = self.snapshots.record(
            &key,
            &item.version,
            Some(&item.name),
            current_unix_timestamp(),
        ) {
            warn!(
                key = %key,
                error = %format!("{err:#}"),
                "failed to persist version snapshot"
            );
        }
        Some(item)
    }

    pub(crate) fn take_snapshot(&self, key: &str) -> Option<SnapshotRecord> {
        match self.snapshots.consume(key) {
            Ok(record) => record,
            Err(err) => {
                warn!(
                    key = %key,
                    error = %format!("{err:#}"),
                    "failed to consume version snapshot"
                );
                None
            }
        }
    }

    pub(crate) fn commit(&self, record: LogRecord) -> Option<i64> {
        if !self.context.logging_enabled {
            debug!(
                kind = record.kind.as_str(),
                slug = %record.item_slug,
                "logging disabled; entry not recorded"
            );
            return None;
        }
        self.audit.record_operation(record)
    }

    pub(crate) fn default_initiation(&self) -> InitiationMode {
        match self.context.actor {
            ActorKind::System => InitiationMode::Automatic,
            ActorKind::User => InitiationMode::Manual,
        }
    }
}

pub(crate) fn trace_json(signal: &str, kind: ItemKind, identity: &str) -> String {
    let frames = capture_trace(signal, vec![kind.as_str().to_string(), identity.to_string()]);
    serde_json::to_string(&frames).unwrap_or_default()
}

pub(crate) fn first_known<'s>(candidates: impl IntoIterator<Item = Option<&'s str>>) -> String {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn versioned(name: &str, version: &str) -> String {
    if version.is_empty() {
        name.to_string()
    } else {
        format!("{name} {version}")
    }
}

fn compose_message(
    action: LogAction,
    name: &str,
    before: &str,
    after: &str,
    error: Option<&OperationError>,
    narration: &str,
) -> String {
    let mut lines = Vec::new();
    if let Some(error) = error {
        let detail = error.message.trim();
        if detail.is_empty() {
            lines.push(format!("Error: {}", error.code));
        } else {
            lines.push(format!("Error: {detail} ({})", error.code));
        }
    }

    if !narration.is_empty() {
        lines.push(narration.to_string());
    } else if error.is_none() {
        lines.push(summarize(action, name, before, after));
    }
    lines.join("\n")
}

fn summarize(action: LogAction, name: &str, before: &str, after: &str) -> String {
    let span = match (before.is_empty(), after.is_empty()) {
        (false, false) => format!(" from {before} to {after}"),
        (true, false) => format!(" to {after}"),
        _ => String::new(),
    };
    match action {
        LogAction::Install => format!("Installed {}.", versioned(name, after)),
        LogAction::Update => format!("Updated {name}{span}."),
        LogAction::Downgrade => format!("Downgraded {name}{span}."),
        LogAction::SameVersion => format!("Reinstalled {}.", versioned(name, after)),
        LogAction::Failed => format!("Failed to update {name}."),
        LogAction::Uninstall => format!("Removed {}.", versioned(name, before)),
    }
}

fn provisional_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}
