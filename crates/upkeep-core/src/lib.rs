mod classify;
mod sanitize;
mod signal;
mod target;
mod types;

pub use classify::{classify, compare_versions};
pub use sanitize::{
    decode_entities, sanitize_actor, sanitize_batch_context, sanitize_initiation, sanitize_kind,
    sanitize_action, sanitize_long_text, sanitize_page, sanitize_per_page, sanitize_record,
    sanitize_retention_days, sanitize_status, sanitize_tenant_id, sanitize_text, sanitize_trace,
    sanitize_version, strip_markup, MAX_LONG_TEXT_BYTES, MAX_NAME_CHARS, MAX_PER_PAGE,
    MAX_RETENTION_DAYS, MAX_SLUG_CHARS, MAX_VERSION_CHARS,
};
pub use signal::{
    CompletionReport, DeclaredPackage, DeletionReport, ItemOutcome, LifecycleSignal,
    OperationError, PackageOptions, PackageSource, SweepResult, DESTINATION_EXISTS_CODE,
};
pub use target::{UpdateTarget, CORE_IDENTITY};
pub use types::{
    ActorKind, BatchContext, InitiationMode, ItemKind, LogAction, LogEntry, LogFilter, LogRecord,
    LogStatus, NewLogEntry, PageRequest, SortOrder, DEFAULT_TENANT_ID,
};
