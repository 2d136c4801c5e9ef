use super::*;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Duration, Utc};
use upkeep_core::{
    sanitize_record, ActorKind, BatchContext, InitiationMode, ItemKind, LogAction, LogFilter,
    LogRecord, LogStatus, PageRequest, SortOrder,
};

fn provisioned_store() -> LogStore {
    let store = LogStore::open_in_memory().expect("must open in-memory store");
    store.install_schema().expect("must install schema");
    store
}

fn record(kind: ItemKind, slug: &str, status: LogStatus) -> LogRecord {
    let mut record = LogRecord::new(kind, LogAction::Update, status);
    record.item_name = slug.to_uppercase();
    record.item_slug = slug.to_string();
    record.version_before = "1.0".to_string();
    record.version_after = "1.1".to_string();
    record
}

fn seed(store: &LogStore, kind: ItemKind, slug: &str, status: LogStatus) -> i64 {
    store
        .insert(&sanitize_record(record(kind, slug, status)))
        .expect("must insert")
        .expect("table must exist")
}

#[test]
fn insert_assigns_ids_and_round_trips_fields() {
    let store = provisioned_store();
    let mut raw = record(ItemKind::Theme, "twentytwenty", LogStatus::Success);
    raw.tenant_id = 3;
    raw.actor_kind = ActorKind::User;
    raw.initiation_mode = InitiationMode::Upload;
    raw.batch_context = BatchContext::Bulk;
    raw.message = "Theme updated.".to_string();

    let first = store
        .insert(&sanitize_record(raw))
        .expect("must insert")
        .expect("must assign id");
    let second = seed(&store, ItemKind::Plugin, "foo", LogStatus::Success);
    assert!(second > first);

    let entry = store
        .get(first)
        .expect("must read")
        .expect("row must exist");
    assert_eq!(entry.tenant_id, 3);
    assert_eq!(entry.kind, ItemKind::Theme);
    assert_eq!(entry.action, LogAction::Update);
    assert_eq!(entry.item_slug, "twentytwenty");
    assert_eq!(entry.version_before, "1.0");
    assert_eq!(entry.version_after, "1.1");
    assert_eq!(entry.actor_kind, ActorKind::User);
    assert_eq!(entry.initiation_mode, InitiationMode::Upload);
    assert_eq!(entry.batch_context, BatchContext::Bulk);
    assert_eq!(entry.message, "Theme updated.");
    assert_eq!(entry.created_at.len(), "2026-01-01 00:00:00".len());
}

#[test]
fn unprovisioned_table_returns_empty_results() {
    let store = LogStore::open_in_memory().expect("must open in-memory store");
    assert!(!store.table_exists().expect("must inspect schema"));

    let entry = sanitize_record(record(ItemKind::Plugin, "foo", LogStatus::Success));
    assert_eq!(store.insert(&entry).expect("insert must not error"), None);
    assert!(store
        .query(&LogFilter::default(), &PageRequest::default())
        .expect("query must not error")
        .is_empty());
    assert_eq!(store.count(&LogFilter::default()).expect("count"), 0);
    assert!(!store.delete_by_id(1).expect("delete must not error"));
    assert_eq!(store.delete_older_than(30).expect("cleanup"), 0);
}

#[test]
fn install_schema_is_idempotent() {
    let store = provisioned_store();
    seed(&store, ItemKind::Plugin, "foo", LogStatus::Success);
    store.install_schema().expect("second install must succeed");
    assert_eq!(store.count(&LogFilter::default()).expect("count"), 1);
}

#[test]
fn filters_are_and_combined_and_count_matches_query() {
    let store = provisioned_store();
    seed(&store, ItemKind::Plugin, "foo", LogStatus::Success);
    seed(&store, ItemKind::Plugin, "bar", LogStatus::Error);
    seed(&store, ItemKind::Theme, "twentytwenty", LogStatus::Success);
    seed(&store, ItemKind::Core, "core", LogStatus::Success);

    let plugins = LogFilter {
        kind: Some(ItemKind::Plugin),
        ..LogFilter::default()
    };
    let rows = store
        .query_all(&plugins, SortOrder::NewestFirst)
        .expect("must query");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.kind == ItemKind::Plugin));
    assert_eq!(store.count(&plugins).expect("count"), rows.len() as u64);

    let failed_plugins = LogFilter {
        kind: Some(ItemKind::Plugin),
        status: Some(LogStatus::Error),
        ..LogFilter::default()
    };
    let rows = store
        .query_all(&failed_plugins, SortOrder::NewestFirst)
        .expect("must query");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].item_slug, "bar");

    let other_tenant = LogFilter {
        tenant_id: Some(2),
        ..LogFilter::default()
    };
    assert_eq!(store.count(&other_tenant).expect("count"), 0);
}

#[test]
fn query_paginates_newest_first_by_default() {
    let store = provisioned_store();
    for slug in ["a", "b", "c", "d", "e"] {
        seed(&store, ItemKind::Plugin, slug, LogStatus::Success);
    }

    let first_page = store
        .query(
            &LogFilter::default(),
            &PageRequest::new(1, 2, SortOrder::NewestFirst),
        )
        .expect("must query");
    let slugs = first_page
        .iter()
        .map(|row| row.item_slug.as_str())
        .collect::<Vec<_>>();
    assert_eq!(slugs, vec!["e", "d"]);

    let last_page = store
        .query(
            &LogFilter::default(),
            &PageRequest::new(3, 2, SortOrder::NewestFirst),
        )
        .expect("must query");
    assert_eq!(last_page.len(), 1);
    assert_eq!(last_page[0].item_slug, "a");

    let oldest = store
        .query(
            &LogFilter::default(),
            &PageRequest::new(1, 1, SortOrder::OldestFirst),
        )
        .expect("must query");
    assert_eq!(oldest[0].item_slug, "a");
}

#[test]
fn per_page_is_capped() {
    let page = PageRequest::new(1, 10_000, SortOrder::NewestFirst);
    assert_eq!(page.per_page, 200);
}

#[test]
fn delete_by_id_reports_whether_a_row_was_removed() {
    let store = provisioned_store();
    let id = seed(&store, ItemKind::Plugin, "foo", LogStatus::Success);
    assert!(store.delete_by_id(id).expect("must delete"));
    assert!(!store.delete_by_id(id).expect("second delete must not error"));
    assert!(store.get(id).expect("must read").is_none());
}

#[test]
fn retention_cleanup_is_idempotent() {
    let store = provisioned_store();
    let now = Utc::now();
    for (slug, age_days) in [("old-a", 45), ("old-b", 31), ("fresh", 2)] {
        store
            .insert_at(
                &sanitize_record(record(ItemKind::Plugin, slug, LogStatus::Success)),
                now - Duration::days(age_days),
            )
            .expect("must insert");
    }

    assert_eq!(store.delete_older_than_at(30, now).expect("cleanup"), 2);
    assert_eq!(store.delete_older_than_at(30, now).expect("cleanup"), 0);
    let remaining = store
        .query_all(&LogFilter::default(), SortOrder::NewestFirst)
        .expect("must query");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].item_slug, "fresh");
}

#[test]
fn retention_days_below_one_are_clamped() {
    let store = provisioned_store();
    let now = Utc::now();
    store
        .insert_at(
            &sanitize_record(record(ItemKind::Plugin, "recent", LogStatus::Success)),
            now - Duration::hours(6),
        )
        .expect("must insert");

    assert_eq!(store.delete_older_than_at(0, now).expect("cleanup"), 0);
    assert_eq!(store.delete_older_than_at(-5, now).expect("cleanup"), 0);
}

#[test]
fn audit_log_counts_failed_writes_without_erroring() {
    let audit = AuditLog::new(LogStore::open_in_memory().expect("must open"));
    let id = audit.record_operation(record(ItemKind::Plugin, "foo", LogStatus::Success));
    assert_eq!(id, None);
    assert_eq!(audit.write_failures(), 1);

    audit.store().install_schema().expect("must install schema");
    let id = audit.record_operation(record(ItemKind::Plugin, "foo", LogStatus::Success));
    assert!(id.is_some());
    assert_eq!(audit.write_failures(), 1);
}

#[test]
fn audit_log_lists_pages_with_totals() {
    let audit = AuditLog::new(provisioned_store());
    for slug in ["a", "b", "c"] {
        audit.record_operation(record(ItemKind::Plugin, slug, LogStatus::Success));
    }
    audit.record_operation(record(ItemKind::Theme, "t", LogStatus::Success));

    let page = audit
        .list_logs(
            &LogFilter {
                kind: Some(ItemKind::Plugin),
                ..LogFilter::default()
            },
            &PageRequest::new(1, 2, SortOrder::NewestFirst),
        )
        .expect("must list");
    assert_eq!(page.entries.len(), 2);
    assert_eq!(page.total, 3);
}

#[test]
fn audit_log_records_deletions_as_uninstall() {
    let audit = AuditLog::new(provisioned_store());
    let id = audit
        .record_deletion(DeletionEntry {
            tenant_id: 1,
            kind: ItemKind::Plugin,
            item_name: "Hello Dolly".to_string(),
            item_slug: "hello".to_string(),
            version: "1.7.2".to_string(),
            succeeded: false,
            actor_kind: ActorKind::User,
            message: "Could not remove plugin files.".to_string(),
            trace: String::new(),
        })
        .expect("must record");

    let entry = audit.store().get(id).expect("must read").expect("must exist");
    assert_eq!(entry.action, LogAction::Uninstall);
    assert_eq!(entry.status, LogStatus::Error);
    assert_eq!(entry.version_before, "1.7.2");
    assert_eq!(entry.version_after, "");
}

#[test]
fn audit_log_delete_and_cleanup_degrade_to_false_and_zero() {
    let audit = AuditLog::new(LogStore::open_in_memory().expect("must open"));
    assert!(!audit.delete_log(42));
    assert_eq!(audit.cleanup(30), 0);
}

#[test]
fn snapshots_survive_reopen_and_are_consumed_once() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("must create dirs");

    let writer = SnapshotStore::new(layout.clone());
    writer
        .record("plugin:foo/foo.php", "1.0", Some("Foo"), 1_771_001_234)
        .expect("must record snapshot");

    let reader = SnapshotStore::new(layout.clone());
    let peeked = reader
        .peek("plugin:foo/foo.php")
        .expect("must peek")
        .expect("snapshot must exist");
    assert_eq!(peeked.item_version, "1.0");
    assert_eq!(peeked.item_name.as_deref(), Some("Foo"));

    let consumed = reader
        .consume("plugin:foo/foo.php")
        .expect("must consume")
        .expect("snapshot must exist");
    assert_eq!(consumed.item_version, "1.0");
    assert!(reader
        .consume("plugin:foo/foo.php")
        .expect("second consume must not error")
        .is_none());

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn snapshot_record_overwrites_previous_value() {
    let layout = test_layout();
    let store = SnapshotStore::new(layout.clone());
    store
        .record("theme:twentytwenty", "1.0", None, 10)
        .expect("must record");
    store
        .record("theme:twentytwenty", "1.2", None, 20)
        .expect("must record");

    let snapshot = store
        .peek("theme:twentytwenty")
        .expect("must peek")
        .expect("must exist");
    assert_eq!(snapshot.item_version, "1.2");
    assert_eq!(store.list().expect("must list").len(), 1);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn snapshot_purge_removes_stale_and_corrupt_files() {
    let layout = test_layout();
    let store = SnapshotStore::new(layout.clone());
    store
        .record("plugin:old/old.php", "1.0", None, 1_000)
        .expect("must record");
    store
        .record("plugin:new/new.php", "2.0", None, 90_000)
        .expect("must record");
    fs::write(layout.snapshot_path("garbage"), "not json").expect("must write garbage");

    let removed = store.purge_expired(3_600, 91_000).expect("must purge");
    assert_eq!(removed, 2);
    let remaining = store.list().expect("must list");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].key, "plugin:new/new.php");

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn policy_defaults_when_file_missing() {
    let layout = test_layout();
    let policy = PolicyStore::new(layout.clone())
        .load()
        .expect("must load defaults");
    assert!(policy.logging_enabled);
    assert_eq!(policy.retention_days, 30);
    assert!(policy.auto_updates.core);
    assert!(!policy.auto_updates.plugin);
}

#[test]
fn policy_clamps_out_of_range_values() {
    let policy = Policy::from_toml_str(
        r#"
version = 1
logging_enabled = false
retention_days = 9000
snapshot_ttl_hours = 0

[auto_updates]
plugin = true
"#,
    )
    .expect("policy must parse");
    assert!(!policy.logging_enabled);
    assert_eq!(policy.retention_days, 365);
    assert_eq!(policy.snapshot_ttl_hours, 1);
    assert!(policy.auto_updates.get(ItemKind::Plugin));
    assert!(policy.auto_updates.get(ItemKind::Translation));
}

#[test]
fn policy_rejects_unknown_file_version() {
    let err = Policy::from_toml_str("version = 7\n").expect_err("version 7 must be rejected");
    assert!(err.to_string().contains("unsupported policy version 7"));
}

#[test]
fn policy_update_persists_changes() {
    let layout = test_layout();
    let store = PolicyStore::new(layout.clone());
    store
        .update(|policy| {
            policy.retention_days = 90;
            policy.auto_updates.set(ItemKind::Theme, true);
        })
        .expect("must update policy");

    let reloaded = store.load().expect("must reload");
    assert_eq!(reloaded.retention_days, 90);
    assert!(reloaded.auto_updates.theme);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn layout_paths_are_rooted_under_state_dir() {
    let layout = StateLayout::new("/tmp/upkeep-layout");
    assert_eq!(
        layout.database_path(),
        PathBuf::from("/tmp/upkeep-layout/state/upkeep.sqlite3")
    );
    assert_eq!(
        layout.snapshot_path("abc"),
        PathBuf::from("/tmp/upkeep-layout/state/snapshots/abc.json")
    );
    assert_eq!(
        layout.policy_path(),
        PathBuf::from("/tmp/upkeep-layout/policy.toml")
    );
}

fn test_layout() -> StateLayout {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    StateLayout::new(std::env::temp_dir().join(format!(
        "upkeep-store-test-{}-{nanos}-{seq}",
        std::process::id()
    )))
}
