use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};

use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use upkeep_core::{
    ActorKind, BatchContext, InitiationMode, ItemKind, LogAction, LogEntry, LogStatus,
    PageRequest, SortOrder,
};
use upkeep_engine::CommitReport;
use upkeep_store::{AuditLog, LogPage, Policy, PolicyStore, StateLayout};

use super::*;
use crate::completion::write_completions;
use crate::dispatch::{collect_doctor_report, list_filter, run_policy_command};
use crate::render::{
    format_commit_lines, format_doctor_lines, format_entry_detail, format_log_page,
    format_versions, render_status_line, resolve_output_style, OutputStyle,
};
use crate::replay::{parse_script, run_replay, ReplayOverrides, ReplayStep};

const UPLOAD_SCRIPT: &str = r#"{
  "inventory": [
    { "target": { "kind": "plugin", "file": "bar/bar.php" }, "name": "Bar Plugin", "version": "2.0" }
  ],
  "steps": [
    { "signal": "package-options-init", "kind": "plugin", "source": "upload",
      "declared": { "name": "Bar Plugin", "version": "1.9" } },
    { "signal": "progress-narration", "text": "<p>Unpacking the package&#8230;</p>" },
    { "inventory": "set", "target": { "kind": "plugin", "file": "bar/bar.php" }, "name": "Bar Plugin", "version": "1.9" },
    { "signal": "process-complete", "kind": "plugin", "action": "install",
      "items": [ { "target": { "kind": "plugin", "file": "bar/bar.php" } } ] }
  ]
}"#;

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn list_arguments_parse_filters_and_paging() {
    let cli = Cli::try_parse_from([
        "upkeep",
        "--prefix",
        "/tmp/upkeep",
        "list",
        "--tenant",
        "3",
        "--kind",
        "theme",
        "--status",
        "error",
        "--page",
        "2",
        "--per-page",
        "50",
        "--order",
        "asc",
    ])
    .expect("must parse list command");

    let Commands::List(args) = cli.command else {
        panic!("expected list command");
    };
    assert_eq!(args.page, 2);
    assert_eq!(args.per_page, 50);
    assert_eq!(args.order, SortOrder::OldestFirst);
    let filter = list_filter(&args);
    assert_eq!(filter.tenant_id, Some(3));
    assert_eq!(filter.kind, Some(ItemKind::Theme));
    assert_eq!(filter.status, Some(LogStatus::Error));
}

#[test]
fn list_rejects_unknown_kind() {
    let err = Cli::try_parse_from(["upkeep", "list", "--kind", "widget"])
        .expect_err("unknown kind must be rejected");
    assert!(err.to_string().contains("widget"));
}

#[test]
fn policy_subcommand_parses_toggles() {
    let cli = Cli::try_parse_from(["upkeep", "policy", "set-auto-update", "plugin", "on"])
        .expect("must parse policy command");
    let Commands::Policy {
        command: Some(PolicyCommands::SetAutoUpdate { kind, state }),
    } = cli.command
    else {
        panic!("expected set-auto-update");
    };
    assert_eq!(kind, ItemKind::Plugin);
    assert!(state.enabled());
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "deleted entry 4"),
        "deleted entry 4"
    );
}

#[test]
fn render_status_line_rich_includes_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "logging is switched off"),
        "[WARN] logging is switched off"
    );
    assert_eq!(resolve_output_style(true, true), OutputStyle::Rich);
    assert_eq!(resolve_output_style(true, false), OutputStyle::Plain);
    assert_eq!(resolve_output_style(false, true), OutputStyle::Plain);
}

#[test]
fn format_versions_handles_missing_sides() {
    assert_eq!(format_versions("1.0", "1.1"), "1.0 -> 1.1");
    assert_eq!(format_versions("", "1.1"), "-> 1.1");
    assert_eq!(format_versions("3.0", ""), "3.0");
    assert_eq!(format_versions("", ""), "-");
}

#[test]
fn format_log_page_lists_rows_and_page_footer() {
    let page = LogPage {
        entries: vec![sample_entry(7)],
        total: 41,
    };
    let request = PageRequest::new(2, 20, SortOrder::NewestFirst);
    let lines = format_log_page(&page, &request, OutputStyle::Plain);

    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("ACTION"));
    assert!(lines[1].contains("plugin"));
    assert!(lines[1].contains("update"));
    assert!(lines[1].contains("1.0 -> 1.1"));
    assert_eq!(lines[2], "page 2 of 3 (41 entries)");

    let empty = LogPage {
        entries: Vec::new(),
        total: 0,
    };
    assert_eq!(
        format_log_page(&empty, &request, OutputStyle::Plain),
        vec!["no update log entries"]
    );
}

#[test]
fn entry_detail_renders_message_and_trace_frames() {
    let mut entry = sample_entry(3);
    entry.message = "Downloading update\nPlugin updated successfully.".to_string();
    entry.trace = r#"[{"function":"process-complete","args":["plugin","foo/foo.php"]},{"function":"host::apply","location":"src/host.rs","line":12}]"#.to_string();

    let lines = format_entry_detail(&entry);
    assert!(lines.contains(&"  Downloading update".to_string()));
    assert!(lines.contains(&"  process-complete(plugin, foo/foo.php)".to_string()));
    assert!(lines.contains(&"  host::apply at src/host.rs:12".to_string()));
}

#[test]
fn commit_lines_report_unrecorded_entries() {
    let commits = vec![CommitReport {
        key: "theme:twentyten".to_string(),
        action: LogAction::Update,
        status: LogStatus::Error,
        version_before: "3.0".to_string(),
        version_after: "3.1".to_string(),
        id: None,
    }];
    assert_eq!(
        format_commit_lines(&commits, OutputStyle::Rich),
        vec!["[ERR] theme:twentyten: update 3.0 -> 3.1 (not recorded)"]
    );
}

#[test]
fn replay_script_mixes_inventory_changes_and_signals() {
    let script = parse_script(UPLOAD_SCRIPT).expect("must parse script");
    assert_eq!(script.inventory.len(), 1);
    assert_eq!(script.steps.len(), 4);
    assert!(matches!(script.steps[0], ReplayStep::Signal(_)));
    assert!(matches!(script.steps[2], ReplayStep::Inventory(_)));
}

#[test]
fn replay_records_upload_downgrade() {
    let layout = test_layout();
    let audit = provisioned_audit(&layout);
    let script = parse_script(UPLOAD_SCRIPT).expect("must parse script");

    let summary = run_replay(
        &layout,
        &Policy::default(),
        &audit,
        script,
        ReplayOverrides {
            tenant_id: Some(4),
            actor: None,
        },
    );

    assert_eq!(summary.write_failures, 0);
    assert_eq!(summary.commits.len(), 1);
    assert_eq!(summary.commits[0].action, LogAction::Downgrade);

    let entry = audit
        .store()
        .get(summary.commits[0].id.expect("entry must be recorded"))
        .expect("must read entry")
        .expect("entry must exist");
    assert_eq!(entry.tenant_id, 4);
    assert_eq!(entry.actor_kind, ActorKind::User);
    assert_eq!(entry.initiation_mode, InitiationMode::Upload);
    assert_eq!(entry.version_before, "2.0");
    assert_eq!(entry.version_after, "1.9");
    assert_eq!(entry.message, "Unpacking the package\u{2026}");

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn replay_without_completion_flushes_incomplete_entry() {
    let layout = test_layout();
    let audit = provisioned_audit(&layout);
    let script = parse_script(
        r#"{
          "actor": "system",
          "inventory": [ { "target": { "kind": "core" }, "name": "Core", "version": "6.4" } ],
          "steps": [
            { "signal": "pre-update", "kind": "core" },
            { "signal": "package-options-init", "kind": "core", "new_version": "6.5" },
            { "signal": "process-shutdown", "fatal_error": "Maximum execution time exceeded" }
          ]
        }"#,
    )
    .expect("must parse script");

    let summary = run_replay(
        &layout,
        &Policy::default(),
        &audit,
        script,
        ReplayOverrides::default(),
    );

    assert_eq!(summary.commits.len(), 1);
    assert_eq!(summary.commits[0].status, LogStatus::Error);
    let entry = audit
        .store()
        .get(summary.commits[0].id.expect("entry must be recorded"))
        .expect("must read entry")
        .expect("entry must exist");
    assert_eq!(entry.initiation_mode, InitiationMode::Automatic);
    assert_eq!(entry.batch_context, BatchContext::Single);
    assert!(entry.message.contains("may not have completed"));
    assert!(entry.message.contains("Maximum execution time exceeded"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn replay_counts_failures_on_unprovisioned_store() {
    let layout = test_layout();
    let audit = AuditLog::open(&layout).expect("must open audit log");
    let script = parse_script(UPLOAD_SCRIPT).expect("must parse script");

    let summary = run_replay(
        &layout,
        &Policy::default(),
        &audit,
        script,
        ReplayOverrides::default(),
    );
    assert_eq!(summary.commits.len(), 1);
    assert_eq!(summary.commits[0].id, None);
    assert_eq!(summary.write_failures, 1);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn policy_commands_persist_changes() {
    let layout = test_layout();
    run_policy_command(
        &layout,
        PolicyCommands::SetLogging { state: Toggle::Off },
        OutputStyle::Plain,
    )
    .expect("must update logging");
    let policy = run_policy_command(
        &layout,
        PolicyCommands::SetRetention { days: 900 },
        OutputStyle::Plain,
    )
    .expect("must update retention");

    assert!(!policy.logging_enabled);
    assert_eq!(policy.retention_days, 365);
    let reloaded = PolicyStore::new(layout.clone())
        .load()
        .expect("must reload policy");
    assert_eq!(reloaded, policy);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn doctor_flags_missing_table() {
    let layout = test_layout();
    let report = collect_doctor_report(&layout).expect("must collect report");
    assert!(!report.table_provisioned);
    let lines = format_doctor_lines(&report, OutputStyle::Rich);
    assert!(lines
        .iter()
        .any(|line| line.starts_with("[WARN] log table missing")));

    let audit = provisioned_audit(&layout);
    drop(audit);
    let report = collect_doctor_report(&layout).expect("must collect report");
    assert!(report.table_provisioned);
    assert_eq!(report.entries, 0);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn completions_name_the_binary() {
    let mut out = Vec::new();
    write_completions(Shell::Bash, &mut out).expect("must write completions");
    let script = String::from_utf8(out).expect("completions must be utf-8");
    assert!(script.contains("upkeep"));
}

fn sample_entry(id: i64) -> LogEntry {
    LogEntry {
        id,
        tenant_id: 1,
        kind: ItemKind::Plugin,
        action: LogAction::Update,
        item_name: "Foo".to_string(),
        item_slug: "foo".to_string(),
        version_before: "1.0".to_string(),
        version_after: "1.1".to_string(),
        status: LogStatus::Success,
        message: String::new(),
        trace: String::new(),
        actor_kind: ActorKind::User,
        initiation_mode: InitiationMode::Manual,
        batch_context: BatchContext::Single,
        created_at: "2026-01-02 03:04:05".to_string(),
    }
}

fn provisioned_audit(layout: &StateLayout) -> AuditLog {
    let audit = AuditLog::open(layout).expect("must open audit log");
    audit
        .store()
        .install_schema()
        .expect("must install schema");
    audit
}

fn test_layout() -> StateLayout {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    StateLayout::new(std::env::temp_dir().join(format!(
        "upkeep-cli-test-{}-{nanos}-{seq}",
        std::process::id()
    )))
}
