use std::io;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use upkeep_core::{sanitize_retention_days, LogFilter, PageRequest};
use upkeep_store::{
    current_unix_timestamp, default_state_root, AuditLog, LogStore, Policy, PolicyStore,
    SnapshotStore, StateLayout,
};

use crate::completion::write_completions;
use crate::render::{
    current_output_style, format_commit_lines, format_doctor_lines, format_entry_detail,
    format_log_page, format_policy_lines, print_lines, print_status, DoctorReport, OutputStyle,
};
use crate::replay::{load_script, run_replay, ReplayOverrides};
use crate::{Cli, Commands, ListArgs, PolicyCommands};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let style = current_output_style();
    let prefix = cli.prefix;
    // Completions must work without a resolvable state directory.
    let layout = move || resolve_layout(prefix.clone());

    match cli.command {
        Commands::Init => {
            let layout = layout()?;
            let audit = AuditLog::open(&layout)?;
            audit.store().install_schema()?;
            if !layout.policy_path().exists() {
                PolicyStore::new(layout.clone()).save(&Policy::default())?;
            }
            print_status(
                style,
                "ok",
                &format!("initialized {}", layout.root().display()),
            );
        }
        Commands::List(args) => {
            let layout = layout()?;
            let audit = AuditLog::open(&layout)?;
            let request = PageRequest::new(args.page, args.per_page, args.order);
            let page = audit.list_logs(&list_filter(&args), &request)?;
            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&page).context("failed serializing log page")?
                );
            } else {
                print_lines(&format_log_page(&page, &request, style));
            }
        }
        Commands::Show { id, json } => {
            let layout = layout()?;
            let audit = AuditLog::open(&layout)?;
            let entry = audit
                .store()
                .get(id)?
                .ok_or_else(|| anyhow!("no update log entry with id {id}"))?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&entry).context("failed serializing log entry")?
                );
            } else {
                print_lines(&format_entry_detail(&entry));
            }
        }
        Commands::Delete { id } => {
            let layout = layout()?;
            let audit = AuditLog::open(&layout)?;
            if !audit.delete_log(id) {
                return Err(anyhow!("no update log entry with id {id}"));
            }
            print_status(style, "ok", &format!("deleted entry {id}"));
        }
        Commands::Cleanup { days } => {
            let layout = layout()?;
            let policy = PolicyStore::new(layout.clone()).load()?;
            let days = sanitize_retention_days(days.unwrap_or(policy.retention_days));
            let audit = AuditLog::open(&layout)?;
            let removed = audit.cleanup(days);
            print_status(
                style,
                "ok",
                &format!("removed {removed} entries older than {days} days"),
            );

            let purged = SnapshotStore::new(layout.clone())
                .purge_expired(policy.snapshot_ttl_secs(), current_unix_timestamp())?;
            if purged > 0 {
                print_status(
                    style,
                    "ok",
                    &format!("purged {purged} stale version snapshots"),
                );
            }
        }
        Commands::Replay {
            file,
            tenant,
            actor,
        } => {
            let layout = layout()?;
            let script = load_script(&file)?;
            let policy = PolicyStore::new(layout.clone()).load()?;
            let audit = AuditLog::open(&layout)?;
            let summary = run_replay(
                &layout,
                &policy,
                &audit,
                script,
                ReplayOverrides {
                    tenant_id: tenant,
                    actor,
                },
            );

            print_lines(&format_commit_lines(&summary.commits, style));
            if summary.write_failures > 0 {
                print_status(
                    style,
                    "warn",
                    &format!(
                        "{} entries could not be written: run 'upkeep init' to provision the log table",
                        summary.write_failures
                    ),
                );
            }
        }
        Commands::Policy { command } => {
            let layout = layout()?;
            run_policy_command(&layout, command.unwrap_or(PolicyCommands::Show), style)?;
        }
        Commands::Doctor => {
            let layout = layout()?;
            let report = collect_doctor_report(&layout)?;
            print_lines(&format_doctor_lines(&report, style));
        }
        Commands::Completions { shell } => {
            write_completions(shell, &mut io::stdout().lock())?;
        }
    }

    Ok(())
}

fn resolve_layout(prefix: Option<PathBuf>) -> Result<StateLayout> {
    let root = match prefix {
        Some(prefix) => prefix,
        None => default_state_root()?,
    };
    Ok(StateLayout::new(root))
}

pub(crate) fn list_filter(args: &ListArgs) -> LogFilter {
    LogFilter {
        tenant_id: args.tenant,
        kind: args.kind,
        status: args.status,
    }
}

pub(crate) fn run_policy_command(
    layout: &StateLayout,
    command: PolicyCommands,
    style: OutputStyle,
) -> Result<Policy> {
    let store = PolicyStore::new(layout.clone());
    let policy = match command {
        PolicyCommands::Show => store.load()?,
        PolicyCommands::SetLogging { state } => {
            let policy = store.update(|policy| policy.logging_enabled = state.enabled())?;
            print_status(style, "ok", "updated logging switch");
            policy
        }
        PolicyCommands::SetRetention { days } => {
            let policy = store.update(|policy| policy.retention_days = days)?;
            print_status(style, "ok", "updated retention window");
            policy
        }
        PolicyCommands::SetAutoUpdate { kind, state } => {
            let policy = store.update(|policy| policy.auto_updates.set(kind, state.enabled()))?;
            print_status(
                style,
                "ok",
                &format!("updated automatic updates for {}", kind.as_str()),
            );
            policy
        }
    };

    print_lines(&format_policy_lines(&policy));
    Ok(policy)
}

pub(crate) fn collect_doctor_report(layout: &StateLayout) -> Result<DoctorReport> {
    let database = layout.database_path();
    let (table_provisioned, entries) = if database.exists() {
        let store = LogStore::open(&database)?;
        let provisioned = store.table_exists()?;
        (provisioned, store.count(&LogFilter::default())?)
    } else {
        (false, 0)
    };

    let policy = PolicyStore::new(layout.clone())
        .load()
        .map_err(|err| format!("{err:#}"));
    let snapshots = SnapshotStore::new(layout.clone()).list()?;

    Ok(DoctorReport {
        root: layout.root().to_path_buf(),
        database,
        table_provisioned,
        entries,
        snapshots,
        policy,
        now_unix: current_unix_timestamp(),
    })
}
