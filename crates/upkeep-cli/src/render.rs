use std::io::{self, IsTerminal};
use std::path::PathBuf;

use anstyle::{AnsiColor, Effects, Style};
use upkeep_core::{ItemKind, LogEntry, LogStatus, PageRequest};
use upkeep_engine::{CommitReport, TraceFrame};
use upkeep_store::{LogPage, Policy, SnapshotRecord};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) struct DoctorReport {
    pub(crate) root: PathBuf,
    pub(crate) database: PathBuf,
    pub(crate) table_provisioned: bool,
    pub(crate) entries: u64,
    pub(crate) snapshots: Vec<SnapshotRecord>,
    pub(crate) policy: Result<Policy, String>,
    pub(crate) now_unix: u64,
}

pub(crate) fn resolve_output_style(stdout_is_terminal: bool, color_allowed: bool) -> OutputStyle {
    if stdout_is_terminal && color_allowed {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(
        io::stdout().is_terminal(),
        std::env::var_os("NO_COLOR").is_none(),
    )
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

pub(crate) fn print_status(style: OutputStyle, status: &str, message: &str) {
    let line = match style {
        OutputStyle::Plain => render_status_line(style, status, message),
        OutputStyle::Rich => format!(
            "{} {message}",
            colorize(status_style(status), status_badge(status))
        ),
    };
    println!("{line}");
}

pub(crate) fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

pub(crate) fn format_versions(before: &str, after: &str) -> String {
    match (before.is_empty(), after.is_empty()) {
        (false, false) => format!("{before} -> {after}"),
        (true, false) => format!("-> {after}"),
        (false, true) => before.to_string(),
        (true, true) => "-".to_string(),
    }
}

pub(crate) fn format_log_page(
    page: &LogPage,
    request: &PageRequest,
    style: OutputStyle,
) -> Vec<String> {
    if page.entries.is_empty() {
        return vec!["no update log entries".to_string()];
    }

    let mut lines = vec![format!(
        "{:>6}  {:<19}  {:<11}  {:<12}  {:<9}  {:<28}  VERSIONS",
        "ID", "CREATED", "KIND", "ACTION", "STATUS", "ITEM"
    )];
    for entry in &page.entries {
        let status = format!("{:<9}", entry.status.as_str());
        let status = match style {
            OutputStyle::Plain => status,
            OutputStyle::Rich => colorize(log_status_style(entry.status), &status),
        };
        lines.push(format!(
            "{:>6}  {:<19}  {:<11}  {:<12}  {}  {:<28}  {}",
            entry.id,
            entry.created_at,
            entry.kind.as_str(),
            entry.action.as_str(),
            status,
            truncate_cell(&entry.item_name, 28),
            format_versions(&entry.version_before, &entry.version_after)
        ));
    }

    let per_page = u64::from(request.per_page.max(1));
    let pages = page.total.div_ceil(per_page).max(1);
    lines.push(format!(
        "page {} of {pages} ({} entries)",
        request.page, page.total
    ));
    lines
}

pub(crate) fn format_entry_detail(entry: &LogEntry) -> Vec<String> {
    let mut lines = vec![
        format!("id: {}", entry.id),
        format!("tenant: {}", entry.tenant_id),
        format!("created: {}", entry.created_at),
        format!("kind: {}", entry.kind.as_str()),
        format!("item: {} ({})", entry.item_name, entry.item_slug),
        format!("action: {}", entry.action.as_str()),
        format!("status: {}", entry.status.as_str()),
        format!(
            "versions: {}",
            format_versions(&entry.version_before, &entry.version_after)
        ),
        format!(
            "initiated: {} by {}",
            entry.initiation_mode.as_str(),
            entry.actor_kind.as_str()
        ),
    ];
    if !entry.batch_context.as_str().is_empty() {
        lines.push(format!("batch: {}", entry.batch_context.as_str()));
    }

    if !entry.message.is_empty() {
        lines.push("message:".to_string());
        lines.extend(entry.message.lines().map(|line| format!("  {line}")));
    }

    if !entry.trace.is_empty() {
        lines.push("trace:".to_string());
        match serde_json::from_str::<Vec<TraceFrame>>(&entry.trace) {
            Ok(frames) => lines.extend(frames.iter().map(format_frame)),
            Err(_) => lines.push(format!("  {}", entry.trace)),
        }
    }
    lines
}

fn format_frame(frame: &TraceFrame) -> String {
    let mut line = format!("  {}", frame.function);
    if !frame.args.is_empty() {
        line.push_str(&format!("({})", frame.args.join(", ")));
    }
    match (&frame.location, frame.line) {
        (Some(location), Some(number)) => line.push_str(&format!(" at {location}:{number}")),
        (Some(location), None) => line.push_str(&format!(" at {location}")),
        _ => {}
    }
    line
}

pub(crate) fn format_commit_lines(commits: &[CommitReport], style: OutputStyle) -> Vec<String> {
    if commits.is_empty() {
        return vec!["no operations reconciled".to_string()];
    }

    commits
        .iter()
        .map(|commit| {
            let status = match commit.status {
                LogStatus::Success => "ok",
                LogStatus::Error | LogStatus::Cancelled => "err",
            };
            let recorded = match commit.id {
                Some(id) => format!("entry {id}"),
                None => "not recorded".to_string(),
            };
            render_status_line(
                style,
                status,
                &format!(
                    "{}: {} {} ({recorded})",
                    commit.key,
                    commit.action.as_str(),
                    format_versions(&commit.version_before, &commit.version_after)
                ),
            )
        })
        .collect()
}

pub(crate) fn format_policy_lines(policy: &Policy) -> Vec<String> {
    let mut lines = vec![
        format!("logging: {}", on_off(policy.logging_enabled)),
        format!("retention_days: {}", policy.retention_days),
        format!("snapshot_ttl_hours: {}", policy.snapshot_ttl_hours),
    ];
    for kind in ItemKind::ALL {
        lines.push(format!(
            "auto_update.{}: {}",
            kind.as_str(),
            on_off(policy.auto_updates.get(kind))
        ));
    }
    lines
}

pub(crate) fn format_doctor_lines(report: &DoctorReport, style: OutputStyle) -> Vec<String> {
    let mut lines = vec![
        format!("state root: {}", report.root.display()),
        format!("database: {}", report.database.display()),
    ];

    if report.table_provisioned {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("log table provisioned ({} entries)", report.entries),
        ));
    } else {
        lines.push(render_status_line(
            style,
            "warn",
            "log table missing: entries are dropped until 'upkeep init' runs",
        ));
    }

    match &report.policy {
        Ok(policy) => {
            lines.push(render_status_line(style, "ok", "policy readable"));
            if !policy.logging_enabled {
                lines.push(render_status_line(style, "warn", "logging is switched off"));
            }
        }
        Err(err) => lines.push(render_status_line(
            style,
            "err",
            &format!("policy unreadable: {err}"),
        )),
    }

    if report.snapshots.is_empty() {
        lines.push(render_status_line(style, "ok", "no version snapshots awaiting reconciliation"));
    } else {
        lines.push(render_status_line(
            style,
            "warn",
            &format!(
                "{} version snapshots awaiting reconciliation",
                report.snapshots.len()
            ),
        ));
        for snapshot in &report.snapshots {
            let age = report.now_unix.saturating_sub(snapshot.captured_at_unix);
            lines.push(format!(
                "  {} at {} ({}s old)",
                snapshot.key, snapshot.item_version, age
            ));
        }
    }
    lines
}

fn truncate_cell(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut truncated = value.chars().take(width.saturating_sub(3)).collect::<String>();
    truncated.push_str("...");
    truncated
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "warn" => "[WARN]",
        "err" => "[ERR]",
        _ => "[..]",
    }
}

fn status_style(status: &str) -> Style {
    match status {
        "ok" => Style::new().fg_color(Some(AnsiColor::Green.into())),
        "warn" => Style::new().fg_color(Some(AnsiColor::Yellow.into())),
        "err" => Style::new()
            .fg_color(Some(AnsiColor::Red.into()))
            .effects(Effects::BOLD),
        _ => Style::new().fg_color(Some(AnsiColor::BrightBlue.into())),
    }
}

fn log_status_style(status: LogStatus) -> Style {
    match status {
        LogStatus::Success => status_style("ok"),
        LogStatus::Error => status_style("err"),
        LogStatus::Cancelled => status_style("warn"),
    }
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}
