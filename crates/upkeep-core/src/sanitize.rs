//! Field normalization applied to every value before it reaches storage.
//!
//! Every function here is total: invalid input snaps to a documented default,
//! over-long input is truncated, and nothing returns an error.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::NewLogEntry;
use crate::{
    ActorKind, BatchContext, InitiationMode, ItemKind, LogAction, LogRecord, LogStatus,
    DEFAULT_TENANT_ID,
};

pub const MAX_NAME_CHARS: usize = 255;
pub const MAX_SLUG_CHARS: usize = 255;
pub const MAX_VERSION_CHARS: usize = 50;
pub const MAX_LONG_TEXT_BYTES: usize = 65_535;
pub const MAX_PER_PAGE: u32 = 200;
pub const MAX_RETENTION_DAYS: i64 = 365;

static EXECUTABLE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?(</script\s*>|$)|<style\b[^>]*>.*?(</style\s*>|$)")
        .expect("valid regex")
});
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?(-->|$)").expect("valid regex"));
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)</?[A-Za-z!][^>]*(>|$)").expect("valid regex"));

pub fn sanitize_kind(value: &str) -> ItemKind {
    ItemKind::parse(&normalize_token(value)).unwrap_or(ItemKind::Plugin)
}

pub fn sanitize_action(value: &str) -> LogAction {
    LogAction::parse(&normalize_token(value)).unwrap_or(LogAction::Update)
}

pub fn sanitize_status(value: &str) -> LogStatus {
    LogStatus::parse(&normalize_token(value)).unwrap_or(LogStatus::Success)
}

pub fn sanitize_actor(value: &str) -> ActorKind {
    ActorKind::parse(&normalize_token(value)).unwrap_or(ActorKind::System)
}

pub fn sanitize_initiation(value: &str) -> InitiationMode {
    InitiationMode::parse(&normalize_token(value)).unwrap_or(InitiationMode::Manual)
}

pub fn sanitize_batch_context(value: &str) -> BatchContext {
    BatchContext::parse(&normalize_token(value)).unwrap_or(BatchContext::None)
}

pub fn sanitize_tenant_id(value: i64) -> i64 {
    if value < 1 {
        DEFAULT_TENANT_ID
    } else {
        value
    }
}

pub fn sanitize_retention_days(value: i64) -> i64 {
    value.clamp(1, MAX_RETENTION_DAYS)
}

pub fn sanitize_page(value: u32) -> u32 {
    value.max(1)
}

pub fn sanitize_per_page(value: u32) -> u32 {
    value.clamp(1, MAX_PER_PAGE)
}

/// Single-line display text: markup and control characters removed,
/// whitespace collapsed, capped at `max_chars` characters.
pub fn sanitize_text(value: &str, max_chars: usize) -> String {
    let stripped = strip_decoded(value);
    let collapsed = stripped
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    truncate_chars(&collapsed, max_chars)
}

/// Version strings keep only `[A-Za-z0-9._-]`.
pub fn sanitize_version(value: &str) -> String {
    let filtered = value
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
        .collect::<String>();
    truncate_chars(&filtered, MAX_VERSION_CHARS)
}

/// Multi-line narration: markup stripped, entities decoded, line structure kept.
pub fn sanitize_long_text(value: &str) -> String {
    let decoded = strip_decoded(value);
    let cleaned = decoded
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter(|ch| !ch.is_control() || matches!(ch, '\n' | '\t'))
        .collect::<String>();
    truncate_bytes(cleaned.trim(), MAX_LONG_TEXT_BYTES)
}

/// Traces are structured JSON produced by the engine. Only executable markup
/// is removed: frame names such as `<T as Trait>::f` must survive intact.
pub fn sanitize_trace(value: &str) -> String {
    let without_blocks = EXECUTABLE_BLOCK_RE.replace_all(value, "");
    let cleaned = without_blocks
        .chars()
        .filter(|ch| !ch.is_control() || matches!(ch, '\n' | '\t'))
        .collect::<String>();
    truncate_bytes(cleaned.trim(), MAX_LONG_TEXT_BYTES)
}

pub fn sanitize_record(record: LogRecord) -> NewLogEntry {
    NewLogEntry {
        record: LogRecord {
            tenant_id: sanitize_tenant_id(record.tenant_id),
            kind: record.kind,
            action: record.action,
            item_name: sanitize_text(&record.item_name, MAX_NAME_CHARS),
            item_slug: sanitize_text(&record.item_slug, MAX_SLUG_CHARS),
            version_before: sanitize_version(&record.version_before),
            version_after: sanitize_version(&record.version_after),
            status: record.status,
            message: sanitize_long_text(&record.message),
            trace: sanitize_trace(&record.trace),
            actor_kind: record.actor_kind,
            initiation_mode: record.initiation_mode,
            batch_context: record.batch_context,
        },
    }
}

/// Removes script/style blocks, comments, and tags. Text between tags is kept.
pub fn strip_markup(value: &str) -> String {
    let without_blocks = EXECUTABLE_BLOCK_RE.replace_all(value, "");
    let without_comments = COMMENT_RE.replace_all(&without_blocks, "");
    TAG_RE.replace_all(&without_comments, "").into_owned()
}

/// Encoded markup such as `&lt;script&gt;` becomes a live tag once decoded,
/// so the strip runs again on the decoded text.
fn strip_decoded(value: &str) -> String {
    strip_markup(&decode_entities(&strip_markup(value)))
}

/// Decodes named and numeric HTML character references. Unknown or malformed
/// references are left as written.
pub fn decode_entities(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        let Some(end) = candidate[1..]
            .find(|ch: char| ch == ';' || ch == '&' || ch.is_whitespace())
            .map(|offset| offset + 1)
            .filter(|offset| candidate[*offset..].starts_with(';') && *offset <= 12)
        else {
            out.push('&');
            rest = &candidate[1..];
            continue;
        };

        match decode_reference(&candidate[1..end]) {
            Some(decoded) => out.push(decoded),
            None => out.push_str(&candidate[..=end]),
        }
        rest = &candidate[end + 1..];
    }

    out.push_str(rest);
    out
}

fn decode_reference(reference: &str) -> Option<char> {
    if let Some(numeric) = reference.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }

    let decoded = match reference {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "hellip" => '\u{2026}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        "laquo" => '\u{00AB}',
        "raquo" => '\u{00BB}',
        "copy" => '\u{00A9}',
        "reg" => '\u{00AE}',
        "trade" => '\u{2122}',
        _ => return None,
    };
    Some(decoded)
}

fn normalize_token(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((index, _)) => value[..index].to_string(),
        None => value.to_string(),
    }
}

fn truncate_bytes(value: &str, max_bytes: usize) -> String {
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}
