use std::backtrace::Backtrace;

use serde::{Deserialize, Serialize};

const MAX_FRAMES: usize = 24;

const SKIPPED_PREFIXES: &[&str] = &[
    "upkeep_engine::",
    "<upkeep_engine::",
    "std::",
    "<std::",
    "core::",
    "<core::",
    "alloc::",
    "<alloc::",
    "test::",
    "<test::",
    "__rust",
    "__libc_start",
];

const SKIPPED_SYMBOLS: &[&str] = &["_start", "start_thread", "clone", "clone3", "rust_begin_unwind"];

/// One frame of the structured call trace stored with each entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFrame {
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// Captures the caller's stack with the engine's own frames removed. The first
/// frame always names the lifecycle signal that produced the entry.
pub fn capture_trace(signal: &str, args: Vec<String>) -> Vec<TraceFrame> {
    let mut frames = vec![TraceFrame {
        function: signal.to_string(),
        location: None,
        line: None,
        args,
    }];

    let rendered = Backtrace::force_capture().to_string();
    frames.extend(
        parse_backtrace(&rendered)
            .into_iter()
            .filter(|frame| !is_internal_frame(&frame.function)),
    );
    frames.truncate(MAX_FRAMES);
    frames
}

/// Parses the `Display` form of a std backtrace:
///
/// ```text
///    3: host::apply_update
///              at ./src/host.rs:42:9
/// ```
pub(crate) fn parse_backtrace(rendered: &str) -> Vec<TraceFrame> {
    let mut frames: Vec<TraceFrame> = Vec::new();
    for line in rendered.lines() {
        let line = line.trim();
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                if frame.location.is_none() {
                    let (path, number) = split_location(location);
                    frame.location = Some(path);
                    frame.line = number;
                }
            }
            continue;
        }

        let Some((index, function)) = line.split_once(": ") else {
            continue;
        };
        if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        frames.push(TraceFrame {
            function: function.trim().to_string(),
            location: None,
            line: None,
            args: Vec::new(),
        });
    }
    frames
}

fn split_location(location: &str) -> (String, Option<u32>) {
    let mut parts = location.rsplitn(3, ':');
    let column = parts.next();
    let line = parts.next();
    let path = parts.next();
    match (path, line, column) {
        (Some(path), Some(line), Some(column))
            if line.parse::<u32>().is_ok() && column.parse::<u32>().is_ok() =>
        {
            (path.to_string(), line.parse().ok())
        }
        _ => (location.to_string(), None),
    }
}

fn is_internal_frame(function: &str) -> bool {
    function.starts_with("<unknown>")
        || SKIPPED_SYMBOLS.contains(&function)
        || SKIPPED_PREFIXES
            .iter()
            .any(|prefix| function.starts_with(prefix))
}
