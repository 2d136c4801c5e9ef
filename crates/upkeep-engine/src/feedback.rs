use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use upkeep_core::sanitize_long_text;

static BLOCK_BREAK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(p|div|li|h[1-6]|pre)\s*>").expect("valid regex")
});

const NOISE_LINES: &[&str] = &["More details.", "Show details.", "Hide details."];
const NOISE_SUFFIX: &str = " More details.";

/// Collects the human-readable narration the host emits while an operation
/// runs.
///
/// Chunks are only kept while armed. An item boundary closes the current
/// segment: tagged segments belong to that item, untagged ones are shared by
/// every item of the operation.
#[derive(Debug, Default)]
pub struct NarrationSink {
    armed: bool,
    current: String,
    shared: Vec<String>,
    segments: BTreeMap<String, Vec<String>>,
}

impl NarrationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms capture. Text already collected in this operation is kept.
    pub fn start_capture(&mut self) {
        self.armed = true;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn append_chunk(&mut self, text: &str) {
        if self.armed {
            self.current.push_str(text);
            self.current.push('\n');
        }
    }

    pub fn item_boundary(&mut self, key: Option<&str>) {
        let segment = normalize_narration(&std::mem::take(&mut self.current));
        if segment.is_empty() {
            return;
        }
        match key {
            Some(key) => self
                .segments
                .entry(key.to_string())
                .or_default()
                .push(segment),
            None => self.shared.push(segment),
        }
    }

    /// Disarms capture and returns everything collected so far.
    pub fn stop_capture(&mut self) -> String {
        self.item_boundary(None);
        self.armed = false;
        self.shared
            .iter()
            .chain(self.segments.values().flatten())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Narration for one item: its own segments when the host tagged any,
    /// otherwise the shared narration.
    pub fn narration_for(&mut self, key: &str) -> String {
        match self.segments.remove(key) {
            Some(segments) => segments.join("\n"),
            None => self.shared.join("\n"),
        }
    }

    pub fn shared(&self) -> String {
        self.shared.join("\n")
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Turns raw host feedback into plain multi-line text: markup removed,
/// entities decoded, blank lines and "details" toggles dropped.
pub fn normalize_narration(raw: &str) -> String {
    let broken = BLOCK_BREAK_RE.replace_all(raw, "\n");
    let text = sanitize_long_text(&broken);

    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines() {
        let mut line = line.trim();
        if NOISE_LINES.contains(&line) {
            continue;
        }
        if let Some(stripped) = line.strip_suffix(NOISE_SUFFIX) {
            line = stripped.trim_end();
        }
        if line.is_empty() || lines.last() == Some(&line) {
            continue;
        }
        lines.push(line);
    }
    lines.join("\n")
}
