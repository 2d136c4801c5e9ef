use std::cmp::Ordering;

use semver::Version;

use crate::LogAction;

/// Decides the final action for a completed operation.
///
/// An `install` hint is taken at face value. Otherwise two comparable versions
/// decide between downgrade, same-version and update; anything else falls back
/// to the hint.
pub fn classify(version_before: &str, version_after: &str, hint: LogAction) -> LogAction {
    if hint == LogAction::Install {
        return LogAction::Install;
    }

    match compare_versions(version_before, version_after) {
        Some(Ordering::Greater) => LogAction::Downgrade,
        Some(Ordering::Equal) => LogAction::SameVersion,
        Some(Ordering::Less) => LogAction::Update,
        None => hint,
    }
}

/// Orders two free-form version strings. Versions that fit semver after
/// padding (`6.4` -> `6.4.0`) are compared as semver; anything else is
/// compared segment by segment on its numeric components. Returns `None`
/// when either side is empty or has no numeric component.
pub fn compare_versions(left: &str, right: &str) -> Option<Ordering> {
    let left = left.trim();
    let right = right.trim();
    if left.is_empty() || right.is_empty() {
        return None;
    }

    if let (Some(left), Some(right)) = (lenient_semver(left), lenient_semver(right)) {
        return Some(left.cmp(&right));
    }

    let left = SegmentedVersion::parse(left)?;
    let right = SegmentedVersion::parse(right)?;
    Some(left.cmp(&right))
}

fn lenient_semver(raw: &str) -> Option<Version> {
    let raw = raw.strip_prefix(['v', 'V']).unwrap_or(raw);
    let (core, pre) = match raw.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (raw, None),
    };

    let parts = core.split('.').collect::<Vec<_>>();
    if parts.is_empty()
        || parts.len() > 3
        || parts
            .iter()
            .any(|part| part.is_empty() || !part.chars().all(|ch| ch.is_ascii_digit()))
    {
        return None;
    }

    let mut numbers = parts
        .iter()
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    numbers.resize(3, 0);

    let mut normalized = format!("{}.{}.{}", numbers[0], numbers[1], numbers[2]);
    if let Some(pre) = pre {
        normalized.push('-');
        normalized.push_str(pre);
    }
    Version::parse(&normalized).ok()
}

#[derive(Debug, PartialEq, Eq)]
struct SegmentedVersion {
    numbers: Vec<u64>,
    suffix: Option<String>,
}

impl SegmentedVersion {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.strip_prefix(['v', 'V']).unwrap_or(raw);
        let mut numbers = Vec::new();
        let mut suffix = None;

        for (index, segment) in raw.split(['.', '-', '_', '+']).enumerate() {
            if !segment.is_empty() && segment.chars().all(|ch| ch.is_ascii_digit()) {
                numbers.push(segment.parse::<u64>().unwrap_or(u64::MAX));
                continue;
            }

            let rest = raw
                .split(['.', '-', '_', '+'])
                .skip(index)
                .collect::<Vec<_>>()
                .join(".");
            suffix = Some(rest.to_ascii_lowercase());
            break;
        }

        if numbers.is_empty() {
            return None;
        }
        Some(Self { numbers, suffix })
    }
}

impl Ord for SegmentedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.numbers.len().max(other.numbers.len());
        for index in 0..width {
            let left = self.numbers.get(index).copied().unwrap_or(0);
            let right = other.numbers.get(index).copied().unwrap_or(0);
            match left.cmp(&right) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }

        // A release sorts after any pre-release of the same numbers.
        match (&self.suffix, &other.suffix) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(left), Some(right)) => left.cmp(right),
        }
    }
}

impl PartialOrd for SegmentedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
