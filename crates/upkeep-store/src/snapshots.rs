use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::StateLayout;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    #[serde(default = "snapshot_file_version")]
    pub version: u32,
    pub key: String,
    pub item_version: String,
    #[serde(default)]
    pub item_name: Option<String>,
    pub captured_at_unix: u64,
}

/// Durable "version before" map keyed by `{kind}:{identity}`.
///
/// Each key lives in its own file so that separate process invocations of
/// one operation (download step, install step) see the same value.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    layout: StateLayout,
}

impl SnapshotStore {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    pub fn record(
        &self,
        key: &str,
        item_version: &str,
        item_name: Option<&str>,
        captured_at_unix: u64,
    ) -> Result<PathBuf> {
        let dir = self.layout.snapshots_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create snapshot dir: {}", dir.display()))?;

        let record = SnapshotRecord {
            version: snapshot_file_version(),
            key: key.to_string(),
            item_version: item_version.to_string(),
            item_name: item_name.map(str::to_string),
            captured_at_unix,
        };
        let content = serde_json::to_string_pretty(&record)
            .with_context(|| format!("failed serializing version snapshot for '{key}'"))?;

        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("failed to write version snapshot: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed to commit version snapshot: {}", path.display()))?;
        Ok(path)
    }

    /// Reads without consuming. Unreadable files are treated as absent.
    pub fn peek(&self, key: &str) -> Result<Option<SnapshotRecord>> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read version snapshot: {}", path.display())
                });
            }
        };

        match serde_json::from_str::<SnapshotRecord>(&raw) {
            Ok(record) if record.key == key => Ok(Some(record)),
            _ => Ok(None),
        }
    }

    /// Read-once: the snapshot is removed so it cannot leak into a later,
    /// unrelated operation on the same item.
    pub fn consume(&self, key: &str) -> Result<Option<SnapshotRecord>> {
        let record = self.peek(key)?;
        self.discard(key)?;
        Ok(record)
    }

    pub fn discard(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err)
                .with_context(|| format!("failed to remove version snapshot: {}", path.display())),
        }
    }

    pub fn list(&self) -> Result<Vec<SnapshotRecord>> {
        let dir = self.layout.snapshots_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed to read snapshot directory: {}", dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file()
                || path.extension().and_then(|v| v.to_str()) != Some("json")
            {
                continue;
            }

            let Ok(raw) = fs::read_to_string(&path) else {
                continue;
            };
            if let Ok(record) = serde_json::from_str::<SnapshotRecord>(&raw) {
                records.push(record);
            }
        }

        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    /// Removes snapshots captured more than `ttl_secs` before `now_unix`, plus
    /// any file that no longer parses. Returns how many were removed.
    pub fn purge_expired(&self, ttl_secs: u64, now_unix: u64) -> Result<usize> {
        let dir = self.layout.snapshots_dir();
        if !dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed to read snapshot directory: {}", dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() {
                continue;
            }

            let expired = match fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<SnapshotRecord>(&raw).ok())
            {
                Some(record) => now_unix.saturating_sub(record.captured_at_unix) > ttl_secs,
                None => true,
            };
            if expired {
                fs::remove_file(&path).with_context(|| {
                    format!("failed to remove stale snapshot: {}", path.display())
                })?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.layout.snapshot_path(&hex::encode(Sha256::digest(key.as_bytes())))
    }
}

fn snapshot_file_version() -> u32 {
    1
}
