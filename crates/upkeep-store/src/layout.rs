use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn database_path(&self) -> PathBuf {
        self.state_dir().join("upkeep.sqlite3")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.state_dir().join("snapshots")
    }

    pub fn snapshot_path(&self, file_stem: &str) -> PathBuf {
        self.snapshots_dir().join(format!("{file_stem}.json"))
    }

    pub fn policy_path(&self) -> PathBuf {
        self.root.join("policy.toml")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.state_dir(), self.snapshots_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// `UPKEEP_PREFIX` when set, otherwise a per-user directory.
pub fn default_state_root() -> Result<PathBuf> {
    if let Some(prefix) = std::env::var_os("UPKEEP_PREFIX").filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(prefix));
    }

    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows state root")?;
        return Ok(PathBuf::from(app_data).join("Upkeep"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve state root")?;
    Ok(PathBuf::from(home).join(".upkeep"))
}
