use std::fs;
use std::io;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use upkeep_core::{sanitize_retention_days, ItemKind};

use crate::StateLayout;

pub const DEFAULT_RETENTION_DAYS: i64 = 30;
pub const DEFAULT_SNAPSHOT_TTL_HOURS: i64 = 24;
const MAX_SNAPSHOT_TTL_HOURS: i64 = 720;

/// Automatic-update toggles owned by the host. They are stored here so the
/// management surface can read and flip them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoUpdatePolicy {
    #[serde(default = "enabled")]
    pub core: bool,
    #[serde(default)]
    pub plugin: bool,
    #[serde(default)]
    pub theme: bool,
    #[serde(default = "enabled")]
    pub translation: bool,
}

impl Default for AutoUpdatePolicy {
    fn default() -> Self {
        Self {
            core: true,
            plugin: false,
            theme: false,
            translation: true,
        }
    }
}

impl AutoUpdatePolicy {
    pub fn get(&self, kind: ItemKind) -> bool {
        match kind {
            ItemKind::Core => self.core,
            ItemKind::Plugin => self.plugin,
            ItemKind::Theme => self.theme,
            ItemKind::Translation => self.translation,
        }
    }

    pub fn set(&mut self, kind: ItemKind, enabled: bool) {
        match kind {
            ItemKind::Core => self.core = enabled,
            ItemKind::Plugin => self.plugin = enabled,
            ItemKind::Theme => self.theme = enabled,
            ItemKind::Translation => self.translation = enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default = "policy_file_version")]
    pub version: u32,
    #[serde(default = "enabled")]
    pub logging_enabled: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_snapshot_ttl_hours")]
    pub snapshot_ttl_hours: i64,
    #[serde(default)]
    pub auto_updates: AutoUpdatePolicy,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            version: policy_file_version(),
            logging_enabled: true,
            retention_days: DEFAULT_RETENTION_DAYS,
            snapshot_ttl_hours: DEFAULT_SNAPSHOT_TTL_HOURS,
            auto_updates: AutoUpdatePolicy::default(),
        }
    }
}

impl Policy {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut policy: Self = toml::from_str(content).context("failed to parse policy file")?;
        let expected = policy_file_version();
        if policy.version != expected {
            anyhow::bail!(
                "unsupported policy version {} (expected {}): update policy.toml to version {}",
                policy.version,
                expected,
                expected
            );
        }
        policy.normalize();
        Ok(policy)
    }

    pub fn normalize(&mut self) {
        self.retention_days = sanitize_retention_days(self.retention_days);
        self.snapshot_ttl_hours = self.snapshot_ttl_hours.clamp(1, MAX_SNAPSHOT_TTL_HOURS);
    }

    pub fn snapshot_ttl_secs(&self) -> u64 {
        u64::try_from(self.snapshot_ttl_hours.clamp(1, MAX_SNAPSHOT_TTL_HOURS)).unwrap_or(1) * 3600
    }
}

#[derive(Debug, Clone)]
pub struct PolicyStore {
    layout: StateLayout,
}

impl PolicyStore {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    /// A missing file yields the defaults.
    pub fn load(&self) -> Result<Policy> {
        let path = self.layout.policy_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Policy::default()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read policy file: {}", path.display()));
            }
        };

        Policy::from_toml_str(&content)
            .with_context(|| format!("failed parsing policy file: {}", path.display()))
    }

    pub fn save(&self, policy: &Policy) -> Result<()> {
        let mut policy = policy.clone();
        policy.normalize();
        let content = toml::to_string_pretty(&policy).context("failed serializing policy")?;

        let path = self.layout.policy_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&path, content)
            .with_context(|| format!("failed to write policy file: {}", path.display()))
    }

    pub fn update(&self, change: impl FnOnce(&mut Policy)) -> Result<Policy> {
        let mut policy = self.load()?;
        change(&mut policy);
        policy.normalize();
        self.save(&policy)?;
        Ok(policy)
    }
}

fn policy_file_version() -> u32 {
    1
}

fn enabled() -> bool {
    true
}

fn default_retention_days() -> i64 {
    DEFAULT_RETENTION_DAYS
}

fn default_snapshot_ttl_hours() -> i64 {
    DEFAULT_SNAPSHOT_TTL_HOURS
}
