use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;
use upkeep_core::{ActorKind, LifecycleSignal, UpdateTarget, DEFAULT_TENANT_ID};
use upkeep_engine::{CommitReport, EngineContext, MemoryInventory, ReconciliationEngine};
use upkeep_store::{AuditLog, Policy, StateLayout};

/// A recorded host session: the installed items at the start, then signals
/// interleaved with the file changes the host made between them.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ReplayScript {
    #[serde(default)]
    pub(crate) tenant_id: Option<i64>,
    #[serde(default)]
    pub(crate) actor: Option<ActorKind>,
    #[serde(default)]
    pub(crate) inventory: Vec<InventorySeed>,
    #[serde(default)]
    pub(crate) steps: Vec<ReplayStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct InventorySeed {
    pub(crate) target: UpdateTarget,
    pub(crate) name: String,
    pub(crate) version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ReplayStep {
    Inventory(InventoryChange),
    Signal(LifecycleSignal),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "inventory", rename_all = "kebab-case")]
pub(crate) enum InventoryChange {
    Set(InventorySeed),
    Remove { target: UpdateTarget },
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ReplayOverrides {
    pub(crate) tenant_id: Option<i64>,
    pub(crate) actor: Option<ActorKind>,
}

#[derive(Debug, Clone)]
pub(crate) struct ReplaySummary {
    pub(crate) commits: Vec<CommitReport>,
    pub(crate) write_failures: u64,
}

pub(crate) fn load_script(path: &Path) -> Result<ReplayScript> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read replay script: {}", path.display()))?;
    parse_script(&raw).with_context(|| format!("failed parsing replay script: {}", path.display()))
}

pub(crate) fn parse_script(raw: &str) -> Result<ReplayScript> {
    serde_json::from_str(raw).context("replay script is not valid JSON")
}

/// Runs the script through one engine, as a single host process would, and
/// ends it with a clean shutdown.
pub(crate) fn run_replay(
    layout: &StateLayout,
    policy: &Policy,
    audit: &AuditLog,
    script: ReplayScript,
    overrides: ReplayOverrides,
) -> ReplaySummary {
    let inventory = MemoryInventory::new();
    for seed in script.inventory {
        inventory.set(seed.target, seed.name, seed.version);
    }

    let context = EngineContext::from_policy(policy)
        .with_tenant(
            overrides
                .tenant_id
                .or(script.tenant_id)
                .unwrap_or(DEFAULT_TENANT_ID),
        )
        .with_actor(overrides.actor.or(script.actor).unwrap_or(ActorKind::User));
    let failures_before = audit.write_failures();

    let mut engine = ReconciliationEngine::new(context, layout, audit, &inventory);
    let mut commits = Vec::new();
    for (index, step) in script.steps.into_iter().enumerate() {
        match step {
            ReplayStep::Inventory(InventoryChange::Set(seed)) => {
                debug!(step = index, key = %seed.target.key(), version = %seed.version, "inventory set");
                inventory.set(seed.target, seed.name, seed.version);
            }
            ReplayStep::Inventory(InventoryChange::Remove { target }) => {
                debug!(step = index, key = %target.key(), "inventory remove");
                inventory.remove(&target);
            }
            ReplayStep::Signal(signal) => {
                debug!(step = index, signal = signal.name(), "replaying signal");
                commits.extend(engine.handle(signal));
            }
        }
    }
    commits.extend(engine.shutdown(None));
    drop(engine);

    ReplaySummary {
        commits,
        write_failures: audit.write_failures().saturating_sub(failures_before),
    }
}
