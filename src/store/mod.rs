use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crypto::canonical;
use crate::idempotency::IdempotencyLedger;
use crate::model::{Commit, CycleProposal, Delegation, Event, Receipt, Reservation, SwapIntent, Timeline, VaultHolding};

#[cfg(feature = "sqlite")]
pub mod sqlite;

/// One completed invocation of `marketplace.matching.runs.create`: the
/// proposals it produced and the diagnostics surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MatchingRun {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub proposal_ids: Vec<String>,
    pub candidate_intent_count: usize,
    pub enumerated_cycle_count: usize,
    #[serde(default)]
    pub enumeration_limited: bool,
    #[serde(default)]
    pub enumeration_timed_out: bool,
}

/// Partner tenancy scoping: which partner recorded a given cycle or
/// proposal, restricting read access to that partner plus the involved
/// actors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenancyState {
    pub cycles: HashMap<String, String>,
    pub proposals: HashMap<String, String>,
}

/// Per-subject daily spend accumulator: `spend[subject][YYYY-MM-DD]`.
pub type PolicySpendDaily = HashMap<String, HashMap<String, f64>>;

/// `(consent_id, subject, delegation_id, nonce)` tuples already observed
/// under replay enforcement, joined with `|`.
pub type PolicyConsentReplay = HashSet<String>;

/// The full engine state, one object per entity family, matching the
/// persisted-state layout exactly. Serialized canonically so byte-equal
/// snapshots survive migration between storage backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub intents: HashMap<String, SwapIntent>,
    pub proposals: HashMap<String, CycleProposal>,
    pub commits: HashMap<String, Commit>,
    pub reservations: HashMap<String, Reservation>,
    pub timelines: HashMap<String, Timeline>,
    pub receipts: HashMap<String, Receipt>,
    pub delegations: HashMap<String, Delegation>,
    pub tenancy: TenancyState,
    pub events: Vec<Event>,
    pub idempotency: IdempotencyLedger,
    pub vault_holdings: HashMap<String, VaultHolding>,
    pub vault_events: Vec<Event>,
    pub policy_spend_daily: PolicySpendDaily,
    pub policy_consent_replay: PolicyConsentReplay,
    pub webhook_seen_event_ids: HashSet<String>,
    pub matching_runs: HashMap<String, MatchingRun>,
}

/// Persistence backend for the engine's single snapshot. Implementations
/// are only ever called from behind the engine's writer lock.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<Snapshot>;
    fn save(&self, snapshot: &Snapshot) -> Result<()>;
}

/// JSON-on-disk snapshot store, written atomically (tmp file + rename) so
/// a crash mid-write never corrupts the last good snapshot.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStateStore { path: path.into() }
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".swapmesh")
            .join("snapshot.json")
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            return Ok(Snapshot::default());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading snapshot at {}", self.path.display()))?;
        let snapshot: Snapshot = serde_json::from_str(&contents)
            .with_context(|| format!("parsing snapshot at {}", self.path.display()))?;
        Ok(snapshot)
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating snapshot dir {}", parent.display()))?;
        }
        let value = serde_json::to_value(snapshot).context("serializing snapshot")?;
        let canonical_bytes = canonical::to_canonical_bytes(&value);

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &canonical_bytes)
            .with_context(|| format!("writing snapshot tmp {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming snapshot tmp -> {}", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), bytes = canonical_bytes.len(), "snapshot persisted");
        Ok(())
    }
}

/// In-memory store for tests and ephemeral CLI sessions. Never touches disk.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: std::sync::Mutex<Snapshot>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        MemoryStateStore::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Snapshot> {
        Ok(self.inner.lock().expect("snapshot mutex poisoned").clone())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        *self.inner.lock().expect("snapshot mutex poisoned") = snapshot.clone();
        Ok(())
    }
}

pub fn snapshot_path_or_default(path: Option<&Path>) -> PathBuf {
    path.map(|p| p.to_path_buf()).unwrap_or_else(FileStateStore::default_path)
}
