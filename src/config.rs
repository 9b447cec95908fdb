use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::matching::EnumerationBudget;
use crate::policy::ConsentEnforcementFlags;

/// Cycle enumeration bounds passed to `matching::enumerate_cycles` on every
/// `marketplace.matching.runs.create` call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnumerationConfig {
    pub min_cycle_length: usize,
    pub max_cycle_length: usize,
    pub max_enumerated_cycles: Option<usize>,
    pub timeout_ms: Option<u64>,
}

impl Default for EnumerationConfig {
    fn default() -> Self {
        EnumerationConfig {
            min_cycle_length: 2,
            max_cycle_length: 8,
            max_enumerated_cycles: Some(10_000),
            timeout_ms: Some(2_000),
        }
    }
}

impl EnumerationConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_cycle_length < 2 {
            return Err("min_cycle_length must be >= 2".to_string());
        }
        if self.max_cycle_length < self.min_cycle_length {
            return Err("max_cycle_length must be >= min_cycle_length".to_string());
        }
        Ok(())
    }

    pub fn budget(&self) -> EnumerationBudget {
        EnumerationBudget {
            max_enumerated_cycles: self.max_enumerated_cycles,
            timeout: self.timeout_ms.map(Duration::from_millis),
        }
    }
}

/// How deposits into escrow are protected while a cycle is in flight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettlementConfig {
    pub deposit_window_hours: i64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        SettlementConfig { deposit_window_hours: 6 }
    }
}

impl SettlementConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.deposit_window_hours <= 0 {
            return Err("deposit_window_hours must be positive".to_string());
        }
        Ok(())
    }

    pub fn deposit_window(&self) -> Duration {
        Duration::from_secs((self.deposit_window_hours.max(0) as u64) * 3600)
    }
}

/// State-store backend selection. `Sqlite` is only usable when the crate
/// is built with the `sqlite` feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    File { path: PathBuf },
    Sqlite { path: PathBuf },
}

impl Default for StoreBackend {
    fn default() -> Self {
        StoreBackend::File {
            path: crate::store::FileStateStore::default_path(),
        }
    }
}

/// Whether `authz::authorize` is enforced at all. Disabling it is only
/// meant for local demos against the CLI binary; it is never valid in a
/// deployed engine, which is why it has no env-var shortcut.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AuthzConfig {
    pub enforce: bool,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        AuthzConfig { enforce: true }
    }
}

/// The engine's full validated configuration. Construct with
/// [`EngineConfig::validate`] before handing to [`crate::engine::Engine::new`];
/// the engine itself never re-validates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub enumeration: EnumerationConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub store: StoreBackend,
    #[serde(default)]
    pub authz: AuthzConfig,
    #[serde(default = "default_consent_flags")]
    pub consent: ConsentFlagsConfig,
}

fn default_consent_flags() -> ConsentFlagsConfig {
    ConsentFlagsConfig::from(ConsentEnforcementFlags::default())
}

/// Serde-friendly mirror of [`ConsentEnforcementFlags`] (which deliberately
/// carries no serde derive — it is policy-internal, not wire-facing).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConsentFlagsConfig {
    pub require_tier: bool,
    pub require_binding: bool,
    pub require_signature: bool,
    pub require_replay: bool,
    pub require_challenge: bool,
}

impl From<ConsentEnforcementFlags> for ConsentFlagsConfig {
    fn from(flags: ConsentEnforcementFlags) -> Self {
        ConsentFlagsConfig {
            require_tier: flags.require_tier,
            require_binding: flags.require_binding,
            require_signature: flags.require_signature,
            require_replay: flags.require_replay,
            require_challenge: flags.require_challenge,
        }
    }
}

impl From<ConsentFlagsConfig> for ConsentEnforcementFlags {
    fn from(cfg: ConsentFlagsConfig) -> Self {
        ConsentEnforcementFlags {
            require_tier: cfg.require_tier,
            require_binding: cfg.require_binding,
            require_signature: cfg.require_signature,
            require_replay: cfg.require_replay,
            require_challenge: cfg.require_challenge,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            enumeration: EnumerationConfig::default(),
            settlement: SettlementConfig::default(),
            store: StoreBackend::default(),
            authz: AuthzConfig::default(),
            consent: default_consent_flags(),
        }
    }
}

impl EngineConfig {
    /// In-memory config for tests and the CLI's `--ephemeral` mode.
    pub fn ephemeral() -> Self {
        EngineConfig {
            store: StoreBackend::Memory,
            ..EngineConfig::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.enumeration.validate()?;
        self.settlement.validate()?;
        ConsentEnforcementFlags::from(self.consent).validate()?;
        if matches!(self.store, StoreBackend::Sqlite { .. }) && !cfg!(feature = "sqlite") {
            return Err("StoreBackend::Sqlite requires the `sqlite` feature".to_string());
        }
        Ok(())
    }

    pub fn consent_flags(&self) -> ConsentEnforcementFlags {
        self.consent.into()
    }
}
