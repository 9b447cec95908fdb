use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::actor::Actor;
use super::asset::Asset;
use super::want_spec::WantSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Active,
    Reserved,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValueBand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing_source: Option<String>,
}

impl ValueBand {
    /// `min_usd ≤ v ≤ max_usd` when the respective bound is finite.
    pub fn contains(&self, v: f64) -> bool {
        if let Some(min) = self.min_usd {
            if v < min {
                return false;
            }
        }
        if let Some(max) = self.max_usd {
            if v > max {
                return false;
            }
        }
        true
    }

    /// `active_max` per spec.md §4.4: the finite upper bound, or `f64::MAX`
    /// when unbounded above, so both the per-swap cap check and the
    /// daily-cap delta treat an unbounded intent as unbounded rather than
    /// silently under-counting it.
    pub fn active_max(&self) -> f64 {
        self.max_usd.unwrap_or(f64::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrustConstraints {
    pub max_cycle_length: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_counterparty_reliability: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TimeConstraints {
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<Urgency>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct SettlementPreferences {
    #[serde(default)]
    pub require_escrow: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SwapIntent {
    pub id: String,
    pub actor: Actor,
    pub offer: Vec<Asset>,
    pub want_spec: WantSpec,
    pub value_band: ValueBand,
    pub trust_constraints: TrustConstraints,
    pub time_constraints: TimeConstraints,
    #[serde(default)]
    pub settlement_preferences: SettlementPreferences,
    pub status: IntentStatus,
}

impl SwapIntent {
    /// An intent with `status != active`, or one past its `expires_at`,
    /// never contributes an edge to the compatibility graph.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == IntentStatus::Active && now <= self.time_constraints.expires_at
    }

    pub fn validate_invariants(&self) -> Result<(), String> {
        if self.trust_constraints.max_cycle_length < 2 {
            return Err("trust_constraints.max_cycle_length must be >= 2".to_string());
        }
        if self.offer.is_empty() {
            return Err("offer must not be empty".to_string());
        }
        if let (Some(min), Some(max)) = (self.value_band.min_usd, self.value_band.max_usd) {
            if min > max {
                return Err("value_band.min_usd must be <= value_band.max_usd".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::actor::Actor;
    use crate::model::asset::Asset;
    use crate::model::want_spec::WantSpec;

    fn sample_intent(status: IntentStatus, expires_at: DateTime<Utc>) -> SwapIntent {
        SwapIntent {
            id: "intent_1".to_string(),
            actor: Actor::user("u1"),
            offer: vec![Asset {
                platform: "steam".to_string(),
                app_id: "730".to_string(),
                context_id: "2".to_string(),
                asset_id: "1".to_string(),
                class_id: None,
                instance_id: None,
                metadata: None,
                proof: None,
            }],
            want_spec: WantSpec::SpecificAsset {
                platform: "steam".to_string(),
                asset_key: "steam:2".to_string(),
            },
            value_band: ValueBand {
                min_usd: Some(10.0),
                max_usd: Some(100.0),
                pricing_source: None,
            },
            trust_constraints: TrustConstraints {
                max_cycle_length: 3,
                min_counterparty_reliability: None,
            },
            time_constraints: TimeConstraints {
                expires_at,
                urgency: None,
            },
            settlement_preferences: SettlementPreferences::default(),
            status,
        }
    }

    #[test]
    fn inactive_status_never_active() {
        let now = Utc::now();
        let intent = sample_intent(IntentStatus::Cancelled, now + chrono::Duration::hours(1));
        assert!(!intent.is_active_at(now));
    }

    #[test]
    fn expired_intent_is_inactive_even_if_active_status() {
        let now = Utc::now();
        let intent = sample_intent(IntentStatus::Active, now - chrono::Duration::hours(1));
        assert!(!intent.is_active_at(now));
    }

    #[test]
    fn active_unexpired_intent_is_active() {
        let now = Utc::now();
        let intent = sample_intent(IntentStatus::Active, now + chrono::Duration::hours(1));
        assert!(intent.is_active_at(now));
    }

    #[test]
    fn value_band_bounds() {
        let band = ValueBand {
            min_usd: Some(80.0),
            max_usd: Some(120.0),
            pricing_source: None,
        };
        assert!(band.contains(100.0));
        assert!(!band.contains(79.9));
        assert!(!band.contains(120.1));
    }

    #[test]
    fn unbounded_value_band_accepts_anything() {
        let band = ValueBand {
            min_usd: None,
            max_usd: None,
            pricing_source: None,
        };
        assert!(band.contains(1e9));
    }
}
