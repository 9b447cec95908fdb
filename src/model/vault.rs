use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::actor::Actor;
use super::asset::Asset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VaultHoldingStatus {
    Available,
    Reserved,
    Withdrawn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VaultHolding {
    pub holding_id: String,
    pub vault_id: String,
    pub asset: Asset,
    pub owner_actor: Actor,
    pub status: VaultHoldingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_cycle_id: Option<String>,
    pub deposited_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl VaultHolding {
    pub fn is_available(&self) -> bool {
        self.status == VaultHoldingStatus::Available
    }

    /// Whether this holding may back the given leg: currently reserved,
    /// owned by the leg's `from_actor`, matching asset and reservation id.
    pub fn matches_binding(&self, owner: &Actor, asset: &Asset, reservation_id: &str) -> bool {
        self.status == VaultHoldingStatus::Reserved
            && &self.owner_actor == owner
            && self.asset.fingerprint() == asset.fingerprint()
            && self.reservation_id.as_deref() == Some(reservation_id)
    }
}

/// A many-to-one back-reference from an intent to the cycle that holds
/// its reservation. Modelled as a map entry, not ownership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Reservation {
    pub cycle_id: String,
    pub reserved_at: DateTime<Utc>,
}
