use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::actor::Actor;
use super::asset::Asset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    #[serde(rename = "escrow.pending")]
    EscrowPending,
    #[serde(rename = "escrow.ready")]
    EscrowReady,
    Executing,
    Completed,
    Failed,
}

impl CycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CycleState::Completed | CycleState::Failed)
    }

    pub fn as_wire_str(self) -> &'static str {
        match self {
            CycleState::EscrowPending => "escrow.pending",
            CycleState::EscrowReady => "escrow.ready",
            CycleState::Executing => "executing",
            CycleState::Completed => "completed",
            CycleState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LegStatus {
    Pending,
    Deposited,
    Released,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DepositMode {
    Manual,
    Vault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Leg {
    pub leg_id: String,
    pub intent_id: String,
    pub from_actor: Actor,
    pub to_actor: Actor,
    pub assets: Vec<Asset>,
    pub status: LegStatus,
    pub deposit_deadline_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_mode: Option<DepositMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_holding_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_reservation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Timeline {
    pub cycle_id: String,
    pub state: CycleState,
    pub legs: Vec<Leg>,
    pub updated_at: DateTime<Utc>,
}

impl Timeline {
    pub fn all_legs_deposited(&self) -> bool {
        self.legs.iter().all(|l| l.status == LegStatus::Deposited)
    }

    pub fn leg_for_intent(&self, intent_id: &str) -> Option<&Leg> {
        self.legs.iter().find(|l| l.intent_id == intent_id)
    }

    pub fn leg_for_intent_mut(&mut self, intent_id: &str) -> Option<&mut Leg> {
        self.legs.iter_mut().find(|l| l.intent_id == intent_id)
    }
}
