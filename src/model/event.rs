use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::actor::Actor;
use crate::crypto::{KeyRing, Signature};

/// Tagged union of every event payload the engine emits. Dispatch is
/// always by the `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type")]
pub enum EventPayload {
    #[serde(rename = "proposal.created")]
    ProposalCreated { proposal_id: String, intent_ids: Vec<String> },
    #[serde(rename = "proposal.expiring")]
    ProposalExpiring { proposal_id: String, expires_at: DateTime<Utc> },
    #[serde(rename = "cycle.state_changed")]
    CycleStateChanged {
        cycle_id: String,
        from_state: String,
        to_state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason_code: Option<String>,
    },
    #[serde(rename = "settlement.deposit_required")]
    SettlementDepositRequired {
        cycle_id: String,
        intent_id: String,
        deposit_deadline_at: DateTime<Utc>,
    },
    #[serde(rename = "settlement.deposit_confirmed")]
    SettlementDepositConfirmed {
        cycle_id: String,
        intent_id: String,
        deposit_ref: String,
    },
    #[serde(rename = "settlement.executing")]
    SettlementExecuting { cycle_id: String },
    #[serde(rename = "intent.unreserved")]
    IntentUnreserved { intent_id: String, cycle_id: String },
    #[serde(rename = "receipt.created")]
    ReceiptCreated { receipt_id: String, cycle_id: String },
    #[serde(rename = "vault.deposit_confirmed")]
    VaultDepositConfirmed { holding_id: String },
    #[serde(rename = "vault.holding_reserved")]
    VaultHoldingReserved { holding_id: String, reservation_id: String },
    #[serde(rename = "vault.holding_released")]
    VaultHoldingReleased { holding_id: String },
    #[serde(rename = "vault.holding_withdrawn")]
    VaultHoldingWithdrawn { holding_id: String },
}

impl EventPayload {
    pub fn type_str(&self) -> &'static str {
        match self {
            EventPayload::ProposalCreated { .. } => "proposal.created",
            EventPayload::ProposalExpiring { .. } => "proposal.expiring",
            EventPayload::CycleStateChanged { .. } => "cycle.state_changed",
            EventPayload::SettlementDepositRequired { .. } => "settlement.deposit_required",
            EventPayload::SettlementDepositConfirmed { .. } => "settlement.deposit_confirmed",
            EventPayload::SettlementExecuting { .. } => "settlement.executing",
            EventPayload::IntentUnreserved { .. } => "intent.unreserved",
            EventPayload::ReceiptCreated { .. } => "receipt.created",
            EventPayload::VaultDepositConfirmed { .. } => "vault.deposit_confirmed",
            EventPayload::VaultHoldingReserved { .. } => "vault.holding_reserved",
            EventPayload::VaultHoldingReleased { .. } => "vault.holding_released",
            EventPayload::VaultHoldingWithdrawn { .. } => "vault.holding_withdrawn",
        }
    }

    /// The type-specific `key` folded into the event id hash: proposal id,
    /// transition edge, `intentId|depositRef`, etc.
    pub fn id_key(&self) -> String {
        match self {
            EventPayload::ProposalCreated { proposal_id, .. } => proposal_id.clone(),
            EventPayload::ProposalExpiring { proposal_id, .. } => proposal_id.clone(),
            EventPayload::CycleStateChanged {
                cycle_id,
                from_state,
                to_state,
                ..
            } => format!("{cycle_id}|{from_state}->{to_state}"),
            EventPayload::SettlementDepositRequired { cycle_id, intent_id, .. } => {
                format!("{cycle_id}|{intent_id}")
            }
            EventPayload::SettlementDepositConfirmed {
                intent_id,
                deposit_ref,
                ..
            } => format!("{intent_id}|{deposit_ref}"),
            EventPayload::SettlementExecuting { cycle_id } => cycle_id.clone(),
            EventPayload::IntentUnreserved { intent_id, cycle_id } => {
                format!("{intent_id}|{cycle_id}")
            }
            EventPayload::ReceiptCreated { receipt_id, .. } => receipt_id.clone(),
            EventPayload::VaultDepositConfirmed { holding_id } => holding_id.clone(),
            EventPayload::VaultHoldingReserved {
                holding_id,
                reservation_id,
            } => format!("{holding_id}|{reservation_id}"),
            EventPayload::VaultHoldingReleased { holding_id } => holding_id.clone(),
            EventPayload::VaultHoldingWithdrawn { holding_id } => holding_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub correlation_id: String,
    pub actor: Actor,
    pub payload: EventPayload,
    pub signature: Signature,
}

/// `event_id` = 12-hex SHA-256 of `type|correlation_id|key`.
pub fn event_id(payload: &EventPayload, correlation_id: &str) -> String {
    let input = format!("{}|{}|{}", payload.type_str(), correlation_id, payload.id_key());
    crate::crypto::canonical::sha256_prefix(&input, 12)
}

/// Build and sign an event against `ring`. Every subsystem that emits
/// events (settlement, vault, delivery) goes through this so the signed
/// envelope is always the same shape.
pub fn sign_event(payload: EventPayload, correlation_id: &str, actor: &Actor, ring: &KeyRing, now: DateTime<Utc>) -> Event {
    let id = event_id(&payload, correlation_id);
    let unsigned = serde_json::json!({
        "event_id": id,
        "type": payload.type_str(),
        "occurred_at": now,
        "correlation_id": correlation_id,
        "actor": actor,
        "payload": payload,
    });
    let signature = ring.sign(&unsigned);
    Event {
        event_id: id,
        event_type: payload.type_str().to_string(),
        occurred_at: now,
        correlation_id: correlation_id.to_string(),
        actor: actor.clone(),
        payload,
        signature,
    }
}
