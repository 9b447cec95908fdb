use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crypto::{base64url, Signature};
use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConsentTier {
    StepUp,
    Passkey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QuietHours {
    /// `HH:MM`.
    pub start: String,
    /// `HH:MM`.
    pub end: String,
    pub tz: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet_hours: Option<QuietHours>,
    pub max_value_per_swap_usd: f64,
    pub max_cycle_length: u32,
    pub min_confidence_score: f64,
    pub require_escrow: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value_per_day_usd: Option<f64>,
    pub high_value_consent_threshold_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Delegation {
    pub delegation_id: String,
    pub principal_agent: String,
    pub subject_actor: String,
    pub scopes: Vec<String>,
    pub policy: Policy,
    pub issued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Delegation {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        match self.expires_at {
            Some(exp) => now <= exp,
            None => true,
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// The payload carried inside an `sgdt1.` token, before the persisted
/// delegation (if any) takes precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DelegationTokenBody {
    pub delegation: Delegation,
    pub signature: Signature,
}

const DELEGATION_TOKEN_PREFIX: &str = "sgdt1.";

pub fn encode_delegation_token(body: &DelegationTokenBody) -> EngineResult<String> {
    let json = serde_json::to_string(body).map_err(|e| EngineError::Internal(e.to_string()))?;
    Ok(format!("{DELEGATION_TOKEN_PREFIX}{}", base64url::encode(json.as_bytes())))
}

pub fn decode_delegation_token(token: &str) -> EngineResult<DelegationTokenBody> {
    let encoded = token.strip_prefix(DELEGATION_TOKEN_PREFIX).ok_or_else(|| {
        EngineError::SchemaInvalid {
            message: "delegation token missing sgdt1. prefix".to_string(),
        }
    })?;
    let bytes = base64url::decode(encoded).map_err(|e| EngineError::SchemaInvalid {
        message: format!("delegation token is not valid base64url: {e}"),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| EngineError::SchemaInvalid {
        message: format!("delegation token payload malformed: {e}"),
    })
}

/// The `user_consent` block presented alongside a high-value operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UserConsent {
    pub consent_id: String,
    pub consent_tier: ConsentTier,
    pub consent_proof: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_max_usd: Option<f64>,
}

/// The payload signed inside an `sgcp2.` consent proof token, prior to
/// base64url + prefix transport. The challenge variant additionally
/// binds `operation_id` and `challenge_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConsentProofBody {
    pub consent_id: String,
    pub subject: String,
    pub delegation_id: String,
    pub intent_id: String,
    pub max_usd_cents: i64,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<String>,
    pub signature: Signature,
}

const CONSENT_PROOF_PREFIX: &str = "sgcp2.";

pub fn encode_consent_proof(body: &ConsentProofBody) -> EngineResult<String> {
    let json = serde_json::to_string(body).map_err(|e| EngineError::Internal(e.to_string()))?;
    Ok(format!("{CONSENT_PROOF_PREFIX}{}", base64url::encode(json.as_bytes())))
}

pub fn decode_consent_proof(token: &str) -> EngineResult<ConsentProofBody> {
    let encoded = token.strip_prefix(CONSENT_PROOF_PREFIX).ok_or_else(|| {
        EngineError::SchemaInvalid {
            message: "consent proof missing sgcp2. prefix".to_string(),
        }
    })?;
    let bytes = base64url::decode(encoded).map_err(|e| EngineError::SchemaInvalid {
        message: format!("consent proof is not valid base64url: {e}"),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| EngineError::SchemaInvalid {
        message: format!("consent proof payload malformed: {e}"),
    })
}

/// Binds `consent_id | subject | delegation_id | intent_id | round(max_usd*100)`,
/// with the challenge variant appending `| operation_id | challenge_id`.
pub fn consent_proof_binding_string(body: &ConsentProofBody) -> String {
    match (&body.operation_id, &body.challenge_id) {
        (Some(op), Some(ch)) => format!(
            "{}|{}|{}|{}|{}|{}|{}",
            body.consent_id, body.subject, body.delegation_id, body.intent_id, body.max_usd_cents, op, ch
        ),
        _ => format!(
            "{}|{}|{}|{}|{}",
            body.consent_id, body.subject, body.delegation_id, body.intent_id, body.max_usd_cents
        ),
    }
}
