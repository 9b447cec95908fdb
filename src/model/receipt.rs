use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crypto::Signature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptFinalState {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ReceiptTransparency {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Receipt {
    pub id: String,
    pub cycle_id: String,
    pub final_state: ReceiptFinalState,
    pub intent_ids: Vec<String>,
    pub asset_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fees: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transparency: Option<ReceiptTransparency>,
    pub signature: Signature,
}

/// Receipt id = `receipt_` + 12-hex SHA-256 prefix of `cycle_id|final_state`.
pub fn receipt_id(cycle_id: &str, final_state: ReceiptFinalState) -> String {
    let tag = match final_state {
        ReceiptFinalState::Completed => "completed",
        ReceiptFinalState::Failed => "failed",
    };
    let prefix = crate::crypto::canonical::sha256_prefix(&format!("{cycle_id}|{tag}"), 12);
    format!("receipt_{prefix}")
}
