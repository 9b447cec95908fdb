use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::actor::Actor;
use super::asset::Asset;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProposalParticipant {
    pub intent_id: String,
    pub actor: Actor,
    pub give: Vec<Asset>,
    pub get: Vec<Asset>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct FeeBreakdown {
    /// Fee in USD owed by each participant intent, 1% of their `get` value.
    pub per_participant_usd: std::collections::BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Explainability {
    pub cycle_length: usize,
    pub base_score: f64,
    pub value_spread: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enumeration_limited: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enumeration_timed_out: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CycleProposal {
    pub id: String,
    pub expires_at: DateTime<Utc>,
    pub participants: Vec<ProposalParticipant>,
    pub confidence_score: f64,
    pub value_spread: f64,
    pub fee_breakdown: FeeBreakdown,
    pub explainability: Explainability,
}

impl CycleProposal {
    pub fn intent_ids(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.intent_id.clone()).collect()
    }

    pub fn cycle_length(&self) -> usize {
        self.participants.len()
    }

    /// Every participant's `get` must equal the next participant's `give`,
    /// as asset sequences, and no two participants may share an intent id.
    pub fn check_invariants(&self) -> Result<(), String> {
        let n = self.participants.len();
        if n < 2 {
            return Err("cycle must have at least 2 participants".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for (i, p) in self.participants.iter().enumerate() {
            if !seen.insert(&p.intent_id) {
                return Err(format!("duplicate intent id in cycle: {}", p.intent_id));
            }
            let next = &self.participants[(i + 1) % n];
            if p.get != next.give {
                return Err(format!(
                    "participant {i}'s get does not match participant {}'s give",
                    (i + 1) % n
                ));
            }
        }
        Ok(())
    }
}
