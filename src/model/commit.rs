use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommitPhase {
    Pending,
    Ready,
    Cancelled,
}

/// One commit per proposal: tracks which participant intents have
/// accepted and declined. Reaches `ready` iff every participant intent
/// has accepted and none has declined; declines are sticky and
/// immediately move the commit to `cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Commit {
    pub proposal_id: String,
    pub participant_intent_ids: Vec<String>,
    pub accepted: BTreeSet<String>,
    pub declined: BTreeSet<String>,
    pub phase: CommitPhase,
}

impl Commit {
    pub fn new(proposal_id: impl Into<String>, participant_intent_ids: Vec<String>) -> Self {
        Commit {
            proposal_id: proposal_id.into(),
            participant_intent_ids,
            accepted: BTreeSet::new(),
            declined: BTreeSet::new(),
            phase: CommitPhase::Pending,
        }
    }

    pub fn is_unanimous(&self) -> bool {
        self.declined.is_empty()
            && self
                .participant_intent_ids
                .iter()
                .all(|id| self.accepted.contains(id))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, CommitPhase::Ready | CommitPhase::Cancelled)
    }
}
