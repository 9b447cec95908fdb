use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::crypto::canonical;
use crate::errors::{EngineError, EngineResult};
use crate::model::Actor;

/// `actor_type:actor_id|operation_id|idempotency_key`.
fn scope_key(actor: &Actor, operation_id: &str, idempotency_key: &str) -> String {
    format!("{}|{}|{}", actor.scope_key(), operation_id, idempotency_key)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub payload_hash: String,
    pub response: serde_json::Value,
}

/// What the caller should do with an in-flight mutation once the ledger
/// has been consulted.
#[derive(Debug)]
pub enum IdempotencyOutcome {
    /// First time this key has been seen; caller should execute the
    /// operation and then call [`IdempotencyLedger::store`].
    Fresh,
    /// Exact replay: return the stored response, no side effects.
    Replayed(serde_json::Value),
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IdempotencyLedger {
    records: HashMap<String, IdempotencyRecord>,
}

impl IdempotencyLedger {
    pub fn new() -> Self {
        IdempotencyLedger::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Looks up `(actor, operation_id, idempotency_key)`. A payload hash
    /// mismatch against a prior record is `IDEMPOTENCY_KEY_REUSE_PAYLOAD_MISMATCH`;
    /// an exact match returns the stored response; a miss asks the caller
    /// to proceed.
    pub fn check(
        &self,
        actor: &Actor,
        operation_id: &str,
        idempotency_key: &str,
        payload: &serde_json::Value,
    ) -> EngineResult<IdempotencyOutcome> {
        let key = scope_key(actor, operation_id, idempotency_key);
        let given_hash = canonical::sha256_hex(payload);
        match self.records.get(&key) {
            None => Ok(IdempotencyOutcome::Fresh),
            Some(record) if record.payload_hash == given_hash => {
                Ok(IdempotencyOutcome::Replayed(record.response.clone()))
            }
            Some(record) => Err(EngineError::IdempotencyKeyReusePayloadMismatch {
                stored_hash: record.payload_hash.clone(),
                given_hash,
            }),
        }
    }

    pub fn store(
        &mut self,
        actor: &Actor,
        operation_id: &str,
        idempotency_key: &str,
        payload: &serde_json::Value,
        response: serde_json::Value,
    ) {
        let key = scope_key(actor, operation_id, idempotency_key);
        let payload_hash = canonical::sha256_hex(payload);
        self.records.insert(key, IdempotencyRecord { payload_hash, response });
    }
}
