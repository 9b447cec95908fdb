use std::collections::HashMap;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EngineError;

use super::base64url;
use super::canonical;

/// Which purpose a key ring serves. Four independent rings exist so that
/// rotating one (e.g. receipts) never invalidates another (e.g. delegation
/// tokens already handed to agents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RingKind {
    Event,
    Receipt,
    Delegation,
    PolicyIntegrity,
}

/// A signature attached to a signed payload, per spec.md §3/§4.5.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Signature {
    pub key_id: String,
    pub alg: String,
    pub sig: String,
}

/// One key ring: an active signing key plus any number of verify-only keys
/// kept around so older signatures remain verifiable after rotation.
pub struct KeyRing {
    active_key_id: String,
    active: SigningKey,
    verify_only: HashMap<String, VerifyingKey>,
}

impl KeyRing {
    /// Build a ring from a 32-byte seed for the active key, plus any
    /// number of (key_id, 32-byte public key) pairs for retired keys that
    /// must still verify.
    pub fn new(
        active_key_id: impl Into<String>,
        active_seed: [u8; 32],
        verify_only: Vec<(String, [u8; 32])>,
    ) -> Self {
        let active = SigningKey::from_bytes(&active_seed);
        let verify_only = verify_only
            .into_iter()
            .map(|(id, bytes)| {
                let vk = VerifyingKey::from_bytes(&bytes).expect("valid ed25519 public key");
                (id, vk)
            })
            .collect();
        KeyRing {
            active_key_id: active_key_id.into(),
            active,
            verify_only,
        }
    }

    pub fn active_key_id(&self) -> &str {
        &self.active_key_id
    }

    pub fn known_key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.verify_only.keys().cloned().collect();
        ids.push(self.active_key_id.clone());
        ids
    }

    fn resolve(&self, key_id: &str) -> Option<VerifyingKey> {
        if key_id == self.active_key_id {
            Some(self.active.verifying_key())
        } else {
            self.verify_only.get(key_id).copied()
        }
    }

    /// Sign the canonical form of `payload` (which must already have any
    /// `signature` field stripped) with the active key.
    pub fn sign(&self, payload: &Value) -> Signature {
        let bytes = canonical::to_canonical_bytes(payload);
        let sig = self.active.sign(&bytes);
        Signature {
            key_id: self.active_key_id.clone(),
            alg: "ed25519".to_string(),
            sig: base64url::encode(&sig.to_bytes()),
        }
    }

    /// Verify `signature` was produced over the canonical form of `payload`
    /// by a key known to this ring (active or retired).
    pub fn verify(&self, payload: &Value, signature: &Signature) -> Result<(), EngineError> {
        if signature.alg != "ed25519" {
            return Err(EngineError::unauthorized(format!(
                "unsupported_alg:{}",
                signature.alg
            )));
        }
        let verifying_key = self
            .resolve(&signature.key_id)
            .ok_or_else(|| EngineError::unauthorized("unknown_key_id"))?;

        let sig_bytes = base64url::decode(&signature.sig)
            .map_err(|_| EngineError::unauthorized("bad_signature"))?;
        let sig_bytes: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| EngineError::unauthorized("bad_signature"))?;
        let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);

        let bytes = canonical::to_canonical_bytes(payload);
        verifying_key
            .verify(&bytes, &sig)
            .map_err(|_| EngineError::unauthorized("bad_signature"))
    }
}

/// The four key rings the integrity plane depends on, loaded once at
/// startup and treated as read-only for the lifetime of the engine.
pub struct KeyRings {
    pub event: KeyRing,
    pub receipt: KeyRing,
    pub delegation: KeyRing,
    pub policy_integrity: KeyRing,
}

impl KeyRings {
    pub fn ring(&self, kind: RingKind) -> &KeyRing {
        match kind {
            RingKind::Event => &self.event,
            RingKind::Receipt => &self.receipt,
            RingKind::Delegation => &self.delegation,
            RingKind::PolicyIntegrity => &self.policy_integrity,
        }
    }

    /// Deterministic key material for tests and demos: every ring's active
    /// key is derived from a fixed seed so fixtures are reproducible.
    pub fn deterministic_for_tests() -> Self {
        KeyRings {
            event: KeyRing::new("evt-key-1", [1u8; 32], vec![]),
            receipt: KeyRing::new("rcpt-key-1", [2u8; 32], vec![]),
            delegation: KeyRing::new("dlg-key-1", [3u8; 32], vec![]),
            policy_integrity: KeyRing::new("pi-key-1", [4u8; 32], vec![]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sign_then_verify_round_trips() {
        let ring = KeyRing::new("k1", [9u8; 32], vec![]);
        let payload = json!({"a": 1, "b": "x"});
        let sig = ring.sign(&payload);
        assert!(ring.verify(&payload, &sig).is_ok());
    }

    #[test]
    fn unknown_key_id_rejected() {
        let ring = KeyRing::new("k1", [9u8; 32], vec![]);
        let payload = json!({"a": 1});
        let mut sig = ring.sign(&payload);
        sig.key_id = "unknown".to_string();
        let err = ring.verify(&payload, &sig).unwrap_err();
        assert_eq!(err.to_string(), "unauthorized: unknown_key_id");
    }

    #[test]
    fn tampered_payload_rejected() {
        let ring = KeyRing::new("k1", [9u8; 32], vec![]);
        let payload = json!({"a": 1});
        let sig = ring.sign(&payload);
        let tampered = json!({"a": 2});
        assert!(ring.verify(&tampered, &sig).is_err());
    }

    #[test]
    fn retired_key_still_verifies_after_rotation() {
        let retired_seed = [7u8; 32];
        let retired_vk = SigningKey::from_bytes(&retired_seed).verifying_key();
        let old_ring = KeyRing::new("old", retired_seed, vec![]);

        let payload = json!({"a": 1});
        let old_sig = old_ring.sign(&payload);

        let rotated =
            KeyRing::new("new", [8u8; 32], vec![("old".to_string(), retired_vk.to_bytes())]);
        assert!(rotated.verify(&payload, &old_sig).is_ok());
    }
}
