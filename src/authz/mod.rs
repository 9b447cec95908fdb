use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::crypto::keys::KeyRing;
use crate::errors::{EngineError, EngineResult};
use crate::model::{Actor, ActorType, Delegation, DelegationTokenBody};

/// `operation_id → {required, allowed_actor_types, required_scopes}`.
#[derive(Debug, Clone)]
pub struct OperationRule {
    pub required: bool,
    pub allowed_actor_types: Vec<ActorType>,
    pub required_scopes: Vec<String>,
}

impl OperationRule {
    fn open() -> Self {
        OperationRule {
            required: false,
            allowed_actor_types: vec![ActorType::User, ActorType::Agent, ActorType::Partner],
            required_scopes: vec![],
        }
    }

    fn user_or_agent(scopes: &[&str]) -> Self {
        OperationRule {
            required: true,
            allowed_actor_types: vec![ActorType::User, ActorType::Agent],
            required_scopes: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn user_only(scopes: &[&str]) -> Self {
        OperationRule {
            required: true,
            allowed_actor_types: vec![ActorType::User],
            required_scopes: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn partner_only(scopes: &[&str]) -> Self {
        OperationRule {
            required: true,
            allowed_actor_types: vec![ActorType::Partner],
            required_scopes: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperationManifest {
    rules: HashMap<&'static str, OperationRule>,
}

impl OperationManifest {
    pub fn default_manifest() -> Self {
        let mut rules = HashMap::new();
        rules.insert("intents.create", OperationRule::user_or_agent(&["intents.create"]));
        rules.insert("intents.update", OperationRule::user_or_agent(&["intents.update"]));
        rules.insert("intents.cancel", OperationRule::user_or_agent(&["intents.cancel"]));
        rules.insert("intents.list", OperationRule::user_or_agent(&["intents.read"]));
        rules.insert("intents.get", OperationRule::user_or_agent(&["intents.read"]));
        rules.insert(
            "marketplace.matching.runs.create",
            OperationRule::user_or_agent(&["matching.run"]),
        );
        rules.insert(
            "marketplace.matching.runs.get",
            OperationRule::user_or_agent(&["matching.read"]),
        );
        rules.insert("cycle_proposals.list", OperationRule::user_or_agent(&["proposals.read"]));
        rules.insert("cycle_proposals.get", OperationRule::user_or_agent(&["proposals.read"]));
        rules.insert("cycle_proposals.accept", OperationRule::user_or_agent(&["proposals.commit"]));
        rules.insert("cycle_proposals.decline", OperationRule::user_or_agent(&["proposals.commit"]));
        rules.insert("settlement.start", OperationRule::user_or_agent(&["settlement.write"]));
        rules.insert(
            "settlement.deposit_confirmed",
            OperationRule::user_or_agent(&["settlement.write"]),
        );
        rules.insert(
            "settlement.begin_execution",
            OperationRule::user_or_agent(&["settlement.write"]),
        );
        rules.insert("settlement.complete", OperationRule::user_or_agent(&["settlement.write"]));
        rules.insert("settlement.status", OperationRule::user_or_agent(&["settlement.read"]));
        rules.insert("receipts.get", OperationRule::user_or_agent(&["receipts.read"]));
        rules.insert("vault.deposit", OperationRule::user_or_agent(&["vault.write"]));
        rules.insert("vault.reserve", OperationRule::user_or_agent(&["vault.write"]));
        rules.insert("vault.release", OperationRule::user_or_agent(&["vault.write"]));
        rules.insert("vault.withdraw", OperationRule::user_or_agent(&["vault.write"]));
        rules.insert("vault.get", OperationRule::user_or_agent(&["vault.read"]));
        rules.insert("vault.list", OperationRule::user_or_agent(&["vault.read"]));
        rules.insert("delegations.mint", OperationRule::user_only(&["delegations.write"]));
        rules.insert("delegations.revoke", OperationRule::user_only(&["delegations.write"]));
        rules.insert("delegations.list", OperationRule::user_only(&["delegations.read"]));
        rules.insert(
            "webhooks.proposals.ingest",
            OperationRule::partner_only(&["webhooks.ingest"]),
        );
        rules.insert("health.read", OperationRule::open());
        OperationManifest { rules }
    }

    pub fn rule(&self, operation_id: &str) -> Option<&OperationRule> {
        self.rules.get(operation_id)
    }
}

impl Default for OperationManifest {
    fn default() -> Self {
        OperationManifest::default_manifest()
    }
}

/// Decodes an `sgdt1.` token, verifies its signature against `ring`, and
/// reconciles it against any persisted delegation record: a persisted
/// record wins over the fields presented in the token, and a
/// subject/principal mismatch between the two is `FORBIDDEN`. `now`, when
/// given, additionally enforces expiry.
pub fn resolve_delegation(
    token: &str,
    persisted: Option<&Delegation>,
    ring: &KeyRing,
    now: Option<DateTime<Utc>>,
) -> EngineResult<Delegation> {
    let body: DelegationTokenBody = crate::model::delegation::decode_delegation_token(token)?;
    let signed_payload = serde_json::to_value(&body.delegation).map_err(|e| EngineError::SchemaInvalid {
        message: e.to_string(),
    })?;
    ring.verify(&signed_payload, &body.signature)?;

    let resolved = match persisted {
        Some(p) => {
            if p.principal_agent != body.delegation.principal_agent || p.subject_actor != body.delegation.subject_actor
            {
                return Err(EngineError::forbidden("delegation subject/principal mismatch"));
            }
            p.clone()
        }
        None => body.delegation,
    };

    if resolved.revoked_at.is_some() {
        return Err(EngineError::unauthorized("delegation_revoked"));
    }
    if let Some(now) = now {
        if let Some(expires_at) = resolved.expires_at {
            if now > expires_at {
                return Err(EngineError::unauthorized("delegation_expired"));
            }
        }
    }
    Ok(resolved)
}

/// Full per-operation authorization check per the manifest. `delegation`
/// must be `Some` and resolved (see [`resolve_delegation`]) whenever
/// `actor` is an agent.
pub fn authorize(
    manifest: &OperationManifest,
    operation_id: &str,
    actor: &Actor,
    presented_scopes: &[String],
    delegation: Option<&Delegation>,
) -> EngineResult<()> {
    let rule = manifest
        .rule(operation_id)
        .ok_or_else(|| EngineError::forbidden(format!("unknown operation id {operation_id}")))?;

    if !rule.required {
        return Ok(());
    }

    if !rule.allowed_actor_types.contains(&actor.actor_type) {
        return Err(EngineError::forbidden(format!(
            "actor type {:?} not permitted for {operation_id}",
            actor.actor_type
        )));
    }

    if actor.actor_type == ActorType::Agent {
        let delegation = delegation
            .ok_or_else(|| EngineError::forbidden("agent actor requires a valid delegation"))?;
        if delegation.principal_agent != actor.id {
            return Err(EngineError::forbidden("delegation principal does not match caller"));
        }
        if !delegation.subject_actor.starts_with("user:") {
            return Err(EngineError::forbidden("delegation subject must be a user"));
        }
    }

    let missing: Vec<String> = rule
        .required_scopes
        .iter()
        .filter(|s| !presented_scopes.iter().any(|p| p == *s))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(EngineError::InsufficientScope { missing });
    }

    Ok(())
}
