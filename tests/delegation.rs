//! Integration tests for delegation minting, revocation, and scoping.

use chrono::Utc;
use swapmesh::config::EngineConfig;
use swapmesh::crypto::keys::KeyRings;
use swapmesh::engine::{Engine, RequestContext};
use swapmesh::model::{Actor, Delegation, Policy};
use swapmesh::store::MemoryStateStore;

fn engine() -> Engine {
    Engine::new(Box::new(MemoryStateStore::new()), KeyRings::deterministic_for_tests(), EngineConfig::ephemeral()).unwrap()
}

fn ctx(actor: Actor, scope: &str, key: &'static str) -> RequestContext<'static> {
    RequestContext::new(actor).with_scopes(vec![scope.to_string()]).with_idempotency_key(key)
}

fn delegation(id: &str, subject: &str) -> Delegation {
    Delegation {
        delegation_id: id.to_string(),
        principal_agent: "agent_1".to_string(),
        subject_actor: subject.to_string(),
        scopes: vec!["intents.create".to_string()],
        policy: Policy {
            quiet_hours: None,
            max_value_per_swap_usd: 10_000.0,
            max_cycle_length: 4,
            min_confidence_score: 0.0,
            require_escrow: false,
            max_value_per_day_usd: None,
            high_value_consent_threshold_usd: 1_000.0,
        },
        issued_at: Utc::now(),
        expires_at: None,
        revoked_at: None,
    }
}

#[test]
fn user_can_mint_a_delegation_naming_themself_as_subject() {
    let engine = engine();
    let now = Utc::now();
    let alice = Actor::user("alice");

    let response = engine
        .mint_delegation(&ctx(alice.clone(), "delegations.write", "mint1"), delegation("del_1", "user:alice"), now)
        .unwrap();
    assert!(response.body["token"].as_str().unwrap().starts_with("sgdt1."));

    let listed = engine.list_delegations(&ctx(alice, "delegations.read", "_"), now).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].delegation_id, "del_1");
}

#[test]
fn minting_a_delegation_for_another_subject_is_forbidden() {
    let engine = engine();
    let now = Utc::now();
    let alice = Actor::user("alice");

    let err = engine
        .mint_delegation(&ctx(alice, "delegations.write", "mint1"), delegation("del_1", "user:bob"), now)
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
}

#[test]
fn agent_actor_cannot_mint_a_delegation() {
    let engine = engine();
    let now = Utc::now();
    let agent = Actor::agent("agent_1");

    let err = engine
        .mint_delegation(&ctx(agent, "delegations.write", "mint1"), delegation("del_1", "user:alice"), now)
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
}

#[test]
fn revoking_someone_elses_delegation_is_forbidden() {
    let engine = engine();
    let now = Utc::now();
    let alice = Actor::user("alice");
    let bob = Actor::user("bob");

    engine
        .mint_delegation(&ctx(alice, "delegations.write", "mint1"), delegation("del_1", "user:alice"), now)
        .unwrap();

    let err = engine
        .revoke_delegation(&ctx(bob, "delegations.write", "rev1"), "del_1", now)
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
}

#[test]
fn owner_can_revoke_their_own_delegation() {
    let engine = engine();
    let now = Utc::now();
    let alice = Actor::user("alice");

    engine
        .mint_delegation(&ctx(alice.clone(), "delegations.write", "mint1"), delegation("del_1", "user:alice"), now)
        .unwrap();
    engine
        .revoke_delegation(&ctx(alice.clone(), "delegations.write", "rev1"), "del_1", now)
        .unwrap();

    let listed = engine.list_delegations(&ctx(alice, "delegations.read", "_"), now).unwrap();
    assert!(listed[0].revoked_at.is_some());
}

#[test]
fn list_delegations_is_scoped_to_the_calling_subject() {
    let engine = engine();
    let now = Utc::now();
    let alice = Actor::user("alice");
    let bob = Actor::user("bob");

    engine
        .mint_delegation(&ctx(alice, "delegations.write", "mint1"), delegation("del_1", "user:alice"), now)
        .unwrap();
    engine
        .mint_delegation(&ctx(bob.clone(), "delegations.write", "mint2"), delegation("del_2", "user:bob"), now)
        .unwrap();

    let listed = engine.list_delegations(&ctx(bob, "delegations.read", "_"), now).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].delegation_id, "del_2");
}
