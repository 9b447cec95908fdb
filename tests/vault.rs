//! Integration tests for the vault holding lifecycle.

use chrono::Utc;
use swapmesh::config::EngineConfig;
use swapmesh::crypto::keys::KeyRings;
use swapmesh::engine::{Engine, RequestContext};
use swapmesh::model::{Actor, Asset};
use swapmesh::store::MemoryStateStore;

fn engine() -> Engine {
    Engine::new(Box::new(MemoryStateStore::new()), KeyRings::deterministic_for_tests(), EngineConfig::ephemeral()).unwrap()
}

fn asset(id: &str) -> Asset {
    Asset {
        platform: "steam".to_string(),
        app_id: "730".to_string(),
        context_id: "2".to_string(),
        asset_id: id.to_string(),
        class_id: None,
        instance_id: None,
        metadata: None,
        proof: None,
    }
}

fn ctx(actor: Actor, scope: &str, key: &'static str) -> RequestContext<'static> {
    RequestContext::new(actor).with_scopes(vec![scope.to_string()]).with_idempotency_key(key)
}

#[test]
fn deposit_reserve_release_round_trip() {
    let engine = engine();
    let now = Utc::now();
    let alice = Actor::user("alice");

    engine
        .vault_deposit(&ctx(alice.clone(), "vault.write", "dep1"), "holding_1", "vault_a", asset("1"), now)
        .unwrap();

    let holding = engine.vault_get(&ctx(alice.clone(), "vault.read", "_"), "holding_1", now).unwrap();
    assert_eq!(holding.status, swapmesh::model::VaultHoldingStatus::Available);

    engine
        .vault_reserve(&ctx(alice.clone(), "vault.write", "res1"), "holding_1", "reservation_1", now)
        .unwrap();
    let holding = engine.vault_get(&ctx(alice.clone(), "vault.read", "_"), "holding_1", now).unwrap();
    assert_eq!(holding.status, swapmesh::model::VaultHoldingStatus::Reserved);

    engine
        .vault_release(&ctx(alice.clone(), "vault.write", "rel1"), "holding_1", now)
        .unwrap();
    let holding = engine.vault_get(&ctx(alice, "vault.read", "_"), "holding_1", now).unwrap();
    assert_eq!(holding.status, swapmesh::model::VaultHoldingStatus::Available);
}

#[test]
fn reserving_an_already_reserved_holding_conflicts() {
    let engine = engine();
    let now = Utc::now();
    let alice = Actor::user("alice");

    engine
        .vault_deposit(&ctx(alice.clone(), "vault.write", "dep1"), "holding_1", "vault_a", asset("1"), now)
        .unwrap();
    engine
        .vault_reserve(&ctx(alice.clone(), "vault.write", "res1"), "holding_1", "reservation_1", now)
        .unwrap();
    let err = engine
        .vault_reserve(&ctx(alice, "vault.write", "res2"), "holding_1", "reservation_2", now)
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
}

#[test]
fn another_actor_cannot_read_or_mutate_someone_elses_holding() {
    let engine = engine();
    let now = Utc::now();
    let alice = Actor::user("alice");
    let bob = Actor::user("bob");

    engine
        .vault_deposit(&ctx(alice, "vault.write", "dep1"), "holding_1", "vault_a", asset("1"), now)
        .unwrap();

    let err = engine.vault_get(&ctx(bob.clone(), "vault.read", "_"), "holding_1", now).unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let err = engine
        .vault_reserve(&ctx(bob, "vault.write", "res1"), "holding_1", "reservation_1", now)
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
}

#[test]
fn withdraw_requires_available_status() {
    let engine = engine();
    let now = Utc::now();
    let alice = Actor::user("alice");

    engine
        .vault_deposit(&ctx(alice.clone(), "vault.write", "dep1"), "holding_1", "vault_a", asset("1"), now)
        .unwrap();
    engine
        .vault_reserve(&ctx(alice.clone(), "vault.write", "res1"), "holding_1", "reservation_1", now)
        .unwrap();

    let err = engine
        .vault_withdraw(&ctx(alice.clone(), "vault.write", "wd1"), "holding_1", now)
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    engine
        .vault_release(&ctx(alice.clone(), "vault.write", "rel1"), "holding_1", now)
        .unwrap();
    engine
        .vault_withdraw(&ctx(alice.clone(), "vault.write", "wd2"), "holding_1", now)
        .unwrap();
    let list = engine.vault_list(&ctx(alice, "vault.read", "_"), now).unwrap();
    assert_eq!(list[0].status, swapmesh::model::VaultHoldingStatus::Withdrawn);
}
