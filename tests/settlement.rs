//! Integration tests for settlement state-machine edge cases.

use std::collections::BTreeMap;

use chrono::Utc;
use swapmesh::config::EngineConfig;
use swapmesh::crypto::keys::KeyRings;
use swapmesh::delivery::WebhookEnvelope;
use swapmesh::engine::{Engine, RequestContext};
use swapmesh::model::{
    Actor, Asset, AssetValues, CycleProposal, Explainability, FeeBreakdown, IntentStatus, ProposalParticipant,
    SettlementPreferences, SwapIntent, TimeConstraints, TrustConstraints, ValueBand, WantSpec,
};
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

fn intent(id: &str, actor: &str, offer_asset: &str, want_asset: &str) -> SwapIntent {
    SwapIntent {
        id: id.to_string(),
        actor: Actor::user(actor),
        offer: vec![asset(offer_asset)],
        want_spec: WantSpec::SpecificAsset { platform: "steam".to_string(), asset_key: want_asset.to_string() },
        value_band: ValueBand { min_usd: Some(80.0), max_usd: Some(120.0), pricing_source: None },
        trust_constraints: TrustConstraints { max_cycle_length: 2, min_counterparty_reliability: None },
        time_constraints: TimeConstraints { expires_at: Utc::now() + chrono::Duration::hours(1), urgency: None },
        settlement_preferences: SettlementPreferences { require_escrow: false },
        status: IntentStatus::Active,
    }
}

fn ctx(actor: Actor, scope: &str, key: &'static str) -> RequestContext<'static> {
    RequestContext::new(actor).with_scopes(vec![scope.to_string()]).with_idempotency_key(key)
}

/// Builds a two-way cycle through acceptance, returning the engine and the accepted proposal id.
fn accepted_cycle(engine: &Engine) -> String {
    let now = Utc::now();
    engine
        .create_intent(&ctx(Actor::user("alice"), "intents.create", "ia"), intent("intent_a", "alice", "1", "2"), now)
        .unwrap();
    engine
        .create_intent(&ctx(Actor::user("bob"), "intents.create", "ib"), intent("intent_b", "bob", "2", "1"), now)
        .unwrap();

    let values: AssetValues = [("steam:1".to_string(), 100.0), ("steam:2".to_string(), 100.0)].into_iter().collect();
    engine
        .create_matching_run(&ctx(Actor::user("alice"), "matching.run", "run1"), "run_1", &values, now)
        .unwrap();
    let run = engine.get_matching_run(&ctx(Actor::user("alice"), "matching.read", "_"), "run_1", now).unwrap();
    let proposal_id = run.proposal_ids[0].clone();

    engine
        .accept_proposal(&ctx(Actor::user("alice"), "proposals.commit", "acc_a"), &proposal_id, "intent_a", now)
        .unwrap();
    engine
        .accept_proposal(&ctx(Actor::user("bob"), "proposals.commit", "acc_b"), &proposal_id, "intent_b", now)
        .unwrap();
    proposal_id
}

#[test]
fn starting_settlement_twice_for_the_same_cycle_conflicts() {
    let engine = engine();
    let now = Utc::now();
    let cycle_id = accepted_cycle(&engine);

    engine.start_settlement(&ctx(Actor::user("alice"), "settlement.write", "st1"), &cycle_id, &[], now).unwrap();
    let err = engine
        .start_settlement(&ctx(Actor::user("alice"), "settlement.write", "st2"), &cycle_id, &[], now)
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
}

#[test]
fn begin_execution_before_escrow_is_ready_is_rejected() {
    let engine = engine();
    let now = Utc::now();
    let cycle_id = accepted_cycle(&engine);

    engine.start_settlement(&ctx(Actor::user("alice"), "settlement.write", "st1"), &cycle_id, &[], now).unwrap();
    let err = engine
        .begin_execution(&ctx(Actor::user("alice"), "settlement.write", "be1"), &cycle_id, now)
        .unwrap_err();
    assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
}

#[test]
fn complete_before_execution_begins_is_rejected() {
    let engine = engine();
    let now = Utc::now();
    let cycle_id = accepted_cycle(&engine);

    engine.start_settlement(&ctx(Actor::user("alice"), "settlement.write", "st1"), &cycle_id, &[], now).unwrap();
    engine
        .confirm_deposit(&ctx(Actor::user("alice"), "settlement.write", "dep_a"), &cycle_id, "intent_a", "ref_a", now)
        .unwrap();
    engine
        .confirm_deposit(&ctx(Actor::user("bob"), "settlement.write", "dep_b"), &cycle_id, "intent_b", "ref_b", now)
        .unwrap();

    let err = engine
        .complete_settlement(&ctx(Actor::user("alice"), "settlement.write", "cmp1"), &cycle_id, now)
        .unwrap_err();
    assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
}

#[test]
fn full_happy_path_reaches_completed_and_every_leg_is_released() {
    let engine = engine();
    let now = Utc::now();
    let cycle_id = accepted_cycle(&engine);

    engine.start_settlement(&ctx(Actor::user("alice"), "settlement.write", "st1"), &cycle_id, &[], now).unwrap();
    engine
        .confirm_deposit(&ctx(Actor::user("alice"), "settlement.write", "dep_a"), &cycle_id, "intent_a", "ref_a", now)
        .unwrap();
    engine
        .confirm_deposit(&ctx(Actor::user("bob"), "settlement.write", "dep_b"), &cycle_id, "intent_b", "ref_b", now)
        .unwrap();
    engine.begin_execution(&ctx(Actor::user("alice"), "settlement.write", "be1"), &cycle_id, now).unwrap();
    engine.complete_settlement(&ctx(Actor::user("alice"), "settlement.write", "cmp1"), &cycle_id, now).unwrap();

    let timeline = engine.settlement_status(&ctx(Actor::user("alice"), "settlement.read", "_"), &cycle_id, now).unwrap();
    assert_eq!(timeline.state, swapmesh::model::CycleState::Completed);
    assert!(timeline.legs.iter().all(|l| l.status == swapmesh::model::LegStatus::Released));
}

#[test]
fn unscoped_settlement_status_is_readable_by_any_authorized_caller() {
    // A cycle whose proposal was created directly (matching, not webhook)
    // carries no recording partner, so it is unscoped: any caller that
    // cleared authz for settlement.status may read it.
    let engine = engine();
    let now = Utc::now();
    let cycle_id = accepted_cycle(&engine);
    engine.start_settlement(&ctx(Actor::user("alice"), "settlement.write", "st1"), &cycle_id, &[], now).unwrap();

    let timeline = engine
        .settlement_status(&ctx(Actor::user("mallory"), "settlement.read", "_"), &cycle_id, now)
        .unwrap();
    assert_eq!(timeline.cycle_id, cycle_id);
}

#[test]
fn partner_scoped_settlement_status_is_hidden_from_uninvolved_non_partner_callers() {
    // A cycle whose underlying proposal was pushed by a partner through
    // webhooks.proposals.ingest inherits that partner's tenancy scope once
    // settlement starts, so only the partner or a participant may read it.
    let engine = engine();
    let now = Utc::now();
    let ring = KeyRings::deterministic_for_tests().event;
    let proposal = CycleProposal {
        id: "prop_1".to_string(),
        expires_at: now + chrono::Duration::hours(1),
        participants: vec![
            ProposalParticipant { intent_id: "intent_a".to_string(), actor: Actor::user("alice"), give: vec![asset("1")], get: vec![asset("2")] },
            ProposalParticipant { intent_id: "intent_b".to_string(), actor: Actor::user("bob"), give: vec![asset("2")], get: vec![asset("1")] },
        ],
        confidence_score: 0.9,
        value_spread: 0.0,
        fee_breakdown: FeeBreakdown { per_participant_usd: BTreeMap::new() },
        explainability: Explainability { cycle_length: 2, base_score: 0.9, value_spread: 0.0, enumeration_limited: None, enumeration_timed_out: None },
    };
    let signature = ring.sign(&serde_json::to_value(&proposal).unwrap());
    let envelope = WebhookEnvelope { event_id: "evt_1".to_string(), partner_id: "partner_a".to_string(), proposal, signature };
    engine
        .ingest_webhook(&ctx(Actor::partner("partner_a"), "webhooks.ingest", "ing1"), envelope, now)
        .unwrap();

    engine
        .accept_proposal(&ctx(Actor::user("alice"), "proposals.commit", "acc_a"), "prop_1", "intent_a", now)
        .unwrap();
    engine
        .accept_proposal(&ctx(Actor::user("bob"), "proposals.commit", "acc_b"), "prop_1", "intent_b", now)
        .unwrap();
    engine.start_settlement(&ctx(Actor::user("alice"), "settlement.write", "st1"), "prop_1", &[], now).unwrap();

    let err = engine
        .settlement_status(&ctx(Actor::user("mallory"), "settlement.read", "_"), "prop_1", now)
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let timeline = engine
        .settlement_status(&ctx(Actor::user("alice"), "settlement.read", "_"), "prop_1", now)
        .unwrap();
    assert_eq!(timeline.cycle_id, "prop_1");
}
