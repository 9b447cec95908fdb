use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::crypto::keys::KeyRing;
use crate::errors::{EngineError, EngineResult};
use crate::model::event::{sign_event, EventPayload};
use crate::model::{
    Actor, CycleState, DepositMode, Event, Leg, LegStatus, Receipt, ReceiptFinalState, ReceiptTransparency, Timeline,
    VaultHoldingStatus,
};
use crate::store::Snapshot;

#[derive(Debug, Clone)]
pub struct VaultBinding {
    pub intent_id: String,
    pub holding_id: String,
    pub reservation_id: String,
}

fn require_not_terminal(timeline: &Timeline) -> EngineResult<()> {
    if timeline.state.is_terminal() {
        Err(EngineError::conflict(format!(
            "cycle {} is in terminal state {}",
            timeline.cycle_id,
            timeline.state.as_wire_str()
        )))
    } else {
        Ok(())
    }
}

fn state_changed_event(
    cycle_id: &str,
    from_state: &str,
    to_state: &str,
    reason_code: Option<String>,
    actor: &Actor,
    ring: &KeyRing,
    now: DateTime<Utc>,
) -> Event {
    let payload = EventPayload::CycleStateChanged {
        cycle_id: cycle_id.to_string(),
        from_state: from_state.to_string(),
        to_state: to_state.to_string(),
        reason_code,
    };
    sign_event(payload, cycle_id, actor, ring, now)
}

/// `settlement.start`. Requires every participating commit to be
/// `ready`. Builds the cycle timeline, applies any `vault_bindings`, and
/// jumps straight to `escrow.ready` when every leg ends up deposited.
pub fn start(
    snapshot: &mut Snapshot,
    proposal_id: &str,
    vault_bindings: &[VaultBinding],
    deposit_window: Duration,
    actor: &Actor,
    event_ring: &KeyRing,
    now: DateTime<Utc>,
) -> EngineResult<Vec<Event>> {
    if snapshot.timelines.contains_key(proposal_id) {
        return Err(EngineError::conflict(format!("settlement already started for cycle {proposal_id}")));
    }
    let commit = snapshot
        .commits
        .get(proposal_id)
        .ok_or_else(|| EngineError::not_found(format!("commit for proposal {proposal_id}")))?;
    if commit.phase != crate::model::CommitPhase::Ready {
        return Err(EngineError::ConstraintViolation {
            message: format!("commit for proposal {proposal_id} is not ready"),
        });
    }
    let proposal = snapshot
        .proposals
        .get(proposal_id)
        .ok_or_else(|| EngineError::not_found(format!("proposal {proposal_id}")))?
        .clone();

    if let Some(partner_id) = snapshot.tenancy.proposals.get(proposal_id).cloned() {
        crate::tenancy::record_cycle(snapshot, proposal_id, &partner_id);
    }

    let n = proposal.participants.len();
    let deadline = now + chrono::Duration::from_std(deposit_window).unwrap_or(chrono::Duration::hours(24));
    let mut legs: Vec<Leg> = (0..n)
        .map(|i| {
            let from = &proposal.participants[i];
            let to = &proposal.participants[(i + n - 1) % n];
            Leg {
                leg_id: format!("{proposal_id}_leg_{i}"),
                intent_id: from.intent_id.clone(),
                from_actor: from.actor.clone(),
                to_actor: to.actor.clone(),
                assets: from.give.clone(),
                status: LegStatus::Pending,
                deposit_deadline_at: deadline,
                deposit_mode: None,
                deposit_ref: None,
                vault_holding_id: None,
                vault_reservation_id: None,
                deposited_at: None,
                released_at: None,
                refunded_at: None,
            }
        })
        .collect();

    apply_vault_bindings(&mut legs, &mut snapshot.vault_holdings, vault_bindings, proposal_id, now)?;

    let state = if legs.iter().all(|l| l.status == LegStatus::Deposited) {
        CycleState::EscrowReady
    } else {
        CycleState::EscrowPending
    };

    let mut events = vec![state_changed_event(proposal_id, "accepted", "escrow.pending", None, actor, event_ring, now)];
    for leg in &legs {
        if leg.status == LegStatus::Deposited {
            events.push(sign_event(
                EventPayload::SettlementDepositConfirmed {
                    cycle_id: proposal_id.to_string(),
                    intent_id: leg.intent_id.clone(),
                    deposit_ref: leg.deposit_ref.clone().unwrap_or_default(),
                },
                proposal_id,
                actor,
                event_ring,
                now,
            ));
        } else {
            events.push(sign_event(
                EventPayload::SettlementDepositRequired {
                    cycle_id: proposal_id.to_string(),
                    intent_id: leg.intent_id.clone(),
                    deposit_deadline_at: deadline,
                },
                proposal_id,
                actor,
                event_ring,
                now,
            ));
        }
    }
    if state == CycleState::EscrowReady {
        events.push(state_changed_event(
            proposal_id,
            "escrow.pending",
            "escrow.ready",
            None,
            actor,
            event_ring,
            now,
        ));
    }

    snapshot.timelines.insert(
        proposal_id.to_string(),
        Timeline {
            cycle_id: proposal_id.to_string(),
            state,
            legs,
            updated_at: now,
        },
    );

    snapshot.events.extend(events.clone());
    Ok(events)
}

fn apply_vault_bindings(
    legs: &mut [Leg],
    holdings: &mut std::collections::HashMap<String, crate::model::VaultHolding>,
    bindings: &[VaultBinding],
    cycle_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    let mut used_holdings: HashSet<&str> = HashSet::new();
    let mut used_intents: HashSet<&str> = HashSet::new();
    for binding in bindings {
        if !used_intents.insert(&binding.intent_id) {
            return Err(EngineError::ConstraintViolation {
                message: format!("vault binding supplied twice for intent {}", binding.intent_id),
            });
        }
        if !used_holdings.insert(&binding.holding_id) {
            return Err(EngineError::ConstraintViolation {
                message: format!("vault binding supplied twice for holding {}", binding.holding_id),
            });
        }
        let leg = legs
            .iter_mut()
            .find(|l| l.intent_id == binding.intent_id)
            .ok_or_else(|| EngineError::not_found(format!("leg for intent {}", binding.intent_id)))?;
        let holding = holdings
            .get(&binding.holding_id)
            .ok_or_else(|| EngineError::not_found(format!("vault holding {}", binding.holding_id)))?;
        let asset_matches = leg.assets.iter().any(|a| a.fingerprint() == holding.asset.fingerprint());
        if !asset_matches || !holding.matches_binding(&leg.from_actor, &holding.asset, &binding.reservation_id) {
            return Err(EngineError::ConstraintViolation {
                message: format!("vault binding for intent {} does not match leg", binding.intent_id),
            });
        }
        leg.status = LegStatus::Deposited;
        leg.deposit_mode = Some(DepositMode::Vault);
        leg.deposit_ref = Some(format!("vault:{}:{}", binding.holding_id, binding.reservation_id));
        leg.vault_holding_id = Some(binding.holding_id.clone());
        leg.vault_reservation_id = Some(binding.reservation_id.clone());
        leg.deposited_at = Some(now);

        let holding = holdings.get_mut(&binding.holding_id).expect("checked above");
        holding.settlement_cycle_id = Some(cycle_id.to_string());
        holding.updated_at = now;
    }
    Ok(())
}

/// `settlement.deposit_confirmed`. Applies only to a manual leg for the
/// requesting actor; a replay with the same `deposit_ref` is a no-op, a
/// conflicting one is `CONFLICT`.
pub fn confirm_deposit(
    snapshot: &mut Snapshot,
    cycle_id: &str,
    intent_id: &str,
    deposit_ref: &str,
    caller: &Actor,
    actor: &Actor,
    event_ring: &KeyRing,
    now: DateTime<Utc>,
) -> EngineResult<Vec<Event>> {
    let timeline = snapshot
        .timelines
        .get_mut(cycle_id)
        .ok_or_else(|| EngineError::not_found(format!("cycle {cycle_id}")))?;
    require_not_terminal(timeline)?;

    let leg = timeline
        .leg_for_intent_mut(intent_id)
        .ok_or_else(|| EngineError::not_found(format!("leg for intent {intent_id} in cycle {cycle_id}")))?;
    if &leg.from_actor != caller {
        return Err(EngineError::forbidden("caller does not match the depositing actor for this leg"));
    }
    if leg.deposit_mode == Some(DepositMode::Vault) {
        return Err(EngineError::ConstraintViolation {
            message: "leg is vault-bound; manual deposit confirmation does not apply".to_string(),
        });
    }

    if leg.status == LegStatus::Deposited {
        if leg.deposit_ref.as_deref() == Some(deposit_ref) {
            return Ok(vec![]);
        }
        return Err(EngineError::conflict(format!(
            "leg for intent {intent_id} already deposited with a different deposit_ref"
        )));
    }

    leg.status = LegStatus::Deposited;
    leg.deposit_mode = Some(DepositMode::Manual);
    leg.deposit_ref = Some(deposit_ref.to_string());
    leg.deposited_at = Some(now);

    let mut events = vec![sign_event(
        EventPayload::SettlementDepositConfirmed {
            cycle_id: cycle_id.to_string(),
            intent_id: intent_id.to_string(),
            deposit_ref: deposit_ref.to_string(),
        },
        cycle_id,
        actor,
        event_ring,
        now,
    )];

    if timeline.all_legs_deposited() && timeline.state == CycleState::EscrowPending {
        timeline.state = CycleState::EscrowReady;
        timeline.updated_at = now;
        events.push(state_changed_event(cycle_id, "escrow.pending", "escrow.ready", None, actor, event_ring, now));
    }

    snapshot.events.extend(events.clone());
    Ok(events)
}

/// `settlement.begin_execution`. Requires `escrow.ready`.
pub fn begin_execution(
    snapshot: &mut Snapshot,
    cycle_id: &str,
    actor: &Actor,
    event_ring: &KeyRing,
    now: DateTime<Utc>,
) -> EngineResult<Vec<Event>> {
    let timeline = snapshot
        .timelines
        .get_mut(cycle_id)
        .ok_or_else(|| EngineError::not_found(format!("cycle {cycle_id}")))?;
    require_not_terminal(timeline)?;
    if timeline.state != CycleState::EscrowReady {
        return Err(EngineError::ConstraintViolation {
            message: format!("cycle {cycle_id} is not in escrow.ready"),
        });
    }
    timeline.state = CycleState::Executing;
    timeline.updated_at = now;

    let events = vec![
        state_changed_event(cycle_id, "escrow.ready", "executing", None, actor, event_ring, now),
        sign_event(EventPayload::SettlementExecuting { cycle_id: cycle_id.to_string() }, cycle_id, actor, event_ring, now),
    ];
    snapshot.events.extend(events.clone());
    Ok(events)
}

/// `settlement.complete`. Requires `executing` and every leg deposited.
/// Releases reservations, withdraws vault-bound holdings, and writes a
/// signed `completed` receipt.
pub fn complete(
    snapshot: &mut Snapshot,
    cycle_id: &str,
    actor: &Actor,
    event_ring: &KeyRing,
    receipt_ring: &KeyRing,
    now: DateTime<Utc>,
) -> EngineResult<(Receipt, Vec<Event>)> {
    let timeline = snapshot
        .timelines
        .get_mut(cycle_id)
        .ok_or_else(|| EngineError::not_found(format!("cycle {cycle_id}")))?;
    require_not_terminal(timeline)?;
    if timeline.state != CycleState::Executing {
        return Err(EngineError::ConstraintViolation {
            message: format!("cycle {cycle_id} is not executing"),
        });
    }
    if !timeline.all_legs_deposited() {
        return Err(EngineError::ConstraintViolation {
            message: format!("cycle {cycle_id} has undeposited legs"),
        });
    }

    let mut intent_ids = Vec::new();
    let mut asset_ids: HashSet<String> = HashSet::new();
    for leg in &mut timeline.legs {
        leg.status = LegStatus::Released;
        leg.released_at = Some(now);
        intent_ids.push(leg.intent_id.clone());
        for asset in &leg.assets {
            asset_ids.insert(format!("{}:{}", asset.platform, asset.asset_id));
        }
        if let Some(holding_id) = &leg.vault_holding_id {
            if let Some(holding) = snapshot.vault_holdings.get_mut(holding_id) {
                holding.status = VaultHoldingStatus::Withdrawn;
                holding.withdrawn_at = Some(now);
                holding.updated_at = now;
            }
        }
    }
    timeline.state = CycleState::Completed;
    timeline.updated_at = now;

    for intent_id in &intent_ids {
        snapshot.reservations.remove(intent_id);
    }

    intent_ids.sort();
    let mut asset_ids: Vec<String> = asset_ids.into_iter().collect();
    asset_ids.sort();

    let fees = snapshot
        .proposals
        .get(cycle_id)
        .map(|p| serde_json::to_value(&p.fee_breakdown).expect("fee breakdown always serializes"));

    let receipt_id = crate::model::receipt::receipt_id(cycle_id, ReceiptFinalState::Completed);
    let unsigned = serde_json::json!({
        "id": receipt_id,
        "cycle_id": cycle_id,
        "final_state": "completed",
        "intent_ids": intent_ids,
        "asset_ids": asset_ids,
        "fees": fees,
        "created_at": now,
        "transparency": serde_json::Value::Null,
    });
    let signature = receipt_ring.sign(&unsigned);
    let receipt = Receipt {
        id: receipt_id.clone(),
        cycle_id: cycle_id.to_string(),
        final_state: ReceiptFinalState::Completed,
        intent_ids,
        asset_ids,
        fees,
        created_at: now,
        transparency: None,
        signature,
    };
    snapshot.receipts.insert(receipt_id.clone(), receipt.clone());

    let events = vec![
        state_changed_event(cycle_id, "executing", "completed", None, actor, event_ring, now),
        sign_event(
            EventPayload::ReceiptCreated {
                receipt_id,
                cycle_id: cycle_id.to_string(),
            },
            cycle_id,
            actor,
            event_ring,
            now,
        ),
    ];
    snapshot.events.extend(events.clone());
    Ok((receipt, events))
}

/// `expire_deposit_window`, a control operation: when `now` is past the
/// deposit deadline and not every leg is deposited, refunds deposited
/// legs, releases reservations, frees vault-bound holdings, and writes a
/// signed `failed` receipt.
pub fn expire_deposit_window(
    snapshot: &mut Snapshot,
    cycle_id: &str,
    actor: &Actor,
    event_ring: &KeyRing,
    receipt_ring: &KeyRing,
    now: DateTime<Utc>,
) -> EngineResult<Option<(Receipt, Vec<Event>)>> {
    let timeline = snapshot
        .timelines
        .get(cycle_id)
        .ok_or_else(|| EngineError::not_found(format!("cycle {cycle_id}")))?;
    if timeline.state != CycleState::EscrowPending {
        return Ok(None);
    }
    let deadline_passed = timeline.legs.iter().any(|l| now > l.deposit_deadline_at);
    if !deadline_passed || timeline.all_legs_deposited() {
        return Ok(None);
    }

    let timeline = snapshot.timelines.get_mut(cycle_id).expect("checked above");
    let mut intent_ids = Vec::new();
    let mut asset_ids: HashSet<String> = HashSet::new();
    for leg in &mut timeline.legs {
        intent_ids.push(leg.intent_id.clone());
        for asset in &leg.assets {
            asset_ids.insert(format!("{}:{}", asset.platform, asset.asset_id));
        }
        if leg.status == LegStatus::Deposited {
            leg.status = LegStatus::Refunded;
            leg.refunded_at = Some(now);
            if let Some(holding_id) = &leg.vault_holding_id {
                if let Some(holding) = snapshot.vault_holdings.get_mut(holding_id) {
                    holding.status = VaultHoldingStatus::Available;
                    holding.reservation_id = None;
                    holding.settlement_cycle_id = None;
                    holding.updated_at = now;
                }
            }
        }
    }
    timeline.state = CycleState::Failed;
    timeline.updated_at = now;

    for intent_id in &intent_ids {
        snapshot.reservations.remove(intent_id);
        snapshot.events.push(sign_event(
            EventPayload::IntentUnreserved {
                intent_id: intent_id.clone(),
                cycle_id: cycle_id.to_string(),
            },
            cycle_id,
            actor,
            event_ring,
            now,
        ));
    }

    intent_ids.sort();
    let mut asset_ids: Vec<String> = asset_ids.into_iter().collect();
    asset_ids.sort();

    let receipt_id = crate::model::receipt::receipt_id(cycle_id, ReceiptFinalState::Failed);
    let transparency = ReceiptTransparency {
        reason_code: Some("deposit_timeout".to_string()),
    };
    let unsigned = serde_json::json!({
        "id": receipt_id,
        "cycle_id": cycle_id,
        "final_state": "failed",
        "intent_ids": intent_ids,
        "asset_ids": asset_ids,
        "fees": serde_json::Value::Null,
        "created_at": now,
        "transparency": transparency,
    });
    let signature = receipt_ring.sign(&unsigned);
    let receipt = Receipt {
        id: receipt_id.clone(),
        cycle_id: cycle_id.to_string(),
        final_state: ReceiptFinalState::Failed,
        intent_ids,
        asset_ids,
        fees: None,
        created_at: now,
        transparency: Some(transparency),
        signature,
    };
    snapshot.receipts.insert(receipt_id.clone(), receipt.clone());

    let mut events = vec![state_changed_event(
        cycle_id,
        "escrow.pending",
        "failed",
        Some("deposit_timeout".to_string()),
        actor,
        event_ring,
        now,
    )];
    events.push(sign_event(
        EventPayload::ReceiptCreated {
            receipt_id,
            cycle_id: cycle_id.to_string(),
        },
        cycle_id,
        actor,
        event_ring,
        now,
    ));
    snapshot.events.extend(events.clone());
    Ok(Some((receipt, events)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActorType, Asset, Commit, CommitPhase, CycleProposal, Explainability, FeeBreakdown, ProposalParticipant};
    use std::collections::BTreeMap;

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

    fn ready_snapshot() -> (Snapshot, KeyRing, KeyRing) {
        let mut snapshot = Snapshot::default();
        let proposal = CycleProposal {
            id: "prop_1".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            participants: vec![
                ProposalParticipant {
                    intent_id: "intent_a".to_string(),
                    actor: Actor::new(ActorType::User, "intent_a"),
                    give: vec![asset("1")],
                    get: vec![asset("2")],
                },
                ProposalParticipant {
                    intent_id: "intent_b".to_string(),
                    actor: Actor::new(ActorType::User, "intent_b"),
                    give: vec![asset("2")],
                    get: vec![asset("1")],
                },
            ],
            confidence_score: 0.9,
            value_spread: 0.0,
            fee_breakdown: FeeBreakdown {
                per_participant_usd: BTreeMap::new(),
            },
            explainability: Explainability {
                cycle_length: 2,
                base_score: 0.9,
                value_spread: 0.0,
                enumeration_limited: None,
                enumeration_timed_out: None,
            },
        };
        snapshot.proposals.insert("prop_1".to_string(), proposal.clone());
        let mut commit = Commit::new("prop_1", proposal.intent_ids());
        commit.phase = CommitPhase::Ready;
        snapshot.commits.insert("prop_1".to_string(), commit);

        let event_ring = KeyRing::new("evt", [1u8; 32], vec![]);
        let receipt_ring = KeyRing::new("rcpt", [2u8; 32], vec![]);
        (snapshot, event_ring, receipt_ring)
    }

    #[test]
    fn start_without_bindings_enters_escrow_pending() {
        let (mut snapshot, event_ring, _receipt_ring) = ready_snapshot();
        let actor = Actor::new(ActorType::User, "intent_a");
        start(&mut snapshot, "prop_1", &[], Duration::from_secs(3600), &actor, &event_ring, Utc::now()).unwrap();
        assert_eq!(snapshot.timelines["prop_1"].state, CycleState::EscrowPending);
    }

    #[test]
    fn full_lifecycle_via_manual_deposits_completes() {
        let (mut snapshot, event_ring, receipt_ring) = ready_snapshot();
        let actor_a = Actor::new(ActorType::User, "intent_a");
        let actor_b = Actor::new(ActorType::User, "intent_b");
        let now = Utc::now();
        start(&mut snapshot, "prop_1", &[], Duration::from_secs(3600), &actor_a, &event_ring, now).unwrap();

        confirm_deposit(&mut snapshot, "prop_1", "intent_a", "dep_a", &actor_a, &actor_a, &event_ring, now).unwrap();
        confirm_deposit(&mut snapshot, "prop_1", "intent_b", "dep_b", &actor_b, &actor_b, &event_ring, now).unwrap();
        assert_eq!(snapshot.timelines["prop_1"].state, CycleState::EscrowReady);

        begin_execution(&mut snapshot, "prop_1", &actor_a, &event_ring, now).unwrap();
        assert_eq!(snapshot.timelines["prop_1"].state, CycleState::Executing);

        let (receipt, _events) = complete(&mut snapshot, "prop_1", &actor_a, &event_ring, &receipt_ring, now).unwrap();
        assert_eq!(receipt.final_state, ReceiptFinalState::Completed);
        assert_eq!(snapshot.timelines["prop_1"].state, CycleState::Completed);
        assert!(snapshot.timelines["prop_1"].legs.iter().all(|l| l.status == LegStatus::Released));
    }

    #[test]
    fn confirm_deposit_replay_is_idempotent_conflict_on_mismatch() {
        let (mut snapshot, event_ring, _) = ready_snapshot();
        let actor_a = Actor::new(ActorType::User, "intent_a");
        let now = Utc::now();
        start(&mut snapshot, "prop_1", &[], Duration::from_secs(3600), &actor_a, &event_ring, now).unwrap();
        confirm_deposit(&mut snapshot, "prop_1", "intent_a", "dep_a", &actor_a, &actor_a, &event_ring, now).unwrap();
        let replay = confirm_deposit(&mut snapshot, "prop_1", "intent_a", "dep_a", &actor_a, &actor_a, &event_ring, now).unwrap();
        assert!(replay.is_empty());
        let err = confirm_deposit(&mut snapshot, "prop_1", "intent_a", "dep_other", &actor_a, &actor_a, &event_ring, now).unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[test]
    fn expire_deposit_window_fails_and_refunds() {
        let (mut snapshot, event_ring, receipt_ring) = ready_snapshot();
        let actor_a = Actor::new(ActorType::User, "intent_a");
        let actor_b = Actor::new(ActorType::User, "intent_b");
        let now = Utc::now();
        start(&mut snapshot, "prop_1", &[], Duration::from_secs(1), &actor_a, &event_ring, now).unwrap();
        confirm_deposit(&mut snapshot, "prop_1", "intent_a", "dep_a", &actor_a, &actor_a, &event_ring, now).unwrap();

        let later = now + chrono::Duration::hours(1);
        let outcome = expire_deposit_window(&mut snapshot, "prop_1", &actor_b, &event_ring, &receipt_ring, later)
            .unwrap()
            .expect("should expire");
        assert_eq!(outcome.0.final_state, ReceiptFinalState::Failed);
        assert_eq!(snapshot.timelines["prop_1"].state, CycleState::Failed);
        let leg_a = snapshot.timelines["prop_1"].leg_for_intent("intent_a").unwrap();
        assert_eq!(leg_a.status, LegStatus::Refunded);
    }

    #[test]
    fn terminal_state_is_write_once() {
        let (mut snapshot, event_ring, receipt_ring) = ready_snapshot();
        let actor_a = Actor::new(ActorType::User, "intent_a");
        let actor_b = Actor::new(ActorType::User, "intent_b");
        let now = Utc::now();
        start(&mut snapshot, "prop_1", &[], Duration::from_secs(3600), &actor_a, &event_ring, now).unwrap();
        confirm_deposit(&mut snapshot, "prop_1", "intent_a", "dep_a", &actor_a, &actor_a, &event_ring, now).unwrap();
        confirm_deposit(&mut snapshot, "prop_1", "intent_b", "dep_b", &actor_b, &actor_b, &event_ring, now).unwrap();
        begin_execution(&mut snapshot, "prop_1", &actor_a, &event_ring, now).unwrap();
        complete(&mut snapshot, "prop_1", &actor_a, &event_ring, &receipt_ring, now).unwrap();

        let err = begin_execution(&mut snapshot, "prop_1", &actor_a, &event_ring, now).unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }
}
