use chrono::{DateTime, Utc};

use crate::errors::{EngineError, EngineResult};
use crate::model::{Actor, Commit, CommitPhase, CycleProposal, IntentStatus, Reservation};
use crate::store::Snapshot;

/// Outcome of an `accept` call: whether the commit became `ready`, and
/// which other proposals (sharing a now-reserved intent) were cancelled
/// as a side effect.
#[derive(Debug)]
pub struct AcceptOutcome {
    pub became_ready: bool,
    pub cancelled_proposal_ids: Vec<String>,
}

/// `accept(proposal_id, participant_intent_id)`. Requires the caller's
/// identity to match the participant actor, and the intent to not
/// already be reserved by a different cycle.
pub fn accept(
    snapshot: &mut Snapshot,
    proposal_id: &str,
    participant_intent_id: &str,
    caller: &Actor,
    now: DateTime<Utc>,
) -> EngineResult<AcceptOutcome> {
    let proposal = snapshot
        .proposals
        .get(proposal_id)
        .ok_or_else(|| EngineError::not_found(format!("proposal {proposal_id}")))?
        .clone();

    let participant = proposal
        .participants
        .iter()
        .find(|p| p.intent_id == participant_intent_id)
        .ok_or_else(|| EngineError::not_found(format!("participant {participant_intent_id} in proposal {proposal_id}")))?;
    if &participant.actor != caller {
        return Err(EngineError::forbidden("caller does not match participant actor"));
    }

    if let Some(existing) = snapshot.reservations.get(participant_intent_id) {
        if existing.cycle_id != proposal_id {
            return Err(EngineError::conflict_with(
                format!("intent {participant_intent_id} already reserved by another cycle"),
                serde_json::json!({ "other_cycle_id": existing.cycle_id }),
            ));
        }
    }

    let commit = snapshot
        .commits
        .get_mut(proposal_id)
        .ok_or_else(|| EngineError::not_found(format!("commit for proposal {proposal_id}")))?;
    if commit.is_terminal() {
        return Err(EngineError::conflict(format!("commit for proposal {proposal_id} is already terminal")));
    }
    commit.accepted.insert(participant_intent_id.to_string());

    snapshot.reservations.insert(
        participant_intent_id.to_string(),
        Reservation {
            cycle_id: proposal_id.to_string(),
            reserved_at: now,
        },
    );

    let commit = snapshot.commits.get(proposal_id).expect("just inserted above");
    if !commit.is_unanimous() {
        return Ok(AcceptOutcome {
            became_ready: false,
            cancelled_proposal_ids: vec![],
        });
    }

    snapshot.commits.get_mut(proposal_id).expect("checked above").phase = CommitPhase::Ready;
    for intent_id in &proposal.intent_ids() {
        if let Some(intent) = snapshot.intents.get_mut(intent_id) {
            intent.status = IntentStatus::Reserved;
        }
    }

    let cancelled = cancel_conflicting_proposals(snapshot, proposal_id, &proposal.intent_ids());

    Ok(AcceptOutcome {
        became_ready: true,
        cancelled_proposal_ids: cancelled,
    })
}

/// `decline(proposal_id, participant_intent_id)`. Declines are sticky:
/// the commit immediately moves to `cancelled` and every reservation it
/// held is released.
pub fn decline(
    snapshot: &mut Snapshot,
    proposal_id: &str,
    participant_intent_id: &str,
    caller: &Actor,
) -> EngineResult<()> {
    let proposal = snapshot
        .proposals
        .get(proposal_id)
        .ok_or_else(|| EngineError::not_found(format!("proposal {proposal_id}")))?
        .clone();

    let participant = proposal
        .participants
        .iter()
        .find(|p| p.intent_id == participant_intent_id)
        .ok_or_else(|| EngineError::not_found(format!("participant {participant_intent_id} in proposal {proposal_id}")))?;
    if &participant.actor != caller {
        return Err(EngineError::forbidden("caller does not match participant actor"));
    }

    let commit = snapshot
        .commits
        .get_mut(proposal_id)
        .ok_or_else(|| EngineError::not_found(format!("commit for proposal {proposal_id}")))?;
    if commit.is_terminal() {
        return Err(EngineError::conflict(format!("commit for proposal {proposal_id} is already terminal")));
    }
    commit.declined.insert(participant_intent_id.to_string());
    commit.phase = CommitPhase::Cancelled;

    for intent_id in proposal.intent_ids() {
        if let Some(reservation) = snapshot.reservations.get(&intent_id) {
            if reservation.cycle_id == proposal_id {
                snapshot.reservations.remove(&intent_id);
            }
        }
    }

    Ok(())
}

/// Cancels every other pending proposal that shares an intent id with
/// the newly-ready `accepted_proposal_id`, releasing whatever accepts
/// and reservations it held.
fn cancel_conflicting_proposals(snapshot: &mut Snapshot, accepted_proposal_id: &str, reserved_intent_ids: &[String]) -> Vec<String> {
    let reserved: std::collections::HashSet<&str> = reserved_intent_ids.iter().map(String::as_str).collect();
    let conflicting: Vec<String> = snapshot
        .proposals
        .values()
        .filter(|p| p.id != accepted_proposal_id)
        .filter(|p| p.intent_ids().iter().any(|id| reserved.contains(id.as_str())))
        .map(|p| p.id.clone())
        .collect();

    for proposal_id in &conflicting {
        if let Some(commit) = snapshot.commits.get_mut(proposal_id) {
            if !commit.is_terminal() {
                commit.phase = CommitPhase::Cancelled;
            }
        }
        if let Some(proposal) = snapshot.proposals.get(proposal_id) {
            for intent_id in proposal.intent_ids() {
                if let Some(reservation) = snapshot.reservations.get(&intent_id) {
                    if &reservation.cycle_id == proposal_id {
                        snapshot.reservations.remove(&intent_id);
                    }
                }
            }
        }
    }
    conflicting
}

pub fn initialize_commit(snapshot: &mut Snapshot, proposal: &CycleProposal) {
    snapshot
        .commits
        .insert(proposal.id.clone(), Commit::new(proposal.id.clone(), proposal.intent_ids()));
}
