use chrono::{DateTime, Utc};

use crate::commit::initialize_commit;
use crate::crypto::keys::KeyRing;
use crate::crypto::Signature;
use crate::errors::{EngineError, EngineResult};
use crate::model::event::{sign_event, EventPayload};
use crate::model::{Actor, ActorType, CycleProposal, Event};
use crate::store::Snapshot;
use crate::tenancy;

/// A partner-pushed proposal, as delivered to `webhooks.proposals.ingest`.
/// `event_id` is the partner's own identifier for this delivery and is the
/// sole key used for dedup, independent of `proposal.id`.
pub struct WebhookEnvelope {
    pub event_id: String,
    pub partner_id: String,
    pub proposal: CycleProposal,
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// `event_id` was already in the seen-set; no effects applied.
    AlreadySeen,
    Ingested { proposal_id: String },
}

/// `webhooks.proposals.ingest`. The envelope's signature is checked
/// against `ring` before anything else; an unsigned or mis-signed delivery
/// is never marked seen, so the partner can safely retry it with a
/// corrected signature.
pub fn ingest(
    snapshot: &mut Snapshot,
    envelope: &WebhookEnvelope,
    ring: &KeyRing,
    now: DateTime<Utc>,
) -> EngineResult<(IngestOutcome, Vec<Event>)> {
    if snapshot.webhook_seen_event_ids.contains(&envelope.event_id) {
        return Ok((IngestOutcome::AlreadySeen, vec![]));
    }

    let signed_payload = serde_json::to_value(&envelope.proposal).map_err(|e| EngineError::SchemaInvalid {
        message: e.to_string(),
    })?;
    ring.verify(&signed_payload, &envelope.signature)?;

    envelope
        .proposal
        .check_invariants()
        .map_err(|message| EngineError::SchemaInvalid { message })?;

    if snapshot.proposals.contains_key(&envelope.proposal.id) {
        return Err(EngineError::conflict(format!(
            "proposal {} already exists",
            envelope.proposal.id
        )));
    }

    snapshot.webhook_seen_event_ids.insert(envelope.event_id.clone());
    initialize_commit(snapshot, &envelope.proposal);
    tenancy::record_proposal(snapshot, &envelope.proposal.id, &envelope.partner_id);

    let intent_ids = envelope.proposal.intent_ids();
    let proposal_id = envelope.proposal.id.clone();
    snapshot.proposals.insert(proposal_id.clone(), envelope.proposal.clone());

    let partner_actor = Actor::new(ActorType::Partner, envelope.partner_id.clone());
    let correlation_id = format!("corr_webhooks.proposals.ingest_{}", envelope.event_id);
    let event = sign_event(
        EventPayload::ProposalCreated {
            proposal_id: proposal_id.clone(),
            intent_ids,
        },
        &correlation_id,
        &partner_actor,
        ring,
        now,
    );
    snapshot.events.push(event.clone());

    Ok((IngestOutcome::Ingested { proposal_id }, vec![event]))
}
