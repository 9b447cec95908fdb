use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::authz::{self, OperationManifest};
use crate::commit;
use crate::config::EngineConfig;
use crate::crypto::keys::{KeyRing, KeyRings, RingKind};
use crate::delivery::{self, IngestOutcome, WebhookEnvelope};
use crate::errors::{EngineError, EngineResult};
use crate::idempotency::IdempotencyOutcome;
use crate::matching::{self, CompatibilityGraph};
use crate::model::{
    Actor, ActorType, Asset, AssetValues, CycleProposal, Delegation, IntentStatus, Receipt, SwapIntent,
    UserConsent, VaultHolding,
};
use crate::policy;
use crate::settlement::{self, VaultBinding};
use crate::store::{MatchingRun, Snapshot, StateStore};
use crate::tenancy;
use crate::vault;

/// Everything an inbound request carries besides the operation payload
/// itself: who is calling, how they authenticated, and the idempotency
/// key mutations require.
pub struct RequestContext<'a> {
    pub actor: Actor,
    pub presented_scopes: Vec<String>,
    pub delegation_token: Option<&'a str>,
    pub persisted_delegation_id: Option<&'a str>,
    pub idempotency_key: Option<&'a str>,
    pub user_consent: Option<UserConsent>,
}

impl<'a> RequestContext<'a> {
    pub fn new(actor: Actor) -> Self {
        RequestContext {
            actor,
            presented_scopes: vec![],
            delegation_token: None,
            persisted_delegation_id: None,
            idempotency_key: None,
            user_consent: None,
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.presented_scopes = scopes;
        self
    }

    pub fn with_idempotency_key(mut self, key: &'a str) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    pub fn with_delegation_token(mut self, token: &'a str, persisted_delegation_id: Option<&'a str>) -> Self {
        self.delegation_token = Some(token);
        self.persisted_delegation_id = persisted_delegation_id;
        self
    }

    pub fn with_user_consent(mut self, consent: UserConsent) -> Self {
        self.user_consent = Some(consent);
        self
    }
}

/// An operation's result envelope: the JSON response plus the
/// `corr_<operation>_<key>` correlation id every mutation carries.
#[derive(Debug, Clone)]
pub struct OperationResponse {
    pub correlation_id: String,
    pub body: Value,
}

/// The engine: a single-writer wrapper around one [`Snapshot`], the
/// manifest, key material, and validated configuration. Every public
/// method corresponds to one operation id from the external interface.
/// Reads and writes alike take the writer lock; no method holds it
/// across an `await` because the engine has none — settlement ticks and
/// webhook ingestion are just further calls into the same lock.
pub struct Engine {
    snapshot: Mutex<Snapshot>,
    store: Box<dyn StateStore>,
    keys: KeyRings,
    manifest: OperationManifest,
    config: EngineConfig,
}

impl Engine {
    pub fn new(store: Box<dyn StateStore>, keys: KeyRings, config: EngineConfig) -> EngineResult<Self> {
        config.validate().map_err(EngineError::Internal)?;
        let snapshot = store.load().map_err(EngineError::from)?;
        Ok(Engine {
            snapshot: Mutex::new(snapshot),
            store,
            keys,
            manifest: OperationManifest::default_manifest(),
            config,
        })
    }

    fn event_ring(&self) -> &KeyRing {
        self.keys.ring(RingKind::Event)
    }

    fn receipt_ring(&self) -> &KeyRing {
        self.keys.ring(RingKind::Receipt)
    }

    fn delegation_ring(&self) -> &KeyRing {
        self.keys.ring(RingKind::Delegation)
    }

    fn policy_integrity_ring(&self) -> &KeyRing {
        self.keys.ring(RingKind::PolicyIntegrity)
    }

    fn persist(&self, snapshot: &Snapshot) -> EngineResult<()> {
        self.store.save(snapshot).map_err(EngineError::from)
    }

    /// Authorizes `operation_id` for `ctx.actor` and, for agent callers,
    /// resolves a delegation. Identity/authz errors are raised here,
    /// before any state read, per the error-handling design.
    fn authorize<'a>(
        &self,
        snapshot: &Snapshot,
        operation_id: &str,
        ctx: &RequestContext<'a>,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<Delegation>> {
        if !self.config.authz.enforce {
            return Ok(None);
        }
        let delegation = match (ctx.actor.actor_type, ctx.delegation_token) {
            (ActorType::Agent, Some(token)) => {
                let persisted = ctx
                    .persisted_delegation_id
                    .and_then(|id| snapshot.delegations.get(id));
                Some(authz::resolve_delegation(token, persisted, self.delegation_ring(), Some(now))?)
            }
            _ => None,
        };
        authz::authorize(&self.manifest, operation_id, &ctx.actor, &ctx.presented_scopes, delegation.as_ref())?;
        Ok(delegation)
    }

    /// Wraps a mutation in the idempotency ledger: on a fresh key, runs
    /// `f` and stores its response; on an exact replay, returns the
    /// stored response without calling `f`. `f` receives the snapshot
    /// already authorized, and is responsible for persisting nothing
    /// itself — `run_mutation` saves once, after `f` returns.
    fn run_mutation<F>(
        &self,
        operation_id: &str,
        actor: &Actor,
        idempotency_key: Option<&str>,
        payload: &Value,
        f: F,
    ) -> EngineResult<Value>
    where
        F: FnOnce(&mut Snapshot) -> EngineResult<Value>,
    {
        let idempotency_key = idempotency_key.ok_or_else(|| EngineError::SchemaInvalid {
            message: "idempotency_key is required for mutation operations".to_string(),
        })?;

        let mut snapshot = self.snapshot.lock().expect("snapshot mutex poisoned");
        match snapshot.idempotency.check(actor, operation_id, idempotency_key, payload)? {
            IdempotencyOutcome::Replayed(response) => Ok(response),
            IdempotencyOutcome::Fresh => {
                let response = f(&mut snapshot)?;
                snapshot
                    .idempotency
                    .store(actor, operation_id, idempotency_key, payload, response.clone());
                self.persist(&snapshot)?;
                tracing::info!(operation_id, actor = %actor.scope_key(), "mutation applied");
                Ok(response)
            }
        }
    }

    fn read<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&Snapshot) -> T,
    {
        let snapshot = self.snapshot.lock().expect("snapshot mutex poisoned");
        f(&snapshot)
    }

    // ---- intents.* ----------------------------------------------------

    pub fn create_intent(
        &self,
        ctx: &RequestContext,
        intent: SwapIntent,
        now: DateTime<Utc>,
    ) -> EngineResult<OperationResponse> {
        let operation_id = "intents.create";
        intent.validate_invariants().map_err(|message| EngineError::SchemaInvalid { message })?;
        let payload = serde_json::to_value(&intent).map_err(|e| EngineError::SchemaInvalid { message: e.to_string() })?;
        let correlation_id = format!("corr_{operation_id}_{}", intent.id);
        let actor = ctx.actor.clone();
        let idempotency_key = ctx.idempotency_key;

        let body = self.run_mutation(operation_id, &actor, idempotency_key, &payload, |snapshot| {
            let delegation = self.authorize(snapshot, operation_id, ctx, now)?;
            if snapshot.intents.contains_key(&intent.id) {
                return Err(EngineError::conflict(format!("intent {} already exists", intent.id)));
            }

            if let Some(delegation) = delegation {
                policy::check_intent_policy(
                    &delegation.policy,
                    &intent.value_band,
                    &intent.trust_constraints,
                    &intent.settlement_preferences,
                )?;
                self.enforce_quiet_hours(&delegation, now)?;
                self.apply_daily_cap_for_new_intent(snapshot, &delegation, &intent, now)?;
                self.enforce_high_value_consent(snapshot, &delegation, &intent, ctx, operation_id, now)?;
            }

            snapshot.intents.insert(intent.id.clone(), intent.clone());
            Ok(serde_json::json!({ "intent": intent }))
        })?;

        Ok(OperationResponse { correlation_id, body })
    }

    pub fn update_intent(
        &self,
        ctx: &RequestContext,
        intent: SwapIntent,
        now: DateTime<Utc>,
    ) -> EngineResult<OperationResponse> {
        let operation_id = "intents.update";
        let payload = serde_json::to_value(&intent).map_err(|e| EngineError::SchemaInvalid { message: e.to_string() })?;
        let correlation_id = format!("corr_{operation_id}_{}", intent.id);
        let actor = ctx.actor.clone();

        let body = self.run_mutation(operation_id, &actor, ctx.idempotency_key, &payload, |snapshot| {
            let delegation = self.authorize(snapshot, operation_id, ctx, now)?;
            intent.validate_invariants().map_err(|message| EngineError::SchemaInvalid { message })?;
            let previous = snapshot
                .intents
                .get(&intent.id)
                .ok_or_else(|| EngineError::not_found(format!("intent {}", intent.id)))?
                .clone();
            if previous.actor != intent.actor {
                return Err(EngineError::forbidden("cannot reassign an intent's owning actor"));
            }

            if let Some(delegation) = delegation {
                policy::check_intent_policy(
                    &delegation.policy,
                    &intent.value_band,
                    &intent.trust_constraints,
                    &intent.settlement_preferences,
                )?;
                self.enforce_quiet_hours(&delegation, now)?;
                if let Some(cap) = delegation.policy.max_value_per_day_usd {
                    let delta = policy::active_max_for_intent(&intent) - policy::active_max_for_intent(&previous);
                    let day = now.format("%Y-%m-%d").to_string();
                    policy::apply_daily_cap(&mut snapshot.policy_spend_daily, &intent.actor.scope_key(), &day, delta, cap)?;
                }
            }

            snapshot.intents.insert(intent.id.clone(), intent.clone());
            Ok(serde_json::json!({ "intent": intent }))
        })?;

        Ok(OperationResponse { correlation_id, body })
    }

    pub fn cancel_intent(&self, ctx: &RequestContext, intent_id: &str, now: DateTime<Utc>) -> EngineResult<OperationResponse> {
        let operation_id = "intents.cancel";
        let payload = serde_json::json!({ "intent_id": intent_id });
        let correlation_id = format!("corr_{operation_id}_{intent_id}");
        let actor = ctx.actor.clone();

        let body = self.run_mutation(operation_id, &actor, ctx.idempotency_key, &payload, |snapshot| {
            self.authorize(snapshot, operation_id, ctx, now)?;
            let intent = snapshot
                .intents
                .get_mut(intent_id)
                .ok_or_else(|| EngineError::not_found(format!("intent {intent_id}")))?;
            if &intent.actor != &ctx.actor {
                return Err(EngineError::forbidden("caller does not own this intent"));
            }
            intent.status = IntentStatus::Cancelled;
            Ok(serde_json::json!({ "intent_id": intent_id, "status": "cancelled" }))
        })?;

        Ok(OperationResponse { correlation_id, body })
    }

    pub fn list_intents(&self, ctx: &RequestContext, now: DateTime<Utc>) -> EngineResult<Vec<SwapIntent>> {
        let snapshot = self.snapshot.lock().expect("snapshot mutex poisoned");
        self.authorize(&snapshot, "intents.list", ctx, now)?;
        let mut intents: Vec<SwapIntent> = snapshot
            .intents
            .values()
            .filter(|i| i.actor == ctx.actor)
            .cloned()
            .collect();
        intents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(intents)
    }

    pub fn get_intent(&self, ctx: &RequestContext, intent_id: &str, now: DateTime<Utc>) -> EngineResult<SwapIntent> {
        let snapshot = self.snapshot.lock().expect("snapshot mutex poisoned");
        self.authorize(&snapshot, "intents.get", ctx, now)?;
        let intent = snapshot
            .intents
            .get(intent_id)
            .ok_or_else(|| EngineError::not_found(format!("intent {intent_id}")))?;
        if &intent.actor != &ctx.actor {
            return Err(EngineError::forbidden("caller does not own this intent"));
        }
        Ok(intent.clone())
    }

    // ---- marketplace.matching.runs.* -----------------------------------

    /// `marketplace.matching.runs.create`. Snapshots active intents and
    /// `asset_values_usd`, builds the compatibility graph, enumerates
    /// bounded simple cycles, scores and disjoint-selects proposals, and
    /// records everything under a new run.
    pub fn create_matching_run(
        &self,
        ctx: &RequestContext,
        run_id: &str,
        asset_values_usd: &AssetValues,
        now: DateTime<Utc>,
    ) -> EngineResult<OperationResponse> {
        let operation_id = "marketplace.matching.runs.create";
        let payload = serde_json::json!({ "run_id": run_id });
        let correlation_id = format!("corr_{operation_id}_{run_id}");
        let actor = ctx.actor.clone();

        let body = self.run_mutation(operation_id, &actor, ctx.idempotency_key, &payload, |snapshot| {
            self.authorize(snapshot, operation_id, ctx, now)?;
            if snapshot.matching_runs.contains_key(run_id) {
                return Err(EngineError::conflict(format!("matching run {run_id} already exists")));
            }

            let candidate_intents: Vec<&SwapIntent> = snapshot.intents.values().filter(|i| i.is_active_at(now)).collect();
            let by_id: std::collections::HashMap<&str, &SwapIntent> =
                candidate_intents.iter().map(|i| (i.id.as_str(), *i)).collect();
            let graph = CompatibilityGraph::build(&candidate_intents, asset_values_usd, now);
            let budget = self.config.enumeration.budget();
            let result = matching::enumerate_cycles(
                &graph,
                self.config.enumeration.min_cycle_length,
                self.config.enumeration.max_cycle_length,
                budget,
            );

            let mut candidates: Vec<CycleProposal> = Vec::new();
            for cycle in &result.cycles {
                if let Some(mut proposal) = matching::build_proposal(cycle, &by_id, asset_values_usd) {
                    proposal.explainability.enumeration_limited = Some(result.limited);
                    proposal.explainability.enumeration_timed_out = Some(result.timed_out);
                    candidates.push(proposal);
                }
            }

            let candidate_intent_count = candidate_intents.len();
            let (selected, _trace) = matching::select_disjoint(candidates);
            let mut proposal_ids = Vec::with_capacity(selected.len());
            for proposal in &selected {
                commit::initialize_commit(snapshot, proposal);
                proposal_ids.push(proposal.id.clone());
                snapshot.proposals.insert(proposal.id.clone(), proposal.clone());
                let event = crate::model::event::sign_event(
                    crate::model::event::EventPayload::ProposalCreated {
                        proposal_id: proposal.id.clone(),
                        intent_ids: proposal.intent_ids(),
                    },
                    &format!("corr_{operation_id}_{run_id}"),
                    &actor,
                    self.event_ring(),
                    now,
                );
                snapshot.events.push(event);
            }

            let run = MatchingRun {
                run_id: run_id.to_string(),
                created_at: now,
                proposal_ids: proposal_ids.clone(),
                candidate_intent_count,
                enumerated_cycle_count: result.cycles.len(),
                enumeration_limited: result.limited,
                enumeration_timed_out: result.timed_out,
            };
            snapshot.matching_runs.insert(run_id.to_string(), run.clone());

            Ok(serde_json::to_value(&run).expect("matching run always serializes"))
        })?;

        Ok(OperationResponse { correlation_id, body })
    }

    pub fn get_matching_run(&self, ctx: &RequestContext, run_id: &str, now: DateTime<Utc>) -> EngineResult<MatchingRun> {
        let snapshot = self.snapshot.lock().expect("snapshot mutex poisoned");
        self.authorize(&snapshot, "marketplace.matching.runs.get", ctx, now)?;
        snapshot
            .matching_runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("matching run {run_id}")))
    }

    // ---- cycle_proposals.* ----------------------------------------------

    pub fn list_proposals(&self, ctx: &RequestContext, now: DateTime<Utc>) -> EngineResult<Vec<CycleProposal>> {
        let snapshot = self.snapshot.lock().expect("snapshot mutex poisoned");
        self.authorize(&snapshot, "cycle_proposals.list", ctx, now)?;
        let mut proposals: Vec<CycleProposal> = snapshot
            .proposals
            .values()
            .filter(|p| {
                let involved: Vec<Actor> = p.participants.iter().map(|part| part.actor.clone()).collect();
                tenancy::can_read_proposal(&snapshot, &p.id, &ctx.actor, &involved)
            })
            .cloned()
            .collect();
        proposals.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(proposals)
    }

    pub fn get_proposal(&self, ctx: &RequestContext, proposal_id: &str, now: DateTime<Utc>) -> EngineResult<CycleProposal> {
        let snapshot = self.snapshot.lock().expect("snapshot mutex poisoned");
        self.authorize(&snapshot, "cycle_proposals.get", ctx, now)?;
        let proposal = snapshot
            .proposals
            .get(proposal_id)
            .ok_or_else(|| EngineError::not_found(format!("proposal {proposal_id}")))?;
        let involved: Vec<Actor> = proposal.participants.iter().map(|p| p.actor.clone()).collect();
        if !tenancy::can_read_proposal(&snapshot, proposal_id, &ctx.actor, &involved) {
            return Err(EngineError::forbidden("caller is not party to this proposal"));
        }
        Ok(proposal.clone())
    }

    pub fn accept_proposal(
        &self,
        ctx: &RequestContext,
        proposal_id: &str,
        participant_intent_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<OperationResponse> {
        let operation_id = "cycle_proposals.accept";
        let payload = serde_json::json!({ "proposal_id": proposal_id, "intent_id": participant_intent_id });
        let correlation_id = format!("corr_{operation_id}_{proposal_id}_{participant_intent_id}");
        let actor = ctx.actor.clone();

        let body = self.run_mutation(operation_id, &actor, ctx.idempotency_key, &payload, |snapshot| {
            let delegation = self.authorize(snapshot, operation_id, ctx, now)?;
            if let Some(delegation) = delegation {
                let proposal = snapshot
                    .proposals
                    .get(proposal_id)
                    .ok_or_else(|| EngineError::not_found(format!("proposal {proposal_id}")))?;
                policy::check_proposal_policy(&delegation.policy, proposal.cycle_length(), proposal.confidence_score)?;
                self.enforce_quiet_hours(&delegation, now)?;
            }
            let outcome = commit::accept(snapshot, proposal_id, participant_intent_id, &ctx.actor, now)?;
            Ok(serde_json::json!({
                "became_ready": outcome.became_ready,
                "cancelled_proposal_ids": outcome.cancelled_proposal_ids,
            }))
        })?;

        Ok(OperationResponse { correlation_id, body })
    }

    pub fn decline_proposal(
        &self,
        ctx: &RequestContext,
        proposal_id: &str,
        participant_intent_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<OperationResponse> {
        let operation_id = "cycle_proposals.decline";
        let payload = serde_json::json!({ "proposal_id": proposal_id, "intent_id": participant_intent_id });
        let correlation_id = format!("corr_{operation_id}_{proposal_id}_{participant_intent_id}");
        let actor = ctx.actor.clone();

        let body = self.run_mutation(operation_id, &actor, ctx.idempotency_key, &payload, |snapshot| {
            self.authorize(snapshot, operation_id, ctx, now)?;
            commit::decline(snapshot, proposal_id, participant_intent_id, &ctx.actor)?;
            Ok(serde_json::json!({ "proposal_id": proposal_id, "status": "cancelled" }))
        })?;

        Ok(OperationResponse { correlation_id, body })
    }

    // ---- settlement.* ----------------------------------------------------

    pub fn start_settlement(
        &self,
        ctx: &RequestContext,
        cycle_id: &str,
        vault_bindings: &[VaultBinding],
        now: DateTime<Utc>,
    ) -> EngineResult<OperationResponse> {
        let operation_id = "settlement.start";
        let payload = serde_json::json!({ "cycle_id": cycle_id });
        let correlation_id = format!("corr_{operation_id}_{cycle_id}");
        let actor = ctx.actor.clone();
        let deposit_window = self.config.settlement.deposit_window();

        let body = self.run_mutation(operation_id, &actor, ctx.idempotency_key, &payload, |snapshot| {
            self.authorize(snapshot, operation_id, ctx, now)?;
            let events = settlement::start(
                snapshot,
                cycle_id,
                vault_bindings,
                deposit_window,
                &ctx.actor,
                self.event_ring(),
                now,
            )?;
            Ok(serde_json::json!({ "cycle_id": cycle_id, "events": events }))
        })?;

        Ok(OperationResponse { correlation_id, body })
    }

    pub fn confirm_deposit(
        &self,
        ctx: &RequestContext,
        cycle_id: &str,
        intent_id: &str,
        deposit_ref: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<OperationResponse> {
        let operation_id = "settlement.deposit_confirmed";
        let payload = serde_json::json!({ "cycle_id": cycle_id, "intent_id": intent_id, "deposit_ref": deposit_ref });
        let correlation_id = format!("corr_{operation_id}_{cycle_id}_{intent_id}");
        let actor = ctx.actor.clone();

        let body = self.run_mutation(operation_id, &actor, ctx.idempotency_key, &payload, |snapshot| {
            self.authorize(snapshot, operation_id, ctx, now)?;
            let events = settlement::confirm_deposit(
                snapshot,
                cycle_id,
                intent_id,
                deposit_ref,
                &ctx.actor,
                &ctx.actor,
                self.event_ring(),
                now,
            )?;
            Ok(serde_json::json!({ "cycle_id": cycle_id, "events": events }))
        })?;

        Ok(OperationResponse { correlation_id, body })
    }

    pub fn begin_execution(&self, ctx: &RequestContext, cycle_id: &str, now: DateTime<Utc>) -> EngineResult<OperationResponse> {
        let operation_id = "settlement.begin_execution";
        let payload = serde_json::json!({ "cycle_id": cycle_id });
        let correlation_id = format!("corr_{operation_id}_{cycle_id}");
        let actor = ctx.actor.clone();

        let body = self.run_mutation(operation_id, &actor, ctx.idempotency_key, &payload, |snapshot| {
            self.authorize(snapshot, operation_id, ctx, now)?;
            let events = settlement::begin_execution(snapshot, cycle_id, &ctx.actor, self.event_ring(), now)?;
            Ok(serde_json::json!({ "cycle_id": cycle_id, "events": events }))
        })?;

        Ok(OperationResponse { correlation_id, body })
    }

    pub fn complete_settlement(&self, ctx: &RequestContext, cycle_id: &str, now: DateTime<Utc>) -> EngineResult<OperationResponse> {
        let operation_id = "settlement.complete";
        let payload = serde_json::json!({ "cycle_id": cycle_id });
        let correlation_id = format!("corr_{operation_id}_{cycle_id}");
        let actor = ctx.actor.clone();

        let body = self.run_mutation(operation_id, &actor, ctx.idempotency_key, &payload, |snapshot| {
            self.authorize(snapshot, operation_id, ctx, now)?;
            let (receipt, events) =
                settlement::complete(snapshot, cycle_id, &ctx.actor, self.event_ring(), self.receipt_ring(), now)?;
            Ok(serde_json::json!({ "receipt": receipt, "events": events }))
        })?;

        Ok(OperationResponse { correlation_id, body })
    }

    pub fn settlement_status(&self, ctx: &RequestContext, cycle_id: &str, now: DateTime<Utc>) -> EngineResult<crate::model::Timeline> {
        let snapshot = self.snapshot.lock().expect("snapshot mutex poisoned");
        self.authorize(&snapshot, "settlement.status", ctx, now)?;
        let timeline = snapshot
            .timelines
            .get(cycle_id)
            .ok_or_else(|| EngineError::not_found(format!("cycle {cycle_id}")))?;
        let involved: Vec<Actor> = timeline.legs.iter().map(|l| l.from_actor.clone()).collect();
        if !tenancy::can_read_cycle(&snapshot, cycle_id, &ctx.actor, &involved) {
            return Err(EngineError::forbidden("caller is not party to this cycle"));
        }
        Ok(timeline.clone())
    }

    /// Control operation, not part of the external request envelope: an
    /// external tick invokes this per in-flight cycle past its deadline.
    pub fn expire_deposit_window(&self, cycle_id: &str, now: DateTime<Utc>) -> EngineResult<Option<Receipt>> {
        let mut snapshot = self.snapshot.lock().expect("snapshot mutex poisoned");
        let actor = Actor::new(ActorType::Partner, "system");
        let outcome =
            settlement::expire_deposit_window(&mut snapshot, cycle_id, &actor, self.event_ring(), self.receipt_ring(), now)?;
        if outcome.is_some() {
            self.persist(&snapshot)?;
        }
        Ok(outcome.map(|(receipt, _events)| receipt))
    }

    // ---- receipts.* -------------------------------------------------------

    pub fn get_receipt(&self, ctx: &RequestContext, receipt_id: &str, now: DateTime<Utc>) -> EngineResult<Receipt> {
        let snapshot = self.snapshot.lock().expect("snapshot mutex poisoned");
        self.authorize(&snapshot, "receipts.get", ctx, now)?;
        let receipt = snapshot
            .receipts
            .get(receipt_id)
            .ok_or_else(|| EngineError::not_found(format!("receipt {receipt_id}")))?;
        let involved: Vec<Actor> = snapshot
            .timelines
            .get(&receipt.cycle_id)
            .map(|t| t.legs.iter().map(|l| l.from_actor.clone()).collect())
            .unwrap_or_default();
        if !tenancy::can_read_cycle(&snapshot, &receipt.cycle_id, &ctx.actor, &involved) {
            return Err(EngineError::forbidden("caller is not party to this cycle's receipt"));
        }
        Ok(receipt.clone())
    }

    // ---- vault.* ------------------------------------------------------------

    pub fn vault_deposit(
        &self,
        ctx: &RequestContext,
        holding_id: &str,
        vault_id: &str,
        asset: Asset,
        now: DateTime<Utc>,
    ) -> EngineResult<OperationResponse> {
        let operation_id = "vault.deposit";
        let payload = serde_json::json!({ "holding_id": holding_id, "vault_id": vault_id, "asset": asset });
        let correlation_id = format!("corr_{operation_id}_{holding_id}");
        let actor = ctx.actor.clone();

        let body = self.run_mutation(operation_id, &actor, ctx.idempotency_key, &payload, |snapshot| {
            self.authorize(snapshot, operation_id, ctx, now)?;
            let (holding, _event) = vault::deposit(snapshot, holding_id, vault_id, asset, &ctx.actor, self.event_ring(), now)?;
            Ok(serde_json::to_value(&holding).expect("vault holding always serializes"))
        })?;

        Ok(OperationResponse { correlation_id, body })
    }

    pub fn vault_reserve(
        &self,
        ctx: &RequestContext,
        holding_id: &str,
        reservation_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<OperationResponse> {
        let operation_id = "vault.reserve";
        let payload = serde_json::json!({ "holding_id": holding_id, "reservation_id": reservation_id });
        let correlation_id = format!("corr_{operation_id}_{holding_id}");
        let actor = ctx.actor.clone();

        let body = self.run_mutation(operation_id, &actor, ctx.idempotency_key, &payload, |snapshot| {
            self.authorize(snapshot, operation_id, ctx, now)?;
            vault::reserve(snapshot, holding_id, reservation_id, &ctx.actor, self.event_ring(), now)?;
            Ok(serde_json::json!({ "holding_id": holding_id, "status": "reserved" }))
        })?;

        Ok(OperationResponse { correlation_id, body })
    }

    pub fn vault_release(&self, ctx: &RequestContext, holding_id: &str, now: DateTime<Utc>) -> EngineResult<OperationResponse> {
        let operation_id = "vault.release";
        let payload = serde_json::json!({ "holding_id": holding_id });
        let correlation_id = format!("corr_{operation_id}_{holding_id}");
        let actor = ctx.actor.clone();

        let body = self.run_mutation(operation_id, &actor, ctx.idempotency_key, &payload, |snapshot| {
            self.authorize(snapshot, operation_id, ctx, now)?;
            vault::release(snapshot, holding_id, &ctx.actor, self.event_ring(), now)?;
            Ok(serde_json::json!({ "holding_id": holding_id, "status": "available" }))
        })?;

        Ok(OperationResponse { correlation_id, body })
    }

    pub fn vault_withdraw(&self, ctx: &RequestContext, holding_id: &str, now: DateTime<Utc>) -> EngineResult<OperationResponse> {
        let operation_id = "vault.withdraw";
        let payload = serde_json::json!({ "holding_id": holding_id });
        let correlation_id = format!("corr_{operation_id}_{holding_id}");
        let actor = ctx.actor.clone();

        let body = self.run_mutation(operation_id, &actor, ctx.idempotency_key, &payload, |snapshot| {
            self.authorize(snapshot, operation_id, ctx, now)?;
            vault::withdraw(snapshot, holding_id, &ctx.actor, self.event_ring(), now)?;
            Ok(serde_json::json!({ "holding_id": holding_id, "status": "withdrawn" }))
        })?;

        Ok(OperationResponse { correlation_id, body })
    }

    pub fn vault_get(&self, ctx: &RequestContext, holding_id: &str, now: DateTime<Utc>) -> EngineResult<VaultHolding> {
        let snapshot = self.snapshot.lock().expect("snapshot mutex poisoned");
        self.authorize(&snapshot, "vault.get", ctx, now)?;
        let holding = vault::get(&snapshot, holding_id)?;
        if &holding.owner_actor != &ctx.actor {
            return Err(EngineError::forbidden("caller does not own this vault holding"));
        }
        Ok(holding.clone())
    }

    pub fn vault_list(&self, ctx: &RequestContext, now: DateTime<Utc>) -> EngineResult<Vec<VaultHolding>> {
        let snapshot = self.snapshot.lock().expect("snapshot mutex poisoned");
        self.authorize(&snapshot, "vault.list", ctx, now)?;
        Ok(vault::list(&snapshot, &ctx.actor).into_iter().cloned().collect())
    }

    // ---- delegations.* ------------------------------------------------------

    pub fn mint_delegation(&self, ctx: &RequestContext, delegation: Delegation, now: DateTime<Utc>) -> EngineResult<OperationResponse> {
        let operation_id = "delegations.mint";
        let payload = serde_json::to_value(&delegation).map_err(|e| EngineError::SchemaInvalid { message: e.to_string() })?;
        let correlation_id = format!("corr_{operation_id}_{}", delegation.delegation_id);
        let actor = ctx.actor.clone();
        let subject = format!("user:{}", ctx.actor.id);

        let body = self.run_mutation(operation_id, &actor, ctx.idempotency_key, &payload, |snapshot| {
            self.authorize(snapshot, operation_id, ctx, now)?;
            if delegation.subject_actor != subject {
                return Err(EngineError::forbidden("delegation subject must be the minting user"));
            }
            if snapshot.delegations.contains_key(&delegation.delegation_id) {
                return Err(EngineError::conflict(format!("delegation {} already exists", delegation.delegation_id)));
            }
            let signature = self.delegation_ring().sign(&serde_json::to_value(&delegation).expect("delegation serializes"));
            let body = crate::model::DelegationTokenBody {
                delegation: delegation.clone(),
                signature,
            };
            let token = crate::model::delegation::encode_delegation_token(&body)?;
            snapshot.delegations.insert(delegation.delegation_id.clone(), delegation.clone());
            Ok(serde_json::json!({ "delegation": delegation, "token": token }))
        })?;

        Ok(OperationResponse { correlation_id, body })
    }

    pub fn revoke_delegation(&self, ctx: &RequestContext, delegation_id: &str, now: DateTime<Utc>) -> EngineResult<OperationResponse> {
        let operation_id = "delegations.revoke";
        let payload = serde_json::json!({ "delegation_id": delegation_id });
        let correlation_id = format!("corr_{operation_id}_{delegation_id}");
        let actor = ctx.actor.clone();

        let body = self.run_mutation(operation_id, &actor, ctx.idempotency_key, &payload, |snapshot| {
            self.authorize(snapshot, operation_id, ctx, now)?;
            let delegation = snapshot
                .delegations
                .get_mut(delegation_id)
                .ok_or_else(|| EngineError::not_found(format!("delegation {delegation_id}")))?;
            if delegation.subject_actor != format!("user:{}", ctx.actor.id) {
                return Err(EngineError::forbidden("caller is not the subject of this delegation"));
            }
            delegation.revoked_at = Some(now);
            Ok(serde_json::json!({ "delegation_id": delegation_id, "revoked_at": now }))
        })?;

        Ok(OperationResponse { correlation_id, body })
    }

    pub fn list_delegations(&self, ctx: &RequestContext, now: DateTime<Utc>) -> EngineResult<Vec<Delegation>> {
        let snapshot = self.snapshot.lock().expect("snapshot mutex poisoned");
        self.authorize(&snapshot, "delegations.list", ctx, now)?;
        let subject = format!("user:{}", ctx.actor.id);
        let mut delegations: Vec<Delegation> = snapshot
            .delegations
            .values()
            .filter(|d| d.subject_actor == subject)
            .cloned()
            .collect();
        delegations.sort_by(|a, b| a.delegation_id.cmp(&b.delegation_id));
        Ok(delegations)
    }

    // ---- webhooks.* -----------------------------------------------------

    pub fn ingest_webhook(&self, ctx: &RequestContext, envelope: WebhookEnvelope, now: DateTime<Utc>) -> EngineResult<IngestOutcome> {
        let mut snapshot = self.snapshot.lock().expect("snapshot mutex poisoned");
        self.authorize(&snapshot, "webhooks.proposals.ingest", ctx, now)?;
        let (outcome, _events) = delivery::ingest(&mut snapshot, &envelope, self.event_ring(), now)?;
        if outcome != IngestOutcome::AlreadySeen {
            self.persist(&snapshot)?;
        }
        Ok(outcome)
    }

    // ---- health.read ------------------------------------------------------

    pub fn health(&self) -> Value {
        let snapshot = self.snapshot.lock().expect("snapshot mutex poisoned");
        serde_json::json!({
            "status": "ok",
            "intents": snapshot.intents.len(),
            "proposals": snapshot.proposals.len(),
            "timelines": snapshot.timelines.len(),
            "idempotency_records": snapshot.idempotency.len(),
            "webhook_events_seen": snapshot.webhook_seen_event_ids.len(),
            "active_key_ids": {
                "event": self.keys.event.active_key_id(),
                "receipt": self.keys.receipt.active_key_id(),
                "delegation": self.keys.delegation.active_key_id(),
                "policy_integrity": self.keys.policy_integrity.active_key_id(),
            },
        })
    }

    // ---- shared policy plumbing --------------------------------------------

    fn enforce_quiet_hours(&self, delegation: &Delegation, now: DateTime<Utc>) -> EngineResult<()> {
        if let Some(quiet_hours) = &delegation.policy.quiet_hours {
            if policy::is_within_quiet_hours(&quiet_hours.start, &quiet_hours.end, &quiet_hours.tz, now)? {
                return Err(EngineError::forbidden_with_code("operation refused during quiet hours", "quiet_hours"));
            }
        }
        Ok(())
    }

    fn apply_daily_cap_for_new_intent(
        &self,
        snapshot: &mut Snapshot,
        delegation: &Delegation,
        intent: &SwapIntent,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        if let Some(cap) = delegation.policy.max_value_per_day_usd {
            let delta = policy::active_max_for_intent(intent);
            let day = now.format("%Y-%m-%d").to_string();
            policy::apply_daily_cap(&mut snapshot.policy_spend_daily, &intent.actor.scope_key(), &day, delta, cap)?;
        }
        Ok(())
    }

    fn enforce_high_value_consent(
        &self,
        snapshot: &mut Snapshot,
        delegation: &Delegation,
        intent: &SwapIntent,
        ctx: &RequestContext,
        operation_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let max_usd = match intent.value_band.max_usd {
            Some(v) => v,
            None => return Ok(()),
        };
        let flags = self.config.consent_flags();
        let input = policy::ConsentCheckInput {
            max_usd,
            threshold_usd: delegation.policy.high_value_consent_threshold_usd,
            consent: ctx.user_consent.as_ref(),
            subject: &delegation.subject_actor,
            delegation_id: &delegation.delegation_id,
            intent_id: &intent.id,
            operation_id,
            now,
        };
        policy::evaluate_high_value_consent(&flags, self.policy_integrity_ring(), &mut snapshot.policy_consent_replay, &input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::model::{
        Asset, IntentStatus, SettlementPreferences, TimeConstraints, TrustConstraints, ValueBand, WantSpec,
    };
    use crate::store::MemoryStateStore;

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
            want_spec: WantSpec::SpecificAsset {
                platform: "steam".to_string(),
                asset_key: want_asset.to_string(),
            },
            value_band: ValueBand {
                min_usd: Some(80.0),
                max_usd: Some(120.0),
                pricing_source: None,
            },
            trust_constraints: TrustConstraints {
                max_cycle_length: 2,
                min_counterparty_reliability: None,
            },
            time_constraints: TimeConstraints {
                expires_at: Utc::now() + chrono::Duration::hours(1),
                urgency: None,
            },
            settlement_preferences: SettlementPreferences { require_escrow: false },
            status: IntentStatus::Active,
        }
    }

    fn ctx(actor: Actor, scope: &str, key: &'static str) -> RequestContext<'static> {
        RequestContext::new(actor).with_scopes(vec![scope.to_string()]).with_idempotency_key(key)
    }

    #[test]
    fn create_intent_is_idempotent() {
        let engine = engine();
        let now = Utc::now();
        let a = intent("intent_a", "alice", "1", "2");
        let request_ctx = ctx(Actor::user("alice"), "intents.create", "key1");
        let first = engine.create_intent(&request_ctx, a.clone(), now).unwrap();
        let second = engine.create_intent(&request_ctx, a, now).unwrap();
        assert_eq!(first.body, second.body);
    }

    #[test]
    fn idempotency_replay_with_different_payload_is_rejected() {
        let engine = engine();
        let now = Utc::now();
        let a = intent("intent_a", "alice", "1", "2");
        let request_ctx = ctx(Actor::user("alice"), "intents.create", "key1");
        engine.create_intent(&request_ctx, a.clone(), now).unwrap();

        let mut changed = intent("intent_a", "alice", "1", "2");
        changed.value_band.max_usd = Some(140.0);
        let err = engine.create_intent(&request_ctx, changed, now).unwrap_err();
        assert_eq!(err.code(), "IDEMPOTENCY_KEY_REUSE_PAYLOAD_MISMATCH");
    }

    #[test]
    fn missing_scope_is_rejected_before_mutation() {
        let engine = engine();
        let now = Utc::now();
        let a = intent("intent_a", "alice", "1", "2");
        let request_ctx = RequestContext::new(Actor::user("alice")).with_idempotency_key("key1");
        let err = engine.create_intent(&request_ctx, a, now).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_SCOPE");
        assert!(engine.read(|s| s.intents.is_empty()));
    }

    #[test]
    fn two_way_cycle_matching_run_produces_one_proposal() {
        let engine = engine();
        let now = Utc::now();
        let a = intent("intent_a", "alice", "1", "2");
        let b = intent("intent_b", "bob", "2", "1");
        engine.create_intent(&ctx(Actor::user("alice"), "intents.create", "a1"), a, now).unwrap();
        engine.create_intent(&ctx(Actor::user("bob"), "intents.create", "b1"), b, now).unwrap();

        let mut values = AssetValues::new();
        values.insert("steam:1".to_string(), 100.0);
        values.insert("steam:2".to_string(), 101.0);

        let run_ctx = ctx(Actor::user("alice"), "matching.run", "run1");
        engine.create_matching_run(&run_ctx, "run_1", &values, now).unwrap();

        let run = engine.get_matching_run(&ctx(Actor::user("alice"), "matching.read", "_"), "run_1", now).unwrap();
        assert_eq!(run.proposal_ids.len(), 1);
    }

    #[test]
    fn full_swap_lifecycle_completes() {
        let engine = engine();
        let now = Utc::now();
        let a = intent("intent_a", "alice", "1", "2");
        let b = intent("intent_b", "bob", "2", "1");
        engine.create_intent(&ctx(Actor::user("alice"), "intents.create", "a1"), a, now).unwrap();
        engine.create_intent(&ctx(Actor::user("bob"), "intents.create", "b1"), b, now).unwrap();

        let mut values = AssetValues::new();
        values.insert("steam:1".to_string(), 100.0);
        values.insert("steam:2".to_string(), 101.0);
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

        engine
            .start_settlement(&ctx(Actor::user("alice"), "settlement.write", "start"), &proposal_id, &[], now)
            .unwrap();
        engine
            .confirm_deposit(&ctx(Actor::user("alice"), "settlement.write", "dep_a"), &proposal_id, "intent_a", "ref_a", now)
            .unwrap();
        engine
            .confirm_deposit(&ctx(Actor::user("bob"), "settlement.write", "dep_b"), &proposal_id, "intent_b", "ref_b", now)
            .unwrap();
        engine
            .begin_execution(&ctx(Actor::user("alice"), "settlement.write", "begin"), &proposal_id, now)
            .unwrap();
        let response = engine
            .complete_settlement(&ctx(Actor::user("alice"), "settlement.write", "complete"), &proposal_id, now)
            .unwrap();
        assert_eq!(response.body["receipt"]["final_state"], "completed");
    }
}
