use chrono::{DateTime, Utc};

use crate::crypto::keys::KeyRing;
use crate::errors::{EngineError, EngineResult};
use crate::model::event::{sign_event, EventPayload};
use crate::model::{Actor, Asset, Event, VaultHolding, VaultHoldingStatus};
use crate::store::Snapshot;

/// `vault.deposit`. Records a new holding as `available`, owned by
/// `owner`. The holding id is caller-supplied (minted by the vault
/// integration, not the engine) so repeated webhook delivery of the same
/// physical deposit can be recognised by id.
pub fn deposit(
    snapshot: &mut Snapshot,
    holding_id: &str,
    vault_id: &str,
    asset: Asset,
    owner: &Actor,
    event_ring: &KeyRing,
    now: DateTime<Utc>,
) -> EngineResult<(VaultHolding, Event)> {
    if snapshot.vault_holdings.contains_key(holding_id) {
        return Err(EngineError::conflict(format!("vault holding {holding_id} already exists")));
    }
    let holding = VaultHolding {
        holding_id: holding_id.to_string(),
        vault_id: vault_id.to_string(),
        asset,
        owner_actor: owner.clone(),
        status: VaultHoldingStatus::Available,
        reservation_id: None,
        settlement_cycle_id: None,
        deposited_at: now,
        withdrawn_at: None,
        updated_at: now,
    };
    snapshot.vault_holdings.insert(holding_id.to_string(), holding.clone());

    let event = sign_event(
        EventPayload::VaultDepositConfirmed {
            holding_id: holding_id.to_string(),
        },
        holding_id,
        owner,
        event_ring,
        now,
    );
    snapshot.vault_events.push(event.clone());
    Ok((holding, event))
}

/// `vault.reserve`. Requires the holding to be `available` and the
/// caller to be its owner.
pub fn reserve(
    snapshot: &mut Snapshot,
    holding_id: &str,
    reservation_id: &str,
    caller: &Actor,
    event_ring: &KeyRing,
    now: DateTime<Utc>,
) -> EngineResult<Event> {
    let holding = snapshot
        .vault_holdings
        .get_mut(holding_id)
        .ok_or_else(|| EngineError::not_found(format!("vault holding {holding_id}")))?;
    if &holding.owner_actor != caller {
        return Err(EngineError::forbidden("caller does not own this vault holding"));
    }
    if holding.status != VaultHoldingStatus::Available {
        return Err(EngineError::conflict(format!("vault holding {holding_id} is not available")));
    }
    holding.status = VaultHoldingStatus::Reserved;
    holding.reservation_id = Some(reservation_id.to_string());
    holding.updated_at = now;

    let event = sign_event(
        EventPayload::VaultHoldingReserved {
            holding_id: holding_id.to_string(),
            reservation_id: reservation_id.to_string(),
        },
        holding_id,
        caller,
        event_ring,
        now,
    );
    snapshot.vault_events.push(event.clone());
    Ok(event)
}

/// `vault.release`. Requires the holding to be `reserved` and not
/// currently bound to an in-flight settlement cycle.
pub fn release(
    snapshot: &mut Snapshot,
    holding_id: &str,
    caller: &Actor,
    event_ring: &KeyRing,
    now: DateTime<Utc>,
) -> EngineResult<Event> {
    let holding = snapshot
        .vault_holdings
        .get_mut(holding_id)
        .ok_or_else(|| EngineError::not_found(format!("vault holding {holding_id}")))?;
    if &holding.owner_actor != caller {
        return Err(EngineError::forbidden("caller does not own this vault holding"));
    }
    if holding.status != VaultHoldingStatus::Reserved {
        return Err(EngineError::conflict(format!("vault holding {holding_id} is not reserved")));
    }
    if holding.settlement_cycle_id.is_some() {
        return Err(EngineError::conflict(format!(
            "vault holding {holding_id} is bound to an in-flight settlement cycle"
        )));
    }
    holding.status = VaultHoldingStatus::Available;
    holding.reservation_id = None;
    holding.updated_at = now;

    let event = sign_event(
        EventPayload::VaultHoldingReleased {
            holding_id: holding_id.to_string(),
        },
        holding_id,
        caller,
        event_ring,
        now,
    );
    snapshot.vault_events.push(event.clone());
    Ok(event)
}

/// `vault.withdraw`. Requires the holding to be `available` (a reserved
/// holding must be released, or its cycle must complete or time out,
/// before it can leave the vault).
pub fn withdraw(
    snapshot: &mut Snapshot,
    holding_id: &str,
    caller: &Actor,
    event_ring: &KeyRing,
    now: DateTime<Utc>,
) -> EngineResult<Event> {
    let holding = snapshot
        .vault_holdings
        .get_mut(holding_id)
        .ok_or_else(|| EngineError::not_found(format!("vault holding {holding_id}")))?;
    if &holding.owner_actor != caller {
        return Err(EngineError::forbidden("caller does not own this vault holding"));
    }
    if holding.status != VaultHoldingStatus::Available {
        return Err(EngineError::conflict(format!("vault holding {holding_id} is not available")));
    }
    holding.status = VaultHoldingStatus::Withdrawn;
    holding.withdrawn_at = Some(now);
    holding.updated_at = now;

    let event = sign_event(
        EventPayload::VaultHoldingWithdrawn {
            holding_id: holding_id.to_string(),
        },
        holding_id,
        caller,
        event_ring,
        now,
    );
    snapshot.vault_events.push(event.clone());
    Ok(event)
}

/// `vault.get`.
pub fn get<'a>(snapshot: &'a Snapshot, holding_id: &str) -> EngineResult<&'a VaultHolding> {
    snapshot
        .vault_holdings
        .get(holding_id)
        .ok_or_else(|| EngineError::not_found(format!("vault holding {holding_id}")))
}

/// `vault.list`, scoped to holdings owned by `owner`.
pub fn list<'a>(snapshot: &'a Snapshot, owner: &Actor) -> Vec<&'a VaultHolding> {
    let mut holdings: Vec<&VaultHolding> = snapshot
        .vault_holdings
        .values()
        .filter(|h| &h.owner_actor == owner)
        .collect();
    holdings.sort_by(|a, b| a.holding_id.cmp(&b.holding_id));
    holdings
}
