use crate::model::{Actor, ActorType};
use crate::store::Snapshot;

/// Records that `partner_id` pushed `proposal_id` via the webhook path.
pub fn record_proposal(snapshot: &mut Snapshot, proposal_id: &str, partner_id: &str) {
    snapshot.tenancy.proposals.insert(proposal_id.to_string(), partner_id.to_string());
}

/// Records that `partner_id` pushed the cycle underlying `cycle_id`.
/// Cycle ids are proposal ids, so this only matters for proposals whose
/// settlement cycle should inherit the same tenancy scope.
pub fn record_cycle(snapshot: &mut Snapshot, cycle_id: &str, partner_id: &str) {
    snapshot.tenancy.cycles.insert(cycle_id.to_string(), partner_id.to_string());
}

/// Whether `caller` may read an entity recorded under `recording_partner`'s
/// tenancy. Entities with no recording partner (the common case — created
/// directly through `intents.create`/matching, not pushed by a partner) are
/// unscoped and readable by anyone who already cleared authz for the
/// operation. A recorded entity is readable only by the recording partner
/// or by one of the actors directly involved in it.
pub fn can_read(recording_partner: Option<&str>, caller: &Actor, involved_actors: &[Actor]) -> bool {
    match recording_partner {
        None => true,
        Some(partner_id) => {
            (caller.actor_type == ActorType::Partner && caller.id == partner_id) || involved_actors.contains(caller)
        }
    }
}

/// Convenience wrapper for `cycle_proposals.get`/`list` and
/// `settlement.status`/`receipts.get`: looks up the recording partner for
/// `proposal_id` (falling back to `cycle_id` for settlement/receipt reads)
/// and checks readability.
pub fn can_read_proposal(snapshot: &Snapshot, proposal_id: &str, caller: &Actor, involved_actors: &[Actor]) -> bool {
    can_read(snapshot.tenancy.proposals.get(proposal_id).map(String::as_str), caller, involved_actors)
}

pub fn can_read_cycle(snapshot: &Snapshot, cycle_id: &str, caller: &Actor, involved_actors: &[Actor]) -> bool {
    can_read(snapshot.tenancy.cycles.get(cycle_id).map(String::as_str), caller, involved_actors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unscoped_entity_is_readable_by_anyone() {
        let snapshot = Snapshot::default();
        assert!(can_read_proposal(&snapshot, "prop_1", &Actor::user("anyone"), &[]));
    }

    #[test]
    fn recording_partner_can_read() {
        let mut snapshot = Snapshot::default();
        record_proposal(&mut snapshot, "prop_1", "partner_a");
        assert!(can_read_proposal(&snapshot, "prop_1", &Actor::partner("partner_a"), &[]));
    }

    #[test]
    fn other_partner_cannot_read() {
        let mut snapshot = Snapshot::default();
        record_proposal(&mut snapshot, "prop_1", "partner_a");
        assert!(!can_read_proposal(&snapshot, "prop_1", &Actor::partner("partner_b"), &[]));
    }

    #[test]
    fn involved_actor_can_read_even_without_partner_match() {
        let mut snapshot = Snapshot::default();
        record_proposal(&mut snapshot, "prop_1", "partner_a");
        let involved = vec![Actor::user("intent_a")];
        assert!(can_read_proposal(&snapshot, "prop_1", &Actor::user("intent_a"), &involved));
        assert!(!can_read_proposal(&snapshot, "prop_1", &Actor::user("intent_c"), &involved));
    }
}
