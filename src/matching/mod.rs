use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::crypto::canonical;
use crate::model::{
    Asset, AssetValues, CycleProposal, Explainability, FeeBreakdown, ProposalParticipant, SwapIntent,
};

/// Directed compatibility graph: node `a -> b` iff `offer(b)` satisfies
/// `want_spec(a)` and `value(offer(b))` lies within `a.value_band`.
pub struct CompatibilityGraph<'a> {
    graph: DiGraph<&'a str, ()>,
    index_of: HashMap<&'a str, NodeIndex>,
    sort_rank: HashMap<&'a str, usize>,
}

impl<'a> CompatibilityGraph<'a> {
    pub fn build(intents: &[&'a SwapIntent], values: &AssetValues, now: DateTime<Utc>) -> Self {
        let mut active: Vec<&SwapIntent> = intents.iter().copied().filter(|i| i.is_active_at(now)).collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));

        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();
        for intent in &active {
            let idx = graph.add_node(intent.id.as_str());
            index_of.insert(intent.id.as_str(), idx);
        }

        for a in &active {
            for b in &active {
                if a.id == b.id {
                    continue;
                }
                if !a.want_spec.is_satisfied_by(&b.offer) {
                    continue;
                }
                let value = crate::model::asset::offer_value_usd(&b.offer, values);
                if !a.value_band.contains(value) {
                    continue;
                }
                graph.add_edge(index_of[a.id.as_str()], index_of[b.id.as_str()], ());
            }
        }

        let mut sort_rank = HashMap::new();
        let mut ids: Vec<&str> = active.iter().map(|i| i.id.as_str()).collect();
        ids.sort();
        for (rank, id) in ids.into_iter().enumerate() {
            sort_rank.insert(id, rank);
        }

        CompatibilityGraph {
            graph,
            index_of,
            sort_rank,
        }
    }

    fn rank_of(&self, node: NodeIndex) -> usize {
        self.sort_rank[self.graph[node]]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnumerationBudget {
    pub max_enumerated_cycles: Option<usize>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct EnumerationResult {
    /// Cycles in intent-id order, each rotated so its lexicographically
    /// smallest id leads; sorted by `(length, canonical key)`.
    pub cycles: Vec<Vec<String>>,
    pub limited: bool,
    pub timed_out: bool,
}

/// Enumerates simple directed cycles of length `[min_len, max_len]` via
/// Tarjan SCCs followed by a bounded, sorted-order DFS within each SCC.
pub fn enumerate_cycles(
    graph: &CompatibilityGraph,
    min_len: usize,
    max_len: usize,
    budget: EnumerationBudget,
) -> EnumerationResult {
    let sccs = tarjan_scc(&graph.graph);
    let started = Instant::now();
    let mut found: HashSet<String> = HashSet::new();
    let mut cycles: Vec<Vec<String>> = Vec::new();
    let mut limited = false;
    let mut timed_out = false;

    'sccs: for scc in &sccs {
        if scc.len() < 2 {
            continue;
        }
        let mut nodes = scc.clone();
        nodes.sort_by_key(|n| graph.rank_of(*n));
        let allowed: HashSet<NodeIndex> = nodes.iter().copied().collect();

        for &start in &nodes {
            let mut path = vec![start];
            let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
            if !dfs_from(
                graph,
                start,
                start,
                &allowed,
                graph.rank_of(start),
                &mut path,
                &mut visited,
                min_len,
                max_len,
                &mut cycles,
                &mut found,
                budget,
                started,
                &mut limited,
                &mut timed_out,
            ) {
                break 'sccs;
            }
        }
    }

    cycles.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    EnumerationResult {
        cycles,
        limited,
        timed_out,
    }
}

#[allow(clippy::too_many_arguments)]
fn dfs_from(
    graph: &CompatibilityGraph,
    start: NodeIndex,
    current: NodeIndex,
    allowed: &HashSet<NodeIndex>,
    start_rank: usize,
    path: &mut Vec<NodeIndex>,
    visited: &mut HashSet<NodeIndex>,
    min_len: usize,
    max_len: usize,
    out: &mut Vec<Vec<String>>,
    seen_keys: &mut HashSet<String>,
    budget: EnumerationBudget,
    started: Instant,
    limited: &mut bool,
    timed_out: &mut bool,
) -> bool {
    if let Some(timeout) = budget.timeout {
        if started.elapsed() > timeout {
            *timed_out = true;
            return false;
        }
    }
    if let Some(max_count) = budget.max_enumerated_cycles {
        if out.len() >= max_count {
            *limited = true;
            return false;
        }
    }

    for neighbor in graph.graph.neighbors(current) {
        if !allowed.contains(&neighbor) || graph.rank_of(neighbor) < start_rank {
            continue;
        }
        if neighbor == start {
            if path.len() >= min_len && path.len() <= max_len {
                let ids: Vec<String> = path.iter().map(|n| graph.graph[*n].to_string()).collect();
                let key = ids.join(">");
                if seen_keys.insert(key) {
                    out.push(ids);
                }
            }
            continue;
        }
        if visited.contains(&neighbor) || path.len() >= max_len {
            continue;
        }
        visited.insert(neighbor);
        path.push(neighbor);
        let keep_going = dfs_from(
            graph, start, neighbor, allowed, start_rank, path, visited, min_len, max_len, out, seen_keys, budget,
            started, limited, timed_out,
        );
        path.pop();
        visited.remove(&neighbor);
        if !keep_going {
            return false;
        }
    }
    true
}

/// Builds the participant list and scoring/explainability fields for a
/// cycle; returns `None` when some participant's `max_cycle_length` is
/// shorter than the cycle.
pub fn build_proposal(
    cycle: &[String],
    intents: &HashMap<&str, &SwapIntent>,
    values: &AssetValues,
) -> Option<CycleProposal> {
    let length = cycle.len();
    if cycle
        .iter()
        .any(|id| intents[id.as_str()].trust_constraints.max_cycle_length < length as u32)
    {
        return None;
    }

    let mut participants = Vec::with_capacity(length);
    let mut get_values = Vec::with_capacity(length);
    for (k, intent_id) in cycle.iter().enumerate() {
        let intent = intents[intent_id.as_str()];
        let next_intent = intents[cycle[(k + 1) % length].as_str()];
        let get: Vec<Asset> = next_intent.offer.clone();
        get_values.push(crate::model::asset::offer_value_usd(&get, values));
        participants.push(ProposalParticipant {
            intent_id: intent.id.clone(),
            actor: intent.actor.clone(),
            give: intent.offer.clone(),
            get,
        });
    }

    let expires_at = cycle
        .iter()
        .map(|id| intents[id.as_str()].time_constraints.expires_at)
        .min()
        .expect("cycle is non-empty");

    let max_get = get_values.iter().cloned().fold(f64::MIN, f64::max);
    let min_get = get_values.iter().cloned().fold(f64::MAX, f64::min);
    let value_spread = if max_get <= 0.0 {
        0.0
    } else {
        round4((max_get - min_get) / max_get)
    };

    let base = if length == 2 { 0.9 } else { 0.85 };
    let confidence_score = round4((base - value_spread).clamp(0.0, 1.0));

    let mut per_participant_usd = std::collections::BTreeMap::new();
    for (participant, get_value) in participants.iter().zip(get_values.iter()) {
        per_participant_usd.insert(participant.intent_id.clone(), round2(get_value * 0.01));
    }

    let id = proposal_id(cycle);

    Some(CycleProposal {
        id,
        expires_at,
        participants,
        confidence_score,
        value_spread,
        fee_breakdown: FeeBreakdown { per_participant_usd },
        explainability: Explainability {
            cycle_length: length,
            base_score: base,
            value_spread,
            enumeration_limited: None,
            enumeration_timed_out: None,
        },
    })
}

/// `prop_` + 12-hex SHA-256 prefix of the canonicalized cycle intent-id
/// list, in cycle order.
pub fn proposal_id(cycle: &[String]) -> String {
    let value = serde_json::to_value(cycle).expect("string vec always serializes");
    let prefix = canonical::sha256_prefix(&canonical::to_canonical_string(&value), 12);
    format!("prop_{prefix}")
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionTrace {
    Selected,
    ConflictSharedIntent,
}

/// Sorts by `(score desc, id asc)`, then greedily selects proposals whose
/// intent ids haven't already been claimed by an earlier selection.
pub fn select_disjoint(mut candidates: Vec<CycleProposal>) -> (Vec<CycleProposal>, Vec<(String, SelectionTrace)>) {
    candidates.sort_by(|a, b| {
        b.confidence_score
            .partial_cmp(&a.confidence_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut used: HashSet<String> = HashSet::new();
    let mut selected = Vec::new();
    let mut trace = Vec::new();
    for candidate in candidates {
        let ids = candidate.intent_ids();
        if ids.iter().any(|id| used.contains(id)) {
            trace.push((candidate.id.clone(), SelectionTrace::ConflictSharedIntent));
            continue;
        }
        for id in &ids {
            used.insert(id.clone());
        }
        trace.push((candidate.id.clone(), SelectionTrace::Selected));
        selected.push(candidate);
    }
    (selected, trace)
}
