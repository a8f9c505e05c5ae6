//! SELECT-NEIGHBORS variants.
//!
//! Given the candidates a layer search surfaced for a target, pick which of
//! them become edges. `Simple` keeps the nearest M. The other two favor
//! geometric diversity over pure proximity, which keeps the graph navigable
//! and its diameter low; insertion without a diversity rule tends to
//! cluster.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::graph::costs::TravelingCosts;
use crate::graph::heap::{cmp_dist, HeapOrder, NodeHeap};
use crate::graph::node::Node;
use crate::params::{NeighborSelection, Parameters};

/// Pick at most `max_connections(layer)` neighbors for the target bound by
/// `costs`, from `candidates` (distances to that target). `exclude` is the
/// node being wired, so it can never select itself.
///
/// Returns the selection sorted ascending by distance.
pub(crate) fn select_best_for_connecting<T, D: PartialOrd + Copy>(
    params: &Parameters,
    costs: &TravelingCosts<'_, T, D>,
    nodes: &[Node],
    mut candidates: Vec<(D, u32)>,
    layer: usize,
    exclude: Option<u32>,
) -> Vec<(D, u32)> {
    if let Some(excluded) = exclude {
        candidates.retain(|&(_, id)| id != excluded);
    }
    let m = params.max_connections(layer);
    match params.neighbor_selection {
        NeighborSelection::Simple => select_simple(candidates, m),
        NeighborSelection::Heuristic => {
            select_heuristic(params, costs, nodes, candidates, layer, m, exclude)
        }
        NeighborSelection::Diverse => select_diverse(costs, candidates, m),
    }
}

fn sort_ascending<D: PartialOrd>(entries: &mut [(D, u32)]) {
    entries.sort_by(|a, b| cmp_dist(&a.0, &b.0).then_with(|| a.1.cmp(&b.1)));
}

/// Keep the M nearest candidates.
fn select_simple<D: PartialOrd + Copy>(mut candidates: Vec<(D, u32)>, m: usize) -> Vec<(D, u32)> {
    sort_ascending(&mut candidates);
    candidates.truncate(m);
    candidates
}

/// Pop candidates nearest-first; accept one only while it is closer to the
/// target than the farthest already-accepted result. Rejections land on a
/// discard heap that can refill an under-full selection.
fn select_heuristic<T, D: PartialOrd + Copy>(
    params: &Parameters,
    costs: &TravelingCosts<'_, T, D>,
    nodes: &[Node],
    candidates: Vec<(D, u32)>,
    layer: usize,
    m: usize,
    exclude: Option<u32>,
) -> Vec<(D, u32)> {
    let mut working = candidates;

    if params.expand_best_selection {
        let mut seen: HashSet<u32> = working.iter().map(|&(_, id)| id).collect();
        if let Some(excluded) = exclude {
            seen.insert(excluded);
        }
        let initial: Vec<u32> = working.iter().map(|&(_, id)| id).collect();
        for id in initial {
            for &neighbor in nodes[id as usize].neighbors(layer) {
                if seen.insert(neighbor) {
                    working.push((costs.to(neighbor), neighbor));
                }
            }
        }
    }

    let mut frontier = NodeHeap::with_capacity(HeapOrder::CloserFirst, working.len());
    frontier.build_from(working);
    let mut discards = NodeHeap::new(HeapOrder::CloserFirst);
    let mut accepted: Vec<(D, u32)> = Vec::with_capacity(m);
    let mut farthest: Option<D> = None;

    while accepted.len() < m {
        let Some((distance, id)) = frontier.pop() else {
            break;
        };
        let admit = match farthest {
            None => true,
            Some(limit) => cmp_dist(&distance, &limit) == Ordering::Less,
        };
        if admit {
            if farthest.is_none_or(|limit| cmp_dist(&limit, &distance) == Ordering::Less) {
                farthest = Some(distance);
            }
            accepted.push((distance, id));
        } else {
            discards.push(distance, id);
        }
    }

    if params.keep_pruned_connections {
        while accepted.len() < m {
            let Some(entry) = discards.pop() else {
                break;
            };
            accepted.push(entry);
        }
    }

    sort_ascending(&mut accepted);
    accepted
}

/// Relative-neighborhood rule: accept a candidate only if it is closer to
/// the target than to every already-accepted result. Stops at M; pruned
/// candidates are not reused.
fn select_diverse<T, D: PartialOrd + Copy>(
    costs: &TravelingCosts<'_, T, D>,
    mut candidates: Vec<(D, u32)>,
    m: usize,
) -> Vec<(D, u32)> {
    sort_ascending(&mut candidates);
    let mut accepted: Vec<(D, u32)> = Vec::with_capacity(m);
    for (distance, id) in candidates {
        if accepted.len() >= m {
            break;
        }
        let diverse = accepted
            .iter()
            .all(|&(_, picked)| cmp_dist(&distance, &costs.between(id, picked)) == Ordering::Less);
        if diverse {
            accepted.push((distance, id));
        }
    }
    accepted
}
