//! Property-based tests for the graph's structural invariants.
//!
//! These verify facts that should hold for any interleaving of inserts and
//! removals, under every neighbor-selection strategy:
//! - adjacency symmetry on every layer
//! - per-layer edge budgets
//! - the entry point is live and has the globally maximum layer
//! - tombstoned ids are vacant
//! - searches return sorted, unique, live ids
//! - a fixed seed and op sequence rebuilds a byte-identical graph

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use smallworld::{NeighborSelection, Parameters, SmallWorld};

#[derive(Debug, Clone)]
enum Op {
    Add(Vec<f32>),
    Remove(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => prop::collection::vec(-1.0f32..1.0, 6).prop_map(Op::Add),
        1 => (0usize..64).prop_map(Op::Remove),
    ]
}

fn l2_squared(a: &Vec<f32>, b: &Vec<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn build(selection: NeighborSelection, seed: u64) -> SmallWorld<Vec<f32>, f32> {
    let params = Parameters {
        m: 4,
        neighbor_selection: selection,
        construction_pruning: 24,
        ..Parameters::default()
    };
    SmallWorld::build(l2_squared, StdRng::seed_from_u64(seed), params).unwrap()
}

/// Apply ops, tracking which ids are live. Remove picks among live ids so
/// every removal is valid.
fn apply_ops(index: &SmallWorld<Vec<f32>, f32>, ops: &[Op]) -> Vec<u32> {
    let mut live: Vec<u32> = Vec::new();
    for op in ops {
        match op {
            Op::Add(vector) => {
                let ids = index.add_items(vec![vector.clone()], None).unwrap();
                live.push(ids[0]);
            }
            Op::Remove(pick) => {
                if !live.is_empty() {
                    let pos = pick % live.len();
                    let id = live.swap_remove(pos);
                    index.remove_item(id).unwrap();
                }
            }
        }
    }
    live
}

fn selections() -> [NeighborSelection; 3] {
    [
        NeighborSelection::Simple,
        NeighborSelection::Heuristic,
        NeighborSelection::Diverse,
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn invariants_hold_under_churn(
        ops in prop::collection::vec(arb_op(), 1..60),
        selection_index in 0usize..3,
    ) {
        let index = build(selections()[selection_index], 7);
        let mut live: Vec<u32> = Vec::new();
        for op in &ops {
            match op {
                Op::Add(vector) => {
                    let ids = index.add_items(vec![vector.clone()], None).unwrap();
                    live.push(ids[0]);
                }
                Op::Remove(pick) => {
                    if !live.is_empty() {
                        let pos = pick % live.len();
                        let id = live.swap_remove(pos);
                        index.remove_item(id).unwrap();
                    }
                }
            }
            // Every op must leave a structurally consistent graph behind.
            if let Err(violation) = index.validate_graph() {
                prop_assert!(false, "invariant violated after {op:?}: {violation}");
            }
        }
        prop_assert_eq!(index.len(), live.len());
        match index.entry_point() {
            Some(entry) => prop_assert!(live.contains(&entry)),
            None => prop_assert!(live.is_empty()),
        }
    }

    #[test]
    fn search_results_are_sorted_unique_and_live(
        ops in prop::collection::vec(arb_op(), 1..50),
        query in prop::collection::vec(-1.0f32..1.0, 6),
        k in 1usize..8,
    ) {
        let index = build(NeighborSelection::Diverse, 11);
        let live = apply_ops(&index, &ops);
        let hits = index.knn_search(&query, k).unwrap();

        prop_assert!(hits.len() <= k);
        for pair in hits.windows(2) {
            prop_assert!(pair[0].distance <= pair[1].distance);
        }
        let mut ids: Vec<u32> = hits.iter().map(|h| h.id).collect();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), hits.len(), "duplicate ids in results");
        for hit in &hits {
            prop_assert!(live.contains(&hit.id), "result id {} is not live", hit.id);
        }
        // A non-empty graph always yields at least the entry component.
        prop_assert!(!hits.is_empty() || live.is_empty());
    }

    #[test]
    fn identical_op_sequences_serialize_identically(
        ops in prop::collection::vec(arb_op(), 1..40),
        selection_index in 0usize..3,
    ) {
        let mut streams = Vec::new();
        for _ in 0..2 {
            let index = build(selections()[selection_index], 1234);
            apply_ops(&index, &ops);
            let mut buffer = Vec::new();
            index.serialize_graph(&mut buffer).unwrap();
            streams.push(buffer);
        }
        prop_assert_eq!(&streams[0], &streams[1]);
    }

    #[test]
    fn nearest_hit_is_never_farther_than_brute_force_tail(
        vectors in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 6), 2..40),
        query in prop::collection::vec(-1.0f32..1.0, 6),
    ) {
        let index = build(NeighborSelection::Simple, 3);
        index.add_items(vectors.clone(), None).unwrap();
        let hits = index.knn_search(&query, 1).unwrap();
        prop_assert_eq!(hits.len(), 1);

        // The approximate nearest can miss the true nearest, but it can
        // never beat it, and its distance must match its own item.
        let best = vectors
            .iter()
            .map(|v| l2_squared(&query, v))
            .fold(f32::INFINITY, f32::min);
        prop_assert!(hits[0].distance >= best - 1e-6);
        prop_assert!((l2_squared(&query, &hits[0].item) - hits[0].distance).abs() < 1e-6);
    }
}
