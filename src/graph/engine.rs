//! INSERT, REMOVE with local repair, and K-NN orchestration.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, trace};

use crate::error::{Result, SmallWorldError};
use crate::events::{CancellationToken, SearchStats};
use crate::graph::core::GraphCore;
use crate::graph::costs::TravelingCosts;
use crate::graph::heap::cmp_dist;
use crate::graph::searcher::LayerSearcher;
use crate::graph::selector;

/// Liveness cap on search restarts caused by concurrent mutations.
const MAX_SEARCH_RETRIES: usize = 1024;

thread_local! {
    /// Thread-local searcher for read-lane searches.
    /// Eliminates per-search allocation of the heaps and the visited bitmap
    /// (the bitmap is sized to the node count). Keyed by searcher type
    /// because the distance type is generic and the slot is shared by every
    /// index the thread queries.
    static READ_SEARCHER: RefCell<HashMap<TypeId, Box<dyn Any>>> =
        RefCell::new(HashMap::new());
}

/// Single-writer engine over the graph core. Mutations run exclusively on
/// the write lane and own the scratch searcher; read-lane searches reuse a
/// per-thread searcher from [`READ_SEARCHER`], so readers share nothing
/// mutable.
pub(crate) struct GraphEngine<T, D> {
    pub core: GraphCore<T, D>,
    rng: StdRng,
    searcher: LayerSearcher<D>,
}

impl<T, D: PartialOrd + Copy> GraphEngine<T, D> {
    pub fn new(core: GraphCore<T, D>, rng: StdRng) -> Self {
        Self {
            core,
            rng,
            searcher: LayerSearcher::new(),
        }
    }

    /// Sample a node's top layer: `floor(-ln(u) * lambda)` for
    /// `u ~ Uniform(0, 1]`.
    fn sample_layer(&mut self) -> usize {
        let u: f64 = 1.0 - self.rng.random::<f64>();
        (-u.ln() * self.core.params.lambda()).floor() as usize
    }

    /// Insert one item and wire it into every layer up to its sampled top.
    pub fn insert(&mut self, item: T) -> Result<u32> {
        let max_layer = self.sample_layer();
        let id = self.core.allocate(item, max_layer);

        let Some(entry) = self.core.entry_point else {
            // Very first live node: it seeds the entry point with no edges.
            self.core.bump_version();
            self.core.entry_point = Some(id);
            trace!(id, max_layer, "seeded entry point");
            return Ok(id);
        };

        let entry_layer = self.core.nodes[entry as usize].max_layer;
        let distance = Arc::clone(&self.core.distance);
        let ef = self.core.params.construction_pruning;
        let mut scratch = SearchStats::default();

        // Coarse descent refines the starting point without adding edges.
        let mut current = entry;
        if entry_layer > max_layer {
            let costs =
                TravelingCosts::new(&*distance, &self.core.items, &self.core.items[id as usize]);
            current = coarse_descent(
                &self.core,
                &costs,
                entry,
                entry_layer,
                max_layer + 1,
                None,
            )?;
        }

        // Layer-local search + selection + bidirectional wiring, descending
        // from the topmost shared layer to the base.
        for layer in (0..=entry_layer.min(max_layer)).rev() {
            let selected = {
                let core = &self.core;
                let searcher = &mut self.searcher;
                let costs =
                    TravelingCosts::new(&*distance, &core.items, &core.items[id as usize]);
                let found = searcher.search_layer(
                    core,
                    &costs,
                    current,
                    ef,
                    layer,
                    &|_| true,
                    None,
                    None,
                    &mut scratch,
                )?;
                selector::select_best_for_connecting(
                    &core.params,
                    &costs,
                    &core.nodes,
                    found,
                    layer,
                    Some(id),
                )
            };
            for &(_, neighbor) in &selected {
                self.core.connect(id, neighbor, layer);
                self.core.connect(neighbor, id, layer);
            }
            // The nearest selected neighbor seeds the next layer down.
            if let Some(&(_, nearest)) = selected.first() {
                current = nearest;
            }
        }

        if max_layer > entry_layer {
            self.core.bump_version();
            self.core.entry_point = Some(id);
        }
        debug!(id, max_layer, "inserted item");
        Ok(id)
    }

    /// Unlink `id`, tombstone it, and repair any peer whose neighborhood the
    /// removal thinned below half its edge budget.
    pub fn remove(&mut self, id: u32) -> Result<()> {
        if !self.core.is_live(id) {
            return Err(SmallWorldError::UnknownItem(id));
        }

        // Re-seat the entry point before unlinking.
        if self.core.entry_point == Some(id) {
            self.core.bump_version();
            self.core.entry_point = self.replacement_entry(id);
        }

        let top = self.core.nodes[id as usize].max_layer;
        let mut degraded: Vec<(u32, usize)> = Vec::new();
        for layer in 0..=top {
            let preds: Vec<u32> = self.core.nodes[id as usize].in_connections[layer].to_vec();
            for pred in preds {
                self.core.disconnect(pred, id, layer);
                let floor = self.core.params.max_connections(layer) / 2;
                if self.core.nodes[pred as usize].connections[layer].len() < floor {
                    degraded.push((pred, layer));
                }
            }
            // Out-edges whose reverse half went missing would survive the
            // in-edge sweep; clear them explicitly.
            let succs: Vec<u32> = self.core.nodes[id as usize].connections[layer].to_vec();
            for succ in succs {
                self.core.disconnect(id, succ, layer);
            }
        }

        self.core.bump_version();
        self.core.nodes[id as usize].clear_edges();
        self.core.removed.insert(id);

        // Repairs run only after the node is fully unlinked, so a repair
        // search can never hand the tombstone back as a neighbor.
        degraded.sort_unstable();
        degraded.dedup();
        for (peer, layer) in degraded {
            if self.core.is_live(peer) {
                self.repair(peer, layer)?;
            }
        }
        debug!(id, "removed item");
        Ok(())
    }

    /// Replacement entry for a node about to be unlinked: one of its
    /// out-neighbors from the highest populated layer when that neighbor
    /// ties the tallest live layer stack, otherwise the tallest live node,
    /// or none when the graph empties.
    fn replacement_entry(&self, id: u32) -> Option<u32> {
        let node = &self.core.nodes[id as usize];
        let neighbor = (0..=node.max_layer)
            .rev()
            .find_map(|layer| node.connections[layer].first().copied());
        let tallest = self
            .core
            .nodes
            .iter()
            .filter(|n| n.id != id && !self.core.removed.contains(&n.id))
            .max_by(|a, b| {
                a.max_layer
                    .cmp(&b.max_layer)
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|n| n.id);
        match (neighbor, tallest) {
            (Some(n), Some(t))
                if self.core.nodes[n as usize].max_layer
                    == self.core.nodes[t as usize].max_layer =>
            {
                Some(n)
            }
            (_, tallest) => tallest,
        }
    }

    /// Rebuild `node`'s neighborhood at `layer` from a fresh search.
    /// Reconnects are idempotent, so overlap with surviving edges is fine.
    fn repair(&mut self, node: u32, layer: usize) -> Result<()> {
        let Some(entry) = self.core.entry_point else {
            return Ok(());
        };
        let distance = Arc::clone(&self.core.distance);
        let ef = self.core.params.construction_pruning;
        let mut scratch = SearchStats::default();
        let selected = {
            let core = &self.core;
            let searcher = &mut self.searcher;
            let costs =
                TravelingCosts::new(&*distance, &core.items, &core.items[node as usize]);
            let entry_layer = core.nodes[entry as usize].max_layer;
            let current = coarse_descent(core, &costs, entry, entry_layer, layer + 1, None)?;
            let found = searcher.search_layer(
                core,
                &costs,
                current,
                ef,
                layer,
                &|_| true,
                None,
                None,
                &mut scratch,
            )?;
            selector::select_best_for_connecting(
                &core.params,
                &costs,
                &core.nodes,
                found,
                layer,
                Some(node),
            )
        };
        for &(_, neighbor) in &selected {
            self.core.connect(node, neighbor, layer);
            self.core.connect(neighbor, node, layer);
        }
        trace!(node, layer, wired = selected.len(), "repaired neighborhood");
        Ok(())
    }

    /// k nearest neighbors of `query`, ascending by distance. Restarts on
    /// concurrent mutation up to the retry cap; a cancelled search returns
    /// whatever the base-layer beam had accumulated.
    pub fn knn_search(
        &self,
        query: &T,
        k: usize,
        filter: Option<&dyn Fn(&T) -> bool>,
        cancel: Option<&CancellationToken>,
    ) -> Result<(Vec<(D, u32)>, SearchStats)>
    where
        D: 'static,
    {
        // The slot is vacated for the duration of the search: the filter
        // runs user code, which may itself search on this thread. A
        // reentrant search just works from a fresh searcher.
        let mut searcher = READ_SEARCHER.with(|cell| {
            cell.borrow_mut()
                .remove(&TypeId::of::<LayerSearcher<D>>())
                .and_then(|scratch| scratch.downcast::<LayerSearcher<D>>().ok())
                .map_or_else(LayerSearcher::new, |scratch| *scratch)
        });
        let result = self.knn_search_with(&mut searcher, query, k, filter, cancel);
        READ_SEARCHER.with(|cell| {
            cell.borrow_mut()
                .insert(TypeId::of::<LayerSearcher<D>>(), Box::new(searcher));
        });
        result
    }

    fn knn_search_with(
        &self,
        searcher: &mut LayerSearcher<D>,
        query: &T,
        k: usize,
        filter: Option<&dyn Fn(&T) -> bool>,
        cancel: Option<&CancellationToken>,
    ) -> Result<(Vec<(D, u32)>, SearchStats)> {
        let mut stats = SearchStats::default();
        if self.core.entry_point.is_none() {
            return Ok((Vec::new(), stats));
        }
        let distance = Arc::clone(&self.core.distance);
        let ef = k.max(self.core.params.min_nn);

        for _ in 0..MAX_SEARCH_RETRIES {
            let Some(entry) = self.core.entry_point else {
                return Ok((Vec::new(), stats));
            };
            let version = self.core.version();
            let core = &self.core;
            let costs = TravelingCosts::new(&*distance, &core.items, query);
            let id_filter =
                |id: u32| filter.is_none_or(|accepts| accepts(&core.items[id as usize]));

            let entry_layer = core.nodes[entry as usize].max_layer;
            let descended =
                coarse_descent(core, &costs, entry, entry_layer, 1, Some(version));
            let current = match descended {
                Ok(current) => current,
                Err(SmallWorldError::GraphChanged) => {
                    stats.retries += 1;
                    continue;
                }
                Err(other) => return Err(other),
            };

            let outcome = searcher.search_layer(
                core,
                &costs,
                current,
                ef,
                0,
                &id_filter,
                Some(version),
                cancel,
                &mut stats,
            );
            stats.distance_evaluations += costs.evaluations();
            stats.cache_hits += costs.cache_hits();
            match outcome {
                Ok(mut results) => {
                    // min_nn can leave the beam wider than requested.
                    results.truncate(k);
                    return Ok((results, stats));
                }
                Err(SmallWorldError::GraphChanged) => {
                    stats.retries += 1;
                    continue;
                }
                Err(other) => return Err(other),
            }
        }
        Err(SmallWorldError::SearchRetriesExhausted {
            attempts: MAX_SEARCH_RETRIES,
        })
    }
}

/// Greedy single-candidate hops: at each layer from `from_layer` down to
/// `stop_layer`, move to the closest out-neighbor until none improves.
fn coarse_descent<T, D: PartialOrd + Copy>(
    core: &GraphCore<T, D>,
    costs: &TravelingCosts<'_, T, D>,
    mut current: u32,
    from_layer: usize,
    stop_layer: usize,
    version_at_start: Option<u64>,
) -> Result<u32> {
    if from_layer < stop_layer {
        return Ok(current);
    }
    for layer in (stop_layer..=from_layer).rev() {
        loop {
            if let Some(version) = version_at_start {
                if core.version() != version {
                    return Err(SmallWorldError::GraphChanged);
                }
            }
            let mut best = costs.to(current);
            let mut improved = None;
            for &neighbor in core.nodes[current as usize].neighbors(layer) {
                let d = costs.to(neighbor);
                if cmp_dist(&d, &best) == Ordering::Less {
                    best = d;
                    improved = Some(neighbor);
                }
            }
            match improved {
                Some(neighbor) => current = neighbor,
                None => break,
            }
        }
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Parameters;
    use rand::SeedableRng;

    fn scalar_engine(seed: u64) -> GraphEngine<f32, f32> {
        let params = Parameters {
            m: 4,
            construction_pruning: 16,
            ..Parameters::default()
        };
        let core: GraphCore<f32, f32> =
            GraphCore::new(params, Arc::new(|a: &f32, b: &f32| (a - b).abs()));
        GraphEngine::new(core, StdRng::seed_from_u64(seed))
    }

    #[test]
    fn first_insert_seeds_entry_point() {
        let mut engine = scalar_engine(7);
        let id = engine.insert(0.5).unwrap();
        assert_eq!(id, 0);
        assert_eq!(engine.core.entry_point, Some(0));
        assert!(engine.core.nodes[0].is_isolated());
        engine.core.validate().unwrap();
    }

    #[test]
    fn inserts_stay_consistent_and_searchable() {
        let mut engine = scalar_engine(7);
        for value in 0..64 {
            engine.insert(value as f32).unwrap();
        }
        engine.core.validate().unwrap();
        let (hits, _) = engine.knn_search(&17.2, 3, None, None).unwrap();
        assert_eq!(hits[0].1, 17);
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn remove_unknown_id_fails_cleanly() {
        let mut engine = scalar_engine(1);
        engine.insert(1.0).unwrap();
        assert!(matches!(
            engine.remove(5),
            Err(SmallWorldError::UnknownItem(5))
        ));
        engine.remove(0).unwrap();
        assert!(matches!(
            engine.remove(0),
            Err(SmallWorldError::UnknownItem(0))
        ));
    }

    #[test]
    fn removal_tombstones_and_repairs() {
        let mut engine = scalar_engine(13);
        for value in 0..40 {
            engine.insert(value as f32).unwrap();
        }
        for id in (0..40u32).step_by(3) {
            engine.remove(id).unwrap();
        }
        engine.core.validate().unwrap();
        let (hits, _) = engine.knn_search(&10.9, 1, None, None).unwrap();
        assert_eq!(hits[0].1, 11);
        // Tombstoned ids never surface.
        let (all, _) = engine.knn_search(&0.0, 40, None, None).unwrap();
        assert!(all.iter().all(|&(_, id)| id % 3 != 0 || id >= 40));
    }

    #[test]
    fn removing_everything_clears_entry_point() {
        let mut engine = scalar_engine(3);
        for value in 0..8 {
            engine.insert(value as f32).unwrap();
        }
        for id in 0..8u32 {
            engine.remove(id).unwrap();
        }
        assert_eq!(engine.core.entry_point, None);
        assert_eq!(engine.core.live_len(), 0);
        let (hits, _) = engine.knn_search(&1.0, 3, None, None).unwrap();
        assert!(hits.is_empty());
        // The graph seeds a fresh entry point afterwards.
        let id = engine.insert(42.0).unwrap();
        assert_eq!(engine.core.entry_point, Some(id));
        engine.core.validate().unwrap();
    }

    #[test]
    fn tombstoned_ids_are_reused() {
        let mut engine = scalar_engine(5);
        for value in 0..10 {
            engine.insert(value as f32).unwrap();
        }
        engine.remove(4).unwrap();
        engine.remove(2).unwrap();
        let reused = engine.insert(100.0).unwrap();
        assert_eq!(reused, 2);
        let reused = engine.insert(101.0).unwrap();
        assert_eq!(reused, 4);
        engine.core.validate().unwrap();
    }

    #[test]
    fn retry_exhaustion_is_reported() {
        let mut engine = scalar_engine(11);
        for value in 0..8 {
            engine.insert(value as f32).unwrap();
        }
        // A version bump per attempt makes every restart observe a "new"
        // mutation; the loop must give up rather than spin forever.
        let query = 3.0f32;
        let result = {
            let core = &engine.core;
            let filter = move |_: &f32| {
                core.bump_version();
                true
            };
            engine.knn_search(&query, 2, Some(&filter), None)
        };
        assert!(matches!(
            result,
            Err(SmallWorldError::SearchRetriesExhausted { .. })
        ));
    }

    #[test]
    fn thread_local_searcher_is_reused_across_searches() {
        let mut engine = scalar_engine(17);
        for value in 0..32 {
            engine.insert(value as f32).unwrap();
        }
        // Repeated read-lane searches on one thread hit the same scratch
        // slot; results must be unaffected by whatever the previous search
        // left behind.
        for value in [3.1f32, 30.8, 0.2, 15.4] {
            let (hits, _) = engine.knn_search(&value, 2, None, None).unwrap();
            assert_eq!(hits[0].1, value.round() as u32);
            assert_eq!(hits.len(), 2);
        }
    }

    #[test]
    fn filter_may_search_reentrantly() {
        let mut engine = scalar_engine(19);
        for value in 0..16 {
            engine.insert(value as f32).unwrap();
        }
        // The outer search vacates the thread-local slot, so a filter that
        // searches again on the same thread gets a fresh searcher instead
        // of a poisoned borrow.
        let result = {
            let engine_ref = &engine;
            let filter = move |_: &f32| {
                let (inner, _) = engine_ref.knn_search(&2.0, 1, None, None).unwrap();
                inner[0].1 == 2
            };
            engine.knn_search(&9.0, 3, Some(&filter), None)
        };
        let (hits, _) = result.unwrap();
        assert_eq!(hits[0].1, 9);
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn layer_sampling_follows_decay() {
        let mut engine = scalar_engine(99);
        let mut top = 0;
        let mut zeros = 0;
        for _ in 0..2000 {
            let layer = engine.sample_layer();
            top = top.max(layer);
            if layer == 0 {
                zeros += 1;
            }
        }
        // With m = 4, P(layer = 0) = 1 - 1/4 = 0.75.
        assert!(zeros > 1200, "layer 0 fraction too small: {zeros}/2000");
        assert!(top < 16, "implausibly tall sample: {top}");
    }
}
