//! Single-layer bounded beam search.

use std::cmp::Ordering;

use crate::error::{Result, SmallWorldError};
use crate::events::{CancellationToken, SearchStats};
use crate::graph::core::GraphCore;
use crate::graph::costs::TravelingCosts;
use crate::graph::heap::{cmp_dist, HeapOrder, NodeHeap};
use crate::graph::visited::VisitedSet;

/// Beam search scratch: a frontier, a bounded result set, and a visited
/// bitset, all instance-owned and reused across calls. The write lane owns
/// one outright; the read lane keeps one per thread. Searchers are never
/// shared between threads.
pub(crate) struct LayerSearcher<D> {
    candidates: NodeHeap<D>,
    results: NodeHeap<D>,
    visited: VisitedSet,
}

impl<D: PartialOrd + Copy> LayerSearcher<D> {
    pub fn new() -> Self {
        Self {
            candidates: NodeHeap::new(HeapOrder::CloserFirst),
            results: NodeHeap::new(HeapOrder::FartherFirst),
            visited: VisitedSet::default(),
        }
    }

    /// Beam search at one layer from `entry` toward the target bound by
    /// `costs`, keeping the best `ef` nodes that pass `filter`.
    ///
    /// When `version_at_start` is set, the graph version is re-checked
    /// before every adjacency dereference and a mismatch aborts with
    /// [`SmallWorldError::GraphChanged`] so the caller can restart. Write-lane
    /// callers pass `None` — nothing can mutate under them.
    ///
    /// Cancellation is polled at the top of the loop and before each
    /// neighbor expansion; a cancelled search returns the partial result.
    ///
    /// Returns the results sorted ascending by distance to the target.
    #[allow(clippy::too_many_arguments)]
    pub fn search_layer<T, F>(
        &mut self,
        core: &GraphCore<T, D>,
        costs: &TravelingCosts<'_, T, D>,
        entry: u32,
        ef: usize,
        layer: usize,
        filter: &F,
        version_at_start: Option<u64>,
        cancel: Option<&CancellationToken>,
        stats: &mut SearchStats,
    ) -> Result<Vec<(D, u32)>>
    where
        F: Fn(u32) -> bool,
    {
        if ef == 0 {
            return Ok(Vec::new());
        }

        self.visited.ensure_capacity(core.nodes.len());
        self.visited.clear();
        self.candidates.clear();
        self.results.clear();

        let entry_distance = costs.to(entry);
        self.candidates.push(entry_distance, entry);
        if filter(entry) {
            self.results.push(entry_distance, entry);
        }
        self.visited.insert(entry);

        'beam: while let Some((candidate_distance, candidate)) = self.candidates.peek() {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                break;
            }
            // Peek before popping: on early termination the frontier is
            // abandoned wholesale, so the reheap would be wasted work.
            if let Some((farthest, _)) = self.results.peek() {
                if self.results.len() >= ef
                    && cmp_dist(&candidate_distance, &farthest) == Ordering::Greater
                {
                    break;
                }
            }
            self.candidates.pop();

            if let Some(version) = version_at_start {
                if core.version() != version {
                    return Err(SmallWorldError::GraphChanged);
                }
            }
            stats.expansions += 1;

            for &neighbor in core.nodes[candidate as usize].neighbors(layer) {
                if cancel.is_some_and(CancellationToken::is_cancelled) {
                    break 'beam;
                }
                if !self.visited.insert(neighbor) {
                    continue;
                }
                let distance = costs.to(neighbor);
                let admit = match self.results.peek() {
                    Some((farthest, _)) => {
                        self.results.len() < ef
                            || cmp_dist(&distance, &farthest) == Ordering::Less
                    }
                    None => true,
                };
                if admit {
                    self.candidates.push(distance, neighbor);
                    if filter(neighbor) {
                        self.results.push(distance, neighbor);
                        if self.results.len() > ef {
                            self.results.pop();
                        }
                    }
                }
            }
        }

        let mut out = Vec::with_capacity(self.results.len());
        while let Some(entry) = self.results.pop() {
            out.push(entry);
        }
        out.reverse();
        Ok(out)
    }
}
