//! Thread-safe index facade.

use std::io::{Read, Seek, Write};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::error::{Result, SmallWorldError};
use crate::events::{CancellationToken, EventReporter, NullReporter};
use crate::graph::core::{DistanceFn, GraphCore};
use crate::graph::engine::GraphEngine;
use crate::params::Parameters;
use crate::persistence;

/// One k-NN search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor<T, D> {
    /// Arena id assigned at insertion.
    pub id: u32,
    /// The stored item.
    pub item: T,
    /// Distance from the query to the item.
    pub distance: D,
}

/// A Hierarchical Navigable Small World index over user-supplied items and
/// a user-supplied distance function.
///
/// Mutations (`add_items`, `remove_item`) take the write lane exclusively;
/// searches take the read lane and run concurrently with each other. The
/// index is `Send + Sync` whenever `T` and `D` are, so it can be shared
/// behind an `Arc` across threads.
pub struct SmallWorld<T, D> {
    engine: RwLock<GraphEngine<T, D>>,
    reporter: Arc<dyn EventReporter>,
}

impl<T, D: PartialOrd + Copy> SmallWorld<T, D> {
    /// Construct an empty index.
    ///
    /// `distance` must be non-negative and symmetric; the triangle
    /// inequality is not required for correctness but improves recall.
    /// `rng` drives layer assignment — a fixed seed plus a fixed insertion
    /// order reproduces the exact same graph.
    pub fn build<F>(distance: F, rng: StdRng, params: Parameters) -> Result<Self>
    where
        F: Fn(&T, &T) -> D + Send + Sync + 'static,
    {
        Self::build_with_reporter(distance, rng, params, Arc::new(NullReporter))
    }

    /// [`SmallWorld::build`] with a reporter that receives per-search
    /// statistics.
    pub fn build_with_reporter<F>(
        distance: F,
        rng: StdRng,
        params: Parameters,
        reporter: Arc<dyn EventReporter>,
    ) -> Result<Self>
    where
        F: Fn(&T, &T) -> D + Send + Sync + 'static,
    {
        params.validate()?;
        debug!(m = params.m, ef_construction = params.construction_pruning, "building empty index");
        let core = GraphCore::new(params, Arc::new(distance) as DistanceFn<T, D>);
        Ok(Self {
            engine: RwLock::new(GraphEngine::new(core, rng)),
            reporter,
        })
    }

    /// Insert items in order, returning the assigned ids. Tombstoned ids
    /// are reused before the arena grows.
    ///
    /// The write lock is taken per item, so concurrent searches interleave
    /// with a long batch instead of stalling behind it.
    pub fn add_items<I>(&self, items: I, progress: Option<&dyn EventReporter>) -> Result<Vec<u32>>
    where
        I: IntoIterator<Item = T>,
    {
        let items: Vec<T> = items.into_iter().collect();
        let total = items.len();
        let mut ids = Vec::with_capacity(total);
        for (done, item) in items.into_iter().enumerate() {
            let id = self.engine.write().insert(item)?;
            ids.push(id);
            if let Some(reporter) = progress {
                reporter.on_progress(done + 1, total);
            }
        }
        Ok(ids)
    }

    /// Tombstone an item. Subsequent searches skip it; its id may be reused
    /// by later inserts.
    pub fn remove_item(&self, id: u32) -> Result<()> {
        self.engine.write().remove(id)
    }

    /// The `k` nearest neighbors of `query`, ascending by distance.
    pub fn knn_search(&self, query: &T, k: usize) -> Result<Vec<Neighbor<T, D>>>
    where
        T: Clone,
        D: 'static,
    {
        self.search_impl(query, k, None, None)
    }

    /// [`SmallWorld::knn_search`] restricted to items accepted by `filter`,
    /// optionally cancellable. A cancelled search returns the partial
    /// result accumulated so far — cancellation is not an error and never
    /// mutates the graph.
    pub fn knn_search_filtered<F>(
        &self,
        query: &T,
        k: usize,
        filter: F,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Neighbor<T, D>>>
    where
        T: Clone,
        D: 'static,
        F: Fn(&T) -> bool,
    {
        self.search_impl(query, k, Some(&filter), cancel)
    }

    fn search_impl(
        &self,
        query: &T,
        k: usize,
        filter: Option<&dyn Fn(&T) -> bool>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Neighbor<T, D>>>
    where
        T: Clone,
        D: 'static,
    {
        let engine = self.engine.read();
        let (hits, stats) = engine.knn_search(query, k, filter, cancel)?;
        self.reporter.on_search(stats);
        Ok(hits
            .into_iter()
            .map(|(distance, id)| Neighbor {
                id,
                item: engine.core.items[id as usize].clone(),
                distance,
            })
            .collect())
    }

    /// The stored item for a live id.
    pub fn get_item(&self, id: u32) -> Result<T>
    where
        T: Clone,
    {
        let engine = self.engine.read();
        if !engine.core.is_live(id) {
            return Err(SmallWorldError::UnknownItem(id));
        }
        Ok(engine.core.items[id as usize].clone())
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.engine.read().core.live_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the current entry point, if the graph is non-empty.
    pub fn entry_point(&self) -> Option<u32> {
        self.engine.read().core.entry_point
    }

    pub fn params(&self) -> Parameters {
        self.engine.read().core.params.clone()
    }

    /// Check the structural invariants (adjacency symmetry, edge budgets,
    /// tombstone vacancy, entry-point maximality) and report the first
    /// violation.
    pub fn validate_graph(&self) -> Result<()> {
        self.engine.read().core.validate()
    }

    /// Write the edge structure to `writer`. Items are not serialized;
    /// [`SmallWorld::deserialize_graph`] re-binds them by position.
    pub fn serialize_graph<W: Write>(&self, writer: &mut W) -> Result<()> {
        let engine = self.engine.read();
        persistence::write_graph(&engine.core, writer)
    }

    /// Rebuild an index from a serialized graph plus the items list it was
    /// built over, in arena order. The reconstructed graph is validated
    /// before the index is returned.
    pub fn deserialize_graph<F, R>(
        items: Vec<T>,
        distance: F,
        rng: StdRng,
        reader: &mut R,
    ) -> Result<Self>
    where
        F: Fn(&T, &T) -> D + Send + Sync + 'static,
        R: Read + Seek,
    {
        let core = persistence::read_graph(items, Arc::new(distance) as DistanceFn<T, D>, reader)?;
        info!(nodes = core.nodes.len(), removed = core.removed.len(), "loaded serialized graph");
        Ok(Self {
            engine: RwLock::new(GraphEngine::new(core, rng)),
            reporter: Arc::new(NullReporter),
        })
    }
}
