//! Index construction and search parameters.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SmallWorldError};

/// Default max out-neighbors per node per upper layer.
pub const DEFAULT_M: usize = 10;
/// Default beam width during construction.
pub const DEFAULT_CONSTRUCTION_PRUNING: usize = 200;
/// Default arena capacity hint.
pub const DEFAULT_INITIAL_ITEMS_SIZE: usize = 1024;

/// Neighbor selection strategy used when wiring a node into a layer.
///
/// The two non-trivial strategies trade pure proximity for geometric
/// diversity, which keeps the graph navigable; plain nearest-M insertion
/// tends to cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborSelection {
    /// Keep the M nearest candidates.
    #[default]
    Simple,
    /// Accept a candidate only while it is closer to the target than the
    /// farthest already-accepted result. Controlled by
    /// [`Parameters::expand_best_selection`] and
    /// [`Parameters::keep_pruned_connections`].
    Heuristic,
    /// Accept a candidate only if it is closer to the target than to every
    /// already-accepted result (relative-neighborhood rule). Stops at M,
    /// no refill from pruned candidates.
    Diverse,
}

/// Tuning parameters for a [`SmallWorld`](crate::SmallWorld) index.
///
/// Controls the trade-off between build speed, search speed, recall, and
/// memory usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameters {
    /// Max out-neighbors per node per upper layer; layer 0 allows `2 * m`.
    pub m: usize,
    /// Layer assignment decay. `None` derives the standard `1 / ln(m)`.
    pub level_lambda: Option<f64>,
    /// Strategy for picking which search candidates become edges.
    pub neighbor_selection: NeighborSelection,
    /// Beam width during construction (`ef_construction`).
    pub construction_pruning: usize,
    /// Lower bound on the search beam width; the effective beam is
    /// `max(k, min_nn)`.
    pub min_nn: usize,
    /// Heuristic only: expand the candidate set with each candidate's
    /// layer neighbors before selecting.
    pub expand_best_selection: bool,
    /// Heuristic only: refill an under-full selection from the nearest
    /// pruned candidates.
    pub keep_pruned_connections: bool,
    /// Arena capacity hint.
    pub initial_items_size: usize,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            m: DEFAULT_M,
            level_lambda: None,
            neighbor_selection: NeighborSelection::default(),
            construction_pruning: DEFAULT_CONSTRUCTION_PRUNING,
            min_nn: 0,
            expand_best_selection: false,
            keep_pruned_connections: false,
            initial_items_size: DEFAULT_INITIAL_ITEMS_SIZE,
        }
    }
}

impl Parameters {
    /// Reject parameter combinations the graph cannot be built with.
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(SmallWorldError::InvalidParameter(format!(
                "m must be at least 2, got {}",
                self.m
            )));
        }
        if self.construction_pruning == 0 {
            return Err(SmallWorldError::InvalidParameter(
                "construction_pruning must be at least 1".to_string(),
            ));
        }
        if let Some(lambda) = self.level_lambda {
            if !lambda.is_finite() || lambda <= 0.0 {
                return Err(SmallWorldError::InvalidParameter(format!(
                    "level_lambda must be finite and positive, got {lambda}"
                )));
            }
        }
        Ok(())
    }

    /// Edge capacity at a layer: `2 * m` on the base layer, `m` above it.
    pub(crate) fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }

    /// Layer assignment decay, derived from `m` unless overridden.
    pub(crate) fn lambda(&self) -> f64 {
        self.level_lambda.unwrap_or(1.0 / (self.m as f64).ln())
    }
}
