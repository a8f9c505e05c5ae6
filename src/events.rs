//! Observational callbacks and cooperative cancellation.
//!
//! Reporting is strictly one-way: nothing returned by a reporter can change
//! graph state. Cancellation is cooperative — searches poll the token and
//! hand back whatever they have found so far.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Counters describing a single k-NN search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Nodes whose neighborhoods were expanded.
    pub expansions: usize,
    /// Distance evaluations performed.
    pub distance_evaluations: usize,
    /// Hits in the traveling-costs pair cache.
    pub cache_hits: usize,
    /// Restarts forced by concurrent mutations.
    pub retries: usize,
}

/// Receiver for observational events emitted by the index.
///
/// All methods have no-op defaults; implement only what you need.
pub trait EventReporter: Send + Sync {
    /// Called after each item of a batch insert.
    fn on_progress(&self, _completed: usize, _total: usize) {}

    /// Called once per completed k-NN search.
    fn on_search(&self, _stats: SearchStats) {}
}

/// Reporter that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl EventReporter for NullReporter {}

/// Cooperative cancellation flag shared between a caller and a running
/// search. Cancelling is not an error: the search returns the partial
/// result accumulated so far and never mutates the graph.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
