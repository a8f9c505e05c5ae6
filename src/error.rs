//! Error types for smallworld.

use thiserror::Error;

/// Errors that can occur while building, mutating, or querying an index.
#[derive(Debug, Error)]
pub enum SmallWorldError {
    /// A reader observed a structural mutation mid-search. Recovered
    /// internally by the k-NN retry loop; only surfaces when the retry
    /// budget is spent.
    #[error("graph changed during search")]
    GraphChanged,

    /// The k-NN retry loop never observed a stable graph.
    #[error("search restarted {attempts} times without observing a stable graph")]
    SearchRetriesExhausted { attempts: usize },

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A serialized graph failed framing or structural checks.
    #[error("invalid graph data: {0}")]
    InvalidData(String),

    /// The id does not refer to a live item.
    #[error("unknown item id: {0}")]
    UnknownItem(u32),

    /// Underlying stream failure during (de)serialization.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for smallworld operations.
pub type Result<T> = std::result::Result<T, SmallWorldError>;
