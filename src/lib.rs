//! smallworld: Hierarchical Navigable Small World graphs for approximate
//! nearest neighbor search.
//!
//! Builds and queries a layered proximity graph over user-supplied items
//! under a user-supplied distance function. Given a query and a neighbor
//! count `k`, it returns the `k` items with smallest distance in sublinear
//! expected time.
//!
//! # Algorithm
//!
//! - **Upper layers**: sparse, long-range edges for fast navigation
//! - **Base layer**: dense, local edges for precise search
//! - **Search**: greedy descent from the entry point, then a bounded beam
//!   at the base layer
//!
//! Items are opaque to the index: it stores them, hands them back in
//! results, and measures them only through the distance function. Deletions
//! tombstone the id and locally repair thinned neighborhoods, so the graph
//! stays navigable under churn.
//!
//! # Concurrency
//!
//! [`SmallWorld`] puts mutations on an exclusive write lane and lets
//! searches share a read lane. Searches track a graph version counter and
//! transparently restart if they ever observe a structural mutation.
//!
//! # Usage
//!
//! ```rust
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use smallworld::{Parameters, SmallWorld};
//!
//! # fn main() -> Result<(), smallworld::SmallWorldError> {
//! let index = SmallWorld::build(
//!     |a: &Vec<f32>, b: &Vec<f32>| -> f32 {
//!         a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
//!     },
//!     StdRng::seed_from_u64(42),
//!     Parameters::default(),
//! )?;
//!
//! let ids = index.add_items(vec![vec![0.0, 1.0], vec![1.0, 0.0]], None)?;
//!
//! let hits = index.knn_search(&vec![0.1, 0.9], 1)?;
//! assert_eq!(hits[0].id, ids[0]);
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - Malkov & Yashunin (2016): "Efficient and robust approximate nearest
//!   neighbor search using Hierarchical Navigable Small World graphs"

pub mod error;
pub mod events;
pub mod params;

mod graph;
mod index;
mod persistence;

pub use error::{Result, SmallWorldError};
pub use events::{CancellationToken, EventReporter, NullReporter, SearchStats};
pub use index::{Neighbor, SmallWorld};
pub use params::{NeighborSelection, Parameters};
