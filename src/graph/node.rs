//! Per-node layered adjacency.

use smallvec::SmallVec;

/// Neighbor ids at one layer. Inline capacity covers the default edge
/// budgets without spilling to the heap.
pub(crate) type NeighborList = SmallVec<[u32; 16]>;

/// A graph node: the layer it was assigned at insertion plus out- and
/// in-edges for every layer `0..=max_layer`.
///
/// Nodes reference each other by arena id only — there are no pointers
/// between nodes. In-edges mirror the out-edges of peers exactly; every
/// edit goes through the core's connect/disconnect so the two sides never
/// drift.
#[derive(Debug, Clone, Default)]
pub(crate) struct Node {
    pub id: u32,
    pub max_layer: usize,
    pub connections: Vec<NeighborList>,
    pub in_connections: Vec<NeighborList>,
}

impl Node {
    pub fn new(id: u32, max_layer: usize) -> Self {
        Self {
            id,
            max_layer,
            connections: vec![NeighborList::new(); max_layer + 1],
            in_connections: vec![NeighborList::new(); max_layer + 1],
        }
    }

    /// Outgoing neighbor ids at `layer`.
    #[inline]
    pub fn neighbors(&self, layer: usize) -> &[u32] {
        &self.connections[layer]
    }

    /// Drop every edge reference, keeping the layer slots.
    pub fn clear_edges(&mut self) {
        for list in &mut self.connections {
            list.clear();
        }
        for list in &mut self.in_connections {
            list.clear();
        }
    }

    /// True if no layer carries an out- or in-edge.
    pub fn is_isolated(&self) -> bool {
        self.connections.iter().all(|l| l.is_empty())
            && self.in_connections.iter().all(|l| l.is_empty())
    }
}
