//! Node/item arena and edge bookkeeping.
//!
//! Items and nodes live in parallel vectors indexed by id. Removed ids are
//! tombstoned — their adjacency is cleared, their arena slot and item stay
//! put until a later insert reuses the id. All edge edits funnel through
//! [`GraphCore::connect`] / [`GraphCore::disconnect`], which keep the in-edge
//! mirrors exact and bump the version counter before touching structure.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Result, SmallWorldError};
use crate::graph::costs::TravelingCosts;
use crate::graph::node::Node;
use crate::graph::selector;
use crate::params::Parameters;

/// User-supplied distance, shared between the engine and deserialization.
pub(crate) type DistanceFn<T, D> = Arc<dyn Fn(&T, &T) -> D + Send + Sync>;

impl<T, D> std::fmt::Debug for GraphCore<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphCore")
            .field("params", &self.params)
            .field("items_len", &self.items.len())
            .field("nodes_len", &self.nodes.len())
            .field("removed", &self.removed)
            .field("entry_point", &self.entry_point)
            .field("version", &self.version)
            .finish()
    }
}

pub(crate) struct GraphCore<T, D> {
    pub params: Parameters,
    pub distance: DistanceFn<T, D>,
    /// Item per arena slot; tombstoned slots keep their last item.
    pub items: Vec<T>,
    pub nodes: Vec<Node>,
    /// Tombstoned ids, reusable by later inserts. Smallest id is reused
    /// first so identical op sequences rebuild identical graphs.
    pub removed: BTreeSet<u32>,
    pub entry_point: Option<u32>,
    /// Bumped before every structural edit; readers re-check it to detect
    /// that they are walking a mutating graph.
    version: AtomicU64,
}

impl<T, D: PartialOrd + Copy> GraphCore<T, D> {
    pub fn new(params: Parameters, distance: DistanceFn<T, D>) -> Self {
        let capacity = params.initial_items_size;
        Self {
            params,
            distance,
            items: Vec::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            removed: BTreeSet::new(),
            entry_point: None,
            version: AtomicU64::new(0),
        }
    }

    /// Reassemble a core from deserialized parts. The caller is expected to
    /// run [`GraphCore::validate`] on the result.
    pub fn from_parts(
        params: Parameters,
        distance: DistanceFn<T, D>,
        items: Vec<T>,
        nodes: Vec<Node>,
        removed: BTreeSet<u32>,
        entry_point: Option<u32>,
    ) -> Self {
        Self {
            params,
            distance,
            items,
            nodes,
            removed,
            entry_point,
            version: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    #[inline]
    pub fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn is_live(&self, id: u32) -> bool {
        (id as usize) < self.nodes.len() && !self.removed.contains(&id)
    }

    /// Number of live nodes.
    pub fn live_len(&self) -> usize {
        self.nodes.len() - self.removed.len()
    }

    /// Claim an id for `item`: the smallest tombstone if any, else a fresh
    /// slot appended to the arena.
    pub fn allocate(&mut self, item: T, max_layer: usize) -> u32 {
        self.bump_version();
        if let Some(id) = self.removed.pop_first() {
            self.items[id as usize] = item;
            self.nodes[id as usize] = Node::new(id, max_layer);
            id
        } else {
            let id = self.nodes.len() as u32;
            self.items.push(item);
            self.nodes.push(Node::new(id, max_layer));
            id
        }
    }

    /// Add the directed edge `from -> to` at `layer`, mirroring it into
    /// `to`'s in-edges. Idempotent. If `from` exceeds its edge budget the
    /// list is shrunk back through the configured neighbor selector.
    pub fn connect(&mut self, from: u32, to: u32, layer: usize) {
        if from == to {
            return;
        }
        if self.nodes[from as usize].connections[layer].contains(&to) {
            return;
        }
        self.bump_version();
        self.nodes[from as usize].connections[layer].push(to);
        self.nodes[to as usize].in_connections[layer].push(from);

        let cap = self.params.max_connections(layer);
        if self.nodes[from as usize].connections[layer].len() > cap {
            self.shrink_connections(from, layer);
        }
    }

    /// Remove the directed edge `from -> to` at `layer` on both sides.
    pub fn disconnect(&mut self, from: u32, to: u32, layer: usize) {
        self.bump_version();
        let out = &mut self.nodes[from as usize].connections[layer];
        if let Some(pos) = out.iter().position(|&id| id == to) {
            out.remove(pos);
        }
        let mirror = &mut self.nodes[to as usize].in_connections[layer];
        if let Some(pos) = mirror.iter().position(|&id| id == from) {
            mirror.remove(pos);
        }
    }

    /// Re-select `node`'s out-list at `layer` down to capacity and mirror
    /// the evictions into the dropped peers' in-edges.
    fn shrink_connections(&mut self, node: u32, layer: usize) {
        let distance = Arc::clone(&self.distance);
        let (kept, dropped) = {
            let items = &self.items;
            let nodes = &self.nodes;
            let costs = TravelingCosts::new(&*distance, items, &items[node as usize]);
            let current = &nodes[node as usize].connections[layer];
            let candidates: Vec<(D, u32)> =
                current.iter().map(|&id| (costs.to(id), id)).collect();
            let kept = selector::select_best_for_connecting(
                &self.params,
                &costs,
                nodes,
                candidates,
                layer,
                Some(node),
            );
            let dropped: Vec<u32> = current
                .iter()
                .copied()
                .filter(|id| !kept.iter().any(|&(_, keep)| keep == *id))
                .collect();
            (kept, dropped)
        };

        for peer in dropped {
            self.bump_version();
            let mirror = &mut self.nodes[peer as usize].in_connections[layer];
            if let Some(pos) = mirror.iter().position(|&id| id == node) {
                mirror.remove(pos);
            }
        }
        self.bump_version();
        self.nodes[node as usize].connections[layer] = kept.iter().map(|&(_, id)| id).collect();
    }

    /// Check the structural invariants: adjacency symmetry, edge budgets,
    /// layer membership, tombstone vacancy, and entry-point maximality.
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(SmallWorldError::InvalidData(msg));

        let mut top: Option<(usize, u32)> = None;
        for node in &self.nodes {
            if self.removed.contains(&node.id) {
                if !node.is_isolated() {
                    return fail(format!("tombstoned node {} still has edges", node.id));
                }
                continue;
            }
            if node.connections.len() != node.max_layer + 1
                || node.in_connections.len() != node.max_layer + 1
            {
                return fail(format!(
                    "node {} has {} layer slots for max layer {}",
                    node.id,
                    node.connections.len(),
                    node.max_layer
                ));
            }
            for layer in 0..=node.max_layer {
                let out = &node.connections[layer];
                if out.len() > self.params.max_connections(layer) {
                    return fail(format!(
                        "node {} exceeds the edge budget at layer {layer}: {}",
                        node.id,
                        out.len()
                    ));
                }
                for &peer in out.iter() {
                    if !self.is_live(peer) {
                        return fail(format!(
                            "node {} links to vacant id {peer} at layer {layer}",
                            node.id
                        ));
                    }
                    let peer_node = &self.nodes[peer as usize];
                    if peer_node.max_layer < layer {
                        return fail(format!(
                            "node {} links to {peer} above its max layer at layer {layer}",
                            node.id
                        ));
                    }
                    if !peer_node.in_connections[layer].contains(&node.id) {
                        return fail(format!(
                            "edge {} -> {peer} at layer {layer} has no in-edge mirror",
                            node.id
                        ));
                    }
                }
                for &pred in node.in_connections[layer].iter() {
                    if !self.is_live(pred) {
                        return fail(format!(
                            "node {} has an in-edge from vacant id {pred} at layer {layer}",
                            node.id
                        ));
                    }
                    if !self.nodes[pred as usize].connections[layer].contains(&node.id) {
                        return fail(format!(
                            "in-edge {pred} -> {} at layer {layer} has no out-edge mirror",
                            node.id
                        ));
                    }
                }
            }
            let better = match top {
                None => true,
                Some((layer, _)) => node.max_layer > layer,
            };
            if better {
                top = Some((node.max_layer, node.id));
            }
        }

        match (self.entry_point, top) {
            (None, None) => Ok(()),
            (Some(entry), Some((max_layer, _))) => {
                if !self.is_live(entry) {
                    return fail(format!("entry point {entry} is not live"));
                }
                if self.nodes[entry as usize].max_layer != max_layer {
                    return fail(format!(
                        "entry point {entry} is at layer {} but the graph reaches {max_layer}",
                        self.nodes[entry as usize].max_layer
                    ));
                }
                Ok(())
            }
            (None, Some(_)) => fail("live nodes exist but no entry point is set".to_string()),
            (Some(entry), None) => fail(format!("entry point {entry} set on an empty graph")),
        }
    }
}
