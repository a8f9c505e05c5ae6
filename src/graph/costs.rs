//! Distance-to-fixed-target closures over the item arena.

use std::cell::Cell;

/// Binds "distance to a fixed target" for one search session.
///
/// The target is either an arena item (insert and repair paths) or a
/// borrowed query that lives outside the arena (search path); query targets
/// never receive an arena id, so nothing query-shaped can leak into an
/// adjacency list. The most recent `(id, distance)` pair is cached: coarse
/// descent re-asks for the current pivot's distance on every hop.
pub(crate) struct TravelingCosts<'a, T, D> {
    distance: &'a dyn Fn(&T, &T) -> D,
    items: &'a [T],
    target: &'a T,
    last: Cell<Option<(u32, D)>>,
    cache_hits: Cell<usize>,
    evaluations: Cell<usize>,
}

impl<'a, T, D: Copy> TravelingCosts<'a, T, D> {
    pub fn new(distance: &'a dyn Fn(&T, &T) -> D, items: &'a [T], target: &'a T) -> Self {
        Self {
            distance,
            items,
            target,
            last: Cell::new(None),
            cache_hits: Cell::new(0),
            evaluations: Cell::new(0),
        }
    }

    /// Distance from the target to the arena item `id`.
    pub fn to(&self, id: u32) -> D {
        if let Some((cached_id, cached)) = self.last.get() {
            if cached_id == id {
                self.cache_hits.set(self.cache_hits.get() + 1);
                return cached;
            }
        }
        let d = (self.distance)(self.target, &self.items[id as usize]);
        self.evaluations.set(self.evaluations.get() + 1);
        self.last.set(Some((id, d)));
        d
    }

    /// Distance between two arena items (diversity checks).
    pub fn between(&self, a: u32, b: u32) -> D {
        self.evaluations.set(self.evaluations.get() + 1);
        (self.distance)(&self.items[a as usize], &self.items[b as usize])
    }

    pub fn cache_hits(&self) -> usize {
        self.cache_hits.get()
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.get()
    }
}
