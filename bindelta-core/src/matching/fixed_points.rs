//! Fixed points: confirmed matches between primary and secondary entities.
//!
//! A function fixed point pairs one primary flow graph with one secondary
//! flow graph and owns the basic-block fixed points discovered inside the
//! pair. Uniqueness invariants:
//! - a flow graph participates in at most one function fixed point per side;
//! - within one function fixed point, a basic block appears in at most one
//!   basic-block fixed point per side.

use std::collections::{BTreeSet, HashMap};

use bitvec::prelude::*;

/// Index of a flow graph within its binary.
pub type FlowGraphId = u32;
/// Stable id of a function fixed point within the store.
pub type FixedPointId = u32;

/// A matched pair of basic blocks, identified by their vertex indices in
/// the respective flow graphs. Ordered by (primary, secondary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BasicBlockFixedPoint {
    pub primary_vertex: u32,
    pub secondary_vertex: u32,
}

/// A matched pair of functions.
#[derive(Debug)]
pub struct FixedPoint {
    pub primary: FlowGraphId,
    pub secondary: FlowGraphId,
    /// Name of the matching step that discovered this pair.
    pub step_name: &'static str,
    pub confidence: f64,
    pub similarity: f64,
    /// Set by user interaction rather than a matching step.
    pub manual: bool,

    basic_block_fixed_points: BTreeSet<BasicBlockFixedPoint>,
    /// Step name per basic-block fixed point, keyed by the pair.
    basic_block_steps: HashMap<(u32, u32), &'static str>,
    primary_matched: BitVec,
    secondary_matched: BitVec,
}

impl FixedPoint {
    pub(crate) fn new(
        primary: FlowGraphId,
        secondary: FlowGraphId,
        step_name: &'static str,
        primary_vertex_count: usize,
        secondary_vertex_count: usize,
    ) -> Self {
        FixedPoint {
            primary,
            secondary,
            step_name,
            confidence: 0.0,
            similarity: 0.0,
            manual: false,
            basic_block_fixed_points: BTreeSet::new(),
            basic_block_steps: HashMap::new(),
            primary_matched: BitVec::repeat(false, primary_vertex_count),
            secondary_matched: BitVec::repeat(false, secondary_vertex_count),
        }
    }

    /// Adds a basic-block fixed point. Fails when either vertex is already
    /// matched within this function pair.
    pub fn add_basic_block_fixed_point(
        &mut self,
        primary_vertex: u32,
        secondary_vertex: u32,
        step_name: &'static str,
    ) -> bool {
        if self.primary_matched[primary_vertex as usize]
            || self.secondary_matched[secondary_vertex as usize]
        {
            return false;
        }
        self.primary_matched.set(primary_vertex as usize, true);
        self.secondary_matched.set(secondary_vertex as usize, true);
        self.basic_block_fixed_points.insert(BasicBlockFixedPoint {
            primary_vertex,
            secondary_vertex,
        });
        self.basic_block_steps
            .insert((primary_vertex, secondary_vertex), step_name);
        true
    }

    pub fn is_primary_vertex_matched(&self, vertex: u32) -> bool {
        self.primary_matched[vertex as usize]
    }

    pub fn is_secondary_vertex_matched(&self, vertex: u32) -> bool {
        self.secondary_matched[vertex as usize]
    }

    /// Basic-block fixed points ordered by (primary, secondary) vertex.
    pub fn basic_block_fixed_points(&self) -> &BTreeSet<BasicBlockFixedPoint> {
        &self.basic_block_fixed_points
    }

    pub fn basic_block_step_name(&self, pair: BasicBlockFixedPoint) -> &'static str {
        self.basic_block_steps
            .get(&(pair.primary_vertex, pair.secondary_vertex))
            .copied()
            .unwrap_or_default()
    }

    pub fn basic_block_fixed_point_count(&self) -> usize {
        self.basic_block_fixed_points.len()
    }
}

/// Owns all function fixed points of a run and the per-side uniqueness
/// indices. Ids are stable; deletion leaves holes.
#[derive(Debug, Default)]
pub struct FixedPointStore {
    fixed_points: Vec<Option<FixedPoint>>,
    by_primary: HashMap<FlowGraphId, FixedPointId>,
    by_secondary: HashMap<FlowGraphId, FixedPointId>,
}

impl FixedPointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new fixed point. Returns `(id, false)` with the existing
    /// id when either side is already matched.
    pub fn add(
        &mut self,
        primary: FlowGraphId,
        secondary: FlowGraphId,
        step_name: &'static str,
        primary_vertex_count: usize,
        secondary_vertex_count: usize,
    ) -> (FixedPointId, bool) {
        if let Some(&existing) = self.by_primary.get(&primary) {
            return (existing, false);
        }
        if let Some(&existing) = self.by_secondary.get(&secondary) {
            return (existing, false);
        }
        let id = self.fixed_points.len() as FixedPointId;
        self.fixed_points.push(Some(FixedPoint::new(
            primary,
            secondary,
            step_name,
            primary_vertex_count,
            secondary_vertex_count,
        )));
        self.by_primary.insert(primary, id);
        self.by_secondary.insert(secondary, id);
        (id, true)
    }

    /// Deletes fixed points by id, maintaining the uniqueness indices.
    /// Contained basic-block fixed points die with their function pair.
    pub fn delete(&mut self, ids: &[FixedPointId]) {
        for &id in ids {
            if let Some(slot) = self.fixed_points.get_mut(id as usize) {
                if let Some(fixed_point) = slot.take() {
                    self.by_primary.remove(&fixed_point.primary);
                    self.by_secondary.remove(&fixed_point.secondary);
                }
            }
        }
    }

    pub fn get(&self, id: FixedPointId) -> &FixedPoint {
        self.fixed_points[id as usize]
            .as_ref()
            .expect("stale fixed point id")
    }

    pub fn get_mut(&mut self, id: FixedPointId) -> &mut FixedPoint {
        self.fixed_points[id as usize]
            .as_mut()
            .expect("stale fixed point id")
    }

    pub fn by_primary(&self, flow_graph: FlowGraphId) -> Option<FixedPointId> {
        self.by_primary.get(&flow_graph).copied()
    }

    pub fn by_secondary(&self, flow_graph: FlowGraphId) -> Option<FixedPointId> {
        self.by_secondary.get(&flow_graph).copied()
    }

    pub fn len(&self) -> usize {
        self.fixed_points.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live fixed points in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (FixedPointId, &FixedPoint)> {
        self.fixed_points
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|fp| (id as FixedPointId, fp)))
    }

    /// Ids of the live fixed points; handy when the caller needs to mutate
    /// the store while walking it.
    pub fn ids(&self) -> Vec<FixedPointId> {
        self.fixed_points
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|_| id as FixedPointId))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_matching_a_side_fails() {
        let mut store = FixedPointStore::new();
        let (first, inserted) = store.add(0, 10, "step", 4, 4);
        assert!(inserted);
        let (existing, inserted) = store.add(0, 11, "step", 4, 4);
        assert!(!inserted);
        assert_eq!(existing, first);
        let (existing, inserted) = store.add(1, 10, "step", 4, 4);
        assert!(!inserted);
        assert_eq!(existing, first);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn basic_block_uniqueness_within_a_fixed_point() {
        let mut store = FixedPointStore::new();
        let (id, _) = store.add(0, 1, "step", 3, 3);
        let fixed_point = store.get_mut(id);
        assert!(fixed_point.add_basic_block_fixed_point(0, 0, "bb"));
        assert!(!fixed_point.add_basic_block_fixed_point(0, 1, "bb"));
        assert!(!fixed_point.add_basic_block_fixed_point(1, 0, "bb"));
        assert!(fixed_point.add_basic_block_fixed_point(1, 1, "bb"));
        assert_eq!(fixed_point.basic_block_fixed_point_count(), 2);
    }

    #[test]
    fn delete_restores_matchability() {
        let mut store = FixedPointStore::new();
        let (id, _) = store.add(0, 1, "step", 1, 1);
        store.delete(&[id]);
        assert_eq!(store.by_primary(0), None);
        assert_eq!(store.by_secondary(1), None);
        let (_, inserted) = store.add(0, 1, "step", 1, 1);
        assert!(inserted);
    }
}
