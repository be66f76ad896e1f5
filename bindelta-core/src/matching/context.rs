//! The matching context: the only mutable state during a run.
//!
//! The context borrows both read-only binaries and owns the fixed-point
//! store plus the cross-graph feature caches. Matching steps keep no state
//! of their own and consult the context instead, which is what makes the
//! mutually recursive step dispatch reentrant.

use std::collections::HashMap;

use crate::analysis::md_index::MdIndex;
use crate::config::MatchingConfig;
use crate::graph::{Binary, FlowGraph};
use crate::matching::fixed_points::{FixedPointId, FixedPointStore, FlowGraphId};

/// Which binary of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Primary,
    Secondary,
}

/// Enumerated feature-cache slots. One slot per derived cross-graph
/// feature and side; the enumeration is closed because the core defines
/// every feature it caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureId {
    FlowGraphMdEdges(Side),
    CallGraphMdEdges(Side),
    ProximityMdEdges(Side),
}

/// A call-graph edge annotated with the values an edge-based step keys on.
#[derive(Debug, Clone, Copy)]
pub struct EdgeFeature {
    /// Index into the call graph's edge list.
    pub edge: u32,
    pub source_value: MdIndex,
    pub target_value: MdIndex,
}

/// Tagged cache value. A closed enum replaces the type-erased deleters a
/// heterogeneous cache would otherwise need.
#[derive(Debug)]
pub enum FeatureValue {
    EdgeFeatures(Vec<EdgeFeature>),
}

/// Long-lived state for one matching run.
pub struct MatchingContext<'a> {
    pub primary: &'a Binary,
    pub secondary: &'a Binary,
    pub config: &'a MatchingConfig,
    pub fixed_points: FixedPointStore,
    caches: HashMap<FeatureId, FeatureValue>,
    cancel: Option<&'a dyn Fn() -> bool>,
}

impl<'a> MatchingContext<'a> {
    pub fn new(
        primary: &'a Binary,
        secondary: &'a Binary,
        config: &'a MatchingConfig,
        cancel: Option<&'a dyn Fn() -> bool>,
    ) -> Self {
        MatchingContext {
            primary,
            secondary,
            config,
            fixed_points: FixedPointStore::new(),
            caches: HashMap::new(),
            cancel,
        }
    }

    pub fn binary(&self, side: Side) -> &'a Binary {
        match side {
            Side::Primary => self.primary,
            Side::Secondary => self.secondary,
        }
    }

    pub fn flow_graph(&self, side: Side, id: FlowGraphId) -> &'a FlowGraph {
        &self.binary(side).flow_graphs[id as usize]
    }

    /// Inserts a function fixed point, enforcing per-side uniqueness.
    /// Returns `(id, inserted)`.
    pub fn add_fixed_point(
        &mut self,
        primary: FlowGraphId,
        secondary: FlowGraphId,
        step_name: &'static str,
    ) -> (FixedPointId, bool) {
        let primary_vertices = self.primary.flow_graphs[primary as usize].vertex_count();
        let secondary_vertices = self.secondary.flow_graphs[secondary as usize].vertex_count();
        let (id, inserted) = self.fixed_points.add(
            primary,
            secondary,
            step_name,
            primary_vertices,
            secondary_vertices,
        );
        if inserted {
            log::debug!(
                "fixed point {:08X} <-> {:08X} via {}",
                self.primary.flow_graphs[primary as usize].entry_point,
                self.secondary.flow_graphs[secondary as usize].entry_point,
                step_name
            );
        }
        (id, inserted)
    }

    pub fn fixed_point_by_primary(&self, flow_graph: FlowGraphId) -> Option<FixedPointId> {
        self.fixed_points.by_primary(flow_graph)
    }

    pub fn fixed_point_by_secondary(&self, flow_graph: FlowGraphId) -> Option<FixedPointId> {
        self.fixed_points.by_secondary(flow_graph)
    }

    /// Whether the flow graph already participates in a fixed point.
    pub fn is_matched(&self, side: Side, flow_graph: FlowGraphId) -> bool {
        match side {
            Side::Primary => self.fixed_points.by_primary(flow_graph).is_some(),
            Side::Secondary => self.fixed_points.by_secondary(flow_graph).is_some(),
        }
    }

    pub fn has_cached_features(&self, id: FeatureId) -> bool {
        self.caches.contains_key(&id)
    }

    pub fn cached_edge_features(&self, id: FeatureId) -> Option<&Vec<EdgeFeature>> {
        match self.caches.get(&id) {
            Some(FeatureValue::EdgeFeatures(features)) => Some(features),
            None => None,
        }
    }

    pub fn set_cached_features(&mut self, id: FeatureId, value: FeatureValue) {
        self.caches.insert(id, value);
    }

    /// Drops every cached feature; fixed points survive.
    pub fn clear_caches(&mut self) {
        self.caches.clear();
    }

    /// Cooperative cancellation poll; steps check this at their boundaries.
    pub fn should_cancel(&self) -> bool {
        self.cancel.map_or(false, |cancel| cancel())
    }

    /// Effective confidence of a step under the active configuration.
    pub fn step_confidence(&self, step_name: &str) -> f64 {
        self.config.confidence(step_name)
    }
}
