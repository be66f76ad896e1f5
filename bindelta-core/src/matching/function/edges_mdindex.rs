//! Edge-based function matching over the call graph.
//!
//! A call-graph edge is keyed by MD values derived from its endpoints or
//! its neighborhood. When exactly one edge on each side carries a key, both
//! endpoint functions match at once. Strong when the endpoints are
//! structurally unique; candidates with an MD index of zero (structureless
//! single-block functions) are excluded up front.

use crate::config::steps;
use crate::matching::basic_block::BasicBlockStep;
use crate::matching::context::{EdgeFeature, FeatureId, MatchingContext, Side};
use crate::matching::fixed_points::FlowGraphId;
use crate::matching::function::{
    match_edge_features, unmatched_edge_features, FlowGraphSet, FunctionStep, FunctionSteps,
};

/// Shared candidate gate: the edge is worth keying only when both endpoint
/// functions have a flow graph with structure.
fn endpoint_flow_graphs(
    context: &MatchingContext,
    side: Side,
    edge_index: u32,
) -> Option<(FlowGraphId, FlowGraphId)> {
    let binary = context.binary(side);
    let edge = binary.call_graph.edge(edge_index);
    let source = binary.call_graph.flow_graph_of(edge.source)?;
    let target = binary.call_graph.flow_graph_of(edge.target)?;
    let source_md = binary.flow_graphs[source as usize]
        .features(binary)
        .md_index;
    let target_md = binary.flow_graphs[target as usize]
        .features(binary)
        .md_index;
    if source_md.is_zero() || target_md.is_zero() {
        return None;
    }
    Some((source, target))
}

fn flow_graph_md_feature(
    context: &MatchingContext,
    side: Side,
    edge_index: u32,
) -> Option<EdgeFeature> {
    let binary = context.binary(side);
    let (source, target) = endpoint_flow_graphs(context, side, edge_index)?;
    Some(EdgeFeature {
        edge: edge_index,
        source_value: binary.flow_graphs[source as usize]
            .features(binary)
            .md_index,
        target_value: binary.flow_graphs[target as usize]
            .features(binary)
            .md_index,
    })
}

fn call_graph_md_feature(
    context: &MatchingContext,
    side: Side,
    edge_index: u32,
) -> Option<EdgeFeature> {
    endpoint_flow_graphs(context, side, edge_index)?;
    Some(EdgeFeature {
        edge: edge_index,
        source_value: context.binary(side).call_graph.features().edge_md[edge_index as usize],
        target_value: Default::default(),
    })
}

fn proximity_md_feature(
    context: &MatchingContext,
    side: Side,
    edge_index: u32,
) -> Option<EdgeFeature> {
    endpoint_flow_graphs(context, side, edge_index)?;
    Some(EdgeFeature {
        edge: edge_index,
        source_value: context.binary(side).call_graph.features().edge_proximity_md
            [edge_index as usize],
        target_value: Default::default(),
    })
}

/// Keys each call-graph edge by the flow-graph MD indices of its endpoint
/// functions.
pub struct EdgesFlowGraphMdIndex;

impl FunctionStep for EdgesFlowGraphMdIndex {
    fn name(&self) -> &'static str {
        steps::FUNCTION_EDGES_FLOW_GRAPH_MD_INDEX
    }

    fn find_fixed_points(
        &self,
        primary_parent: Option<FlowGraphId>,
        secondary_parent: Option<FlowGraphId>,
        primary_candidates: &FlowGraphSet,
        secondary_candidates: &FlowGraphSet,
        context: &mut MatchingContext,
        steps: &mut FunctionSteps,
        basic_block_steps: &[&'static dyn BasicBlockStep],
    ) -> bool {
        steps.pop_front();
        let mut edges1 = unmatched_edge_features(
            context,
            Side::Primary,
            FeatureId::FlowGraphMdEdges(Side::Primary),
            primary_candidates,
            |context, edge| flow_graph_md_feature(context, Side::Primary, edge),
        );
        let mut edges2 = unmatched_edge_features(
            context,
            Side::Secondary,
            FeatureId::FlowGraphMdEdges(Side::Secondary),
            secondary_candidates,
            |context, edge| flow_graph_md_feature(context, Side::Secondary, edge),
        );
        match_edge_features(
            self,
            primary_parent,
            secondary_parent,
            &mut edges1,
            &mut edges2,
            context,
            steps,
            basic_block_steps,
        )
    }
}

/// Keys each call-graph edge by its own MD value in the call graph.
pub struct EdgesCallGraphMdIndex;

impl FunctionStep for EdgesCallGraphMdIndex {
    fn name(&self) -> &'static str {
        steps::FUNCTION_EDGES_CALL_GRAPH_MD_INDEX
    }

    fn find_fixed_points(
        &self,
        primary_parent: Option<FlowGraphId>,
        secondary_parent: Option<FlowGraphId>,
        primary_candidates: &FlowGraphSet,
        secondary_candidates: &FlowGraphSet,
        context: &mut MatchingContext,
        steps: &mut FunctionSteps,
        basic_block_steps: &[&'static dyn BasicBlockStep],
    ) -> bool {
        steps.pop_front();
        let mut edges1 = unmatched_edge_features(
            context,
            Side::Primary,
            FeatureId::CallGraphMdEdges(Side::Primary),
            primary_candidates,
            |context, edge| call_graph_md_feature(context, Side::Primary, edge),
        );
        let mut edges2 = unmatched_edge_features(
            context,
            Side::Secondary,
            FeatureId::CallGraphMdEdges(Side::Secondary),
            secondary_candidates,
            |context, edge| call_graph_md_feature(context, Side::Secondary, edge),
        );
        match_edge_features(
            self,
            primary_parent,
            secondary_parent,
            &mut edges1,
            &mut edges2,
            context,
            steps,
            basic_block_steps,
        )
    }
}

/// Keys each call-graph edge by its two-hop proximity MD value, which
/// tolerates noise outside the immediate neighborhood.
pub struct EdgesProximityMdIndex;

impl FunctionStep for EdgesProximityMdIndex {
    fn name(&self) -> &'static str {
        steps::FUNCTION_EDGES_PROXIMITY_MD_INDEX
    }

    fn find_fixed_points(
        &self,
        primary_parent: Option<FlowGraphId>,
        secondary_parent: Option<FlowGraphId>,
        primary_candidates: &FlowGraphSet,
        secondary_candidates: &FlowGraphSet,
        context: &mut MatchingContext,
        steps: &mut FunctionSteps,
        basic_block_steps: &[&'static dyn BasicBlockStep],
    ) -> bool {
        steps.pop_front();
        let mut edges1 = unmatched_edge_features(
            context,
            Side::Primary,
            FeatureId::ProximityMdEdges(Side::Primary),
            primary_candidates,
            |context, edge| proximity_md_feature(context, Side::Primary, edge),
        );
        let mut edges2 = unmatched_edge_features(
            context,
            Side::Secondary,
            FeatureId::ProximityMdEdges(Side::Secondary),
            secondary_candidates,
            |context, edge| proximity_md_feature(context, Side::Secondary, edge),
        );
        match_edge_features(
            self,
            primary_parent,
            secondary_parent,
            &mut edges1,
            &mut edges2,
            context,
            steps,
            basic_block_steps,
        )
    }
}
