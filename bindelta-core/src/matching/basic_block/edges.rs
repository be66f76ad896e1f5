//! Edge-based basic-block matching steps.
//!
//! These bucket flow-graph edges instead of blocks. A unique edge pair
//! matches both endpoints at once, which anchors whole regions of the graph
//! in one strike.

use crate::analysis::md_index::MdIndex;
use crate::matching::basic_block::{
    match_edges, BasicBlockStep, BasicBlockSteps, EdgeMap, VertexSet,
};
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::{FixedPointId, FlowGraphId};
use crate::matching::Direction;
use crate::config::steps;

/// Collects the edges relevant for a candidate vertex set: non-circular,
/// touching at least one unmatched vertex of the set.
fn for_each_candidate_edge(
    context: &MatchingContext,
    side: Side,
    flow_graph: FlowGraphId,
    fixed_point: FixedPointId,
    vertices: &VertexSet,
    mut visit: impl FnMut(u32, u32, u32),
) {
    let graph = context.flow_graph(side, flow_graph);
    let pair = context.fixed_points.get(fixed_point);
    let matched = |vertex: u32| match side {
        Side::Primary => pair.is_primary_vertex_matched(vertex),
        Side::Secondary => pair.is_secondary_vertex_matched(vertex),
    };
    for edge in 0..graph.edge_count() as u32 {
        if graph.is_circular(edge) {
            continue;
        }
        let (source, target) = graph.edge_endpoints(edge);
        if (!matched(source) || !matched(target))
            && (vertices.contains(&source) || vertices.contains(&target))
        {
            visit(edge, source, target);
        }
    }
}

/// Matches basic blocks through the MD indices of their incident edges.
pub struct EdgesMdIndex {
    direction: Direction,
}

impl EdgesMdIndex {
    pub fn new(direction: Direction) -> Self {
        EdgesMdIndex { direction }
    }

    fn unmatched_edges(
        &self,
        context: &MatchingContext,
        side: Side,
        flow_graph: FlowGraphId,
        fixed_point: FixedPointId,
        vertices: &VertexSet,
    ) -> EdgeMap<MdIndex> {
        let graph = context.flow_graph(side, flow_graph);
        let features = graph.features(context.binary(side));
        let mut map: EdgeMap<MdIndex> = EdgeMap::new();
        for_each_candidate_edge(context, side, flow_graph, fixed_point, vertices, |edge, _, _| {
            let key = match self.direction {
                Direction::TopDown => features.edge_md[edge as usize],
                Direction::BottomUp => features.edge_md_inverted[edge as usize],
            };
            map.entry(key).or_default().push(edge);
        });
        map
    }
}

impl BasicBlockStep for EdgesMdIndex {
    fn name(&self) -> &'static str {
        match self.direction {
            Direction::TopDown => steps::BASIC_BLOCK_EDGES_MD_INDEX_TOP_DOWN,
            Direction::BottomUp => steps::BASIC_BLOCK_EDGES_MD_INDEX_BOTTOM_UP,
        }
    }

    fn find_fixed_points(
        &self,
        primary: FlowGraphId,
        secondary: FlowGraphId,
        vertices1: &VertexSet,
        vertices2: &VertexSet,
        fixed_point: FixedPointId,
        context: &mut MatchingContext,
        steps: &mut BasicBlockSteps,
    ) -> bool {
        steps.pop_front();
        let primary_edges =
            self.unmatched_edges(context, Side::Primary, primary, fixed_point, vertices1);
        let secondary_edges =
            self.unmatched_edges(context, Side::Secondary, secondary, fixed_point, vertices2);
        match_edges(
            self.name(),
            primary,
            secondary,
            &primary_edges,
            &secondary_edges,
            fixed_point,
            context,
            steps,
        )
    }
}

/// Matches edges by the combined prime signature of their endpoints.
pub struct EdgesPrimeProduct;

impl EdgesPrimeProduct {
    fn unmatched_edges(
        &self,
        context: &MatchingContext,
        side: Side,
        flow_graph: FlowGraphId,
        fixed_point: FixedPointId,
        vertices: &VertexSet,
    ) -> EdgeMap<u64> {
        let graph = context.flow_graph(side, flow_graph);
        let features = graph.features(context.binary(side));
        let mut map: EdgeMap<u64> = EdgeMap::new();
        for_each_candidate_edge(
            context,
            side,
            flow_graph,
            fixed_point,
            vertices,
            |edge, source, target| {
                let prime = features.vertex_prime[source as usize]
                    .wrapping_add(features.vertex_prime[target as usize])
                    .wrapping_add(1);
                map.entry(prime).or_default().push(edge);
            },
        );
        map
    }
}

impl BasicBlockStep for EdgesPrimeProduct {
    fn name(&self) -> &'static str {
        steps::BASIC_BLOCK_EDGES_PRIME_PRODUCT
    }

    fn find_fixed_points(
        &self,
        primary: FlowGraphId,
        secondary: FlowGraphId,
        vertices1: &VertexSet,
        vertices2: &VertexSet,
        fixed_point: FixedPointId,
        context: &mut MatchingContext,
        steps: &mut BasicBlockSteps,
    ) -> bool {
        steps.pop_front();
        let primary_edges =
            self.unmatched_edges(context, Side::Primary, primary, fixed_point, vertices1);
        let secondary_edges =
            self.unmatched_edges(context, Side::Secondary, secondary, fixed_point, vertices2);
        match_edges(
            self.name(),
            primary,
            secondary,
            &primary_edges,
            &secondary_edges,
            fixed_point,
            context,
            steps,
        )
    }
}

/// Matches along back edges only. Every back edge gets the same key, so
/// this step matches nothing by itself on graphs with several loops; its
/// value is propagation through the drill-down, anchored on the one loop
/// both sides agree on.
pub struct EdgesLoop;

impl EdgesLoop {
    fn unmatched_back_edges(
        &self,
        context: &MatchingContext,
        side: Side,
        flow_graph: FlowGraphId,
        fixed_point: FixedPointId,
        vertices: &VertexSet,
    ) -> EdgeMap<u64> {
        let graph = context.flow_graph(side, flow_graph);
        let features = graph.features(context.binary(side));
        let mut map: EdgeMap<u64> = EdgeMap::new();
        for_each_candidate_edge(context, side, flow_graph, fixed_point, vertices, |edge, _, _| {
            if features.back_edge[edge as usize] {
                map.entry(1).or_default().push(edge);
            }
        });
        map
    }
}

impl BasicBlockStep for EdgesLoop {
    fn name(&self) -> &'static str {
        steps::BASIC_BLOCK_EDGES_LOOP
    }

    fn find_fixed_points(
        &self,
        primary: FlowGraphId,
        secondary: FlowGraphId,
        vertices1: &VertexSet,
        vertices2: &VertexSet,
        fixed_point: FixedPointId,
        context: &mut MatchingContext,
        steps: &mut BasicBlockSteps,
    ) -> bool {
        steps.pop_front();
        let primary_edges =
            self.unmatched_back_edges(context, Side::Primary, primary, fixed_point, vertices1);
        let secondary_edges =
            self.unmatched_back_edges(context, Side::Secondary, secondary, fixed_point, vertices2);
        match_edges(
            self.name(),
            primary,
            secondary,
            &primary_edges,
            &secondary_edges,
            fixed_point,
            context,
            steps,
        )
    }
}
