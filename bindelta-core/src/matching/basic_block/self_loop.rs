//! Matches blocks that loop to themselves, keyed by self-edge count.

use crate::config::steps;
use crate::matching::basic_block::{
    match_vertices, BasicBlockStep, BasicBlockSteps, VertexMap, VertexSet,
};
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::{FixedPointId, FlowGraphId};

pub struct SelfLoops;

impl SelfLoops {
    fn unmatched_self_loops(
        &self,
        context: &MatchingContext,
        side: Side,
        flow_graph: FlowGraphId,
        fixed_point: FixedPointId,
        vertices: &VertexSet,
    ) -> VertexMap<u64> {
        let graph = context.flow_graph(side, flow_graph);
        let pair = context.fixed_points.get(fixed_point);
        let mut map: VertexMap<u64> = VertexMap::new();
        for &vertex in vertices {
            let matched = match side {
                Side::Primary => pair.is_primary_vertex_matched(vertex),
                Side::Secondary => pair.is_secondary_vertex_matched(vertex),
            };
            if matched {
                continue;
            }
            let count = graph
                .out_edge_indices(vertex)
                .iter()
                .filter(|&&edge| graph.is_circular(edge))
                .count() as u64;
            if count > 0 {
                map.entry(count).or_default().push(vertex);
            }
        }
        map
    }
}

impl BasicBlockStep for SelfLoops {
    fn name(&self) -> &'static str {
        steps::BASIC_BLOCK_SELF_LOOPS
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
        let map1 = self.unmatched_self_loops(context, Side::Primary, primary, fixed_point, vertices1);
        let map2 =
            self.unmatched_self_loops(context, Side::Secondary, secondary, fixed_point, vertices2);
        match_vertices(
            self.name(),
            primary,
            secondary,
            &map1,
            &map2,
            fixed_point,
            context,
            steps,
        )
    }
}
