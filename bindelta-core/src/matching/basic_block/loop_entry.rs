//! Matches loop-entry blocks, i.e. targets of back edges.
//!
//! Loop heads are keyed by their enumeration position so the n-th loop of
//! the primary pairs with the n-th loop of the secondary. Vertex order is
//! entry-address order on both sides, which keeps the pairing stable.

use crate::config::steps;
use crate::matching::basic_block::{
    match_vertices, BasicBlockStep, BasicBlockSteps, VertexMap, VertexSet,
};
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::{FixedPointId, FlowGraphId};

pub struct LoopEntry;

impl LoopEntry {
    fn unmatched_loop_entries(
        &self,
        context: &MatchingContext,
        side: Side,
        flow_graph: FlowGraphId,
        fixed_point: FixedPointId,
        vertices: &VertexSet,
    ) -> VertexMap<u64> {
        let features = context
            .flow_graph(side, flow_graph)
            .features(context.binary(side));
        let pair = context.fixed_points.get(fixed_point);
        let mut map: VertexMap<u64> = VertexMap::new();
        let mut loop_index: u64 = 0;
        for &vertex in vertices {
            let matched = match side {
                Side::Primary => pair.is_primary_vertex_matched(vertex),
                Side::Secondary => pair.is_secondary_vertex_matched(vertex),
            };
            if matched {
                continue;
            }
            if features.loop_entry[vertex as usize] {
                map.entry(loop_index).or_default().push(vertex);
                loop_index += 1;
            }
        }
        map
    }
}

impl BasicBlockStep for LoopEntry {
    fn name(&self) -> &'static str {
        steps::BASIC_BLOCK_LOOP_ENTRY
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
        let map1 =
            self.unmatched_loop_entries(context, Side::Primary, primary, fixed_point, vertices1);
        let map2 =
            self.unmatched_loop_entries(context, Side::Secondary, secondary, fixed_point, vertices2);
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
