//! Matches blocks by their number of instructions. A weak last-resort
//! discriminator; it mostly feeds the drill-down of stronger steps.

use crate::config::steps;
use crate::matching::basic_block::{
    match_vertices, BasicBlockStep, BasicBlockSteps, VertexMap, VertexSet,
};
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::{FixedPointId, FlowGraphId};

pub struct InstructionCount;

impl InstructionCount {
    fn unmatched_by_instruction_count(
        &self,
        context: &MatchingContext,
        side: Side,
        flow_graph: FlowGraphId,
        fixed_point: FixedPointId,
        vertices: &VertexSet,
    ) -> VertexMap<u32> {
        let features = context
            .flow_graph(side, flow_graph)
            .features(context.binary(side));
        let pair = context.fixed_points.get(fixed_point);
        let mut map: VertexMap<u32> = VertexMap::new();
        for &vertex in vertices {
            let matched = match side {
                Side::Primary => pair.is_primary_vertex_matched(vertex),
                Side::Secondary => pair.is_secondary_vertex_matched(vertex),
            };
            if !matched {
                map.entry(features.vertex_instruction_count[vertex as usize])
                    .or_default()
                    .push(vertex);
            }
        }
        map
    }
}

impl BasicBlockStep for InstructionCount {
    fn name(&self) -> &'static str {
        steps::BASIC_BLOCK_INSTRUCTION_COUNT
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
        let map1 = self.unmatched_by_instruction_count(
            context,
            Side::Primary,
            primary,
            fixed_point,
            vertices1,
        );
        let map2 = self.unmatched_by_instruction_count(
            context,
            Side::Secondary,
            secondary,
            fixed_point,
            vertices2,
        );
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
