//! Basic blocks matched by their prime signature.
//!
//! The signature is order-independent over the block's mnemonics, so
//! instruction scheduling differences between compilers do not break it.

use crate::config::steps;
use crate::matching::basic_block::{
    match_vertices, BasicBlockStep, BasicBlockSteps, VertexMap, VertexSet,
};
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::{FixedPointId, FlowGraphId};

pub struct PrimeBasicBlock {
    min_instructions: u32,
}

impl PrimeBasicBlock {
    pub fn new(min_instructions: u32) -> Self {
        PrimeBasicBlock { min_instructions }
    }

    fn unmatched_by_prime(
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
        for &vertex in vertices {
            let matched = match side {
                Side::Primary => pair.is_primary_vertex_matched(vertex),
                Side::Secondary => pair.is_secondary_vertex_matched(vertex),
            };
            if !matched
                && features.vertex_instruction_count[vertex as usize] >= self.min_instructions
            {
                map.entry(features.vertex_prime[vertex as usize])
                    .or_default()
                    .push(vertex);
            }
        }
        map
    }
}

impl BasicBlockStep for PrimeBasicBlock {
    fn name(&self) -> &'static str {
        if self.min_instructions == 0 {
            steps::BASIC_BLOCK_PRIME_0
        } else {
            steps::BASIC_BLOCK_PRIME_4
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
        let map1 = self.unmatched_by_prime(context, Side::Primary, primary, fixed_point, vertices1);
        let map2 =
            self.unmatched_by_prime(context, Side::Secondary, secondary, fixed_point, vertices2);
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
