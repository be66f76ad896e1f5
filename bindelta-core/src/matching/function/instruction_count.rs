//! Function matching by total instruction count. A last-resort
//! discriminator, gated on strict MD-index equivalence so it can only pair
//! functions that already look structurally identical.

use crate::config::steps;
use crate::matching::basic_block::BasicBlockStep;
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::FlowGraphId;
use crate::matching::function::{
    build_candidate_map, match_flow_graphs, FlowGraphMap, FlowGraphSet, FunctionStep,
    FunctionSteps,
};

pub struct InstructionCount;

impl InstructionCount {
    fn unmatched_by_instruction_count(
        &self,
        context: &MatchingContext,
        side: Side,
        candidates: &FlowGraphSet,
    ) -> FlowGraphMap<u32> {
        build_candidate_map(context, side, candidates, |context, id| {
            let graph = context.flow_graph(side, id);
            if graph.vertex_count() == 0 {
                return None;
            }
            Some(graph.features(context.binary(side)).instruction_count)
        })
    }
}

impl FunctionStep for InstructionCount {
    fn name(&self) -> &'static str {
        steps::FUNCTION_INSTRUCTION_COUNT
    }

    fn needs_strict_equivalence(&self) -> bool {
        true
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
        let map1 =
            self.unmatched_by_instruction_count(context, Side::Primary, primary_candidates);
        let map2 =
            self.unmatched_by_instruction_count(context, Side::Secondary, secondary_candidates);
        match_flow_graphs(
            self,
            primary_parent,
            secondary_parent,
            &map1,
            &map2,
            context,
            steps,
            basic_block_steps,
        )
    }
}
