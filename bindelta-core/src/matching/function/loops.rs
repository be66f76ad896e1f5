//! Function matching by loop count. Only functions with at least one loop
//! participate; a weak discriminator that mostly feeds drill-downs.

use crate::config::steps;
use crate::matching::basic_block::BasicBlockStep;
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::FlowGraphId;
use crate::matching::function::{
    build_candidate_map, match_flow_graphs, FlowGraphMap, FlowGraphSet, FunctionStep,
    FunctionSteps,
};

pub struct LoopCount;

impl LoopCount {
    fn unmatched_by_loop_count(
        &self,
        context: &MatchingContext,
        side: Side,
        candidates: &FlowGraphSet,
    ) -> FlowGraphMap<u32> {
        build_candidate_map(context, side, candidates, |context, id| {
            let binary = context.binary(side);
            let loops = binary.flow_graphs[id as usize].features(binary).loop_count;
            (loops > 0).then_some(loops)
        })
    }
}

impl FunctionStep for LoopCount {
    fn name(&self) -> &'static str {
        steps::FUNCTION_LOOP_COUNT
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
        let map1 = self.unmatched_by_loop_count(context, Side::Primary, primary_candidates);
        let map2 = self.unmatched_by_loop_count(context, Side::Secondary, secondary_candidates);
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
