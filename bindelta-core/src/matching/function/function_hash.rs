//! Function matching by a hash of the raw function bytes. The strongest
//! possible evidence when it hits: the code is byte-identical.

use crate::config::steps;
use crate::matching::basic_block::BasicBlockStep;
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::FlowGraphId;
use crate::matching::function::{
    build_candidate_map, match_flow_graphs, FlowGraphMap, FlowGraphSet, FunctionStep,
    FunctionSteps,
};

pub struct FunctionHash;

impl FunctionHash {
    fn unmatched_by_hash(
        &self,
        context: &MatchingContext,
        side: Side,
        candidates: &FlowGraphSet,
    ) -> FlowGraphMap<u64> {
        build_candidate_map(context, side, candidates, |context, id| {
            let binary = context.binary(side);
            let hash = binary.flow_graphs[id as usize].features(binary).hash;
            (hash != 0).then_some(hash)
        })
    }
}

impl FunctionStep for FunctionHash {
    fn name(&self) -> &'static str {
        steps::FUNCTION_HASH
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
        let map1 = self.unmatched_by_hash(context, Side::Primary, primary_candidates);
        let map2 = self.unmatched_by_hash(context, Side::Secondary, secondary_candidates);
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
