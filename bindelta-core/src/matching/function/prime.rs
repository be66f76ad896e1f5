//! Function matching by prime signature: the order-independent product of
//! per-mnemonic primes over all instructions.

use crate::config::steps;
use crate::matching::basic_block::BasicBlockStep;
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::FlowGraphId;
use crate::matching::function::{
    build_candidate_map, match_flow_graphs, FlowGraphMap, FlowGraphSet, FunctionStep,
    FunctionSteps,
};

pub struct PrimeSignature;

impl PrimeSignature {
    fn unmatched_by_prime_signature(
        &self,
        context: &MatchingContext,
        side: Side,
        candidates: &FlowGraphSet,
    ) -> FlowGraphMap<u64> {
        build_candidate_map(context, side, candidates, |context, id| {
            let binary = context.binary(side);
            Some(binary.flow_graphs[id as usize].features(binary).prime)
        })
    }
}

impl FunctionStep for PrimeSignature {
    fn name(&self) -> &'static str {
        steps::FUNCTION_PRIME_SIGNATURE
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
        let map1 = self.unmatched_by_prime_signature(context, Side::Primary, primary_candidates);
        let map2 =
            self.unmatched_by_prime_signature(context, Side::Secondary, secondary_candidates);
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
