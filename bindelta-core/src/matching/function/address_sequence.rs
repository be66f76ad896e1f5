//! Function matching by relative address order.
//!
//! Candidates are ranked by instruction count (scaled by 1000) plus their
//! enumeration position, then re-keyed by rank from the largest down.
//! Indiscriminate on its own, so it only runs under the strict-equivalence
//! gate: the candidates must already agree on the flow-graph MD index,
//! which in practice means it resolves drill-down buckets of structurally
//! equal functions by their ordering within the binary.

use std::collections::BTreeMap;

use crate::config::steps;
use crate::matching::basic_block::BasicBlockStep;
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::FlowGraphId;
use crate::matching::function::{
    is_valid_candidate, match_flow_graphs, FlowGraphMap, FlowGraphSet, FunctionStep, FunctionSteps,
};

pub struct AddressSequence;

impl AddressSequence {
    fn unmatched_by_address(
        &self,
        context: &MatchingContext,
        side: Side,
        candidates: &FlowGraphSet,
    ) -> FlowGraphMap<u64> {
        let binary = context.binary(side);
        let mut sorted_by_size: BTreeMap<u64, Vec<FlowGraphId>> = BTreeMap::new();
        for (sequence, &id) in candidates.iter().enumerate() {
            let graph = &binary.flow_graphs[id as usize];
            if graph.vertex_count() == 0 || !is_valid_candidate(context, side, id) {
                continue;
            }
            let instruction_count = graph.features(binary).instruction_count as u64;
            // Sorts by instruction count first, enumeration position second.
            let feature = 1000 * instruction_count + sequence as u64;
            sorted_by_size.entry(feature).or_default().push(id);
        }

        let mut map: FlowGraphMap<u64> = FlowGraphMap::new();
        let mut sequence: u64 = 0;
        for (_, bucket) in sorted_by_size.iter().rev() {
            for &id in bucket {
                map.entry(sequence).or_default().push(id);
                sequence += 1;
            }
        }
        map
    }
}

impl FunctionStep for AddressSequence {
    fn name(&self) -> &'static str {
        steps::FUNCTION_ADDRESS_SEQUENCE
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
        let map1 = self.unmatched_by_address(context, Side::Primary, primary_candidates);
        let map2 = self.unmatched_by_address(context, Side::Secondary, secondary_candidates);
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
