//! Function matching by name hash.
//!
//! Matches on the demangled name when available, the raw name otherwise:
//! the demangled form survives a change of compiler and mangling scheme.
//! Candidates must carry a real (not auto-generated) name. Unlike every
//! other step this one also accepts trivial library functions, because a
//! name is the only evidence they can ever offer.

use crate::config::steps;
use crate::matching::basic_block::BasicBlockStep;
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::FlowGraphId;
use crate::matching::function::{
    match_flow_graphs, FlowGraphMap, FlowGraphSet, FunctionStep, FunctionSteps,
};

pub struct NameHash;

impl NameHash {
    fn unmatched_by_name_hash(
        &self,
        context: &MatchingContext,
        side: Side,
        candidates: &FlowGraphSet,
    ) -> FlowGraphMap<u32> {
        let mut map: FlowGraphMap<u32> = FlowGraphMap::new();
        for &id in candidates {
            if context.is_matched(side, id) {
                continue;
            }
            let graph = context.flow_graph(side, id);
            if graph.has_real_name() {
                map.entry(graph.name_hash()).or_default().push(id);
            }
        }
        map
    }
}

impl FunctionStep for NameHash {
    fn name(&self) -> &'static str {
        steps::FUNCTION_NAME_HASH
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
        let map1 = self.unmatched_by_name_hash(context, Side::Primary, primary_candidates);
        let map2 = self.unmatched_by_name_hash(context, Side::Secondary, secondary_candidates);
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
