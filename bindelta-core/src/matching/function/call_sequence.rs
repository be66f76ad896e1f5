//! Call-sequence function matching: the only step family working from
//! matched parents.
//!
//! The call site of a candidate inside its matched caller is located as a
//! (topological basic-block level, instruction position) tuple. Callees
//! match when the full tuple agrees (exact), when only the level agrees
//! (topology), or simply in call-site order (sequence). The matches are
//! weak, but if the parent was matched correctly it is likely to call its
//! children in the same order in both binaries.
//!
//! Invoked from the top of the pipeline (no parents), the step walks every
//! existing function fixed point and runs itself once per matched caller
//! pair, restricted to that caller's unmatched callees.

use std::collections::BTreeMap;

use crate::config::steps;
use crate::matching::basic_block::BasicBlockStep;
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::FlowGraphId;
use crate::matching::function::{
    build_candidate_map, match_flow_graphs, FlowGraphSet, FunctionStep, FunctionSteps,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accuracy {
    Exact,
    Topology,
    Sequence,
}

pub struct CallSequence {
    accuracy: Accuracy,
}

impl CallSequence {
    pub fn new(accuracy: Accuracy) -> Self {
        CallSequence { accuracy }
    }

    fn unmatched_by_call_level(
        &self,
        context: &MatchingContext,
        side: Side,
        parent: FlowGraphId,
        candidates: &FlowGraphSet,
        accuracy: Accuracy,
    ) -> BTreeMap<u64, Vec<FlowGraphId>> {
        if accuracy == Accuracy::Sequence {
            // Enumerate the exact-keyed map in key order; determinism relies
            // on that map being ordered.
            let exact =
                self.unmatched_by_call_level(context, side, parent, candidates, Accuracy::Exact);
            let mut map: BTreeMap<u64, Vec<FlowGraphId>> = BTreeMap::new();
            let mut index: u64 = 0;
            for (_, bucket) in &exact {
                for &id in bucket {
                    map.entry(index).or_default().push(id);
                    index += 1;
                }
            }
            return map;
        }

        let binary = context.binary(side);
        let parent_features = binary.flow_graphs[parent as usize].features(binary);
        build_candidate_map(context, side, candidates, |_, id| {
            let entry_point = binary.flow_graphs[id as usize].entry_point;
            let (level, position) = parent_features.call_site_key(entry_point)?;
            Some(match accuracy {
                Accuracy::Exact => ((level as u64) << 16) + position as u64,
                Accuracy::Topology => level as u64,
                Accuracy::Sequence => unreachable!("handled above"),
            })
        })
    }

    /// Unmatched callees of a matched caller, restricted to the candidate
    /// set in play.
    fn unmatched_callees(
        &self,
        context: &MatchingContext,
        side: Side,
        parent: FlowGraphId,
        candidates: &FlowGraphSet,
    ) -> FlowGraphSet {
        let binary = context.binary(side);
        let parent_features = binary.flow_graphs[parent as usize].features(binary);
        let mut callees = FlowGraphSet::new();
        for (&target, _) in &parent_features.call_site_levels {
            if let Some(id) = binary.flow_graph_index_by_address(target) {
                if !context.is_matched(side, id) && candidates.contains(&id) {
                    callees.insert(id);
                }
            }
        }
        callees
    }

    fn find_with_parents(
        &self,
        primary_parent: FlowGraphId,
        secondary_parent: FlowGraphId,
        primary_candidates: &FlowGraphSet,
        secondary_candidates: &FlowGraphSet,
        context: &mut MatchingContext,
        steps: &mut FunctionSteps,
        basic_block_steps: &[&'static dyn BasicBlockStep],
    ) -> bool {
        let map1 = self.unmatched_by_call_level(
            context,
            Side::Primary,
            primary_parent,
            primary_candidates,
            self.accuracy,
        );
        let map2 = self.unmatched_by_call_level(
            context,
            Side::Secondary,
            secondary_parent,
            secondary_candidates,
            self.accuracy,
        );
        match_flow_graphs(
            self,
            Some(primary_parent),
            Some(secondary_parent),
            &map1,
            &map2,
            context,
            steps,
            basic_block_steps,
        )
    }
}

impl FunctionStep for CallSequence {
    fn name(&self) -> &'static str {
        match self.accuracy {
            Accuracy::Exact => steps::FUNCTION_CALL_SEQUENCE_EXACT,
            Accuracy::Topology => steps::FUNCTION_CALL_SEQUENCE_TOPOLOGY,
            Accuracy::Sequence => steps::FUNCTION_CALL_SEQUENCE_SEQUENCE,
        }
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
        if let (Some(primary_parent), Some(secondary_parent)) = (primary_parent, secondary_parent)
        {
            return self.find_with_parents(
                primary_parent,
                secondary_parent,
                primary_candidates,
                secondary_candidates,
                context,
                steps,
                basic_block_steps,
            );
        }

        // Top of the pipeline: run once per already matched caller pair.
        let mut discovered = false;
        for id in context.fixed_points.ids() {
            let (parent1, parent2) = {
                let pair = context.fixed_points.get(id);
                (pair.primary, pair.secondary)
            };
            let callees1 =
                self.unmatched_callees(context, Side::Primary, parent1, primary_candidates);
            let callees2 =
                self.unmatched_callees(context, Side::Secondary, parent2, secondary_candidates);
            if callees1.is_empty() || callees2.is_empty() {
                continue;
            }
            let mut tail: FunctionSteps = steps.clone();
            discovered |= self.find_with_parents(
                parent1,
                parent2,
                &callees1,
                &callees2,
                context,
                &mut tail,
                basic_block_steps,
            );
        }
        discovered
    }
}
