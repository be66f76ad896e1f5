//! Vertex MD index function matching, on both graphs and in both
//! orientations.

use crate::analysis::md_index::MdIndex;
use crate::config::steps;
use crate::matching::basic_block::BasicBlockStep;
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::FlowGraphId;
use crate::matching::function::{
    build_candidate_map, match_flow_graphs, FlowGraphMap, FlowGraphSet, FunctionStep,
    FunctionSteps,
};
use crate::matching::Direction;

fn call_graph_vertex(context: &MatchingContext, side: Side, id: FlowGraphId) -> Option<u32> {
    let binary = context.binary(side);
    binary
        .call_graph
        .vertex_by_address(binary.flow_graphs[id as usize].entry_point)
}

/// The function's MD index within the call graph.
pub struct CallGraphMdIndex {
    direction: Direction,
}

impl CallGraphMdIndex {
    pub fn new(direction: Direction) -> Self {
        CallGraphMdIndex { direction }
    }

    fn unmatched_by_call_graph_md_index(
        &self,
        context: &MatchingContext,
        side: Side,
        candidates: &FlowGraphSet,
    ) -> FlowGraphMap<MdIndex> {
        build_candidate_map(context, side, candidates, |context, id| {
            let vertex = call_graph_vertex(context, side, id)?;
            let features = context.binary(side).call_graph.features();
            Some(match self.direction {
                Direction::TopDown => features.vertex_md[vertex as usize],
                Direction::BottomUp => features.vertex_md_inverted[vertex as usize],
            })
        })
    }
}

impl FunctionStep for CallGraphMdIndex {
    fn name(&self) -> &'static str {
        match self.direction {
            Direction::TopDown => steps::FUNCTION_CALL_GRAPH_MD_INDEX_TOP_DOWN,
            Direction::BottomUp => steps::FUNCTION_CALL_GRAPH_MD_INDEX_BOTTOM_UP,
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
        let map1 =
            self.unmatched_by_call_graph_md_index(context, Side::Primary, primary_candidates);
        let map2 =
            self.unmatched_by_call_graph_md_index(context, Side::Secondary, secondary_candidates);
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

/// The MD index of the function's own flow graph.
pub struct FlowGraphMdIndex {
    direction: Direction,
}

impl FlowGraphMdIndex {
    pub fn new(direction: Direction) -> Self {
        FlowGraphMdIndex { direction }
    }

    fn unmatched_by_flow_graph_md_index(
        &self,
        context: &MatchingContext,
        side: Side,
        candidates: &FlowGraphSet,
    ) -> FlowGraphMap<MdIndex> {
        build_candidate_map(context, side, candidates, |context, id| {
            let binary = context.binary(side);
            let features = binary.flow_graphs[id as usize].features(binary);
            Some(match self.direction {
                Direction::TopDown => features.md_index,
                Direction::BottomUp => features.md_index_inverted,
            })
        })
    }
}

impl FunctionStep for FlowGraphMdIndex {
    fn name(&self) -> &'static str {
        match self.direction {
            Direction::TopDown => steps::FUNCTION_FLOW_GRAPH_MD_INDEX_TOP_DOWN,
            Direction::BottomUp => steps::FUNCTION_FLOW_GRAPH_MD_INDEX_BOTTOM_UP,
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
        let map1 =
            self.unmatched_by_flow_graph_md_index(context, Side::Primary, primary_candidates);
        let map2 =
            self.unmatched_by_flow_graph_md_index(context, Side::Secondary, secondary_candidates);
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

/// Call-graph MD index over BFS levels. A fallback when topology shifts
/// have moved the strict levels apart.
pub struct CallGraphMdIndexRelaxed;

impl CallGraphMdIndexRelaxed {
    fn unmatched_by_relaxed_md_index(
        &self,
        context: &MatchingContext,
        side: Side,
        candidates: &FlowGraphSet,
    ) -> FlowGraphMap<MdIndex> {
        build_candidate_map(context, side, candidates, |context, id| {
            let vertex = call_graph_vertex(context, side, id)?;
            Some(context.binary(side).call_graph.features().vertex_md_relaxed[vertex as usize])
        })
    }
}

impl FunctionStep for CallGraphMdIndexRelaxed {
    fn name(&self) -> &'static str {
        steps::FUNCTION_CALL_GRAPH_MD_INDEX_RELAXED
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
        let map1 = self.unmatched_by_relaxed_md_index(context, Side::Primary, primary_candidates);
        let map2 =
            self.unmatched_by_relaxed_md_index(context, Side::Secondary, secondary_candidates);
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
