//! Matches function entry and exit blocks.
//!
//! Top-down matches the blocks with no incoming flow (usually exactly the
//! function entry), bottom-up the blocks with no outgoing flow (returns).

use crate::config::steps;
use crate::matching::basic_block::{
    match_vertices, BasicBlockStep, BasicBlockSteps, VertexMap, VertexSet,
};
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::{FixedPointId, FlowGraphId};
use crate::matching::Direction;

pub struct EntryNodes {
    direction: Direction,
}

impl EntryNodes {
    pub fn new(direction: Direction) -> Self {
        EntryNodes { direction }
    }

    fn unmatched_entry_points(
        &self,
        context: &MatchingContext,
        side: Side,
        flow_graph: FlowGraphId,
        fixed_point: FixedPointId,
        vertices: &VertexSet,
    ) -> VertexMap<u64> {
        let graph = context.flow_graph(side, flow_graph);
        let pair = context.fixed_points.get(fixed_point);
        let mut map: VertexMap<u64> = VertexMap::new();
        for &vertex in vertices {
            let matched = match side {
                Side::Primary => pair.is_primary_vertex_matched(vertex),
                Side::Secondary => pair.is_secondary_vertex_matched(vertex),
            };
            if matched {
                continue;
            }
            let is_candidate = match self.direction {
                Direction::TopDown => graph.in_degree(vertex) == 0,
                Direction::BottomUp => graph.out_degree(vertex) == 0,
            };
            if is_candidate {
                map.entry(1).or_default().push(vertex);
            }
        }
        map
    }
}

impl BasicBlockStep for EntryNodes {
    fn name(&self) -> &'static str {
        match self.direction {
            Direction::TopDown => steps::BASIC_BLOCK_ENTRY_NODES,
            Direction::BottomUp => steps::BASIC_BLOCK_EXIT_NODES,
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
        let map1 =
            self.unmatched_entry_points(context, Side::Primary, primary, fixed_point, vertices1);
        let map2 =
            self.unmatched_entry_points(context, Side::Secondary, secondary, fixed_point, vertices2);
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
