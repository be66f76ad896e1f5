//! Basic blocks matched by their position in the flow graph (MD index).

use crate::analysis::md_index::MdIndex;
use crate::config::steps;
use crate::matching::basic_block::{
    match_vertices, BasicBlockStep, BasicBlockSteps, VertexMap, VertexSet,
};
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::{FixedPointId, FlowGraphId};
use crate::matching::Direction;

/// MD index per vertex, top-down or bottom-up.
pub struct MdIndexStep {
    direction: Direction,
}

impl MdIndexStep {
    pub fn new(direction: Direction) -> Self {
        MdIndexStep { direction }
    }

    fn unmatched_by_md_index(
        &self,
        context: &MatchingContext,
        side: Side,
        flow_graph: FlowGraphId,
        fixed_point: FixedPointId,
        vertices: &VertexSet,
    ) -> VertexMap<MdIndex> {
        let features = context
            .flow_graph(side, flow_graph)
            .features(context.binary(side));
        let pair = context.fixed_points.get(fixed_point);
        let mut map: VertexMap<MdIndex> = VertexMap::new();
        for &vertex in vertices {
            let matched = match side {
                Side::Primary => pair.is_primary_vertex_matched(vertex),
                Side::Secondary => pair.is_secondary_vertex_matched(vertex),
            };
            if !matched {
                let key = match self.direction {
                    Direction::TopDown => features.vertex_md[vertex as usize],
                    Direction::BottomUp => features.vertex_md_inverted[vertex as usize],
                };
                map.entry(key).or_default().push(vertex);
            }
        }
        map
    }
}

impl BasicBlockStep for MdIndexStep {
    fn name(&self) -> &'static str {
        match self.direction {
            Direction::TopDown => steps::BASIC_BLOCK_MD_INDEX_TOP_DOWN,
            Direction::BottomUp => steps::BASIC_BLOCK_MD_INDEX_BOTTOM_UP,
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
            self.unmatched_by_md_index(context, Side::Primary, primary, fixed_point, vertices1);
        let map2 =
            self.unmatched_by_md_index(context, Side::Secondary, secondary, fixed_point, vertices2);
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

/// MD index with BFS levels instead of topological levels. Survives
/// topology changes that shift levels, at the price of weaker keys.
pub struct MdIndexRelaxed;

impl MdIndexRelaxed {
    fn unmatched_by_relaxed_md_index(
        &self,
        context: &MatchingContext,
        side: Side,
        flow_graph: FlowGraphId,
        fixed_point: FixedPointId,
        vertices: &VertexSet,
    ) -> VertexMap<MdIndex> {
        let features = context
            .flow_graph(side, flow_graph)
            .features(context.binary(side));
        let pair = context.fixed_points.get(fixed_point);
        let mut map: VertexMap<MdIndex> = VertexMap::new();
        for &vertex in vertices {
            let matched = match side {
                Side::Primary => pair.is_primary_vertex_matched(vertex),
                Side::Secondary => pair.is_secondary_vertex_matched(vertex),
            };
            if !matched {
                map.entry(features.vertex_md_relaxed[vertex as usize])
                    .or_default()
                    .push(vertex);
            }
        }
        map
    }
}

impl BasicBlockStep for MdIndexRelaxed {
    fn name(&self) -> &'static str {
        steps::BASIC_BLOCK_MD_INDEX_RELAXED
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
        let map1 = self.unmatched_by_relaxed_md_index(
            context,
            Side::Primary,
            primary,
            fixed_point,
            vertices1,
        );
        let map2 = self.unmatched_by_relaxed_md_index(
            context,
            Side::Secondary,
            secondary,
            fixed_point,
            vertices2,
        );
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
