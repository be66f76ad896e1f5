//! Basic blocks matched by the string literals they reference.
//!
//! Works well on logging and error-handling code, where the strings are
//! distinctive and survive recompilation unchanged.

use crate::config::steps;
use crate::matching::basic_block::{
    match_vertices, BasicBlockStep, BasicBlockSteps, VertexMap, VertexSet,
};
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::{FixedPointId, FlowGraphId};

pub struct StringReferences;

impl StringReferences {
    fn unmatched_by_string_references(
        &self,
        context: &MatchingContext,
        side: Side,
        flow_graph: FlowGraphId,
        fixed_point: FixedPointId,
        vertices: &VertexSet,
    ) -> VertexMap<u32> {
        let features = context
            .flow_graph(side, flow_graph)
            .features(context.binary(side));
        let pair = context.fixed_points.get(fixed_point);
        let mut map: VertexMap<u32> = VertexMap::new();
        for &vertex in vertices {
            let matched = match side {
                Side::Primary => pair.is_primary_vertex_matched(vertex),
                Side::Secondary => pair.is_secondary_vertex_matched(vertex),
            };
            if matched {
                continue;
            }
            let hash = features.vertex_string_refs[vertex as usize];
            if hash > 1 {
                map.entry(hash).or_default().push(vertex);
            }
        }
        map
    }
}

impl BasicBlockStep for StringReferences {
    fn name(&self) -> &'static str {
        steps::BASIC_BLOCK_STRING_REFERENCES
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
        let map1 = self.unmatched_by_string_references(
            context,
            Side::Primary,
            primary,
            fixed_point,
            vertices1,
        );
        let map2 = self.unmatched_by_string_references(
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
