//! Matches blocks by their MD index scaled to an integer, with a running
//! per-bucket sequence number breaking ties. Blocks sharing an MD value are
//! paired in enumeration order, which is entry-address order on both sides.

use std::collections::BTreeMap;

use crate::config::steps;
use crate::matching::basic_block::{
    match_vertices, BasicBlockStep, BasicBlockSteps, VertexMap, VertexSet,
};
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::{FixedPointId, FlowGraphId};

/// Scale factor mapping MD values onto the integer key space.
const MD_INDEX_SCALE: f64 = 1_000_000_000_000_000_000.0;

pub struct JumpSequence;

impl JumpSequence {
    fn unmatched_by_jump_sequence(
        &self,
        context: &MatchingContext,
        side: Side,
        flow_graph: FlowGraphId,
        fixed_point: FixedPointId,
        vertices: &VertexSet,
    ) -> VertexMap<u64> {
        let features = context
            .flow_graph(side, flow_graph)
            .features(context.binary(side));
        let pair = context.fixed_points.get(fixed_point);
        let mut map: VertexMap<u64> = VertexMap::new();
        let mut md_count: BTreeMap<u64, u64> = BTreeMap::new();
        for &vertex in vertices {
            let matched = match side {
                Side::Primary => pair.is_primary_vertex_matched(vertex),
                Side::Secondary => pair.is_secondary_vertex_matched(vertex),
            };
            if matched {
                continue;
            }
            let int_md_index = features.vertex_md[vertex as usize].scaled(MD_INDEX_SCALE);
            let sequence = md_count.entry(int_md_index).or_insert(0);
            map.entry(int_md_index.wrapping_add(*sequence))
                .or_default()
                .push(vertex);
            *sequence += 1;
        }
        map
    }
}

impl BasicBlockStep for JumpSequence {
    fn name(&self) -> &'static str {
        steps::BASIC_BLOCK_JUMP_SEQUENCE
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
            self.unmatched_by_jump_sequence(context, Side::Primary, primary, fixed_point, vertices1);
        let map2 = self.unmatched_by_jump_sequence(
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
