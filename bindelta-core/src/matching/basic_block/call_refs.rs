//! Basic blocks matched by the functions they call.
//!
//! Only blocks whose every call target already participates in a function
//! fixed point are candidates. The key folds the matched pairs' entry
//! addresses with their position, so blocks calling the same functions in
//! the same order land in the same bucket.

use crate::config::steps;
use crate::matching::basic_block::{
    match_vertices, BasicBlockStep, BasicBlockSteps, VertexMap, VertexSet,
};
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::{FixedPointId, FlowGraphId};

pub struct CallReferences;

impl CallReferences {
    fn unmatched_by_call_reference(
        &self,
        context: &MatchingContext,
        side: Side,
        flow_graph: FlowGraphId,
        fixed_point: FixedPointId,
        vertices: &VertexSet,
    ) -> VertexMap<u64> {
        let binary = context.binary(side);
        let features = context.flow_graph(side, flow_graph).features(binary);
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
            let calls = &features.vertex_call_targets[vertex as usize];
            if calls.is_empty() {
                continue;
            }

            let mut address_feature: u64 = 0;
            let mut all_matched = true;
            for (index, &target) in calls.iter().enumerate() {
                let target_fixed_point = binary
                    .flow_graph_index_by_address(target)
                    .and_then(|id| match side {
                        Side::Primary => context.fixed_point_by_primary(id),
                        Side::Secondary => context.fixed_point_by_secondary(id),
                    });
                let Some(target_fixed_point) = target_fixed_point else {
                    all_matched = false;
                    break;
                };
                let target_pair = context.fixed_points.get(target_fixed_point);
                let primary_entry =
                    context.primary.flow_graphs[target_pair.primary as usize].entry_point;
                let secondary_entry =
                    context.secondary.flow_graphs[target_pair.secondary as usize].entry_point;
                address_feature = address_feature.wrapping_add(
                    (index as u64 + 1).wrapping_mul(primary_entry.wrapping_add(secondary_entry)),
                );
            }
            if all_matched && address_feature != 0 {
                map.entry(address_feature).or_default().push(vertex);
            }
        }
        map
    }
}

impl BasicBlockStep for CallReferences {
    fn name(&self) -> &'static str {
        steps::BASIC_BLOCK_CALL_REFERENCES
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
            self.unmatched_by_call_reference(context, Side::Primary, primary, fixed_point, vertices1);
        let map2 = self.unmatched_by_call_reference(
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
