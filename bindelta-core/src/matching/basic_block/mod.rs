//! Basic-block-level matching.
//!
//! Invoked once per newly created function fixed point. Steps run in
//! configuration order; every step buckets the still-unmatched blocks of
//! both functions by a key and matches buckets that are unique on both
//! sides. Ambiguous buckets drill down into the next step, restricted to
//! the bucket's vertices. After the configured pipeline, matched blocks
//! propagate to their unmatched neighbors, and a final closure pass matches
//! anything connected to a fixed point through a unique edge.

pub mod call_refs;
pub mod edges;
pub mod entry_node;
pub mod hash;
pub mod instruction_count;
pub mod jump_sequence;
pub mod loop_entry;
pub mod md_index;
pub mod prime;
pub mod self_loop;
pub mod string_refs;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::OnceLock;

use crate::config::{steps, MatchingConfig};
use crate::error::{DiffError, Result};
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::{BasicBlockFixedPoint, FixedPointId, FlowGraphId};
use crate::matching::Direction;

/// Set of flow-graph vertices, ordered for deterministic iteration.
pub type VertexSet = BTreeSet<u32>;
/// Ordered key -> candidate-vertex buckets.
pub type VertexMap<K> = BTreeMap<K, Vec<u32>>;
/// Ordered key -> candidate-edge buckets (edge indices).
pub type EdgeMap<K> = BTreeMap<K, Vec<u32>>;
/// The remaining pipeline, passed through every step so ambiguous buckets
/// can drill down.
pub type BasicBlockSteps = VecDeque<&'static dyn BasicBlockStep>;

/// One basic-block matching strategy.
///
/// Implementations must be reentrant: a step may be re-entered through the
/// drill-down recursion while an outer invocation is still on the stack, so
/// no step keeps mutable state of its own.
pub trait BasicBlockStep: Sync + Send {
    fn name(&self) -> &'static str;

    /// Tries to match blocks of `vertices1` against blocks of `vertices2`
    /// inside the given function fixed point. The step itself sits at the
    /// front of `steps` and removes itself before drilling down.
    fn find_fixed_points(
        &self,
        primary: FlowGraphId,
        secondary: FlowGraphId,
        vertices1: &VertexSet,
        vertices2: &VertexSet,
        fixed_point: FixedPointId,
        context: &mut MatchingContext,
        steps: &mut BasicBlockSteps,
    ) -> bool;
}

static REGISTRY: OnceLock<Vec<Box<dyn BasicBlockStep>>> = OnceLock::new();

/// All built-in basic-block steps.
pub fn basic_block_step_registry() -> &'static [Box<dyn BasicBlockStep>] {
    REGISTRY.get_or_init(|| {
        vec![
            // Edge based algorithms:
            Box::new(edges::EdgesMdIndex::new(Direction::TopDown)),
            Box::new(edges::EdgesMdIndex::new(Direction::BottomUp)),
            Box::new(edges::EdgesPrimeProduct),
            Box::new(edges::EdgesLoop),
            // Basic block based algorithms:
            Box::new(md_index::MdIndexStep::new(Direction::TopDown)),
            Box::new(md_index::MdIndexStep::new(Direction::BottomUp)),
            Box::new(md_index::MdIndexRelaxed),
            Box::new(hash::HashBasicBlock::new(4)),
            Box::new(prime::PrimeBasicBlock::new(4)),
            Box::new(prime::PrimeBasicBlock::new(0)),
            Box::new(call_refs::CallReferences),
            Box::new(string_refs::StringReferences),
            Box::new(loop_entry::LoopEntry),
            Box::new(self_loop::SelfLoops),
            Box::new(entry_node::EntryNodes::new(Direction::TopDown)),
            Box::new(entry_node::EntryNodes::new(Direction::BottomUp)),
            Box::new(instruction_count::InstructionCount),
            Box::new(jump_sequence::JumpSequence),
        ]
    })
}

/// Resolves the configured pipeline against the registry. Unknown names are
/// ignored with a warning; an empty result is a configuration error.
pub fn resolve_basic_block_steps(
    config: &MatchingConfig,
) -> Result<Vec<&'static dyn BasicBlockStep>> {
    let mut resolved: Vec<&'static dyn BasicBlockStep> = Vec::new();
    for name in &config.basic_block_matching {
        match basic_block_step_registry()
            .iter()
            .find(|step| step.name() == name.as_str())
        {
            Some(step) => resolved.push(step.as_ref()),
            None => log::warn!("ignoring unknown basic block matching step {name:?}"),
        }
    }
    if resolved.is_empty() {
        return Err(DiffError::Config(
            "no basic block matching steps configured".to_string(),
        ));
    }
    Ok(resolved)
}

/// Generic bucket-join over vertex keys. Unique buckets become fixed
/// points; ambiguous buckets are handed to the next step in the pipeline,
/// restricted to the bucket, and the step is pushed back afterwards so
/// later buckets can drill down again.
pub(crate) fn match_vertices<K: Ord + Copy>(
    step_name: &'static str,
    primary: FlowGraphId,
    secondary: FlowGraphId,
    map1: &VertexMap<K>,
    map2: &VertexMap<K>,
    fixed_point: FixedPointId,
    context: &mut MatchingContext,
    steps: &mut BasicBlockSteps,
) -> bool {
    let mut discovered = false;
    for (key, bucket1) in map1 {
        let Some(bucket2) = map2.get(key) else {
            continue;
        };
        if bucket1.len() == 1 && bucket2.len() == 1 {
            discovered |= context
                .fixed_points
                .get_mut(fixed_point)
                .add_basic_block_fixed_point(bucket1[0], bucket2[0], step_name);
        } else if let Some(&next) = steps.front() {
            let vertices1: VertexSet = bucket1.iter().copied().collect();
            let vertices2: VertexSet = bucket2.iter().copied().collect();
            discovered |= next.find_fixed_points(
                primary,
                secondary,
                &vertices1,
                &vertices2,
                fixed_point,
                context,
                steps,
            );
            steps.push_front(next);
        }
    }
    discovered
}

/// Bucket-join over edge keys. A unique edge pair matches both endpoints,
/// source first: call-target propagation started by the source match must
/// not steal the target's partner.
pub(crate) fn match_edges<K: Ord + Copy>(
    step_name: &'static str,
    primary: FlowGraphId,
    secondary: FlowGraphId,
    map1: &EdgeMap<K>,
    map2: &EdgeMap<K>,
    fixed_point: FixedPointId,
    context: &mut MatchingContext,
    steps: &mut BasicBlockSteps,
) -> bool {
    let primary_graph = context.flow_graph(Side::Primary, primary);
    let secondary_graph = context.flow_graph(Side::Secondary, secondary);
    let mut discovered = false;
    for (key, bucket1) in map1 {
        let Some(bucket2) = map2.get(key) else {
            continue;
        };
        if bucket1.len() == 1 && bucket2.len() == 1 {
            let (source1, target1) = primary_graph.edge_endpoints(bucket1[0]);
            let (source2, target2) = secondary_graph.edge_endpoints(bucket2[0]);
            let pair = context.fixed_points.get_mut(fixed_point);
            discovered |= pair.add_basic_block_fixed_point(source1, source2, step_name);
            let pair = context.fixed_points.get_mut(fixed_point);
            discovered |= pair.add_basic_block_fixed_point(target1, target2, step_name);
        } else if let Some(&next) = steps.front() {
            let pair = context.fixed_points.get(fixed_point);
            let mut vertices1: VertexSet = VertexSet::new();
            for &edge in bucket1 {
                let (source, target) = primary_graph.edge_endpoints(edge);
                if !pair.is_primary_vertex_matched(source) {
                    vertices1.insert(source);
                }
                if !pair.is_primary_vertex_matched(target) {
                    vertices1.insert(target);
                }
            }
            let mut vertices2: VertexSet = VertexSet::new();
            for &edge in bucket2 {
                let (source, target) = secondary_graph.edge_endpoints(edge);
                if !pair.is_secondary_vertex_matched(source) {
                    vertices2.insert(source);
                }
                if !pair.is_secondary_vertex_matched(target) {
                    vertices2.insert(target);
                }
            }
            if !vertices1.is_empty() && !vertices2.is_empty() {
                discovered |= next.find_fixed_points(
                    primary,
                    secondary,
                    &vertices1,
                    &vertices2,
                    fixed_point,
                    context,
                    steps,
                );
                steps.push_front(next);
            }
        }
    }
    discovered
}

fn unmatched_children(
    context: &MatchingContext,
    side: Side,
    flow_graph: FlowGraphId,
    fixed_point: FixedPointId,
    vertex: u32,
) -> VertexSet {
    let graph = context.flow_graph(side, flow_graph);
    let pair = context.fixed_points.get(fixed_point);
    let mut vertices = VertexSet::new();
    for &edge in graph.out_edge_indices(vertex) {
        let (_, target) = graph.edge_endpoints(edge);
        let matched = match side {
            Side::Primary => pair.is_primary_vertex_matched(target),
            Side::Secondary => pair.is_secondary_vertex_matched(target),
        };
        if !matched {
            vertices.insert(target);
        }
    }
    vertices
}

fn unmatched_parents(
    context: &MatchingContext,
    side: Side,
    flow_graph: FlowGraphId,
    fixed_point: FixedPointId,
    vertex: u32,
) -> VertexSet {
    let graph = context.flow_graph(side, flow_graph);
    let pair = context.fixed_points.get(fixed_point);
    let mut vertices = VertexSet::new();
    for &edge in graph.in_edge_indices(vertex) {
        let (source, _) = graph.edge_endpoints(edge);
        let matched = match side {
            Side::Primary => pair.is_primary_vertex_matched(source),
            Side::Secondary => pair.is_secondary_vertex_matched(source),
        };
        if !matched {
            vertices.insert(source);
        }
    }
    vertices
}

/// Last-resort matching: a single unmatched neighbor on each side pairs up
/// with no content check at all.
fn match_unique(
    vertices1: &VertexSet,
    vertices2: &VertexSet,
    fixed_point: FixedPointId,
    context: &mut MatchingContext,
) -> bool {
    if vertices1.len() == 1 && vertices2.len() == 1 {
        let primary_vertex = *vertices1.iter().next().expect("non-empty set");
        let secondary_vertex = *vertices2.iter().next().expect("non-empty set");
        return context
            .fixed_points
            .get_mut(fixed_point)
            .add_basic_block_fixed_point(
                primary_vertex,
                secondary_vertex,
                steps::BASIC_BLOCK_PROPAGATION,
            );
    }
    false
}

fn unmatched_vertices(
    context: &MatchingContext,
    side: Side,
    flow_graph: FlowGraphId,
    fixed_point: FixedPointId,
) -> VertexSet {
    let graph = context.flow_graph(side, flow_graph);
    let pair = context.fixed_points.get(fixed_point);
    (0..graph.vertex_count() as u32)
        .filter(|&vertex| match side {
            Side::Primary => !pair.is_primary_vertex_matched(vertex),
            Side::Secondary => !pair.is_secondary_vertex_matched(vertex),
        })
        .collect()
}

fn snapshot_pairs(context: &MatchingContext, fixed_point: FixedPointId) -> Vec<BasicBlockFixedPoint> {
    context
        .fixed_points
        .get(fixed_point)
        .basic_block_fixed_points()
        .iter()
        .copied()
        .collect()
}

/// Runs the whole basic-block pipeline for one function fixed point:
/// every pipeline suffix in turn, neighbor propagation to a fixed point,
/// and the final unique-edge closure.
pub fn find_fixed_points_basic_block(
    fixed_point: FixedPointId,
    context: &mut MatchingContext,
    default_steps: &[&'static dyn BasicBlockStep],
) {
    let (primary, secondary) = {
        let pair = context.fixed_points.get(fixed_point);
        (pair.primary, pair.secondary)
    };

    for level in 0..default_steps.len() {
        let vertices1 = unmatched_vertices(context, Side::Primary, primary, fixed_point);
        let vertices2 = unmatched_vertices(context, Side::Secondary, secondary, fixed_point);
        if vertices1.is_empty() || vertices2.is_empty() {
            return; // Already matched everything.
        }
        let mut pipeline: BasicBlockSteps = default_steps[level..].iter().copied().collect();
        let first = *pipeline.front().expect("non-empty pipeline suffix");
        first.find_fixed_points(
            primary,
            secondary,
            &vertices1,
            &vertices2,
            fixed_point,
            context,
            &mut pipeline,
        );

        loop {
            let mut more_fixed_points_discovered = false;
            let pairs = snapshot_pairs(context, fixed_point);
            // Propagate down to unmatched children.
            for pair in &pairs {
                let children1 =
                    unmatched_children(context, Side::Primary, primary, fixed_point, pair.primary_vertex);
                let children2 = unmatched_children(
                    context,
                    Side::Secondary,
                    secondary,
                    fixed_point,
                    pair.secondary_vertex,
                );
                if !children1.is_empty() && !children2.is_empty() {
                    let mut pipeline: BasicBlockSteps =
                        default_steps[level..].iter().copied().collect();
                    let first = *pipeline.front().expect("non-empty pipeline suffix");
                    more_fixed_points_discovered |= first.find_fixed_points(
                        primary,
                        secondary,
                        &children1,
                        &children2,
                        fixed_point,
                        context,
                        &mut pipeline,
                    );
                }
            }
            // Propagate up to unmatched parents.
            for pair in &pairs {
                let parents1 =
                    unmatched_parents(context, Side::Primary, primary, fixed_point, pair.primary_vertex);
                let parents2 = unmatched_parents(
                    context,
                    Side::Secondary,
                    secondary,
                    fixed_point,
                    pair.secondary_vertex,
                );
                if !parents1.is_empty() && !parents2.is_empty() {
                    let mut pipeline: BasicBlockSteps =
                        default_steps[level..].iter().copied().collect();
                    let first = *pipeline.front().expect("non-empty pipeline suffix");
                    more_fixed_points_discovered |= first.find_fixed_points(
                        primary,
                        secondary,
                        &parents1,
                        &parents2,
                        fixed_point,
                        context,
                        &mut pipeline,
                    );
                }
            }
            if !more_fixed_points_discovered {
                break;
            }
        }
    }

    // Last resort: match everything connected to a fixed point through a
    // unique edge, repeated to a fixed point of its own.
    loop {
        let mut more_fixed_points_discovered = false;
        let pairs = snapshot_pairs(context, fixed_point);
        for pair in &pairs {
            let children1 =
                unmatched_children(context, Side::Primary, primary, fixed_point, pair.primary_vertex);
            let children2 = unmatched_children(
                context,
                Side::Secondary,
                secondary,
                fixed_point,
                pair.secondary_vertex,
            );
            more_fixed_points_discovered |=
                match_unique(&children1, &children2, fixed_point, context);
            let parents1 =
                unmatched_parents(context, Side::Primary, primary, fixed_point, pair.primary_vertex);
            let parents2 = unmatched_parents(
                context,
                Side::Secondary,
                secondary,
                fixed_point,
                pair.secondary_vertex,
            );
            more_fixed_points_discovered |=
                match_unique(&parents1, &parents2, fixed_point, context);
        }
        if !more_fixed_points_discovered {
            break;
        }
    }
}
