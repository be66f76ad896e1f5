//! Function-level matching.
//!
//! Each step buckets the unmatched functions of both binaries by a key and
//! matches buckets that are unique on both sides. Ambiguous buckets drill
//! down into the next configured step restricted to the bucket; the step is
//! pushed back afterwards so later buckets can use it again. Every new
//! function fixed point immediately runs the basic-block pipeline and the
//! call-reference propagation, which may recursively discover further
//! function matches.

pub mod address_sequence;
pub mod call_sequence;
pub mod edges_mdindex;
pub mod function_hash;
pub mod instruction_count;
pub mod loops;
pub mod md_index;
pub mod name_hash;
pub mod prime;
pub mod string_refs;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::OnceLock;

use crate::config::{steps, MatchingConfig};
use crate::error::{DiffError, Result};
use crate::matching::basic_block::{find_fixed_points_basic_block, BasicBlockStep};
use crate::matching::context::{EdgeFeature, FeatureId, FeatureValue, MatchingContext, Side};
use crate::matching::fixed_points::{FixedPointId, FlowGraphId};
use crate::matching::update_fixed_point_scores;
use crate::matching::Direction;

/// Ordered set of candidate flow graphs. Ids ascend with entry-point
/// addresses, so iteration order is address order.
pub type FlowGraphSet = BTreeSet<FlowGraphId>;
/// Ordered key -> candidate buckets.
pub type FlowGraphMap<K> = BTreeMap<K, Vec<FlowGraphId>>;
/// The remaining function pipeline.
pub type FunctionSteps = VecDeque<&'static dyn FunctionStep>;

/// One function-matching strategy.
///
/// `primary_parent`/`secondary_parent` are set only for the call-sequence
/// family, which propagates matches from an already matched caller to its
/// callees. Implementations must be reentrant; the drill-down recursion and
/// the call-reference propagation may re-enter a step while an outer
/// invocation is on the stack.
pub trait FunctionStep: Sync + Send {
    fn name(&self) -> &'static str;

    /// Steps matching on weak evidence additionally require both candidates
    /// to agree on the flow-graph MD index.
    fn needs_strict_equivalence(&self) -> bool {
        false
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
    ) -> bool;
}

static REGISTRY: OnceLock<Vec<Box<dyn FunctionStep>>> = OnceLock::new();

/// All built-in function steps.
pub fn function_step_registry() -> &'static [Box<dyn FunctionStep>] {
    REGISTRY.get_or_init(|| {
        vec![
            // Edge based matching algorithms:
            Box::new(edges_mdindex::EdgesFlowGraphMdIndex),
            Box::new(edges_mdindex::EdgesCallGraphMdIndex),
            Box::new(edges_mdindex::EdgesProximityMdIndex),
            // Node based matching algorithms:
            Box::new(md_index::CallGraphMdIndex::new(Direction::TopDown)),
            Box::new(md_index::CallGraphMdIndex::new(Direction::BottomUp)),
            Box::new(md_index::FlowGraphMdIndex::new(Direction::TopDown)),
            Box::new(md_index::FlowGraphMdIndex::new(Direction::BottomUp)),
            Box::new(md_index::CallGraphMdIndexRelaxed),
            Box::new(name_hash::NameHash),
            Box::new(loops::LoopCount),
            Box::new(call_sequence::CallSequence::new(call_sequence::Accuracy::Exact)),
            Box::new(call_sequence::CallSequence::new(call_sequence::Accuracy::Topology)),
            Box::new(call_sequence::CallSequence::new(call_sequence::Accuracy::Sequence)),
            Box::new(prime::PrimeSignature),
            Box::new(function_hash::FunctionHash),
            Box::new(string_refs::StringReferences),
            Box::new(instruction_count::InstructionCount),
            Box::new(address_sequence::AddressSequence),
        ]
    })
}

/// Resolves the configured function pipeline. Unknown names are ignored
/// with a warning; an empty result is a configuration error.
pub fn resolve_function_steps(config: &MatchingConfig) -> Result<Vec<&'static dyn FunctionStep>> {
    let mut resolved: Vec<&'static dyn FunctionStep> = Vec::new();
    for name in &config.function_matching {
        match function_step_registry()
            .iter()
            .find(|step| step.name() == name.as_str())
        {
            Some(step) => resolved.push(step.as_ref()),
            None => log::warn!("ignoring unknown function matching step {name:?}"),
        }
    }
    if resolved.is_empty() {
        return Err(DiffError::Config(
            "no function matching steps configured".to_string(),
        ));
    }
    Ok(resolved)
}

/// A function may be matched unless it already has a fixed point. Trivial
/// library functions carry no structure at all and may only be matched by
/// name.
pub fn is_valid_candidate(context: &MatchingContext, side: Side, flow_graph: FlowGraphId) -> bool {
    if context.is_matched(side, flow_graph) {
        return false;
    }
    let graph = context.flow_graph(side, flow_graph);
    !(graph.is_trivial() && graph.is_library())
}

/// Strict-equivalence gate for weak steps.
pub fn check_extra_conditions(
    context: &MatchingContext,
    primary: FlowGraphId,
    secondary: FlowGraphId,
    step: &dyn FunctionStep,
) -> bool {
    if !step.needs_strict_equivalence() {
        return true;
    }
    let primary_md = context
        .flow_graph(Side::Primary, primary)
        .features(context.primary)
        .md_index;
    let secondary_md = context
        .flow_graph(Side::Secondary, secondary)
        .features(context.secondary)
        .md_index;
    primary_md == secondary_md
}

/// Adds a fixed point and, when it is new, runs the basic-block pipeline,
/// the call-reference propagation and the score update.
pub(crate) fn process_new_fixed_point(
    primary: FlowGraphId,
    secondary: FlowGraphId,
    step_name: &'static str,
    context: &mut MatchingContext,
    basic_block_steps: &[&'static dyn BasicBlockStep],
) -> bool {
    let (id, inserted) = context.add_fixed_point(primary, secondary, step_name);
    if !inserted {
        return false;
    }
    find_fixed_points_basic_block(id, context, basic_block_steps);
    find_call_reference_fixed_points(id, context, basic_block_steps);
    update_fixed_point_scores(id, context);
    true
}

/// Generic bucket-join over candidate keys (spec'd ambiguity drill-down).
pub(crate) fn match_flow_graphs<K: Ord + Copy>(
    step: &dyn FunctionStep,
    primary_parent: Option<FlowGraphId>,
    secondary_parent: Option<FlowGraphId>,
    map1: &FlowGraphMap<K>,
    map2: &FlowGraphMap<K>,
    context: &mut MatchingContext,
    steps: &mut FunctionSteps,
    basic_block_steps: &[&'static dyn BasicBlockStep],
) -> bool {
    let mut discovered = false;
    for (key, bucket1) in map1 {
        let Some(bucket2) = map2.get(key) else {
            continue;
        };
        if bucket1.len() == 1 && bucket2.len() == 1 {
            let primary = bucket1[0];
            let secondary = bucket2[0];
            if !check_extra_conditions(context, primary, secondary, step) {
                continue;
            }
            discovered |= process_new_fixed_point(
                primary,
                secondary,
                step.name(),
                context,
                basic_block_steps,
            );
        } else if let Some(&next) = steps.front() {
            let candidates1: FlowGraphSet = bucket1
                .iter()
                .copied()
                .filter(|&id| !context.is_matched(Side::Primary, id))
                .collect();
            let candidates2: FlowGraphSet = bucket2
                .iter()
                .copied()
                .filter(|&id| !context.is_matched(Side::Secondary, id))
                .collect();
            if !candidates1.is_empty() && !candidates2.is_empty() {
                discovered |= next.find_fixed_points(
                    primary_parent,
                    secondary_parent,
                    &candidates1,
                    &candidates2,
                    context,
                    steps,
                    basic_block_steps,
                );
                steps.push_front(next);
            }
        }
    }
    discovered
}

fn edge_feature_key(feature: &EdgeFeature) -> (crate::analysis::md_index::MdIndex, crate::analysis::md_index::MdIndex) {
    (feature.source_value, feature.target_value)
}

/// Collects the edge features of one call graph, using the context cache
/// where possible, then filters to the candidate set. The cache keeps no
/// data in the step itself, which keeps steps reentrant.
pub(crate) fn unmatched_edge_features(
    context: &mut MatchingContext,
    side: Side,
    feature_id: FeatureId,
    candidates: &FlowGraphSet,
    make: impl Fn(&MatchingContext, u32) -> Option<EdgeFeature>,
) -> Vec<EdgeFeature> {
    if !context.has_cached_features(feature_id) {
        let call_graph = &context.binary(side).call_graph;
        let mut features: Vec<EdgeFeature> = Vec::new();
        for index in 0..call_graph.edge_count() as u32 {
            let edge = call_graph.edge(index);
            if edge.is_circular() || edge.is_duplicate() {
                continue;
            }
            if let Some(feature) = make(context, index) {
                features.push(feature);
            }
        }
        context.set_cached_features(feature_id, FeatureValue::EdgeFeatures(features));
    }

    let call_graph = &context.binary(side).call_graph;
    let all = context
        .cached_edge_features(feature_id)
        .expect("edge features were just cached");
    let mut result: Vec<EdgeFeature> = Vec::new();
    for feature in all {
        let edge = call_graph.edge(feature.edge);
        let source = call_graph.flow_graph_of(edge.source);
        let target = call_graph.flow_graph_of(edge.target);
        let (Some(source), Some(target)) = (source, target) else {
            continue;
        };
        // Both endpoints matched already: nothing left to gain here.
        if context.is_matched(side, source) && context.is_matched(side, target) {
            continue;
        }
        if !candidates.contains(&source) && !candidates.contains(&target) {
            continue;
        }
        result.push(*feature);
    }
    result
}

/// Walks two edge-feature lists sorted by (source value, target value) in
/// lock step. A key unique on both sides matches both edge endpoints, the
/// source pair first: the basic-block pipeline of the source match performs
/// call-target propagation that must not preempt the target's own match.
pub(crate) fn match_edge_features(
    step: &dyn FunctionStep,
    primary_parent: Option<FlowGraphId>,
    secondary_parent: Option<FlowGraphId>,
    edges1: &mut Vec<EdgeFeature>,
    edges2: &mut Vec<EdgeFeature>,
    context: &mut MatchingContext,
    steps: &mut FunctionSteps,
    basic_block_steps: &[&'static dyn BasicBlockStep],
) -> bool {
    let mut discovered = false;
    edges1.sort_by(|a, b| edge_feature_key(a).cmp(&edge_feature_key(b)));
    edges2.sort_by(|a, b| edge_feature_key(a).cmp(&edge_feature_key(b)));

    let mut i = 0;
    let mut j = 0;
    while i < edges1.len() && j < edges2.len() {
        let key = edge_feature_key(&edges1[i]);
        let next_i = edges1[i..].partition_point(|f| edge_feature_key(f) <= key) + i;
        let count1 = next_i - i;
        j += edges2[j..].partition_point(|f| edge_feature_key(f) < key);
        let next_j = edges2[j..].partition_point(|f| edge_feature_key(f) <= key) + j;
        let count2 = next_j - j;

        if count1 == 1 && count2 == 1 {
            let primary_edge = context.primary.call_graph.edge(edges1[i].edge);
            let secondary_edge = context.secondary.call_graph.edge(edges2[j].edge);
            let primary_source = context.primary.call_graph.flow_graph_of(primary_edge.source);
            let primary_target = context.primary.call_graph.flow_graph_of(primary_edge.target);
            let secondary_source = context
                .secondary
                .call_graph
                .flow_graph_of(secondary_edge.source);
            let secondary_target = context
                .secondary
                .call_graph
                .flow_graph_of(secondary_edge.target);
            if let (Some(ps), Some(pt), Some(ss), Some(st)) =
                (primary_source, primary_target, secondary_source, secondary_target)
            {
                // Add both endpoints before running any basic-block
                // matching on either.
                let (source_id, source_inserted) =
                    context.add_fixed_point(ps, ss, step.name());
                let (target_id, target_inserted) = context.add_fixed_point(pt, st, step.name());
                if source_inserted {
                    find_fixed_points_basic_block(source_id, context, basic_block_steps);
                    find_call_reference_fixed_points(source_id, context, basic_block_steps);
                    update_fixed_point_scores(source_id, context);
                    discovered = true;
                }
                if target_inserted {
                    find_fixed_points_basic_block(target_id, context, basic_block_steps);
                    find_call_reference_fixed_points(target_id, context, basic_block_steps);
                    update_fixed_point_scores(target_id, context);
                    discovered = true;
                }
            }
        } else if count1 >= 1 && count2 >= 1 {
            if let Some(&next) = steps.front() {
                let collect = |context: &MatchingContext,
                               side: Side,
                               features: &[EdgeFeature]|
                 -> FlowGraphSet {
                    let call_graph = &context.binary(side).call_graph;
                    let mut set = FlowGraphSet::new();
                    for feature in features {
                        let edge = call_graph.edge(feature.edge);
                        for vertex in [edge.source, edge.target] {
                            if let Some(id) = call_graph.flow_graph_of(vertex) {
                                if !context.is_matched(side, id) {
                                    set.insert(id);
                                }
                            }
                        }
                    }
                    set
                };
                let candidates1 = collect(context, Side::Primary, &edges1[i..next_i]);
                let candidates2 = collect(context, Side::Secondary, &edges2[j..next_j]);
                if !candidates1.is_empty() && !candidates2.is_empty() {
                    discovered |= next.find_fixed_points(
                        primary_parent,
                        secondary_parent,
                        &candidates1,
                        &candidates2,
                        context,
                        steps,
                        basic_block_steps,
                    );
                    steps.push_front(next);
                }
            }
        }
        i = next_i;
        j = next_j;
    }
    discovered
}

/// Call-reference propagation: inside a fresh function fixed point, matched
/// basic blocks that issue the same number of calls pair those calls
/// position-wise; unmatched target pairs become new function fixed points,
/// recursively. The only place basic-block results feed back into
/// function-level matching.
pub fn find_call_reference_fixed_points(
    fixed_point: FixedPointId,
    context: &mut MatchingContext,
    basic_block_steps: &[&'static dyn BasicBlockStep],
) -> bool {
    let (primary, secondary) = {
        let pair = context.fixed_points.get(fixed_point);
        (pair.primary, pair.secondary)
    };
    let primary_features = context
        .flow_graph(Side::Primary, primary)
        .features(context.primary);
    let secondary_features = context
        .flow_graph(Side::Secondary, secondary)
        .features(context.secondary);

    let pairs: Vec<_> = context
        .fixed_points
        .get(fixed_point)
        .basic_block_fixed_points()
        .iter()
        .copied()
        .collect();

    let mut discovered = false;
    for pair in pairs {
        let calls1 = &primary_features.vertex_call_targets[pair.primary_vertex as usize];
        let calls2 = &secondary_features.vertex_call_targets[pair.secondary_vertex as usize];
        // Either side has no calls, or the call counts differ.
        if calls1.is_empty() || calls2.is_empty() || calls1.len() != calls2.len() {
            continue;
        }
        for (&target1, &target2) in calls1.iter().zip(calls2.iter()) {
            let Some(match1) = context.primary.flow_graph_index_by_address(target1) else {
                continue;
            };
            if context.fixed_point_by_primary(match1).is_some() {
                continue;
            }
            let Some(match2) = context.secondary.flow_graph_index_by_address(target2) else {
                continue;
            };
            let (id, inserted) =
                context.add_fixed_point(match1, match2, steps::FUNCTION_CALL_REFERENCE);
            if inserted {
                find_fixed_points_basic_block(id, context, basic_block_steps);
                find_call_reference_fixed_points(id, context, basic_block_steps);
                update_fixed_point_scores(id, context);
                discovered = true;
            }
        }
    }
    discovered
}

/// Builds a key -> candidates map over the valid candidates of one side.
/// Candidates yielding no key are skipped.
pub(crate) fn build_candidate_map<K: Ord + Copy>(
    context: &MatchingContext,
    side: Side,
    candidates: &FlowGraphSet,
    mut key_of: impl FnMut(&MatchingContext, FlowGraphId) -> Option<K>,
) -> FlowGraphMap<K> {
    let mut map: FlowGraphMap<K> = FlowGraphMap::new();
    for &id in candidates {
        if !is_valid_candidate(context, side, id) {
            continue;
        }
        if let Some(key) = key_of(context, id) {
            map.entry(key).or_default().push(id);
        }
    }
    map
}
