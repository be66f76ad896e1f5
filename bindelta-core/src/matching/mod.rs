//! The matching driver.
//!
//! Runs the configured function pipeline over both binaries. Each pipeline
//! position is started with the full sets of still-unmatched functions and
//! the remaining steps as its drill-down tail; the whole pipeline repeats
//! until a complete pass discovers nothing new. Matching never fails
//! fatally: a step that finds nothing simply reports so, and a cancelled
//! run returns whatever fixed points it has accumulated.

pub mod basic_block;
pub mod context;
pub mod fixed_points;
pub mod function;
pub mod instructions;

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::config::MatchingConfig;
use crate::error::Result;
use crate::graph::{Address, Binary};
use crate::matching::basic_block::resolve_basic_block_steps;
use crate::matching::context::{MatchingContext, Side};
use crate::matching::fixed_points::{FixedPoint, FixedPointId};
use crate::matching::function::{resolve_function_steps, FlowGraphSet, FunctionSteps};

/// Orientation of level-based features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    TopDown,
    BottomUp,
}

/// One matched basic-block pair, reported by entry addresses.
#[derive(Debug, Clone, Serialize)]
pub struct BasicBlockMatch {
    pub primary_address: Address,
    pub secondary_address: Address,
    pub step_name: String,
}

/// One matched function pair.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionMatch {
    pub primary_address: Address,
    pub secondary_address: Address,
    pub primary_name: String,
    pub secondary_name: String,
    pub step_name: String,
    pub confidence: f64,
    pub similarity: f64,
    pub basic_block_matches: Vec<BasicBlockMatch>,
}

/// Aggregate counts over a whole diff.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffStatistics {
    pub primary_functions: usize,
    pub secondary_functions: usize,
    pub matched_functions: usize,
    pub matched_basic_blocks: usize,
    pub matched_instructions: u64,
    pub matched_edges: usize,
    pub similarity: f64,
    pub confidence: f64,
}

/// The result of a matching run.
#[derive(Debug, Clone, Serialize)]
pub struct MatchCatalog {
    pub matches: Vec<FunctionMatch>,
    pub unmatched_primary: Vec<Address>,
    pub unmatched_secondary: Vec<Address>,
    pub statistics: DiffStatistics,
    /// True when the run stopped at a cooperative cancellation poll; the
    /// catalog still contains everything found up to that point.
    pub cancelled: bool,
}

impl MatchCatalog {
    /// Looks up a match by primary function address.
    pub fn match_by_primary(&self, address: Address) -> Option<&FunctionMatch> {
        self.matches
            .iter()
            .find(|candidate| candidate.primary_address == address)
    }

    /// Looks up a match by secondary function address.
    pub fn match_by_secondary(&self, address: Address) -> Option<&FunctionMatch> {
        self.matches
            .iter()
            .find(|candidate| candidate.secondary_address == address)
    }
}

struct PairCounts {
    matched_blocks: usize,
    matched_instructions: u64,
    matched_edges: usize,
    block_fraction: f64,
    instruction_fraction: f64,
    edge_fraction: f64,
}

/// Per-mnemonic primes of the instructions of one vertex, in order.
fn vertex_instruction_primes(binary: &Binary, vertex_block: u32) -> Vec<u64> {
    binary.basic_blocks[vertex_block as usize]
        .instruction_indices()
        .map(|index| {
            binary.mnemonic_primes[binary.instructions[index as usize].mnemonic as usize]
        })
        .collect()
}

/// Matched-entity counts and fractions for one function fixed point.
/// Instructions are counted through an LCS alignment inside each matched
/// block pair, so a half-rewritten block contributes only what survived.
fn pair_counts(context: &MatchingContext, fixed_point: &FixedPoint) -> PairCounts {
    let primary_graph = context.flow_graph(Side::Primary, fixed_point.primary);
    let secondary_graph = context.flow_graph(Side::Secondary, fixed_point.secondary);
    let primary_features = primary_graph.features(context.primary);
    let secondary_features = secondary_graph.features(context.secondary);

    let matched_blocks = fixed_point.basic_block_fixed_point_count();
    let mut matched_instructions: u64 = 0;
    let mut partner: HashMap<u32, u32> = HashMap::new();
    for pair in fixed_point.basic_block_fixed_points() {
        let primary_primes = vertex_instruction_primes(
            context.primary,
            primary_graph.block_index(pair.primary_vertex),
        );
        let secondary_primes = vertex_instruction_primes(
            context.secondary,
            secondary_graph.block_index(pair.secondary_vertex),
        );
        matched_instructions +=
            instructions::compute_lcs(&primary_primes, &secondary_primes).len() as u64;
        partner.insert(pair.primary_vertex, pair.secondary_vertex);
    }

    let secondary_edges: HashSet<(u32, u32)> = (0..secondary_graph.edge_count() as u32)
        .map(|edge| secondary_graph.edge_endpoints(edge))
        .collect();
    let matched_edges = (0..primary_graph.edge_count() as u32)
        .filter(|&edge| {
            let (source, target) = primary_graph.edge_endpoints(edge);
            match (partner.get(&source), partner.get(&target)) {
                (Some(&s), Some(&t)) => secondary_edges.contains(&(s, t)),
                _ => false,
            }
        })
        .count();

    let total_blocks = primary_graph.vertex_count().max(secondary_graph.vertex_count());
    let total_instructions = primary_features
        .instruction_count
        .max(secondary_features.instruction_count) as u64;
    let total_edges = primary_graph.edge_count().max(secondary_graph.edge_count());
    PairCounts {
        matched_blocks,
        matched_instructions,
        matched_edges,
        block_fraction: if total_blocks == 0 {
            1.0
        } else {
            matched_blocks as f64 / total_blocks as f64
        },
        instruction_fraction: if total_instructions == 0 {
            1.0
        } else {
            matched_instructions as f64 / total_instructions as f64
        },
        edge_fraction: if total_edges == 0 {
            1.0
        } else {
            matched_edges as f64 / total_edges as f64
        },
    }
}

/// Recomputes a fixed point's confidence and similarity.
///
/// Confidence is the instruction-count-weighted combination of the
/// basic-block step confidences; a pair without any basic-block matches
/// keeps its function step's configured confidence. Similarity blends the
/// matched-edge, matched-instruction and matched-block fractions.
pub(crate) fn update_fixed_point_scores(id: FixedPointId, context: &mut MatchingContext) {
    let (confidence, similarity) = {
        let fixed_point = context.fixed_points.get(id);
        let primary_features = context
            .flow_graph(Side::Primary, fixed_point.primary)
            .features(context.primary);
        let secondary_features = context
            .flow_graph(Side::Secondary, fixed_point.secondary)
            .features(context.secondary);

        let mut weight_sum: f64 = 0.0;
        let mut weighted: f64 = 0.0;
        for pair in fixed_point.basic_block_fixed_points() {
            let step_confidence =
                context.step_confidence(fixed_point.basic_block_step_name(*pair));
            let weight = (primary_features.vertex_instruction_count[pair.primary_vertex as usize]
                + secondary_features.vertex_instruction_count[pair.secondary_vertex as usize])
                .max(1) as f64;
            weighted += weight * step_confidence;
            weight_sum += weight;
        }
        let confidence = if weight_sum > 0.0 {
            weighted / weight_sum
        } else {
            context.step_confidence(fixed_point.step_name)
        };

        let counts = pair_counts(context, fixed_point);
        let similarity = 0.35 * counts.edge_fraction
            + 0.30 * counts.instruction_fraction
            + 0.35 * counts.block_fraction;
        (confidence, similarity)
    };
    let fixed_point = context.fixed_points.get_mut(id);
    fixed_point.confidence = confidence;
    fixed_point.similarity = similarity;
}

fn unmatched_candidates(context: &MatchingContext, side: Side) -> FlowGraphSet {
    (0..context.binary(side).flow_graphs.len() as u32)
        .filter(|&id| !context.is_matched(side, id))
        .collect()
}

fn build_catalog(context: &MatchingContext, cancelled: bool) -> MatchCatalog {
    let mut matches: Vec<FunctionMatch> = Vec::new();
    let mut matched_basic_blocks: usize = 0;
    let mut matched_instructions: u64 = 0;
    let mut matched_edges: usize = 0;
    let mut similarity_sum: f64 = 0.0;
    let mut confidence_sum: f64 = 0.0;

    for (_, fixed_point) in context.fixed_points.iter() {
        let primary_graph = context.flow_graph(Side::Primary, fixed_point.primary);
        let secondary_graph = context.flow_graph(Side::Secondary, fixed_point.secondary);
        let counts = pair_counts(context, fixed_point);
        matched_basic_blocks += counts.matched_blocks;
        matched_instructions += counts.matched_instructions;
        matched_edges += counts.matched_edges;
        similarity_sum += fixed_point.similarity;
        confidence_sum += fixed_point.confidence;

        let basic_block_matches = fixed_point
            .basic_block_fixed_points()
            .iter()
            .map(|pair| BasicBlockMatch {
                primary_address: context.primary.basic_blocks
                    [primary_graph.block_index(pair.primary_vertex) as usize]
                    .entry_point,
                secondary_address: context.secondary.basic_blocks
                    [secondary_graph.block_index(pair.secondary_vertex) as usize]
                    .entry_point,
                step_name: fixed_point.basic_block_step_name(*pair).to_string(),
            })
            .collect();
        matches.push(FunctionMatch {
            primary_address: primary_graph.entry_point,
            secondary_address: secondary_graph.entry_point,
            primary_name: primary_graph.display_name(),
            secondary_name: secondary_graph.display_name(),
            step_name: fixed_point.step_name.to_string(),
            confidence: fixed_point.confidence,
            similarity: fixed_point.similarity,
            basic_block_matches,
        });
    }
    matches.sort_by_key(|candidate| (candidate.primary_address, candidate.secondary_address));

    let unmatched_primary: Vec<Address> = unmatched_candidates(context, Side::Primary)
        .into_iter()
        .map(|id| context.primary.flow_graphs[id as usize].entry_point)
        .collect();
    let unmatched_secondary: Vec<Address> = unmatched_candidates(context, Side::Secondary)
        .into_iter()
        .map(|id| context.secondary.flow_graphs[id as usize].entry_point)
        .collect();

    let matched_functions = matches.len();
    let statistics = DiffStatistics {
        primary_functions: context.primary.flow_graphs.len(),
        secondary_functions: context.secondary.flow_graphs.len(),
        matched_functions,
        matched_basic_blocks,
        matched_instructions,
        matched_edges,
        similarity: if matched_functions == 0 {
            0.0
        } else {
            similarity_sum / matched_functions as f64
        },
        confidence: if matched_functions == 0 {
            0.0
        } else {
            confidence_sum / matched_functions as f64
        },
    };
    MatchCatalog {
        matches,
        unmatched_primary,
        unmatched_secondary,
        statistics,
        cancelled,
    }
}

/// Runs the full two-level matching cascade.
///
/// Initialization fails on an unusable configuration; the run itself never
/// fails. The optional `cancel` callback is polled at step boundaries; a
/// run stopped through it returns the partial catalog with the `cancelled`
/// flag set.
pub fn diff(
    primary: &Binary,
    secondary: &Binary,
    config: &MatchingConfig,
    cancel: Option<&dyn Fn() -> bool>,
) -> Result<MatchCatalog> {
    let function_steps = resolve_function_steps(config)?;
    let basic_block_steps = resolve_basic_block_steps(config)?;
    log::info!(
        "matching {} against {} functions with {} function steps, {} basic block steps",
        primary.flow_graphs.len(),
        secondary.flow_graphs.len(),
        function_steps.len(),
        basic_block_steps.len()
    );

    let mut context = MatchingContext::new(primary, secondary, config, cancel);
    let mut cancelled = false;
    let mut round: u32 = 0;
    loop {
        round += 1;
        let mut discovered = false;
        for position in 0..function_steps.len() {
            if context.should_cancel() {
                cancelled = true;
                break;
            }
            let candidates1 = unmatched_candidates(&context, Side::Primary);
            let candidates2 = unmatched_candidates(&context, Side::Secondary);
            if candidates1.is_empty() || candidates2.is_empty() {
                break;
            }
            let step = function_steps[position];
            let mut remaining: FunctionSteps =
                function_steps[position..].iter().copied().collect();
            let found = step.find_fixed_points(
                None,
                None,
                &candidates1,
                &candidates2,
                &mut context,
                &mut remaining,
                &basic_block_steps,
            );
            if found {
                log::debug!("round {round}: step {:?} found new fixed points", step.name());
            }
            discovered |= found;
        }
        if cancelled || !discovered {
            break;
        }
    }

    let catalog = build_catalog(&context, cancelled);
    log::info!(
        "matched {} of {} primary functions ({} secondary), similarity {:.3}",
        catalog.statistics.matched_functions,
        catalog.statistics.primary_functions,
        catalog.statistics.secondary_functions,
        catalog.statistics.similarity
    );
    Ok(catalog)
}
