//! Matching pipeline configuration.
//!
//! A configuration is an ordered list of function-step names, an ordered
//! list of basic-block-step names and optional per-step confidence
//! overrides. Unknown step names are ignored with a warning so that a
//! config written for a newer engine still loads; an empty pipeline is an
//! initialization error, detected when the differ resolves the step lists.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Per-step options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOptions {
    /// Confidence in [0, 1]; values <= 0 mean "not configured" and fall
    /// back to the built-in default.
    #[serde(default = "StepOptions::unconfigured")]
    pub confidence: f64,
}

impl StepOptions {
    fn unconfigured() -> f64 {
        -1.0
    }
}

impl Default for StepOptions {
    fn default() -> Self {
        StepOptions {
            confidence: Self::unconfigured(),
        }
    }
}

/// The pipeline descriptor consumed by the differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Ordered function-matching step names.
    pub function_matching: Vec<String>,
    /// Ordered basic-block-matching step names.
    pub basic_block_matching: Vec<String>,
    /// Per-step options keyed by step name.
    pub step: HashMap<String, StepOptions>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        MatchingConfig {
            function_matching: default_function_steps().iter().map(|s| s.to_string()).collect(),
            basic_block_matching: default_basic_block_steps()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            step: HashMap::new(),
        }
    }
}

impl MatchingConfig {
    /// Loads a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Loads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path.as_ref())?)
    }

    /// The effective confidence for a step: the configured value when it is
    /// positive, the built-in default otherwise.
    pub fn confidence(&self, step_name: &str) -> f64 {
        if let Some(options) = self.step.get(step_name) {
            if options.confidence > 0.0 {
                return options.confidence.min(1.0);
            }
        }
        default_confidence(step_name)
    }
}

/// The default function pipeline, strongest evidence first.
pub fn default_function_steps() -> &'static [&'static str] {
    &[
        steps::FUNCTION_EDGES_FLOW_GRAPH_MD_INDEX,
        steps::FUNCTION_EDGES_CALL_GRAPH_MD_INDEX,
        steps::FUNCTION_EDGES_PROXIMITY_MD_INDEX,
        steps::FUNCTION_CALL_GRAPH_MD_INDEX_TOP_DOWN,
        steps::FUNCTION_CALL_GRAPH_MD_INDEX_BOTTOM_UP,
        steps::FUNCTION_FLOW_GRAPH_MD_INDEX_TOP_DOWN,
        steps::FUNCTION_FLOW_GRAPH_MD_INDEX_BOTTOM_UP,
        steps::FUNCTION_CALL_GRAPH_MD_INDEX_RELAXED,
        steps::FUNCTION_NAME_HASH,
        steps::FUNCTION_LOOP_COUNT,
        steps::FUNCTION_CALL_SEQUENCE_EXACT,
        steps::FUNCTION_CALL_SEQUENCE_TOPOLOGY,
        steps::FUNCTION_CALL_SEQUENCE_SEQUENCE,
        steps::FUNCTION_PRIME_SIGNATURE,
        steps::FUNCTION_HASH,
        steps::FUNCTION_STRING_REFERENCES,
        steps::FUNCTION_INSTRUCTION_COUNT,
        steps::FUNCTION_ADDRESS_SEQUENCE,
    ]
}

/// The default basic-block pipeline.
pub fn default_basic_block_steps() -> &'static [&'static str] {
    &[
        steps::BASIC_BLOCK_EDGES_MD_INDEX_TOP_DOWN,
        steps::BASIC_BLOCK_EDGES_MD_INDEX_BOTTOM_UP,
        steps::BASIC_BLOCK_EDGES_PRIME_PRODUCT,
        steps::BASIC_BLOCK_EDGES_LOOP,
        steps::BASIC_BLOCK_MD_INDEX_TOP_DOWN,
        steps::BASIC_BLOCK_MD_INDEX_BOTTOM_UP,
        steps::BASIC_BLOCK_HASH_4,
        steps::BASIC_BLOCK_PRIME_4,
        steps::BASIC_BLOCK_CALL_REFERENCES,
        steps::BASIC_BLOCK_STRING_REFERENCES,
        steps::BASIC_BLOCK_MD_INDEX_RELAXED,
        steps::BASIC_BLOCK_PRIME_0,
        steps::BASIC_BLOCK_LOOP_ENTRY,
        steps::BASIC_BLOCK_SELF_LOOPS,
        steps::BASIC_BLOCK_ENTRY_NODES,
        steps::BASIC_BLOCK_EXIT_NODES,
        steps::BASIC_BLOCK_INSTRUCTION_COUNT,
        steps::BASIC_BLOCK_JUMP_SEQUENCE,
    ]
}

/// Canonical step names. These are the configuration vocabulary and the
/// step names recorded on fixed points.
pub mod steps {
    pub const FUNCTION_EDGES_FLOW_GRAPH_MD_INDEX: &str = "function: edges flow graph MD index";
    pub const FUNCTION_EDGES_CALL_GRAPH_MD_INDEX: &str = "function: edges call graph MD index";
    pub const FUNCTION_EDGES_PROXIMITY_MD_INDEX: &str = "function: edges proximity MD index";
    pub const FUNCTION_CALL_GRAPH_MD_INDEX_TOP_DOWN: &str =
        "function: call graph MD index (top down)";
    pub const FUNCTION_CALL_GRAPH_MD_INDEX_BOTTOM_UP: &str =
        "function: call graph MD index (bottom up)";
    pub const FUNCTION_FLOW_GRAPH_MD_INDEX_TOP_DOWN: &str =
        "function: flow graph MD index (top down)";
    pub const FUNCTION_FLOW_GRAPH_MD_INDEX_BOTTOM_UP: &str =
        "function: flow graph MD index (bottom up)";
    pub const FUNCTION_CALL_GRAPH_MD_INDEX_RELAXED: &str =
        "function: call graph MD index (relaxed)";
    pub const FUNCTION_NAME_HASH: &str = "function: name hash matching";
    pub const FUNCTION_LOOP_COUNT: &str = "function: loop count matching";
    pub const FUNCTION_CALL_SEQUENCE_EXACT: &str = "function: call sequence matching (exact)";
    pub const FUNCTION_CALL_SEQUENCE_TOPOLOGY: &str =
        "function: call sequence matching (topology)";
    pub const FUNCTION_CALL_SEQUENCE_SEQUENCE: &str =
        "function: call sequence matching (sequence)";
    pub const FUNCTION_PRIME_SIGNATURE: &str = "function: prime signature matching";
    pub const FUNCTION_HASH: &str = "function: hash matching";
    pub const FUNCTION_STRING_REFERENCES: &str = "function: string references";
    pub const FUNCTION_INSTRUCTION_COUNT: &str = "function: instruction count";
    pub const FUNCTION_ADDRESS_SEQUENCE: &str = "function: address sequence";
    /// Propagation step name; not part of the configurable pipeline.
    pub const FUNCTION_CALL_REFERENCE: &str = "function: call reference matching";

    pub const BASIC_BLOCK_EDGES_MD_INDEX_TOP_DOWN: &str =
        "basic block: edges MD index (top down)";
    pub const BASIC_BLOCK_EDGES_MD_INDEX_BOTTOM_UP: &str =
        "basic block: edges MD index (bottom up)";
    pub const BASIC_BLOCK_EDGES_PRIME_PRODUCT: &str = "basic block: edges prime product";
    pub const BASIC_BLOCK_EDGES_LOOP: &str = "basic block: edges Lengauer-Tarjan dominated";
    pub const BASIC_BLOCK_MD_INDEX_TOP_DOWN: &str = "basic block: MD index (top down)";
    pub const BASIC_BLOCK_MD_INDEX_BOTTOM_UP: &str = "basic block: MD index (bottom up)";
    pub const BASIC_BLOCK_HASH_4: &str = "basic block: hash matching (4 instructions minimum)";
    pub const BASIC_BLOCK_PRIME_4: &str = "basic block: prime matching (4 instructions minimum)";
    pub const BASIC_BLOCK_PRIME_0: &str = "basic block: prime matching (0 instructions minimum)";
    pub const BASIC_BLOCK_CALL_REFERENCES: &str = "basic block: call reference matching";
    pub const BASIC_BLOCK_STRING_REFERENCES: &str = "basic block: string references";
    pub const BASIC_BLOCK_MD_INDEX_RELAXED: &str = "basic block: MD index (relaxed)";
    pub const BASIC_BLOCK_LOOP_ENTRY: &str = "basic block: loop entry matching";
    pub const BASIC_BLOCK_SELF_LOOPS: &str = "basic block: self loop matching";
    pub const BASIC_BLOCK_ENTRY_NODES: &str = "basic block: entry point matching";
    pub const BASIC_BLOCK_EXIT_NODES: &str = "basic block: exit point matching";
    pub const BASIC_BLOCK_INSTRUCTION_COUNT: &str = "basic block: instruction count matching";
    pub const BASIC_BLOCK_JUMP_SEQUENCE: &str = "basic block: jump sequence matching";
    /// Last-resort propagation along unique edges; not configurable.
    pub const BASIC_BLOCK_PROPAGATION: &str = "basic block: propagation (size 1)";
}

/// Built-in confidence per step, used when the config does not override it.
pub fn default_confidence(step_name: &str) -> f64 {
    use steps::*;
    match step_name {
        FUNCTION_EDGES_FLOW_GRAPH_MD_INDEX => 0.95,
        FUNCTION_EDGES_CALL_GRAPH_MD_INDEX => 0.9,
        FUNCTION_EDGES_PROXIMITY_MD_INDEX => 0.6,
        FUNCTION_CALL_GRAPH_MD_INDEX_TOP_DOWN => 0.8,
        FUNCTION_CALL_GRAPH_MD_INDEX_BOTTOM_UP => 0.8,
        FUNCTION_FLOW_GRAPH_MD_INDEX_TOP_DOWN => 0.85,
        FUNCTION_FLOW_GRAPH_MD_INDEX_BOTTOM_UP => 0.85,
        FUNCTION_CALL_GRAPH_MD_INDEX_RELAXED => 0.7,
        FUNCTION_NAME_HASH => 0.98,
        FUNCTION_LOOP_COUNT => 0.25,
        FUNCTION_CALL_SEQUENCE_EXACT => 0.8,
        FUNCTION_CALL_SEQUENCE_TOPOLOGY => 0.6,
        FUNCTION_CALL_SEQUENCE_SEQUENCE => 0.4,
        FUNCTION_PRIME_SIGNATURE => 0.9,
        FUNCTION_HASH => 1.0,
        FUNCTION_STRING_REFERENCES => 0.75,
        FUNCTION_INSTRUCTION_COUNT => 0.2,
        FUNCTION_ADDRESS_SEQUENCE => 0.1,
        FUNCTION_CALL_REFERENCE => 0.75,
        BASIC_BLOCK_EDGES_MD_INDEX_TOP_DOWN => 0.9,
        BASIC_BLOCK_EDGES_MD_INDEX_BOTTOM_UP => 0.9,
        BASIC_BLOCK_EDGES_PRIME_PRODUCT => 0.85,
        BASIC_BLOCK_EDGES_LOOP => 0.3,
        BASIC_BLOCK_MD_INDEX_TOP_DOWN => 0.8,
        BASIC_BLOCK_MD_INDEX_BOTTOM_UP => 0.8,
        BASIC_BLOCK_HASH_4 => 1.0,
        BASIC_BLOCK_PRIME_4 => 0.9,
        BASIC_BLOCK_PRIME_0 => 0.5,
        BASIC_BLOCK_CALL_REFERENCES => 0.8,
        BASIC_BLOCK_STRING_REFERENCES => 0.7,
        BASIC_BLOCK_MD_INDEX_RELAXED => 0.45,
        BASIC_BLOCK_LOOP_ENTRY => 0.4,
        BASIC_BLOCK_SELF_LOOPS => 0.3,
        BASIC_BLOCK_ENTRY_NODES => 0.5,
        BASIC_BLOCK_EXIT_NODES => 0.5,
        BASIC_BLOCK_INSTRUCTION_COUNT => 0.15,
        BASIC_BLOCK_JUMP_SEQUENCE => 0.1,
        BASIC_BLOCK_PROPAGATION => 0.05,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_lists_every_registered_step() {
        let config = MatchingConfig::default();
        assert_eq!(config.function_matching.len(), 18);
        assert_eq!(config.basic_block_matching.len(), 18);
    }

    #[test]
    fn configured_confidence_overrides_the_default() {
        let config = MatchingConfig::from_json(
            r#"{
                "function_matching": ["function: name hash matching"],
                "step": {"function: name hash matching": {"confidence": 0.5}}
            }"#,
        )
        .unwrap();
        assert_eq!(config.confidence(steps::FUNCTION_NAME_HASH), 0.5);
    }

    #[test]
    fn non_positive_confidence_means_not_configured() {
        let config = MatchingConfig::from_json(
            r#"{"step": {"function: hash matching": {"confidence": -1.0}}}"#,
        )
        .unwrap();
        assert_eq!(config.confidence(steps::FUNCTION_HASH), 1.0);
    }
}
