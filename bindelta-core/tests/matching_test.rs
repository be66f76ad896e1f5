//! End-to-end matching scenarios over synthetic binaries.

mod common;

use bindelta_core::binexport::format::{EdgeType, VertexType};
use bindelta_core::config::{steps, MatchingConfig};
use bindelta_core::matching::diff;
use bindelta_core::DiffError;
use common::sample_program;

#[test]
fn identical_binaries_match_every_function() {
    let primary = sample_program().build();
    let secondary = sample_program().build();
    let catalog = diff(&primary, &secondary, &MatchingConfig::default(), None).unwrap();

    assert_eq!(catalog.statistics.matched_functions, 4);
    assert!(catalog.unmatched_primary.is_empty());
    assert!(catalog.unmatched_secondary.is_empty());
    for function_match in &catalog.matches {
        assert_eq!(
            function_match.primary_address,
            function_match.secondary_address
        );
        assert!(
            function_match.similarity > 0.999,
            "identical functions must have full similarity, got {} for {:08X}",
            function_match.similarity,
            function_match.primary_address
        );
        assert!(function_match.confidence > 0.5);
        // Every basic block has a partner.
        assert!(!function_match.basic_block_matches.is_empty());
    }
}

#[test]
fn renamed_symbols_still_match_structurally() {
    let primary = sample_program().build();
    let mut renamed = sample_program();
    for function in 0..4 {
        renamed.rename(function, &format!("stripped_{function}"));
    }
    let secondary = renamed.build();
    let catalog = diff(&primary, &secondary, &MatchingConfig::default(), None).unwrap();

    assert_eq!(catalog.statistics.matched_functions, 4);
    for function_match in &catalog.matches {
        assert_eq!(
            function_match.primary_address,
            function_match.secondary_address
        );
        assert_ne!(
            function_match.step_name,
            steps::FUNCTION_NAME_HASH,
            "the name hash step cannot fire when every name changed"
        );
    }
}

#[test]
fn added_unreachable_block_stays_unmatched() {
    let primary = sample_program().build();
    let mut modified = sample_program();
    // alloc_buffer is function index 1 in the sample program.
    modified.block(1, 0x2100, &["nop"]);
    let secondary = modified.build();
    let catalog = diff(&primary, &secondary, &MatchingConfig::default(), None).unwrap();

    assert_eq!(catalog.statistics.matched_functions, 4);
    let alloc = catalog.match_by_primary(0x2000).expect("alloc_buffer matches");
    assert_eq!(alloc.secondary_address, 0x2000);
    // All three original blocks match; the unreachable one has no partner.
    assert_eq!(alloc.basic_block_matches.len(), 3);
    assert!(alloc
        .basic_block_matches
        .iter()
        .all(|pair| pair.secondary_address != 0x2100));
    assert!(alloc.similarity < 1.0);
}

#[test]
fn function_only_in_primary_stays_unmatched() {
    let mut extended = sample_program();
    let extra = extended.function(0x5000, "crc_table_init");
    let x0 = extended.block(extra, 0x5000, &["push", "shl"]);
    let x1 = extended.block(extra, 0x5020, &["shr", "or"]);
    let x2 = extended.block(extra, 0x5040, &["and", "not"]);
    let x3 = extended.block(extra, 0x5060, &["pop", "ret"]);
    extended.edge(extra, x0, x1, EdgeType::Unconditional);
    extended.edge(extra, x1, x2, EdgeType::Unconditional);
    extended.edge(extra, x2, x3, EdgeType::Unconditional);
    extended.set_kind(extra, VertexType::Library);

    let primary = extended.build();
    let secondary = sample_program().build();
    let catalog = diff(&primary, &secondary, &MatchingConfig::default(), None).unwrap();

    assert_eq!(catalog.statistics.matched_functions, 4);
    assert_eq!(catalog.unmatched_primary, vec![0x5000]);
    assert!(catalog.unmatched_secondary.is_empty());
    assert!(catalog.match_by_primary(0x5000).is_none());
}

#[test]
fn renamed_mnemonics_match_through_structure() {
    let primary = sample_program().build();
    let mut modified = sample_program();
    // parse_header is function index 2; rewrite the mnemonics of its block
    // p1 (block index 1) without touching the shape of the graph.
    modified.rename_mnemonic(2, 1, 0, "lea");
    modified.rename_mnemonic(2, 1, 1, "sbb");
    let secondary = modified.build();
    let catalog = diff(&primary, &secondary, &MatchingConfig::default(), None).unwrap();

    assert_eq!(catalog.statistics.matched_functions, 4);
    let parse = catalog.match_by_primary(0x3000).expect("parse_header matches");
    let renamed_block = parse
        .basic_block_matches
        .iter()
        .find(|pair| pair.primary_address == 0x3020)
        .expect("the renamed block still has a partner");
    assert_eq!(renamed_block.secondary_address, 0x3020);
    // Content-based evidence is gone; the match must come from structure.
    assert_ne!(renamed_block.step_name, steps::BASIC_BLOCK_HASH_4);
    assert_ne!(renamed_block.step_name, steps::BASIC_BLOCK_PRIME_4);
    assert_ne!(renamed_block.step_name, steps::BASIC_BLOCK_PRIME_0);
}

#[test]
fn matching_is_deterministic_across_runs() {
    let primary = sample_program().build();
    let secondary = sample_program().build();
    let config = MatchingConfig::default();
    let first = diff(&primary, &secondary, &config, None).unwrap();
    let second = diff(&primary, &secondary, &config, None).unwrap();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn cancellation_returns_partial_results() {
    let primary = sample_program().build();
    let secondary = sample_program().build();
    let cancel = || true;
    let catalog = diff(
        &primary,
        &secondary,
        &MatchingConfig::default(),
        Some(&cancel),
    )
    .unwrap();
    assert!(catalog.cancelled);
    assert!(catalog.matches.is_empty());
    assert_eq!(catalog.unmatched_primary.len(), 4);
}

#[test]
fn empty_pipeline_is_a_configuration_error() {
    let primary = sample_program().build();
    let secondary = sample_program().build();
    let config = MatchingConfig {
        function_matching: vec!["no such step".to_string()],
        ..MatchingConfig::default()
    };
    let error = diff(&primary, &secondary, &config, None).unwrap_err();
    assert!(matches!(error, DiffError::Config(_)));
}

#[test]
fn restricted_pipeline_still_matches_by_name() {
    let primary = sample_program().build();
    let secondary = sample_program().build();
    let config = MatchingConfig {
        function_matching: vec![steps::FUNCTION_NAME_HASH.to_string()],
        ..MatchingConfig::default()
    };
    let catalog = diff(&primary, &secondary, &config, None).unwrap();
    assert_eq!(catalog.statistics.matched_functions, 4);
    for function_match in &catalog.matches {
        assert!(
            function_match.step_name == steps::FUNCTION_NAME_HASH
                || function_match.step_name == steps::FUNCTION_CALL_REFERENCE
        );
    }
}
