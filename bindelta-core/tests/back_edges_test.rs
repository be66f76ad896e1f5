//! Back-edge determination and edge ordering guarantees.

mod common;

use bindelta_core::binexport::format::EdgeType;
use common::TestBinary;

/// One function with an outer loop and a self loop:
/// B0 -> B1 -> B2, B2 -> B1 (outer back edge), B2 -> B2 (self), B2 -> B3.
fn looping_binary() -> TestBinary {
    let mut binary = TestBinary::new();
    let function = binary.function(0x1000, "spin");
    let b0 = binary.block(function, 0x1000, &["push", "mov"]);
    let b1 = binary.block(function, 0x1020, &["cmp", "jz"]);
    let b2 = binary.block(function, 0x1040, &["add", "dec", "jnz"]);
    let b3 = binary.block(function, 0x1060, &["pop", "ret"]);
    binary.edge(function, b0, b1, EdgeType::Unconditional);
    binary.edge(function, b1, b2, EdgeType::Unconditional);
    binary.edge(function, b2, b1, EdgeType::ConditionTrue);
    binary.edge(function, b2, b2, EdgeType::Switch);
    binary.edge(function, b2, b3, EdgeType::ConditionFalse);
    binary
}

#[test]
fn loop_with_self_edge_has_exactly_two_back_edges() {
    let binary = looping_binary().build();
    let flow_graph = binary.function_by_address(0x1000).unwrap();
    let back_edges = binary.back_edges(flow_graph);

    assert_eq!(back_edges.len(), 2);
    // Sorted by (source, target): the outer loop edge targets 0x1020, the
    // self edge targets its own block. Both originate at B2's last
    // instruction.
    assert_eq!(back_edges[0].source, back_edges[1].source);
    assert_eq!(back_edges[0].target, 0x1020);
    assert_eq!(back_edges[1].target, 0x1040);

    // Re-running yields the same set.
    assert_eq!(binary.back_edges(flow_graph), back_edges);
}

#[test]
fn back_edges_iterate_in_lock_step_with_edges() {
    let binary = looping_binary().build();
    let flow_graph = binary.function_by_address(0x1000).unwrap();
    let back_edges = binary.back_edges(flow_graph);

    // The back-edge list is a subsequence of the edge list in identical
    // order, so both can be walked together without lookups.
    let mut walker = back_edges.iter().peekable();
    for edge in flow_graph.edges() {
        if walker.peek() == Some(&edge) {
            walker.next();
        }
    }
    assert!(walker.peek().is_none());

    let features = flow_graph.features(&binary);
    assert_eq!(features.loop_count, 2);
    // The loop entry flags mark the targets of back edges: B1 and B2.
    let entries: Vec<usize> = features.loop_entry.iter_ones().collect();
    assert_eq!(entries, vec![1, 2]);
}

#[test]
fn lookups_resolve_blocks_by_address() {
    let binary = looping_binary().build();
    assert!(binary.function_by_address(0x1000).is_some());
    assert!(binary.function_by_address(0x1001).is_none());

    let by_entry = binary.basic_block_by_address(0x1040).unwrap();
    assert_eq!(binary.basic_blocks[by_entry as usize].entry_point, 0x1040);
    assert!(binary.basic_block_by_address(0x1041).is_none());

    // 0x1043 is the middle instruction of B2 ("dec").
    let containing = binary.basic_block_containing(0x1043).unwrap();
    assert_eq!(binary.basic_blocks[containing as usize].entry_point, 0x1040);
    assert!(binary.basic_block_containing(0x9000).is_none());
}
