//! Exchange-format round-trip and elision behavior.

mod common;

use bindelta_core::binexport::format::{BinExport, InstructionEntry, Meta, MnemonicEntry};
use bindelta_core::binexport::{equivalent, read_binary, write_binary, write_binary_to_file};
use bindelta_core::binexport::read_binary_from_file;
use common::sample_program;

#[test]
fn read_write_round_trip_is_equivalent() {
    let export = sample_program().export();
    let binary = read_binary(export.clone()).unwrap();
    let written = write_binary(&binary);
    assert!(equivalent(&export, &written).unwrap());
}

#[test]
fn rewriting_a_written_form_is_byte_identical() {
    let export = sample_program().export();
    let first = write_binary(&read_binary(export).unwrap());
    let second = write_binary(&read_binary(first.clone()).unwrap());
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn file_round_trip_through_disk() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("fixture.BinDelta");
    let binary = sample_program().build();
    write_binary_to_file(&binary, &path).unwrap();
    let reloaded = read_binary_from_file(&path).unwrap();
    assert_eq!(binary.flow_graphs.len(), reloaded.flow_graphs.len());
    assert_eq!(binary.instructions.len(), reloaded.instructions.len());
    assert_eq!(
        serde_json::to_string(&write_binary(&binary)).unwrap(),
        serde_json::to_string(&write_binary(&reloaded)).unwrap()
    );
}

#[test]
fn default_values_are_elided_on_the_wire() {
    let binary = sample_program().build();
    let text = serde_json::to_string(&write_binary(&binary)).unwrap();
    // The most frequent mnemonic has index 0, which is never written.
    assert!(!text.contains("\"mnemonic_index\":0"));
    // Unconditional is the default edge type.
    assert!(!text.contains("unconditional"));
    // No operands in the fixture, so no operand lists on the wire.
    assert!(!text.contains("operand_index"));
}

#[test]
fn elided_instruction_addresses_are_reconstructed() {
    // Two contiguous two-byte instructions; the second address is elided.
    let export = BinExport {
        meta: Meta::default(),
        mnemonic: vec![
            MnemonicEntry {
                name: "mov".to_string(),
            },
            MnemonicEntry {
                name: "ret".to_string(),
            },
        ],
        instruction: vec![
            InstructionEntry {
                address: Some(0x1000),
                raw_bytes: "89C8".to_string(),
                mnemonic_index: 0,
                ..InstructionEntry::default()
            },
            InstructionEntry {
                address: None,
                raw_bytes: "C351".to_string(),
                mnemonic_index: 1,
                ..InstructionEntry::default()
            },
        ],
        ..BinExport::default()
    };
    let binary = read_binary(export).unwrap();
    assert_eq!(binary.instructions[1].address, 0x1002);
    assert!(binary.instructions[0].is_flow());

    // Writing elides the second address again.
    let written = write_binary(&binary);
    assert_eq!(written.instruction[0].address, Some(0x1000));
    assert_eq!(written.instruction[1].address, None);
}

#[test]
fn malformed_inputs_are_rejected_eagerly() {
    // An instruction referencing a mnemonic past the table plus a dangling
    // call-graph edge: both problems must be reported in one error.
    let export = BinExport {
        mnemonic: vec![MnemonicEntry {
            name: "mov".to_string(),
        }],
        instruction: vec![InstructionEntry {
            address: Some(0x1000),
            raw_bytes: "90".to_string(),
            mnemonic_index: 7,
            ..InstructionEntry::default()
        }],
        call_graph: bindelta_core::binexport::format::CallGraphEntry {
            vertex: vec![],
            edge: vec![bindelta_core::binexport::format::CallGraphEdgeEntry {
                source_vertex_index: 3,
                target_vertex_index: 4,
                call_site: 0,
            }],
        },
        ..BinExport::default()
    };
    let error = read_binary(export).unwrap_err();
    let message = error.to_string();
    assert!(message.contains("mnemonic 7"));
    assert!(message.contains("call graph edge 0"));
}

#[test]
fn render_is_stable_and_address_first() {
    let binary = sample_program().build();
    let mut first = Vec::new();
    binary.render(&mut first).unwrap();
    let mut second = Vec::new();
    binary.render(&mut second).unwrap();
    assert_eq!(first, second);

    let text = String::from_utf8(first).unwrap();
    assert!(text.contains("00001000    main"));
    assert!(text.contains("00004000    fail_fast"));
    assert!(text.contains("00002030 add"));
    // Edge sources are the branch instruction, i.e. the last address of the
    // source block; the self loop of alloc_buffer's middle block reads:
    assert!(text.contains("00002039 -> 00002030 true"));
    assert!(text.contains("00002039 -> 00002060 false"));
    assert!(text.contains("---------------------------"));
}
