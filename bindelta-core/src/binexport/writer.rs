//! Serializes a loaded binary back into the exchange format.
//!
//! The writer re-derives the deduplicated tables and applies every
//! default-value elision rule, so a freshly read file writes back
//! byte-identically apart from the documented ephemeral fields.

use std::collections::HashMap;
use std::path::Path;

use crate::binexport::format::{
    BasicBlockEntry, BinExport, CallGraphEdgeEntry, CallGraphEntry, CallGraphVertexEntry,
    CommentEntry, DataReferenceEntry, EdgeType, ExpressionEntry, ExpressionType, FlowGraphEdgeEntry,
    FlowGraphEntry, IndexRange, LibraryEntry, Meta, MnemonicEntry, ModuleEntry, OperandEntry,
    StringReferenceEntry, VertexType,
};
use crate::error::Result;
use crate::graph::{Binary, EdgeKind, ExpressionKind, FunctionKind};
use crate::hash::hex_encode;

impl From<ExpressionKind> for ExpressionType {
    fn from(value: ExpressionKind) -> Self {
        match value {
            ExpressionKind::Symbol => ExpressionType::Symbol,
            ExpressionKind::ImmediateInt => ExpressionType::ImmediateInt,
            ExpressionKind::ImmediateFloat => ExpressionType::ImmediateFloat,
            ExpressionKind::Operator => ExpressionType::Operator,
            ExpressionKind::Register => ExpressionType::Register,
            ExpressionKind::SizePrefix => ExpressionType::SizePrefix,
            ExpressionKind::Dereference => ExpressionType::Dereference,
        }
    }
}

impl From<EdgeKind> for EdgeType {
    fn from(value: EdgeKind) -> Self {
        match value {
            EdgeKind::True => EdgeType::ConditionTrue,
            EdgeKind::False => EdgeType::ConditionFalse,
            EdgeKind::Unconditional => EdgeType::Unconditional,
            EdgeKind::Switch => EdgeType::Switch,
        }
    }
}

impl From<FunctionKind> for VertexType {
    fn from(value: FunctionKind) -> Self {
        match value {
            FunctionKind::Standard | FunctionKind::None => VertexType::Normal,
            FunctionKind::Library => VertexType::Library,
            FunctionKind::Imported => VertexType::Imported,
            FunctionKind::Thunk => VertexType::Thunk,
            FunctionKind::Invalid => VertexType::Invalid,
        }
    }
}

/// Replaces every byte outside printable ASCII and space with a space.
/// Regular string-table entries carry this normal form.
pub fn sanitize_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&byte| {
            if (0x20..=0x7E).contains(&byte) {
                byte as char
            } else {
                ' '
            }
        })
        .collect()
}

/// Transcodes a little-endian UTF-16 byte string to UTF-8. Trailing odd
/// bytes are ignored; unpaired surrogates become replacement characters.
pub fn transcode_utf16(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Converts a binary back into the exchange structure.
pub fn write_binary(binary: &Binary) -> BinExport {
    // Mnemonic table: histogram over valid instructions, sorted by
    // descending occurrence count, ties broken lexicographically. The most
    // common mnemonic ends up at index 0, the elided default.
    let mut histogram: HashMap<u32, u64> = HashMap::new();
    for instruction in &binary.instructions {
        if !instruction.is_invalid() {
            *histogram.entry(instruction.mnemonic).or_insert(0) += 1;
        }
    }
    let mut by_frequency: Vec<(u32, u64)> = histogram.into_iter().collect();
    by_frequency.sort_by(|(index_a, count_a), (index_b, count_b)| {
        count_b
            .cmp(count_a)
            .then_with(|| binary.mnemonics[*index_a as usize].cmp(&binary.mnemonics[*index_b as usize]))
    });
    let mut mnemonic_remap: HashMap<u32, u32> = HashMap::new();
    let mut mnemonic_table: Vec<MnemonicEntry> = Vec::with_capacity(by_frequency.len());
    for (new_index, (old_index, _)) in by_frequency.iter().enumerate() {
        mnemonic_remap.insert(*old_index, new_index as u32);
        mnemonic_table.push(MnemonicEntry {
            name: binary.mnemonics[*old_index as usize].clone(),
        });
    }

    let expression: Vec<ExpressionEntry> = binary
        .expressions
        .iter()
        .map(|node| ExpressionEntry {
            expression_type: node.kind.into(),
            symbol: node.symbol.clone(),
            immediate: node.immediate,
            parent_index: node.parent,
            position: node.position as u32,
            is_relocation: node.is_relocation,
        })
        .collect();
    let operand: Vec<OperandEntry> = binary
        .operands
        .iter()
        .map(|expressions| OperandEntry {
            expression_index: expressions.to_vec(),
        })
        .collect();

    let mut instruction_entries = Vec::with_capacity(binary.instructions.len());
    let mut previous: Option<&crate::graph::Instruction> = None;
    for current in &binary.instructions {
        // The full address is written unless the previous instruction flows
        // contiguously into this one and this is not a function entry.
        let elide_address = match previous {
            Some(prev) => {
                prev.is_flow()
                    && prev.end_address() == current.address
                    && binary.function_by_address(current.address).is_none()
            }
            None => false,
        };
        instruction_entries.push(crate::binexport::format::InstructionEntry {
            address: if elide_address {
                None
            } else {
                Some(current.address)
            },
            raw_bytes: hex_encode(&current.bytes),
            mnemonic_index: mnemonic_remap.get(&current.mnemonic).copied().unwrap_or(0),
            operand_index: current.operands.to_vec(),
            call_target: current.call_targets.to_vec(),
            comment_index: current.comments.to_vec(),
        });
        previous = Some(current);
    }

    let basic_block: Vec<BasicBlockEntry> = binary
        .basic_blocks
        .iter()
        .map(|block| BasicBlockEntry {
            instruction_index: block
                .ranges
                .iter()
                .map(|range| IndexRange {
                    begin_index: range.begin,
                    end_index: if range.len() == 1 {
                        None
                    } else {
                        Some(range.end)
                    },
                })
                .collect(),
        })
        .collect();

    let flow_graph: Vec<FlowGraphEntry> = binary
        .flow_graphs
        .iter()
        .map(|graph| {
            let features = graph.features(binary);
            FlowGraphEntry {
                basic_block_index: graph.block_indices.clone(),
                entry_basic_block_index: graph.block_index(graph.entry_vertex()),
                edge: graph
                    .edges()
                    .iter()
                    .enumerate()
                    .map(|(index, edge)| {
                        let (source, target) = graph.edge_endpoints(index as u32);
                        FlowGraphEdgeEntry {
                            source_basic_block_index: graph.block_index(source),
                            target_basic_block_index: graph.block_index(target),
                            edge_type: edge.kind.into(),
                            is_back_edge: features.back_edge[index],
                        }
                    })
                    .collect(),
            }
        })
        .collect();

    let call_graph = CallGraphEntry {
        vertex: binary
            .call_graph
            .vertices()
            .iter()
            .map(|vertex| CallGraphVertexEntry {
                address: vertex.address,
                vertex_type: vertex.kind.into(),
                mangled_name: vertex.name.clone(),
                demangled_name: vertex.demangled_name.clone(),
                library_index: vertex.library_index,
                module_index: vertex.module_index,
            })
            .collect(),
        edge: binary
            .call_graph
            .edges()
            .iter()
            .map(|edge| CallGraphEdgeEntry {
                source_vertex_index: edge.source,
                target_vertex_index: edge.target,
                call_site: edge.call_site,
            })
            .collect(),
    };

    BinExport {
        meta: Meta {
            executable_id: binary.executable_id.clone(),
            executable_name: binary.executable_name.clone(),
            architecture: binary.architecture.clone(),
            timestamp: binary.timestamp,
        },
        mnemonic: mnemonic_table,
        expression,
        operand,
        instruction: instruction_entries,
        basic_block,
        flow_graph,
        call_graph,
        library: binary
            .call_graph
            .libraries
            .iter()
            .map(|library| LibraryEntry {
                name: library.name.clone(),
                is_static: library.is_static,
            })
            .collect(),
        module: binary
            .call_graph
            .modules
            .iter()
            .map(|name| ModuleEntry { name: name.clone() })
            .collect(),
        string_table: binary.strings.clone(),
        string_reference: binary
            .string_refs
            .iter()
            .map(|reference| StringReferenceEntry {
                instruction_index: reference.instruction,
                instruction_operand_index: reference.operand,
                operand_expression_index: reference.expression,
                string_table_index: reference.string,
            })
            .collect(),
        data_reference: binary
            .data_refs
            .iter()
            .map(|reference| DataReferenceEntry {
                instruction_index: reference.instruction,
                address: reference.address,
            })
            .collect(),
        comment: binary
            .comments
            .iter()
            .map(|comment| CommentEntry {
                instruction_index: comment.instruction,
                instruction_operand_index: comment.operand,
                string_table_index: comment.string,
                repeatable: comment.repeatable,
            })
            .collect(),
    }
}

/// Serializes a binary to a file as pretty-printed JSON.
pub fn write_binary_to_file(binary: &Binary, path: impl AsRef<Path>) -> Result<()> {
    let export = write_binary(binary);
    let file = std::fs::File::create(path.as_ref())?;
    serde_json::to_writer(std::io::BufWriter::new(file), &export)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_non_printable_bytes() {
        assert_eq!(sanitize_string(b"abc"), "abc");
        assert_eq!(sanitize_string(b"a\x00b\xFFc"), "a b c");
        assert_eq!(sanitize_string(b"tab\there"), "tab here");
    }

    #[test]
    fn utf16_transcoding() {
        let wide: Vec<u8> = "edge".encode_utf16().flat_map(u16::to_le_bytes).collect();
        assert_eq!(transcode_utf16(&wide), "edge");
        assert_eq!(transcode_utf16(&[0x41, 0x00, 0x42]), "A");
    }
}
