//! Loads an exchange file into the in-memory model.
//!
//! Validation is eager: all structural problems of the input are collected
//! first and reported together, and a load aborts on any of them. After
//! validation the reader reconstructs elided instruction addresses,
//! re-interns expressions and operands into per-load pools and finalizes
//! the flow graphs.

use std::path::Path;

use smallvec::SmallVec;

use crate::binexport::format::{
    BinExport, EdgeType, ExpressionType, VertexType,
};
use crate::error::{DiffError, Result};
use crate::graph::{
    Address, BasicBlock, Binary, CallGraph, CallGraphEdge, CallGraphVertex, Comment,
    DataReference, EdgeKind, Expression, ExpressionKind, ExpressionPool, FlowEdge, FlowGraph,
    FunctionKind, Instruction, InstructionRange, LibraryRecord, OperandPool, StringReference,
};
use crate::graph::instruction::FLAG_FLOW;
use crate::hash::hex_decode;

impl From<ExpressionType> for ExpressionKind {
    fn from(value: ExpressionType) -> Self {
        match value {
            ExpressionType::Symbol => ExpressionKind::Symbol,
            ExpressionType::ImmediateInt => ExpressionKind::ImmediateInt,
            ExpressionType::ImmediateFloat => ExpressionKind::ImmediateFloat,
            ExpressionType::Operator => ExpressionKind::Operator,
            ExpressionType::Register => ExpressionKind::Register,
            ExpressionType::SizePrefix => ExpressionKind::SizePrefix,
            ExpressionType::Dereference => ExpressionKind::Dereference,
        }
    }
}

impl From<EdgeType> for EdgeKind {
    fn from(value: EdgeType) -> Self {
        match value {
            EdgeType::ConditionTrue => EdgeKind::True,
            EdgeType::ConditionFalse => EdgeKind::False,
            EdgeType::Unconditional => EdgeKind::Unconditional,
            EdgeType::Switch => EdgeKind::Switch,
        }
    }
}

impl From<VertexType> for FunctionKind {
    fn from(value: VertexType) -> Self {
        match value {
            VertexType::Normal => FunctionKind::Standard,
            VertexType::Library => FunctionKind::Library,
            VertexType::Imported => FunctionKind::Imported,
            VertexType::Thunk => FunctionKind::Thunk,
            VertexType::Invalid => FunctionKind::Invalid,
        }
    }
}

/// Collects every structural problem of the serialized form.
fn validate(export: &BinExport, errors: &mut Vec<String>) {
    let expression_count = export.expression.len() as u32;
    let operand_count = export.operand.len() as u32;
    let instruction_count = export.instruction.len() as u32;
    let block_count = export.basic_block.len() as u32;
    let vertex_count = export.call_graph.vertex.len() as u32;
    let string_count = export.string_table.len() as u32;
    let comment_count = export.comment.len() as u32;

    for (index, expression) in export.expression.iter().enumerate() {
        if let Some(parent) = expression.parent_index {
            if parent >= index as u32 {
                errors.push(format!(
                    "expression {index} references parent {parent} that does not precede it"
                ));
            }
        }
    }
    for (index, operand) in export.operand.iter().enumerate() {
        for &expression in &operand.expression_index {
            if expression >= expression_count {
                errors.push(format!(
                    "operand {index} references expression {expression} out of range"
                ));
            }
        }
    }
    for (index, instruction) in export.instruction.iter().enumerate() {
        if !export.mnemonic.is_empty() && instruction.mnemonic_index >= export.mnemonic.len() as u32
        {
            errors.push(format!(
                "instruction {index} references mnemonic {} out of range",
                instruction.mnemonic_index
            ));
        }
        if export.mnemonic.is_empty() {
            errors.push(format!(
                "instruction {index} present but the mnemonic table is empty"
            ));
        }
        for &operand in &instruction.operand_index {
            if operand >= operand_count {
                errors.push(format!(
                    "instruction {index} references operand {operand} out of range"
                ));
            }
        }
        for &comment in &instruction.comment_index {
            if comment >= comment_count {
                errors.push(format!(
                    "instruction {index} references comment {comment} out of range"
                ));
            }
        }
    }
    for (index, block) in export.basic_block.iter().enumerate() {
        if block.instruction_index.is_empty() {
            errors.push(format!("basic block {index} has no instruction ranges"));
        }
        for range in &block.instruction_index {
            let end = range.end_index.unwrap_or(range.begin_index + 1);
            if range.begin_index >= end {
                errors.push(format!("basic block {index} has an empty or inverted range"));
            }
            if end > instruction_count {
                errors.push(format!(
                    "basic block {index} range ends at {end}, past the instruction table"
                ));
            }
        }
    }
    for (index, flow_graph) in export.flow_graph.iter().enumerate() {
        if flow_graph.basic_block_index.is_empty() {
            errors.push(format!("flow graph {index} has no basic blocks"));
        }
        for &block in &flow_graph.basic_block_index {
            if block >= block_count {
                errors.push(format!(
                    "flow graph {index} references basic block {block} out of range"
                ));
            }
        }
        if !flow_graph
            .basic_block_index
            .contains(&flow_graph.entry_basic_block_index)
        {
            errors.push(format!(
                "flow graph {index} entry block {} is not one of its blocks",
                flow_graph.entry_basic_block_index
            ));
        }
        for (edge_index, edge) in flow_graph.edge.iter().enumerate() {
            for endpoint in [edge.source_basic_block_index, edge.target_basic_block_index] {
                if endpoint >= block_count {
                    errors.push(format!(
                        "flow graph {index} edge {edge_index} endpoint {endpoint} out of range"
                    ));
                }
            }
        }
    }
    for (index, edge) in export.call_graph.edge.iter().enumerate() {
        for endpoint in [edge.source_vertex_index, edge.target_vertex_index] {
            if endpoint >= vertex_count {
                errors.push(format!(
                    "call graph edge {index} endpoint {endpoint} is not in the vertex table"
                ));
            }
        }
    }
    if !export
        .call_graph
        .vertex
        .windows(2)
        .all(|pair| pair[0].address < pair[1].address)
    {
        errors.push("call graph vertices are not strictly sorted by address".to_string());
    }
    for (index, reference) in export.string_reference.iter().enumerate() {
        if reference.instruction_index >= instruction_count {
            errors.push(format!(
                "string reference {index} points to instruction {} out of range",
                reference.instruction_index
            ));
        }
        if reference.string_table_index >= string_count {
            errors.push(format!(
                "string reference {index} points to string {} out of range",
                reference.string_table_index
            ));
        }
    }
    for (index, reference) in export.data_reference.iter().enumerate() {
        if reference.instruction_index >= instruction_count {
            errors.push(format!(
                "data reference {index} points to instruction {} out of range",
                reference.instruction_index
            ));
        }
    }
    for (index, comment) in export.comment.iter().enumerate() {
        if comment.instruction_index >= instruction_count {
            errors.push(format!(
                "comment {index} points to instruction {} out of range",
                comment.instruction_index
            ));
        }
        if comment.string_table_index >= string_count {
            errors.push(format!(
                "comment {index} points to string {} out of range",
                comment.string_table_index
            ));
        }
    }
}

/// Converts a parsed exchange structure into a finalized [`Binary`].
pub fn read_binary(export: BinExport) -> Result<Binary> {
    let mut errors: Vec<String> = Vec::new();
    validate(&export, &mut errors);
    if !errors.is_empty() {
        return Err(DiffError::InvalidInput(errors.join("; ")));
    }

    let mnemonics: Vec<String> = export.mnemonic.iter().map(|m| m.name.clone()).collect();

    // Re-intern expressions and operands; indices on the wire are ephemeral.
    let mut expressions = ExpressionPool::new();
    let mut expression_map: Vec<u32> = Vec::with_capacity(export.expression.len());
    for entry in &export.expression {
        let parent = entry
            .parent_index
            .map(|index| expression_map[index as usize]);
        let id = expressions.intern(Expression {
            kind: entry.expression_type.into(),
            symbol: entry.symbol.clone(),
            immediate: entry.immediate,
            parent,
            position: entry.position as u16,
            is_relocation: entry.is_relocation,
        });
        expression_map.push(id);
    }
    let mut operands = OperandPool::new();
    let mut operand_map: Vec<u32> = Vec::with_capacity(export.operand.len());
    for entry in &export.operand {
        let mapped: SmallVec<[u32; 4]> = entry
            .expression_index
            .iter()
            .map(|&index| expression_map[index as usize])
            .collect();
        operand_map.push(operands.intern(mapped));
    }

    // Instruction addresses: an elided address means the previous
    // instruction flows into this one contiguously.
    let mut instructions: Vec<Instruction> = Vec::with_capacity(export.instruction.len());
    for (index, entry) in export.instruction.iter().enumerate() {
        let address = match entry.address {
            Some(address) => address,
            None => {
                let previous = instructions.last_mut().ok_or_else(|| {
                    DiffError::invalid_input(
                        "the first instruction must carry an explicit address",
                    )
                })?;
                previous.flags |= FLAG_FLOW;
                previous.end_address()
            }
        };
        let bytes = hex_decode(&entry.raw_bytes).ok_or_else(|| {
            DiffError::invalid_input(format!("instruction {index} has malformed raw bytes"))
        })?;
        instructions.push(Instruction {
            address,
            bytes,
            mnemonic: entry.mnemonic_index,
            operands: entry
                .operand_index
                .iter()
                .map(|&id| operand_map[id as usize])
                .collect(),
            call_targets: entry.call_target.iter().copied().collect(),
            comments: entry.comment_index.iter().copied().collect(),
            flags: 0,
        });
    }

    let mut basic_blocks: Vec<BasicBlock> = Vec::with_capacity(export.basic_block.len());
    for (index, entry) in export.basic_block.iter().enumerate() {
        let ranges: SmallVec<[InstructionRange; 1]> = entry
            .instruction_index
            .iter()
            .map(|range| InstructionRange {
                begin: range.begin_index,
                end: range.end_index.unwrap_or(range.begin_index + 1),
            })
            .collect();
        let block = BasicBlock::new(ranges, &instructions).ok_or_else(|| {
            DiffError::invalid_input(format!("basic block {index} is empty"))
        })?;
        basic_blocks.push(block);
    }

    // Flow graphs; attributes are joined in from the call graph below.
    let mut flow_graphs: Vec<FlowGraph> = Vec::with_capacity(export.flow_graph.len());
    for entry in &export.flow_graph {
        let entry_point = basic_blocks[entry.entry_basic_block_index as usize].entry_point;
        let edges: Vec<FlowEdge> = entry
            .edge
            .iter()
            .map(|edge| {
                FlowEdge::new(
                    basic_blocks[edge.source_basic_block_index as usize].last_address,
                    basic_blocks[edge.target_basic_block_index as usize].entry_point,
                    edge.edge_type.into(),
                )
            })
            .collect();
        flow_graphs.push(FlowGraph::new(
            entry_point,
            String::new(),
            String::new(),
            FunctionKind::None,
            None,
            None,
            entry.basic_block_index.clone(),
            edges,
        ));
    }
    flow_graphs.sort_by_key(|flow_graph| flow_graph.entry_point);
    for pair in flow_graphs.windows(2) {
        if pair[0].entry_point == pair[1].entry_point {
            return Err(DiffError::invalid_input(format!(
                "two flow graphs share the entry point {:08X}",
                pair[0].entry_point
            )));
        }
    }

    let flow_graph_by_address = |address: Address| -> Option<u32> {
        flow_graphs
            .binary_search_by_key(&address, |flow_graph| flow_graph.entry_point)
            .ok()
            .map(|index| index as u32)
    };

    let mut vertices: Vec<CallGraphVertex> = Vec::with_capacity(export.call_graph.vertex.len());
    for entry in &export.call_graph.vertex {
        vertices.push(CallGraphVertex {
            address: entry.address,
            name: entry.mangled_name.clone(),
            demangled_name: entry.demangled_name.clone(),
            kind: entry.vertex_type.into(),
            library_index: entry.library_index,
            module_index: entry.module_index,
            flow_graph: flow_graph_by_address(entry.address),
        });
    }
    for vertex in &vertices {
        if let Some(index) = vertex.flow_graph {
            let flow_graph = &mut flow_graphs[index as usize];
            flow_graph.name = vertex.name.clone();
            flow_graph.demangled_name = vertex.demangled_name.clone();
            flow_graph.kind = vertex.kind;
            flow_graph.library_index = vertex.library_index;
            flow_graph.module_index = vertex.module_index;
        }
    }
    let edges: Vec<CallGraphEdge> = export
        .call_graph
        .edge
        .iter()
        .map(|entry| CallGraphEdge {
            source: entry.source_vertex_index,
            target: entry.target_vertex_index,
            call_site: entry.call_site,
            flags: 0,
        })
        .collect();
    let call_graph = CallGraph::new(
        vertices,
        edges,
        export
            .library
            .iter()
            .map(|library| LibraryRecord {
                name: library.name.clone(),
                is_static: library.is_static,
            })
            .collect(),
        export.module.iter().map(|module| module.name.clone()).collect(),
    );

    let mut binary = Binary {
        executable_id: export.meta.executable_id,
        executable_name: export.meta.executable_name,
        architecture: export.meta.architecture,
        timestamp: export.meta.timestamp,
        mnemonics,
        expressions,
        operands,
        instructions,
        basic_blocks,
        flow_graphs,
        call_graph,
        strings: export.string_table,
        string_refs: export
            .string_reference
            .iter()
            .map(|entry| StringReference {
                instruction: entry.instruction_index,
                operand: entry.instruction_operand_index,
                expression: entry.operand_expression_index,
                string: entry.string_table_index,
            })
            .collect(),
        data_refs: export
            .data_reference
            .iter()
            .map(|entry| DataReference {
                instruction: entry.instruction_index,
                address: entry.address,
            })
            .collect(),
        comments: export
            .comment
            .iter()
            .map(|entry| Comment {
                instruction: entry.instruction_index,
                operand: entry.instruction_operand_index,
                string: entry.string_table_index,
                repeatable: entry.repeatable,
            })
            .collect(),
        ..Binary::default()
    };
    binary.finalize()?;
    log::info!(
        "loaded {} ({}): {} functions, {} basic blocks, {} instructions",
        if binary.executable_name.is_empty() {
            "<unnamed>"
        } else {
            &binary.executable_name
        },
        binary.architecture,
        binary.flow_graphs.len(),
        binary.basic_blocks.len(),
        binary.instructions.len()
    );
    Ok(binary)
}

/// Reads and converts an exchange file.
pub fn read_binary_from_file(path: impl AsRef<Path>) -> Result<Binary> {
    let file = std::fs::File::open(path.as_ref())?;
    let export: BinExport = serde_json::from_reader(std::io::BufReader::new(file))?;
    read_binary(export)
}
