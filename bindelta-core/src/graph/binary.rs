//! The loaded program: all tables plus call graph and flow graphs.

use std::collections::HashMap;
use std::io::Write;

use crate::error::{DiffError, Result};
use crate::graph::basic_block::BasicBlock;
use crate::graph::call_graph::CallGraph;
use crate::graph::expression::{ExpressionKind, ExpressionPool, OperandPool};
use crate::graph::flow_graph::FlowGraph;
use crate::graph::instruction::Instruction;
use crate::graph::Address;
use crate::hash::sdbm_hash;
use crate::primes::mnemonic_prime;

/// A string literal referenced from an instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringReference {
    pub instruction: u32,
    pub operand: u32,
    pub expression: u32,
    /// Index into the string table.
    pub string: u32,
}

/// A data reference from an instruction to an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataReference {
    pub instruction: u32,
    pub address: Address,
}

/// A comment attached to an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub instruction: u32,
    pub operand: Option<u32>,
    /// Index into the string table.
    pub string: u32,
    pub repeatable: bool,
}

/// One fully loaded binary. Built once by the loader; read-only during
/// matching.
#[derive(Debug, Default)]
pub struct Binary {
    pub executable_id: String,
    pub executable_name: String,
    pub architecture: String,
    pub timestamp: i64,

    pub mnemonics: Vec<String>,
    pub(crate) mnemonic_primes: Vec<u64>,
    pub expressions: ExpressionPool,
    pub operands: OperandPool,
    pub instructions: Vec<Instruction>,
    pub basic_blocks: Vec<BasicBlock>,
    pub flow_graphs: Vec<FlowGraph>,
    pub call_graph: CallGraph,

    pub strings: Vec<String>,
    pub string_refs: Vec<StringReference>,
    pub data_refs: Vec<DataReference>,
    pub comments: Vec<Comment>,

    /// Blocks sorted by entry address (indices into `basic_blocks`).
    pub(crate) block_order: Vec<u32>,
    /// Combined string hash per referencing instruction.
    pub(crate) string_hash_by_instruction: HashMap<u32, u32>,
}

impl Binary {
    /// Validates and derives everything the matcher needs. Flow graphs must
    /// already be sorted by entry point and the call graph's flow-graph
    /// links must refer into `flow_graphs`.
    pub(crate) fn finalize(&mut self) -> Result<()> {
        self.mnemonic_primes = self
            .mnemonics
            .iter()
            .map(|mnemonic| mnemonic_prime(mnemonic))
            .collect();

        let mut order: Vec<u32> = (0..self.basic_blocks.len() as u32).collect();
        order.sort_by_key(|&index| self.basic_blocks[index as usize].entry_point);
        for window in order.windows(2) {
            let first = &self.basic_blocks[window[0] as usize];
            let second = &self.basic_blocks[window[1] as usize];
            if first.entry_point == second.entry_point {
                return Err(DiffError::invalid_input(format!(
                    "two basic blocks share the entry point {:08X}",
                    first.entry_point
                )));
            }
        }
        self.block_order = order;

        if !self
            .flow_graphs
            .windows(2)
            .all(|w| w[0].entry_point < w[1].entry_point)
        {
            return Err(DiffError::invalid_input(
                "flow graphs are not sorted by entry point".to_string(),
            ));
        }

        let blocks = &self.basic_blocks;
        let instructions = &self.instructions;
        for flow_graph in &mut self.flow_graphs {
            flow_graph.finalize(blocks, instructions)?;
        }

        self.string_hash_by_instruction.clear();
        for reference in &self.string_refs {
            let content = self
                .strings
                .get(reference.string as usize)
                .ok_or_else(|| {
                    DiffError::invalid_input(format!(
                        "string reference {} points outside the string table",
                        reference.string
                    ))
                })?;
            let hash = sdbm_hash(content.as_bytes());
            let entry = self
                .string_hash_by_instruction
                .entry(reference.instruction)
                .or_insert(0);
            *entry = entry.wrapping_add(hash);
        }
        Ok(())
    }

    /// Combined hash of the string literals referenced by an instruction;
    /// zero when it references none.
    pub fn instruction_string_hash(&self, instruction: u32) -> u32 {
        self.string_hash_by_instruction
            .get(&instruction)
            .copied()
            .unwrap_or(0)
    }

    /// Looks up a function by its entry-point address.
    pub fn function_by_address(&self, address: Address) -> Option<&FlowGraph> {
        self.flow_graphs
            .binary_search_by_key(&address, |flow_graph| flow_graph.entry_point)
            .ok()
            .map(|index| &self.flow_graphs[index])
    }

    pub fn flow_graph_index_by_address(&self, address: Address) -> Option<u32> {
        self.flow_graphs
            .binary_search_by_key(&address, |flow_graph| flow_graph.entry_point)
            .ok()
            .map(|index| index as u32)
    }

    /// Looks up a basic block by its entry-point address.
    pub fn basic_block_by_address(&self, address: Address) -> Option<u32> {
        self.block_order
            .binary_search_by_key(&address, |&index| {
                self.basic_blocks[index as usize].entry_point
            })
            .ok()
            .map(|position| self.block_order[position])
    }

    /// Finds the basic block containing `address`, if any.
    ///
    /// Block addresses are not strictly increasing (merging and overlapping
    /// instruction streams break that), so after the entry-point lookup
    /// fails this probes outward from the insertion position, testing each
    /// candidate's last address before scanning its instructions. The
    /// likeliest match is in the immediate vicinity of the address.
    pub fn basic_block_containing(&self, address: Address) -> Option<u32> {
        let pivot = self
            .block_order
            .partition_point(|&index| self.basic_blocks[index as usize].entry_point < address);
        if let Some(&index) = self.block_order.get(pivot) {
            if self.basic_blocks[index as usize].entry_point == address {
                return Some(index);
            }
        }

        let mut left = pivot;
        let mut right = pivot;
        loop {
            let mut advanced = false;
            if left > 0 {
                left -= 1;
                advanced = true;
                let index = self.block_order[left];
                if self.basic_blocks[index as usize]
                    .contains_address(address, &self.instructions)
                {
                    return Some(index);
                }
            }
            if right < self.block_order.len() {
                let index = self.block_order[right];
                right += 1;
                advanced = true;
                if self.basic_blocks[index as usize]
                    .contains_address(address, &self.instructions)
                {
                    return Some(index);
                }
            }
            if !advanced {
                return None;
            }
        }
    }

    /// Back edges of a flow graph as (source address, target address),
    /// sorted the same way as the edge list.
    pub fn back_edges(&self, flow_graph: &FlowGraph) -> Vec<crate::graph::edge::FlowEdge> {
        let features = flow_graph.features(self);
        flow_graph
            .edges()
            .iter()
            .enumerate()
            .filter(|(index, _)| features.back_edge[*index])
            .map(|(_, edge)| *edge)
            .collect()
    }

    fn render_expression(
        &self,
        children: &HashMap<u32, Vec<u32>>,
        id: u32,
        out: &mut String,
    ) {
        let expression = self.expressions.get(id);
        let child_list: &[u32] = children.get(&id).map_or(&[], |list| list.as_slice());
        match expression.kind {
            ExpressionKind::Symbol | ExpressionKind::Register => out.push_str(&expression.symbol),
            ExpressionKind::ImmediateInt | ExpressionKind::ImmediateFloat => {
                if expression.immediate >= 0 {
                    out.push_str(&format!("{:X}", expression.immediate));
                } else {
                    out.push_str(&format!("-{:X}", -expression.immediate));
                }
            }
            ExpressionKind::SizePrefix => {
                for &child in child_list {
                    self.render_expression(children, child, out);
                }
            }
            ExpressionKind::Dereference => {
                out.push('[');
                for &child in child_list {
                    self.render_expression(children, child, out);
                }
                out.push(']');
            }
            ExpressionKind::Operator => {
                if child_list.is_empty() {
                    out.push_str(&expression.symbol);
                } else {
                    for (position, &child) in child_list.iter().enumerate() {
                        if position > 0 {
                            out.push_str(&expression.symbol);
                        }
                        self.render_expression(children, child, out);
                    }
                }
            }
        }
    }

    fn render_operand(&self, operand: u32) -> String {
        let expression_ids = self.operands.get(operand);
        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut roots: Vec<u32> = Vec::new();
        for &id in expression_ids {
            match self.expressions.get(id).parent {
                Some(parent) if expression_ids.contains(&parent) => {
                    children.entry(parent).or_default().push(id);
                }
                _ => roots.push(id),
            }
        }
        let mut out = String::new();
        for &root in &roots {
            self.render_expression(&children, root, &mut out);
        }
        out
    }

    /// Deterministic textual dump of the call graph and all flow graphs.
    /// Addresses first, uppercase hex, fixed widths. Meant for debugging
    /// and golden tests; the format is stable.
    pub fn render(&self, out: &mut impl Write) -> std::io::Result<()> {
        for flow_graph in &self.flow_graphs {
            let module = flow_graph
                .module_index
                .and_then(|index| self.call_graph.modules.get(index as usize))
                .cloned()
                .unwrap_or_default();
            writeln!(
                out,
                "{:08X}    {}{}{}",
                flow_graph.entry_point,
                module,
                if module.is_empty() { "" } else { "." },
                flow_graph.display_name()
            )?;
            for &block_index in &flow_graph.block_indices {
                let block = &self.basic_blocks[block_index as usize];
                for instruction_index in block.instruction_indices() {
                    let instruction = &self.instructions[instruction_index as usize];
                    let mut line = format!(
                        "{:08X} {}",
                        instruction.address, self.mnemonics[instruction.mnemonic as usize]
                    );
                    for (position, &operand) in instruction.operands.iter().enumerate() {
                        line.push_str(if position == 0 { " " } else { ", " });
                        line.push_str(&self.render_operand(operand));
                    }
                    writeln!(out, "{line}")?;
                }
                writeln!(out)?;
            }
            for edge in flow_graph.edges() {
                writeln!(
                    out,
                    "{:08X} -> {:08X} {}",
                    edge.source,
                    edge.target,
                    edge.kind.name()
                )?;
            }
            if !flow_graph.edges().is_empty() {
                writeln!(out)?;
            }
            writeln!(out, "---------------------------")?;
        }
        Ok(())
    }
}
