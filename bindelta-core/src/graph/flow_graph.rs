//! Per-function flow graphs.
//!
//! A flow graph owns its basic-block references (sorted by entry address,
//! deduplicated) and its edge list, plus a compact adjacency built once at
//! load time. Vertices are `u32` positions into the block list; the model
//! uses small indices instead of pointers throughout.
//!
//! Derived fingerprints (MD indices, primes, hashes, loop structure) are
//! computed lazily on first use and cached for the graph's lifetime.

use std::cell::OnceCell;
use std::collections::BTreeMap;

use bitvec::prelude::*;
use smallvec::SmallVec;

use crate::analysis::dominators::back_edge_flags;
use crate::analysis::levels::topological_levels;
use crate::analysis::md_index::{
    md_values_bottom_up, md_values_relaxed, md_values_top_down, MdIndex,
};
use crate::error::{DiffError, Result};
use crate::graph::basic_block::BasicBlock;
use crate::graph::binary::Binary;
use crate::graph::edge::FlowEdge;
use crate::graph::instruction::Instruction;
use crate::graph::Address;
use crate::hash::{bytes_hash, sdbm_hash};

/// Function classification from the disassembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum FunctionKind {
    #[default]
    Standard,
    Library,
    Imported,
    Thunk,
    Invalid,
    None,
}

impl FunctionKind {
    pub fn name(self) -> &'static str {
        match self {
            FunctionKind::Standard => "regular",
            FunctionKind::Library => "library",
            FunctionKind::Imported => "imported",
            FunctionKind::Thunk => "thunk",
            FunctionKind::Invalid => "invalid",
            FunctionKind::None => "none",
        }
    }
}

/// A function with its basic-block graph.
#[derive(Debug)]
pub struct FlowGraph {
    pub entry_point: Address,
    /// Mangled name; empty when the disassembler auto-generated one.
    pub name: String,
    /// Demangled name; empty when identical to the mangled name.
    pub demangled_name: String,
    pub kind: FunctionKind,
    pub library_index: Option<u32>,
    pub module_index: Option<u32>,

    /// Indices into the binary's basic-block table, sorted by entry address.
    pub(crate) block_indices: Vec<u32>,
    /// Edges sorted by (source, target, kind).
    pub(crate) edges: Vec<FlowEdge>,
    /// Local (source, target) vertex pair per edge, parallel to `edges`.
    pub(crate) edge_endpoints: Vec<(u32, u32)>,
    pub(crate) entry_vertex: u32,
    /// Outgoing/incoming edge indices per vertex, in edge order.
    pub(crate) out_edges: Vec<SmallVec<[u32; 2]>>,
    pub(crate) in_edges: Vec<SmallVec<[u32; 2]>>,

    features: OnceCell<FlowGraphFeatures>,
}

impl FlowGraph {
    /// Creates an unfinalized flow graph; [`FlowGraph::finalize`] must run
    /// before the graph is used.
    pub(crate) fn new(
        entry_point: Address,
        name: String,
        demangled_name: String,
        kind: FunctionKind,
        library_index: Option<u32>,
        module_index: Option<u32>,
        block_indices: Vec<u32>,
        edges: Vec<FlowEdge>,
    ) -> Self {
        FlowGraph {
            entry_point,
            name,
            demangled_name,
            kind,
            library_index,
            module_index,
            block_indices,
            edges,
            edge_endpoints: Vec::new(),
            entry_vertex: 0,
            out_edges: Vec::new(),
            in_edges: Vec::new(),
            features: OnceCell::new(),
        }
    }

    /// Sorts blocks and edges, resolves edge endpoints to vertices and
    /// builds the adjacency.
    ///
    /// Edges whose endpoints do not resolve to a block owned by this
    /// function are dropped with a warning; branches to unmapped memory
    /// produce such edges and they carry no structure worth keeping.
    pub(crate) fn finalize(
        &mut self,
        blocks: &[BasicBlock],
        instructions: &[Instruction],
    ) -> Result<()> {
        self.block_indices
            .sort_by_key(|&index| blocks[index as usize].entry_point);
        self.block_indices.dedup();
        self.edges.sort();

        // Entry and exit addresses resolve most edges; anything else needs
        // the containing-block scan.
        let mut by_entry: BTreeMap<Address, u32> = BTreeMap::new();
        let mut by_last: BTreeMap<Address, u32> = BTreeMap::new();
        for (vertex, &block_index) in self.block_indices.iter().enumerate() {
            let block = &blocks[block_index as usize];
            by_entry.insert(block.entry_point, vertex as u32);
            by_last.entry(block.last_address).or_insert(vertex as u32);
        }

        let resolve = |address: Address, prefer_exit: bool| -> Option<u32> {
            let fast = if prefer_exit {
                by_last.get(&address).or_else(|| by_entry.get(&address))
            } else {
                by_entry.get(&address).or_else(|| by_last.get(&address))
            };
            if let Some(&vertex) = fast {
                return Some(vertex);
            }
            self.block_indices
                .iter()
                .position(|&index| blocks[index as usize].contains_address(address, instructions))
                .map(|position| position as u32)
        };

        let mut endpoints: Vec<(u32, u32)> = Vec::with_capacity(self.edges.len());
        let mut kept: Vec<FlowEdge> = Vec::with_capacity(self.edges.len());
        for edge in &self.edges {
            match (resolve(edge.source, true), resolve(edge.target, false)) {
                (Some(source), Some(target)) => {
                    endpoints.push((source, target));
                    kept.push(*edge);
                }
                _ => {
                    log::warn!(
                        "dropping unresolved edge {:08X} -> {:08X} in function {:08X}",
                        edge.source,
                        edge.target,
                        self.entry_point
                    );
                }
            }
        }
        self.edges = kept;
        self.edge_endpoints = endpoints;

        self.entry_vertex = *by_entry.get(&self.entry_point).ok_or_else(|| {
            DiffError::invalid_input(format!(
                "function {:08X} has no basic block at its entry point",
                self.entry_point
            ))
        })?;

        self.out_edges = vec![SmallVec::new(); self.block_indices.len()];
        self.in_edges = vec![SmallVec::new(); self.block_indices.len()];
        for (index, &(source, target)) in self.edge_endpoints.iter().enumerate() {
            self.out_edges[source as usize].push(index as u32);
            self.in_edges[target as usize].push(index as u32);
        }
        Ok(())
    }

    pub fn vertex_count(&self) -> usize {
        self.block_indices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn entry_vertex(&self) -> u32 {
        self.entry_vertex
    }

    pub fn edges(&self) -> &[FlowEdge] {
        &self.edges
    }

    pub fn edge_endpoints(&self, edge: u32) -> (u32, u32) {
        self.edge_endpoints[edge as usize]
    }

    pub fn is_circular(&self, edge: u32) -> bool {
        let (source, target) = self.edge_endpoints[edge as usize];
        source == target
    }

    pub fn out_edge_indices(&self, vertex: u32) -> &[u32] {
        &self.out_edges[vertex as usize]
    }

    pub fn in_edge_indices(&self, vertex: u32) -> &[u32] {
        &self.in_edges[vertex as usize]
    }

    pub fn in_degree(&self, vertex: u32) -> usize {
        self.in_edges[vertex as usize].len()
    }

    pub fn out_degree(&self, vertex: u32) -> usize {
        self.out_edges[vertex as usize].len()
    }

    /// Index into the binary's basic-block table for a vertex.
    pub fn block_index(&self, vertex: u32) -> u32 {
        self.block_indices[vertex as usize]
    }

    /// Trivial functions (at most one basic block) carry almost no
    /// structure and are only matched by name when they are library code.
    pub fn is_trivial(&self) -> bool {
        self.block_indices.len() <= 1
    }

    pub fn is_library(&self) -> bool {
        self.kind == FunctionKind::Library
    }

    pub fn has_real_name(&self) -> bool {
        !self.name.is_empty()
    }

    /// The demangled name when available, the raw name otherwise. Demangled
    /// names survive compiler changes, so matching prefers them.
    pub fn good_name(&self) -> &str {
        if self.demangled_name.is_empty() {
            &self.name
        } else {
            &self.demangled_name
        }
    }

    /// Display name; auto-generated from the entry point when the function
    /// has no real name.
    pub fn display_name(&self) -> String {
        if self.has_real_name() {
            self.good_name().to_string()
        } else {
            format!("sub_{:X}", self.entry_point)
        }
    }

    pub fn name_hash(&self) -> u32 {
        sdbm_hash(self.good_name().as_bytes())
    }

    /// Derived fingerprints, computed on first use.
    pub fn features(&self, binary: &Binary) -> &FlowGraphFeatures {
        self.features
            .get_or_init(|| FlowGraphFeatures::compute(self, binary))
    }
}

/// Cached per-flow-graph fingerprints.
#[derive(Debug)]
pub struct FlowGraphFeatures {
    /// Whole-graph MD index, top-down orientation.
    pub md_index: MdIndex,
    pub md_index_inverted: MdIndex,
    pub vertex_md: Vec<MdIndex>,
    pub vertex_md_inverted: Vec<MdIndex>,
    pub vertex_md_relaxed: Vec<MdIndex>,
    pub edge_md: Vec<MdIndex>,
    pub edge_md_inverted: Vec<MdIndex>,

    /// Product of per-mnemonic primes over all instructions.
    pub prime: u64,
    pub vertex_prime: Vec<u64>,
    /// CRC over all raw instruction bytes in block order.
    pub hash: u64,
    pub vertex_hash: Vec<u64>,
    pub instruction_count: u32,
    pub vertex_instruction_count: Vec<u32>,
    /// Combined hash of referenced string literals; zero or one means none.
    pub string_refs: u32,
    pub vertex_string_refs: Vec<u32>,
    /// Call-target addresses per vertex, in instruction order.
    pub vertex_call_targets: Vec<SmallVec<[Address; 2]>>,

    /// Back-edge flag per edge, same order as the edge list.
    pub back_edge: BitVec,
    pub loop_count: u32,
    /// Vertices that are targets of back edges.
    pub loop_entry: BitVec,
    /// Topological level per vertex, top-down.
    pub vertex_level: Vec<u32>,
    /// First call site per callee address: (block level, instruction
    /// position inside the block).
    pub call_site_levels: BTreeMap<Address, (u32, u32)>,
}

impl FlowGraphFeatures {
    fn compute(flow_graph: &FlowGraph, binary: &Binary) -> Self {
        let vertex_count = flow_graph.vertex_count();
        let pairs = &flow_graph.edge_endpoints;

        let top_down = md_values_top_down(vertex_count, pairs);
        let bottom_up = md_values_bottom_up(vertex_count, pairs);
        let relaxed = md_values_relaxed(vertex_count, pairs, &[flow_graph.entry_vertex]);
        let vertex_level = topological_levels(vertex_count, pairs);

        let back_flags = back_edge_flags(vertex_count, pairs, flow_graph.entry_vertex);
        let mut back_edge: BitVec = BitVec::repeat(false, pairs.len());
        let mut loop_entry: BitVec = BitVec::repeat(false, vertex_count);
        let mut loop_count: u32 = 0;
        for (index, &is_back) in back_flags.iter().enumerate() {
            if is_back {
                back_edge.set(index, true);
                loop_entry.set(pairs[index].1 as usize, true);
                loop_count += 1;
            }
        }

        let mut vertex_prime: Vec<u64> = Vec::with_capacity(vertex_count);
        let mut vertex_hash: Vec<u64> = Vec::with_capacity(vertex_count);
        let mut vertex_instruction_count: Vec<u32> = Vec::with_capacity(vertex_count);
        let mut vertex_string_refs: Vec<u32> = Vec::with_capacity(vertex_count);
        let mut vertex_call_targets: Vec<SmallVec<[Address; 2]>> = Vec::with_capacity(vertex_count);
        let mut call_site_levels: BTreeMap<Address, (u32, u32)> = BTreeMap::new();
        let mut function_bytes: Vec<&[u8]> = Vec::new();
        let mut prime: u64 = 1;
        let mut instruction_count: u32 = 0;
        let mut string_refs: u32 = 0;

        for (vertex, &block_index) in flow_graph.block_indices.iter().enumerate() {
            let block = &binary.basic_blocks[block_index as usize];
            let mut block_prime: u64 = 1;
            let mut block_hasher = crc32fast::Hasher::new();
            let mut block_strings: u32 = 0;
            let mut calls: SmallVec<[Address; 2]> = SmallVec::new();
            let mut count: u32 = 0;
            for (position, instruction_index) in block.instruction_indices().enumerate() {
                let instruction = &binary.instructions[instruction_index as usize];
                block_prime =
                    block_prime.wrapping_mul(binary.mnemonic_primes[instruction.mnemonic as usize]);
                block_hasher.update(&instruction.bytes);
                function_bytes.push(&instruction.bytes);
                block_strings = block_strings
                    .wrapping_add(binary.instruction_string_hash(instruction_index));
                for &target in &instruction.call_targets {
                    calls.push(target);
                    call_site_levels
                        .entry(target)
                        .or_insert((vertex_level[vertex], position as u32));
                }
                count += 1;
            }
            prime = prime.wrapping_mul(block_prime);
            instruction_count += count;
            string_refs = string_refs.wrapping_add(block_strings);
            vertex_prime.push(block_prime);
            vertex_hash.push(if count == 0 {
                0
            } else {
                match block_hasher.finalize() {
                    0 => 1,
                    digest => u64::from(digest),
                }
            });
            vertex_instruction_count.push(count);
            vertex_string_refs.push(block_strings);
            vertex_call_targets.push(calls);
        }

        FlowGraphFeatures {
            md_index: top_down.graph,
            md_index_inverted: bottom_up.graph,
            vertex_md: top_down.vertex,
            vertex_md_inverted: bottom_up.vertex,
            vertex_md_relaxed: relaxed.vertex,
            edge_md: top_down.edge,
            edge_md_inverted: bottom_up.edge,
            prime,
            vertex_prime,
            hash: bytes_hash(function_bytes),
            vertex_hash,
            instruction_count,
            vertex_instruction_count,
            string_refs,
            vertex_string_refs,
            vertex_call_targets,
            back_edge,
            loop_count,
            loop_entry,
            vertex_level,
            call_site_levels,
        }
    }

    /// Call-site key used by the call-sequence matching step: block level in
    /// the high bits, instruction position in the low 16.
    pub fn call_site_key(&self, callee: Address) -> Option<(u32, u32)> {
        self.call_site_levels.get(&callee).copied()
    }
}
