//! Shared fixture builder for the scenario tests.
//!
//! Assembles small synthetic binaries through the exchange format, which
//! exercises the reader on every test and keeps the fixtures independent of
//! model internals.

use bindelta_core::binexport::format::{
    BasicBlockEntry, BinExport, CallGraphEdgeEntry, CallGraphEntry, CallGraphVertexEntry,
    EdgeType, FlowGraphEdgeEntry, FlowGraphEntry, IndexRange, InstructionEntry, Meta,
    MnemonicEntry, StringReferenceEntry, VertexType,
};
use bindelta_core::binexport::read_binary;
use bindelta_core::{Address, Binary};

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02X}")).collect()
}

#[derive(Clone)]
struct TestInstruction {
    address: Address,
    mnemonic: String,
    calls: Vec<Address>,
    string_ref: Option<String>,
}

#[derive(Clone)]
struct TestBlock {
    address: Address,
    instructions: Vec<TestInstruction>,
}

#[derive(Clone)]
pub struct TestFunction {
    entry: Address,
    name: String,
    kind: VertexType,
    blocks: Vec<TestBlock>,
    edges: Vec<(usize, usize, EdgeType)>,
}

/// Builder for synthetic binaries.
#[derive(Clone, Default)]
pub struct TestBinary {
    functions: Vec<TestFunction>,
    /// Vertex-only functions (no body), e.g. imports.
    imports: Vec<(Address, String)>,
}

impl TestBinary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new function; returns its index for the block/edge calls.
    pub fn function(&mut self, entry: Address, name: &str) -> usize {
        self.functions.push(TestFunction {
            entry,
            name: name.to_string(),
            kind: VertexType::Normal,
            blocks: Vec::new(),
            edges: Vec::new(),
        });
        self.functions.len() - 1
    }

    pub fn set_kind(&mut self, function: usize, kind: VertexType) {
        self.functions[function].kind = kind;
    }

    pub fn rename(&mut self, function: usize, name: &str) {
        self.functions[function].name = name.to_string();
    }

    pub fn import(&mut self, entry: Address, name: &str) {
        self.imports.push((entry, name.to_string()));
    }

    /// Adds a block of instructions. Instruction bytes are the mnemonic
    /// text, so distinct mnemonics give distinct raw bytes; addresses are
    /// assigned sequentially from the block address.
    pub fn block(&mut self, function: usize, address: Address, mnemonics: &[&str]) -> usize {
        let mut instructions = Vec::new();
        let mut current = address;
        for mnemonic in mnemonics {
            instructions.push(TestInstruction {
                address: current,
                mnemonic: mnemonic.to_string(),
                calls: Vec::new(),
                string_ref: None,
            });
            current += mnemonic.len() as Address;
        }
        self.functions[function].blocks.push(TestBlock {
            address,
            instructions,
        });
        self.functions[function].blocks.len() - 1
    }

    /// Marks an instruction as calling `target` (also adds the call-graph
    /// edge when building).
    pub fn call(&mut self, function: usize, block: usize, instruction: usize, target: Address) {
        self.functions[function].blocks[block].instructions[instruction]
            .calls
            .push(target);
    }

    /// Attaches a string reference to an instruction.
    pub fn string_ref(&mut self, function: usize, block: usize, instruction: usize, text: &str) {
        self.functions[function].blocks[block].instructions[instruction].string_ref =
            Some(text.to_string());
    }

    pub fn edge(&mut self, function: usize, from: usize, to: usize, kind: EdgeType) {
        self.functions[function].edges.push((from, to, kind));
    }

    /// Renames the mnemonic of one instruction, keeping its size.
    pub fn rename_mnemonic(
        &mut self,
        function: usize,
        block: usize,
        instruction: usize,
        mnemonic: &str,
    ) {
        let instr =
            &mut self.functions[function].blocks[block].instructions[instruction];
        assert_eq!(
            instr.mnemonic.len(),
            mnemonic.len(),
            "renamed mnemonics must keep the instruction size"
        );
        instr.mnemonic = mnemonic.to_string();
    }

    /// Assembles the exchange structure.
    pub fn export(&self) -> BinExport {
        let mut export = BinExport {
            meta: Meta {
                executable_id: "00FF".to_string(),
                executable_name: "fixture".to_string(),
                architecture: "x86-64".to_string(),
                timestamp: 1,
            },
            ..BinExport::default()
        };

        let mut mnemonic_index = std::collections::HashMap::<String, u32>::new();
        let mut string_index = std::collections::HashMap::<String, u32>::new();
        let mut functions: Vec<TestFunction> = self.functions.clone();
        functions.sort_by_key(|function| function.entry);

        for function in &functions {
            let mut block_indices: Vec<u32> = Vec::new();
            for block in &function.blocks {
                let begin = export.instruction.len() as u32;
                for instr in &block.instructions {
                    let mnemonic = *mnemonic_index
                        .entry(instr.mnemonic.clone())
                        .or_insert_with(|| {
                            export.mnemonic.push(MnemonicEntry {
                                name: instr.mnemonic.clone(),
                            });
                            export.mnemonic.len() as u32 - 1
                        });
                    let instruction_index = export.instruction.len() as u32;
                    if let Some(text) = &instr.string_ref {
                        let string = *string_index.entry(text.clone()).or_insert_with(|| {
                            export.string_table.push(text.clone());
                            export.string_table.len() as u32 - 1
                        });
                        export.string_reference.push(StringReferenceEntry {
                            instruction_index,
                            instruction_operand_index: 0,
                            operand_expression_index: 0,
                            string_table_index: string,
                        });
                    }
                    export.instruction.push(InstructionEntry {
                        address: Some(instr.address),
                        raw_bytes: hex(instr.mnemonic.as_bytes()),
                        mnemonic_index: mnemonic,
                        operand_index: Vec::new(),
                        call_target: instr.calls.clone(),
                        comment_index: Vec::new(),
                    });
                }
                let end = export.instruction.len() as u32;
                block_indices.push(export.basic_block.len() as u32);
                export.basic_block.push(BasicBlockEntry {
                    instruction_index: vec![IndexRange {
                        begin_index: begin,
                        end_index: if end == begin + 1 { None } else { Some(end) },
                    }],
                });
            }
            export.flow_graph.push(FlowGraphEntry {
                basic_block_index: block_indices.clone(),
                entry_basic_block_index: block_indices[0],
                edge: function
                    .edges
                    .iter()
                    .map(|&(from, to, edge_type)| FlowGraphEdgeEntry {
                        source_basic_block_index: block_indices[from],
                        target_basic_block_index: block_indices[to],
                        edge_type,
                        is_back_edge: false,
                    })
                    .collect(),
            });
        }

        // Call graph: function vertices plus imports, sorted by address.
        let mut vertices: Vec<CallGraphVertexEntry> = functions
            .iter()
            .map(|function| CallGraphVertexEntry {
                address: function.entry,
                vertex_type: function.kind,
                mangled_name: function.name.clone(),
                demangled_name: String::new(),
                library_index: None,
                module_index: None,
            })
            .chain(self.imports.iter().map(|(address, name)| {
                CallGraphVertexEntry {
                    address: *address,
                    vertex_type: VertexType::Imported,
                    mangled_name: name.clone(),
                    demangled_name: String::new(),
                    library_index: None,
                    module_index: None,
                }
            }))
            .collect();
        vertices.sort_by_key(|vertex| vertex.address);
        let vertex_of = |address: Address| -> Option<u32> {
            vertices
                .binary_search_by_key(&address, |vertex| vertex.address)
                .ok()
                .map(|index| index as u32)
        };

        let mut edges: Vec<CallGraphEdgeEntry> = Vec::new();
        for function in &functions {
            let source = vertex_of(function.entry).expect("caller vertex exists");
            for block in &function.blocks {
                for instr in &block.instructions {
                    for &target in &instr.calls {
                        if let Some(target_vertex) = vertex_of(target) {
                            edges.push(CallGraphEdgeEntry {
                                source_vertex_index: source,
                                target_vertex_index: target_vertex,
                                call_site: instr.address,
                            });
                        }
                    }
                }
            }
        }
        export.call_graph = CallGraphEntry {
            vertex: vertices,
            edge: edges,
        };
        export
    }

    /// Assembles and loads the binary.
    pub fn build(&self) -> Binary {
        read_binary(self.export()).expect("fixture must load")
    }
}

/// A four-function program used by several scenarios:
/// `main` calls `alloc_buffer` and `parse_header`, both call `fail_fast`.
/// All four have structurally distinct flow graphs.
pub fn sample_program() -> TestBinary {
    let mut binary = TestBinary::new();

    let main = binary.function(0x1000, "main");
    let b0 = binary.block(main, 0x1000, &["push", "mov", "call"]);
    let b1 = binary.block(main, 0x1020, &["call", "xor", "ret"]);
    binary.edge(main, b0, b1, EdgeType::Unconditional);
    binary.call(main, b0, 2, 0x2000);
    binary.call(main, b1, 0, 0x3000);
    // An import has a call-graph vertex but no body.
    binary.call(main, b1, 0, 0x9000);
    binary.import(0x9000, "memcpy");

    let alloc = binary.function(0x2000, "alloc_buffer");
    let a0 = binary.block(alloc, 0x2000, &["push", "mov", "cmp", "jnz"]);
    let a1 = binary.block(alloc, 0x2030, &["add", "inc", "cmp", "jle"]);
    let a2 = binary.block(alloc, 0x2060, &["call", "pop", "ret"]);
    binary.edge(alloc, a0, a1, EdgeType::Unconditional);
    binary.edge(alloc, a1, a1, EdgeType::ConditionTrue);
    binary.edge(alloc, a1, a2, EdgeType::ConditionFalse);
    binary.call(alloc, a2, 0, 0x4000);

    let parse = binary.function(0x3000, "parse_header");
    let p0 = binary.block(parse, 0x3000, &["push", "test", "jz"]);
    let p1 = binary.block(parse, 0x3020, &["mov", "add"]);
    let p2 = binary.block(parse, 0x3040, &["xor", "sub"]);
    let p3 = binary.block(parse, 0x3060, &["call", "ret"]);
    binary.edge(parse, p0, p1, EdgeType::ConditionTrue);
    binary.edge(parse, p0, p2, EdgeType::ConditionFalse);
    binary.edge(parse, p1, p3, EdgeType::Unconditional);
    binary.edge(parse, p2, p3, EdgeType::Unconditional);
    binary.call(parse, p3, 0, 0x4000);
    binary.string_ref(parse, p1, 0, "bad header magic");

    let fail = binary.function(0x4000, "fail_fast");
    let f0 = binary.block(fail, 0x4000, &["push", "lea"]);
    let f1 = binary.block(fail, 0x4020, &["hlt"]);
    binary.edge(fail, f0, f1, EdgeType::Unconditional);
    binary.string_ref(fail, f0, 1, "fatal error");

    binary
}
