//! Serde data model of the exchange format.
//!
//! Every struct mirrors one table of the on-disk form. Optional fields use
//! `#[serde(default, skip_serializing_if = ...)]` so that writing a value
//! equal to its default omits the field and reading an absent field
//! restores the default.

use serde::{Deserialize, Serialize};

use crate::graph::Address;

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero_u32(value: &u32) -> bool {
    *value == 0
}

fn is_zero_i64(value: &i64) -> bool {
    *value == 0
}

/// File header. All fields here are ephemeral for comparison purposes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub executable_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub executable_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MnemonicEntry {
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionType {
    Symbol,
    #[default]
    ImmediateInt,
    ImmediateFloat,
    Operator,
    Register,
    SizePrefix,
    Dereference,
}

fn is_default_expression_type(value: &ExpressionType) -> bool {
    *value == ExpressionType::default()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpressionEntry {
    #[serde(
        rename = "type",
        default,
        skip_serializing_if = "is_default_expression_type"
    )]
    pub expression_type: ExpressionType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub symbol: String,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub immediate: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_index: Option<u32>,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub position: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_relocation: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperandEntry {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expression_index: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstructionEntry {
    /// Elided when the previous instruction flows contiguously into this
    /// one and this is not a function entry point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    /// Hex-encoded raw bytes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_bytes: String,
    /// Index 0 is the most frequent mnemonic and is elided.
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub mnemonic_index: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operand_index: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub call_target: Vec<Address>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comment_index: Vec<u32>,
}

/// Range of instruction-table indices; `end_index` is omitted for
/// single-instruction ranges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexRange {
    pub begin_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_index: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicBlockEntry {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instruction_index: Vec<IndexRange>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    ConditionTrue,
    ConditionFalse,
    #[default]
    Unconditional,
    Switch,
}

fn is_default_edge_type(value: &EdgeType) -> bool {
    *value == EdgeType::default()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowGraphEdgeEntry {
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub source_basic_block_index: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub target_basic_block_index: u32,
    #[serde(rename = "type", default, skip_serializing_if = "is_default_edge_type")]
    pub edge_type: EdgeType,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_back_edge: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowGraphEntry {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub basic_block_index: Vec<u32>,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub entry_basic_block_index: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edge: Vec<FlowGraphEdgeEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VertexType {
    #[default]
    Normal,
    Library,
    Imported,
    Thunk,
    Invalid,
}

fn is_default_vertex_type(value: &VertexType) -> bool {
    *value == VertexType::default()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallGraphVertexEntry {
    pub address: Address,
    #[serde(rename = "type", default, skip_serializing_if = "is_default_vertex_type")]
    pub vertex_type: VertexType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mangled_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub demangled_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_index: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CallGraphEdgeEntry {
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub source_vertex_index: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub target_vertex_index: u32,
    /// Address of the calling instruction.
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub call_site: Address,
}

fn is_zero_u64(value: &u64) -> bool {
    *value == 0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallGraphEntry {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vertex: Vec<CallGraphVertexEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edge: Vec<CallGraphEdgeEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_static: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StringReferenceEntry {
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub instruction_index: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub instruction_operand_index: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub operand_expression_index: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub string_table_index: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DataReferenceEntry {
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub instruction_index: u32,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub address: Address,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentEntry {
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub instruction_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction_operand_index: Option<u32>,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub string_table_index: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub repeatable: bool,
}

/// One serialized binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BinExport {
    #[serde(default)]
    pub meta: Meta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mnemonic: Vec<MnemonicEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expression: Vec<ExpressionEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operand: Vec<OperandEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instruction: Vec<InstructionEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub basic_block: Vec<BasicBlockEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flow_graph: Vec<FlowGraphEntry>,
    #[serde(default)]
    pub call_graph: CallGraphEntry,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub library: Vec<LibraryEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub module: Vec<ModuleEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub string_table: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub string_reference: Vec<StringReferenceEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_reference: Vec<DataReferenceEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comment: Vec<CommentEntry>,
}
