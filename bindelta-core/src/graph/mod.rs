//! In-memory program model.
//!
//! A loaded binary is represented as deduplicated tables (mnemonics,
//! expressions, operands, instructions, strings) plus structure on top of
//! them: basic blocks as instruction ranges, per-function flow graphs and
//! one call graph. The model is built once by the loader and is read-only
//! during matching.

pub mod basic_block;
pub mod binary;
pub mod call_graph;
pub mod edge;
pub mod expression;
pub mod flow_graph;
pub mod instruction;

pub use basic_block::{BasicBlock, InstructionRange};
pub use binary::{Binary, Comment, DataReference, StringReference};
pub use call_graph::{CallGraph, CallGraphEdge, CallGraphVertex, LibraryRecord};
pub use edge::{EdgeKind, FlowEdge};
pub use expression::{Expression, ExpressionKind, ExpressionPool, OperandPool};
pub use flow_graph::{FlowGraph, FlowGraphFeatures, FunctionKind};
pub use instruction::Instruction;

/// Addresses are 64-bit unsigned integers.
pub type Address = u64;
