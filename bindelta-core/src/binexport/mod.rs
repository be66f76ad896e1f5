//! The disassembly exchange format.
//!
//! A binary is serialized as deduplicated tables (mnemonics, expressions,
//! operands, instructions, strings) plus basic blocks, flow graphs and the
//! call graph. The format favours compactness through two mechanisms:
//!
//! - default-value elision: fields equal to their default (mnemonic index 0,
//!   edge type `unconditional`, expression type `immediate_int`, ...) are
//!   omitted on write and restored on read;
//! - instruction address elision: an address is omitted when the previous
//!   instruction flows into the current one contiguously and the current
//!   instruction is not a function entry.

pub mod format;
pub mod reader;
pub mod writer;

pub use format::BinExport;
pub use reader::{read_binary, read_binary_from_file};
pub use writer::{write_binary, write_binary_to_file};

use crate::error::Result;

/// Compares two serialized binaries modulo the documented ephemeral fields
/// (timestamp, executable name and id, expression/operand indices).
///
/// Both sides are loaded and re-serialized through the canonical writer, so
/// table-order differences that do not change meaning wash out.
pub fn equivalent(first: &BinExport, second: &BinExport) -> Result<bool> {
    let mut canonical_first = write_binary(&read_binary(first.clone())?);
    let mut canonical_second = write_binary(&read_binary(second.clone())?);
    canonical_first.meta = format::Meta::default();
    canonical_second.meta = format::Meta::default();
    Ok(canonical_first == canonical_second)
}
