//! Instructions.
//!
//! Instructions are immutable after load. Two instructions with the same
//! address are the same instruction; byte ranges of distinct instructions
//! may overlap only on architectures that permit overlapping instruction
//! streams, which the loader flags explicitly.

use smallvec::SmallVec;

use crate::graph::Address;

/// The instruction could not be decoded; it exists only to keep block
/// structure intact.
pub const FLAG_INVALID: u8 = 1 << 0;
/// Execution falls through to the textually next instruction.
pub const FLAG_FLOW: u8 = 1 << 1;

/// A single decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub address: Address,
    /// Raw encoded bytes.
    pub bytes: Vec<u8>,
    /// Index into the binary's mnemonic table.
    pub mnemonic: u32,
    /// Indices into the binary's operand pool, in operand order.
    pub operands: SmallVec<[u32; 4]>,
    /// Addresses of functions this instruction calls.
    pub call_targets: SmallVec<[Address; 1]>,
    /// Indices into the binary's comment table.
    pub comments: SmallVec<[u32; 1]>,
    pub flags: u8,
}

impl Instruction {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn is_flow(&self) -> bool {
        self.has_flag(FLAG_FLOW)
    }

    pub fn is_invalid(&self) -> bool {
        self.has_flag(FLAG_INVALID)
    }

    /// Address one past the last byte of this instruction.
    pub fn end_address(&self) -> Address {
        self.address + self.size()
    }
}
