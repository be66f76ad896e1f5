//! Basic blocks.
//!
//! A basic block stores one or more index ranges into the binary's
//! instruction table. The common case is a single range; multiple ranges
//! arise when overlapping or appended blocks are merged. The entry point is
//! the address of the first instruction of the first range, and at most one
//! block exists per entry-point address.

use smallvec::SmallVec;

use crate::graph::instruction::Instruction;
use crate::graph::Address;

/// Half-open range `[begin, end)` of instruction-table indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionRange {
    pub begin: u32,
    pub end: u32,
}

impl InstructionRange {
    pub fn len(&self) -> usize {
        (self.end - self.begin) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

/// A maximal straight-line instruction sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub ranges: SmallVec<[InstructionRange; 1]>,
    /// Address of the first instruction (cached from the table).
    pub entry_point: Address,
    /// Address of the last instruction of the last range.
    pub last_address: Address,
}

impl BasicBlock {
    /// Builds a block from its ranges, resolving the entry and last address
    /// against the instruction table. Returns `None` for empty range lists.
    pub fn new(
        ranges: SmallVec<[InstructionRange; 1]>,
        instructions: &[Instruction],
    ) -> Option<Self> {
        let first = ranges.iter().find(|range| !range.is_empty())?;
        let last = ranges.iter().rev().find(|range| !range.is_empty())?;
        let entry_point = instructions[first.begin as usize].address;
        let last_address = instructions[(last.end - 1) as usize].address;
        Some(BasicBlock {
            ranges,
            entry_point,
            last_address,
        })
    }

    /// Iterates the instruction-table indices of this block in order.
    pub fn instruction_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.ranges.iter().flat_map(|range| range.begin..range.end)
    }

    pub fn instruction_count(&self) -> usize {
        self.ranges.iter().map(InstructionRange::len).sum()
    }

    /// Returns true if `address` is the address of one of this block's
    /// instructions. O(n) over the instructions, with a fast path for the
    /// last address, since most callers probe entry or exit points.
    pub fn contains_address(&self, address: Address, instructions: &[Instruction]) -> bool {
        if address == self.entry_point || address == self.last_address {
            return true;
        }
        self.instruction_indices()
            .any(|index| instructions[index as usize].address == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn instruction(address: Address, size: usize) -> Instruction {
        Instruction {
            address,
            bytes: vec![0x90; size],
            mnemonic: 0,
            operands: SmallVec::new(),
            call_targets: SmallVec::new(),
            comments: SmallVec::new(),
            flags: 0,
        }
    }

    #[test]
    fn entry_and_last_address_come_from_the_ranges() {
        let instructions = vec![
            instruction(0x1000, 2),
            instruction(0x1002, 2),
            instruction(0x2000, 4),
        ];
        let block = BasicBlock::new(
            smallvec![
                InstructionRange { begin: 0, end: 2 },
                InstructionRange { begin: 2, end: 3 },
            ],
            &instructions,
        )
        .unwrap();
        assert_eq!(block.entry_point, 0x1000);
        assert_eq!(block.last_address, 0x2000);
        assert_eq!(block.instruction_count(), 3);
        assert_eq!(
            block.instruction_indices().collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(block.contains_address(0x1002, &instructions));
        assert!(!block.contains_address(0x1001, &instructions));
    }

    #[test]
    fn empty_ranges_yield_no_block() {
        let instructions: Vec<Instruction> = Vec::new();
        assert!(BasicBlock::new(smallvec![], &instructions).is_none());
        assert!(BasicBlock::new(
            smallvec![InstructionRange { begin: 0, end: 0 }],
            &instructions
        )
        .is_none());
    }
}
