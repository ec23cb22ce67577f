/*!
Basic-block builders.

Two variants, both recomputed from scratch before every pass — addresses
move after every edit and a stale block list is exactly the bug class this
module exists to avoid.

[`split_basic_blocks`] is the general builder: every jump source, jump
target and post-jump fall-through is a boundary, and a block's `end` is the
address of its last instruction (inclusive).

[`split_blocks_for_atomic_groups`] is the specialized builder used only by
the loop-to-atomic-group pass, which needs block boundaries that exactly
track loop bodies: a backward jump that stays inside the current span
splits it into a pre-loop block and a loop block, while a backward jump
into an already-closed earlier block just terminates the span. In this
variant a block's `end` is the address of its terminating jump (one past
the body), so a block consisting of a single jump has `start == end`.
*/

use rustc_hash::FxHashSet;

use crate::instr::{decode_instr, Instr};
use crate::program::Program;

/// A maximal jump-free span of instructions. See the module docs for the
/// two `end` conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
    pub start: usize,
    pub end: usize,
}

/// Splits a program into basic blocks; `end` is the last instruction
/// address of each block.
pub(crate) fn split_basic_blocks(program: &Program) -> Vec<Block> {
    if program.is_empty() {
        return Vec::new();
    }
    let code = program.as_words();

    let mut starts = FxHashSet::default();
    starts.insert(0);

    let mut addr = 0;
    while addr < code.len() {
        let (instr, width) = decode_instr(code, addr);
        match instr {
            Instr::Jump(_)
            | Instr::JumpNonEmpty { .. }
            | Instr::ForkJump(_)
            | Instr::ForkStay(_)
            | Instr::ForkReplaceJump(_)
            | Instr::ForkReplaceStay(_)
            | Instr::ForkIf { .. }
            | Instr::Repeat { .. } => {
                let target = instr.jump_target(addr, width).unwrap();
                assert!(
                    target <= code.len(),
                    "jump at {} targets {} past the end of the program",
                    addr,
                    target
                );
                starts.insert(target);
                starts.insert(addr + width);
            }
            Instr::FailForks => {
                starts.insert(addr + width);
            }
            _ => {}
        }
        addr += width;
    }

    let mut sorted: Vec<usize> = starts.into_iter().collect();
    sorted.sort_unstable();

    let mut blocks = Vec::with_capacity(sorted.len());
    for (i, &start) in sorted.iter().enumerate() {
        let bound = sorted.get(i + 1).copied().unwrap_or(code.len());
        let mut end = start;
        let mut addr = start;
        while addr < bound {
            end = addr;
            let (_, width) = decode_instr(code, addr);
            addr += width;
        }
        blocks.push(Block { start, end });
    }
    blocks
}

/// Splits a program into the block shape required by the loop-to-atomic-
/// group pass; `end` is one past each block's body.
pub(crate) fn split_blocks_for_atomic_groups(
    program: &Program,
) -> Vec<Block> {
    let code = program.as_words();
    let mut blocks = Vec::new();
    let mut end_of_last = 0;

    let check_jump = |blocks: &mut Vec<Block>,
                      end_of_last: &mut usize,
                      addr: usize,
                      width: usize,
                      offset: i64| {
        // Offset of the target relative to the jump's own address.
        let jump_offset = width as i64 + offset;
        if jump_offset >= 0 {
            blocks.push(Block { start: *end_of_last, end: addr });
        } else {
            let target = (addr as i64 + jump_offset) as usize;
            if target > *end_of_last {
                // The jump loops inside the current span; split it into
                // the pre-loop part and the loop body.
                blocks.push(Block { start: *end_of_last, end: target });
                blocks.push(Block { start: target, end: addr });
            } else {
                // Just a jump into an earlier, already-closed block.
                blocks.push(Block { start: *end_of_last, end: addr });
            }
        }
        *end_of_last = addr + width;
    };

    let mut addr = 0;
    while addr < code.len() {
        let (instr, width) = decode_instr(code, addr);
        match instr {
            Instr::Jump(offset)
            | Instr::JumpNonEmpty { offset, .. }
            | Instr::ForkJump(offset)
            | Instr::ForkStay(offset)
            | Instr::ForkReplaceJump(offset)
            | Instr::ForkReplaceStay(offset)
            | Instr::ForkIf { offset, .. } => {
                check_jump(&mut blocks, &mut end_of_last, addr, width, offset);
            }
            Instr::FailForks => {
                blocks.push(Block { start: end_of_last, end: addr });
                end_of_last = addr + width;
            }
            Instr::Repeat { offset, .. } => {
                // A counted repeat produces two blocks: its repeated body
                // and whatever precedes it.
                let target = addr - offset as usize;
                if target > end_of_last {
                    blocks.push(Block { start: end_of_last, end: target });
                }
                blocks.push(Block { start: target, end: addr });
                end_of_last = addr + width;
            }
            _ => {}
        }
        addr += width;
    }

    if end_of_last < code.len() {
        blocks.push(Block { start: end_of_last, end: code.len() });
    }

    blocks.sort_by_key(|block| block.start);
    blocks
}
