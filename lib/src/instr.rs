/*!
This module defines the instruction set of the backtracking matching VM,
along with the decoder used by every stage that walks a compiled program.

Instruction encoding format
---------------------------

A program is a flat sequence of 64-bit words. Every instruction starts with
an opcode word, followed by zero or more operand words; the total number of
words occupied by an instruction is its *width*. Widths are fully determined
by the opcode, except for [`Instr::Compare`] and [`Instr::CompareSimple`],
which carry an explicit argument-list size so the decoder can skip over the
operand list without understanding it.

Instructions that transfer control store a signed *relative* offset:

* forward-style jumps (`Jump`, the fork family, `JumpNonEmpty`, `ForkIf`)
  store `target - addr - width`, i.e. the offset is relative to the address
  of the *next* instruction, and offset 0 falls through;
* [`Instr::Repeat`] stores `addr - target`, i.e. a positive distance walked
  *backward* from the instruction's own address to the start of the repeated
  body.

Both polarities are described by [`jump_slot`], which is what allows the
address-relocation logic in the rewriter to be written once instead of once
per opcode.

Decoding the one-past-the-end address of a program yields [`Instr::Exit`]:
the terminator is implicit and every well-formed program behaves as if an
`Exit` was appended to it.
*/

use num_derive::FromPrimitive;

/// A single unit of the bytecode stream.
pub type Word = u64;

/// Offset for jump instructions, in words.
pub type Offset = i64;

/// Describes where a control-transfer instruction keeps its offset operand
/// and how that offset is anchored. Returned by [`jump_slot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpSlot {
    /// Index of the offset operand, relative to the instruction start.
    pub slot: usize,
    /// True for counted repeats, whose offset is a positive distance walked
    /// backward from the instruction's own address. False for forward-style
    /// jumps anchored at the next instruction.
    pub backward: bool,
}

/// Condition attached to a [`Instr::ForkIf`] instruction. The fork is taken
/// only if the condition holds at the current input position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum ForkCondition {
    /// The current position is the start of the input or follows a line
    /// terminator.
    AtStartOfLine = 0,
    /// Must be last.
    Invalid = 1,
}

/// Kind of boundary tested by [`Instr::CheckBoundary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum BoundaryKind {
    /// A word boundary (`\b`).
    Word = 0,
    /// The negation of a word boundary (`\B`).
    NonWord = 1,
}

/// Argument list of a [`Instr::Compare`] or [`Instr::CompareSimple`]
/// instruction. The operand words are kept raw here; decoding them into
/// [`crate::compare::CompareOperand`] values is done on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompareArgs<'a> {
    /// Number of operands in the list.
    pub argc: usize,
    /// The raw operand words.
    pub args: &'a [Word],
}

/// Instructions understood by the matching VM.
///
/// The set is closed: an opcode word outside this list is an upstream bug
/// and makes the decoder panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr<'a> {
    /// Matches the current code point against a list of compare operands.
    Compare(CompareArgs<'a>),
    /// Like `Compare`, but restricted to a single concrete operand. Cheaper
    /// to dispatch at match time.
    CompareSimple(CompareArgs<'a>),
    /// Unconditional relative jump.
    Jump(Offset),
    /// Jumps (or forks, depending on `form`) only if the input position has
    /// advanced since the checkpoint was recorded. Detects zero-width loop
    /// iterations.
    JumpNonEmpty { offset: Offset, checkpoint: Word, form: Word },
    /// Creates a backtracking alternative at the next instruction and
    /// continues at the jump target.
    ForkJump(Offset),
    /// Creates a backtracking alternative at the jump target and continues
    /// at the next instruction.
    ForkStay(Offset),
    /// Like `ForkJump`, but discards the most recent alternative instead of
    /// stacking a new one. Makes a repetition atomic.
    ForkReplaceJump(Offset),
    /// Like `ForkStay`, but discards the most recent alternative instead of
    /// stacking a new one.
    ForkReplaceStay(Offset),
    /// Conditional fork: behaves like the fork named by `form` when the
    /// condition holds, otherwise falls through.
    ForkIf { offset: Offset, form: Word, condition: Word },
    /// Abandons all alternatives created since the last `Save`.
    FailForks,
    /// Fails if the input position still equals the recorded checkpoint.
    FailIfEmpty(Word),
    /// Advances the input position to the next occurrence of a code point.
    /// Produced by the dot-star rewrite; never emitted by code generation.
    SeekTo(u32),
    /// Succeeds only at the start of the input (or line, in multiline mode).
    CheckBegin,
    /// Succeeds only at the end of the input (or line, in multiline mode).
    CheckEnd,
    /// Succeeds only at a word boundary of the given kind.
    CheckBoundary(Word),
    /// Saves the current match state.
    Save,
    /// Restores the most recently saved match state.
    Restore,
    /// Moves the input position backward.
    GoBack(Word),
    /// Drops the most recently saved match state without restoring it.
    PopSaved,
    /// Records the start of a capture group.
    SaveLeftCaptureGroup(Word),
    /// Records the end of a capture group.
    SaveRightCaptureGroup(Word),
    /// Records the end of a named capture group.
    SaveRightNamedCaptureGroup { group: Word, name: Word },
    /// Clears a capture group.
    ClearCaptureGroup(Word),
    /// Counted repeat: jumps backward to the body start until the repeat
    /// count is exhausted.
    Repeat { offset: Word, count: Word, id: Word },
    /// Resets the iteration counter of a counted repeat.
    ResetRepeat(Word),
    /// Records the current input position under a checkpoint id.
    Checkpoint(Word),
    /// Ends the match attempt successfully.
    Exit,
}

impl Instr<'_> {
    pub const COMPARE: Word = 0x00;
    pub const JUMP: Word = 0x01;
    pub const JUMP_NON_EMPTY: Word = 0x02;
    pub const FORK_JUMP: Word = 0x03;
    pub const FORK_STAY: Word = 0x04;
    pub const FORK_REPLACE_JUMP: Word = 0x05;
    pub const FORK_REPLACE_STAY: Word = 0x06;
    pub const FORK_IF: Word = 0x07;
    pub const FAIL_FORKS: Word = 0x08;
    pub const FAIL_IF_EMPTY: Word = 0x09;
    pub const SEEK_TO: Word = 0x0A;
    pub const CHECK_BEGIN: Word = 0x0B;
    pub const CHECK_END: Word = 0x0C;
    pub const CHECK_BOUNDARY: Word = 0x0D;
    pub const SAVE: Word = 0x0E;
    pub const RESTORE: Word = 0x0F;
    pub const GO_BACK: Word = 0x10;
    pub const POP_SAVED: Word = 0x11;
    pub const SAVE_LEFT_CAPTURE_GROUP: Word = 0x12;
    pub const SAVE_RIGHT_CAPTURE_GROUP: Word = 0x13;
    pub const SAVE_RIGHT_NAMED_CAPTURE_GROUP: Word = 0x14;
    pub const CLEAR_CAPTURE_GROUP: Word = 0x15;
    pub const REPEAT: Word = 0x16;
    pub const RESET_REPEAT: Word = 0x17;
    pub const CHECKPOINT: Word = 0x18;
    pub const COMPARE_SIMPLE: Word = 0x19;
    pub const EXIT: Word = 0x1A;
}

/// Decodes the instruction that starts at `addr`.
///
/// Returns the decoded instruction and its width in words. `addr` equal to
/// `code.len()` decodes as the implicit [`Instr::Exit`] terminator; any
/// other out-of-range address, a truncated instruction, or an unknown
/// opcode word panics, since it means an upstream stage produced malformed
/// bytecode.
pub fn decode_instr(code: &[Word], addr: usize) -> (Instr<'_>, usize) {
    if addr == code.len() {
        return (Instr::Exit, 1);
    }
    assert!(
        addr < code.len(),
        "instruction address {} out of bounds (program is {} words)",
        addr,
        code.len()
    );
    match code[addr..] {
        [Instr::COMPARE, argc, args_size, ..] => {
            let args = &code[addr + 3..addr + 3 + args_size as usize];
            (
                Instr::Compare(CompareArgs { argc: argc as usize, args }),
                3 + args_size as usize,
            )
        }
        [Instr::COMPARE_SIMPLE, args_size, ..] => {
            let args = &code[addr + 2..addr + 2 + args_size as usize];
            (
                Instr::CompareSimple(CompareArgs { argc: 1, args }),
                2 + args_size as usize,
            )
        }
        [Instr::JUMP, offset, ..] => (Instr::Jump(offset as Offset), 2),
        [Instr::JUMP_NON_EMPTY, offset, checkpoint, form, ..] => (
            Instr::JumpNonEmpty { offset: offset as Offset, checkpoint, form },
            4,
        ),
        [Instr::FORK_JUMP, offset, ..] => {
            (Instr::ForkJump(offset as Offset), 2)
        }
        [Instr::FORK_STAY, offset, ..] => {
            (Instr::ForkStay(offset as Offset), 2)
        }
        [Instr::FORK_REPLACE_JUMP, offset, ..] => {
            (Instr::ForkReplaceJump(offset as Offset), 2)
        }
        [Instr::FORK_REPLACE_STAY, offset, ..] => {
            (Instr::ForkReplaceStay(offset as Offset), 2)
        }
        [Instr::FORK_IF, offset, form, condition, ..] => {
            (Instr::ForkIf { offset: offset as Offset, form, condition }, 4)
        }
        [Instr::FAIL_FORKS, ..] => (Instr::FailForks, 1),
        [Instr::FAIL_IF_EMPTY, checkpoint, ..] => {
            (Instr::FailIfEmpty(checkpoint), 2)
        }
        [Instr::SEEK_TO, cp, ..] => (Instr::SeekTo(cp as u32), 2),
        [Instr::CHECK_BEGIN, ..] => (Instr::CheckBegin, 1),
        [Instr::CHECK_END, ..] => (Instr::CheckEnd, 1),
        [Instr::CHECK_BOUNDARY, kind, ..] => (Instr::CheckBoundary(kind), 2),
        [Instr::SAVE, ..] => (Instr::Save, 1),
        [Instr::RESTORE, ..] => (Instr::Restore, 1),
        [Instr::GO_BACK, count, ..] => (Instr::GoBack(count), 2),
        [Instr::POP_SAVED, ..] => (Instr::PopSaved, 1),
        [Instr::SAVE_LEFT_CAPTURE_GROUP, group, ..] => {
            (Instr::SaveLeftCaptureGroup(group), 2)
        }
        [Instr::SAVE_RIGHT_CAPTURE_GROUP, group, ..] => {
            (Instr::SaveRightCaptureGroup(group), 2)
        }
        [Instr::SAVE_RIGHT_NAMED_CAPTURE_GROUP, group, name, ..] => {
            (Instr::SaveRightNamedCaptureGroup { group, name }, 3)
        }
        [Instr::CLEAR_CAPTURE_GROUP, group, ..] => {
            (Instr::ClearCaptureGroup(group), 2)
        }
        [Instr::REPEAT, offset, count, id, ..] => {
            (Instr::Repeat { offset, count, id }, 4)
        }
        [Instr::RESET_REPEAT, id, ..] => (Instr::ResetRepeat(id), 2),
        [Instr::CHECKPOINT, id, ..] => (Instr::Checkpoint(id), 2),
        [Instr::EXIT, ..] => (Instr::Exit, 1),
        [opcode, ..] => {
            panic!("unknown opcode {:#x} at address {}", opcode, addr)
        }
        [] => unreachable!(),
    }
}

/// Returns the opcode word of the instruction that starts at `addr`,
/// without decoding its operands.
#[inline]
pub fn opcode_at(code: &[Word], addr: usize) -> Word {
    if addr == code.len() {
        return Instr::EXIT;
    }
    code[addr]
}

/// Describes the offset operand of a control-transfer opcode, or `None` if
/// the opcode does not transfer control. This is the single place that
/// knows about offset polarity; address relocation is driven entirely by
/// it.
pub fn jump_slot(opcode: Word) -> Option<JumpSlot> {
    match opcode {
        Instr::JUMP
        | Instr::JUMP_NON_EMPTY
        | Instr::FORK_JUMP
        | Instr::FORK_STAY
        | Instr::FORK_REPLACE_JUMP
        | Instr::FORK_REPLACE_STAY
        | Instr::FORK_IF => Some(JumpSlot { slot: 1, backward: false }),
        Instr::REPEAT => Some(JumpSlot { slot: 1, backward: true }),
        _ => None,
    }
}

impl<'a> Instr<'a> {
    /// Resolved target address of this instruction's jump, given the
    /// address it was decoded at, or `None` for non-jump instructions.
    pub fn jump_target(&self, addr: usize, width: usize) -> Option<usize> {
        match *self {
            Instr::Jump(offset)
            | Instr::JumpNonEmpty { offset, .. }
            | Instr::ForkJump(offset)
            | Instr::ForkStay(offset)
            | Instr::ForkReplaceJump(offset)
            | Instr::ForkReplaceStay(offset)
            | Instr::ForkIf { offset, .. } => {
                Some((addr as i64 + width as i64 + offset) as usize)
            }
            Instr::Repeat { offset, .. } => Some(addr - offset as usize),
            _ => None,
        }
    }

    /// True for the instructions that neither consume input nor affect
    /// control flow: capture bookkeeping and checkpoint recording. Several
    /// passes look through these when searching for the next effectful
    /// instruction.
    pub fn is_bookkeeping(&self) -> bool {
        matches!(
            self,
            Instr::Checkpoint(_)
                | Instr::Save
                | Instr::SaveLeftCaptureGroup(_)
                | Instr::SaveRightCaptureGroup(_)
                | Instr::SaveRightNamedCaptureGroup { .. }
                | Instr::ClearCaptureGroup(_)
        )
    }
}

/// Iterates over the instructions of a program, yielding each instruction
/// together with the address it starts at.
pub struct InstrParser<'a> {
    code: &'a [Word],
    addr: usize,
}

impl<'a> InstrParser<'a> {
    /// Creates a parser over the given code.
    pub fn new(code: &'a [Word]) -> Self {
        Self { code, addr: 0 }
    }
}

impl<'a> Iterator for InstrParser<'a> {
    type Item = (Instr<'a>, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.addr >= self.code.len() {
            return None;
        }
        let (instr, width) = decode_instr(self.code, self.addr);
        let addr = self.addr;
        self.addr += width;
        Some((instr, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_round_trip() {
        let code = vec![
            Instr::FORK_STAY,
            6,
            Instr::CHECKPOINT,
            0,
            Instr::JUMP_NON_EMPTY,
            (-6_i64) as Word,
            0,
            Instr::JUMP,
            Instr::EXIT,
        ];
        let decoded: Vec<_> = InstrParser::new(&code).collect();
        assert_eq!(
            decoded,
            vec![
                (Instr::ForkStay(6), 0),
                (Instr::Checkpoint(0), 2),
                (
                    Instr::JumpNonEmpty {
                        offset: -6,
                        checkpoint: 0,
                        form: Instr::JUMP
                    },
                    4
                ),
                (Instr::Exit, 8),
            ]
        );
    }

    #[test]
    fn jump_targets() {
        let code =
            vec![Instr::JUMP, 2, Instr::REPEAT, 2, 4, 0, Instr::EXIT];
        let (jump, width) = decode_instr(&code, 0);
        assert_eq!(jump.jump_target(0, width), Some(4));
        let (repeat, width) = decode_instr(&code, 2);
        assert_eq!(repeat.jump_target(2, width), Some(0));
        // The implicit terminator.
        let (exit, _) = decode_instr(&code, 7);
        assert_eq!(exit, Instr::Exit);
    }

    #[test]
    fn jump_slots() {
        assert_eq!(
            jump_slot(Instr::JUMP),
            Some(JumpSlot { slot: 1, backward: false })
        );
        assert_eq!(
            jump_slot(Instr::REPEAT),
            Some(JumpSlot { slot: 1, backward: true })
        );
        assert_eq!(jump_slot(Instr::COMPARE), None);
    }
}
