/*!
The flat bytecode program handed from code generation to the optimizer and
from the optimizer to the matching VM: an ordered sequence of instruction
words plus a deduplicating side table of literal strings referenced by
index from `String`, `StringSet` and named-reference operands.

Programs are built once, rewritten destructively pass by pass, and then
executed; the string table only ever grows, so indexes stay valid across
rewrites. Merging two programs (the alternation compiler does this) merges
their side tables and remaps the indexes embedded in the absorbed code.
*/

use std::fmt::{Display, Formatter};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::compare::{self, CompareOperand};
use crate::instr::{decode_instr, Instr, InstrParser, Offset, Word};

/// Deduplicating table of literal strings referenced from bytecode
/// operands.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringTable {
    strings: Vec<String>,
    index: FxHashMap<String, u32>,
}

impl StringTable {
    /// Returns the index of `s`, inserting it if not present.
    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(index) = self.index.get(s) {
            return *index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), index);
        index
    }

    /// Returns the string stored at `index`.
    pub fn get(&self, index: u32) -> &str {
        &self.strings[index as usize]
    }

    /// Number of strings in the table.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// True if the table holds no strings.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Merges `other` into this table and returns, for each index of
    /// `other`, the index it now has here.
    pub fn merge_from(&mut self, other: &StringTable) -> Vec<u32> {
        other.strings.iter().map(|s| self.intern(s)).collect()
    }
}

/// A compiled program: instruction stream, string side table and the
/// number of capture groups registered by the front end.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub(crate) code: Vec<Word>,
    pub(crate) strings: StringTable,
    /// Number of capture groups the pattern defines. Carried through to the
    /// execution engine untouched.
    pub capture_groups: usize,
}

impl Program {
    /// Creates an empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// The instruction stream.
    pub fn as_words(&self) -> &[Word] {
        &self.code
    }

    /// Length of the instruction stream, in words.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// True if the program contains no instructions.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// The string side table.
    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    /// Interns a string into the side table, returning its index.
    pub fn intern_string(&mut self, s: &str) -> u32 {
        self.strings.intern(s)
    }

    /// Appends a raw word.
    pub fn push(&mut self, word: Word) {
        self.code.push(word);
    }

    /// Appends raw words.
    pub fn extend_from_slice(&mut self, words: &[Word]) {
        self.code.extend_from_slice(words);
    }

    /// Decodes the instruction starting at `addr`, returning it together
    /// with its width.
    pub fn instr_at(&self, addr: usize) -> (Instr<'_>, usize) {
        decode_instr(&self.code, addr)
    }

    /// Iterates over the instructions of the program.
    pub fn iter(&self) -> InstrParser<'_> {
        InstrParser::new(&self.code)
    }

    /// Emits a `Compare` instruction with the given operand list.
    pub fn emit_compare(&mut self, ops: &[CompareOperand]) {
        let mut args = Vec::new();
        compare::encode_operands(ops, &mut args);
        self.code.push(Instr::COMPARE);
        self.code.push(ops.len() as Word);
        self.code.push(args.len() as Word);
        self.code.extend(args);
    }

    /// Emits a `Compare` matching a single code point.
    pub fn emit_compare_char(&mut self, cp: u32) {
        self.emit_compare(&[CompareOperand::Char(cp)]);
    }

    /// Emits a `Compare` matching any code point.
    pub fn emit_compare_any_char(&mut self) {
        self.emit_compare(&[CompareOperand::AnyChar]);
    }

    /// Emits a `Compare` matching a literal string, interning it into the
    /// side table.
    pub fn emit_compare_string(&mut self, s: &str) {
        let index = self.strings.intern(s);
        self.emit_compare(&[CompareOperand::String(index)]);
    }

    /// Emits a two-word jump instruction (`Jump` or one of the fork
    /// family).
    pub fn emit_jump(&mut self, opcode: Word, offset: Offset) {
        debug_assert!(matches!(
            opcode,
            Instr::JUMP
                | Instr::FORK_JUMP
                | Instr::FORK_STAY
                | Instr::FORK_REPLACE_JUMP
                | Instr::FORK_REPLACE_STAY
        ));
        self.code.push(opcode);
        self.code.push(offset as Word);
    }

    /// Appends `other` to this program, merging its string table and
    /// remapping the string indexes embedded in its code.
    pub fn append_program(&mut self, mut other: Program) {
        let remap = self.strings.merge_from(&other.strings);
        remap_strings(&mut other.code, &remap);
        self.code.append(&mut other.code);
        self.capture_groups = self.capture_groups.max(other.capture_groups);
    }
}

/// Rewrites every string-table index embedded in `code` through `remap`.
pub(crate) fn remap_strings(code: &mut [Word], remap: &[u32]) {
    let mut addr = 0;
    while addr < code.len() {
        let opcode = code[addr];
        let (_, width) = decode_instr(code, addr);
        match opcode {
            Instr::COMPARE => compare::remap_string_refs(
                &mut code[addr + 3..addr + width],
                remap,
            ),
            Instr::COMPARE_SIMPLE => compare::remap_string_refs(
                &mut code[addr + 2..addr + width],
                remap,
            ),
            Instr::SAVE_RIGHT_NAMED_CAPTURE_GROUP => {
                code[addr + 2] = remap[code[addr + 2] as usize] as Word;
            }
            _ => {}
        }
        addr += width;
    }
}

/// Human-readable name of an opcode word, for disassembly and diagnostics.
pub fn opcode_name(opcode: Word) -> &'static str {
    match opcode {
        Instr::COMPARE => "COMPARE",
        Instr::COMPARE_SIMPLE => "COMPARE_SIMPLE",
        Instr::JUMP => "JUMP",
        Instr::JUMP_NON_EMPTY => "JUMP_NON_EMPTY",
        Instr::FORK_JUMP => "FORK_JUMP",
        Instr::FORK_STAY => "FORK_STAY",
        Instr::FORK_REPLACE_JUMP => "FORK_REPLACE_JUMP",
        Instr::FORK_REPLACE_STAY => "FORK_REPLACE_STAY",
        Instr::FORK_IF => "FORK_IF",
        Instr::FAIL_FORKS => "FAIL_FORKS",
        Instr::FAIL_IF_EMPTY => "FAIL_IF_EMPTY",
        Instr::SEEK_TO => "SEEK_TO",
        Instr::CHECK_BEGIN => "CHECK_BEGIN",
        Instr::CHECK_END => "CHECK_END",
        Instr::CHECK_BOUNDARY => "CHECK_BOUNDARY",
        Instr::SAVE => "SAVE",
        Instr::RESTORE => "RESTORE",
        Instr::GO_BACK => "GO_BACK",
        Instr::POP_SAVED => "POP_SAVED",
        Instr::SAVE_LEFT_CAPTURE_GROUP => "SAVE_LEFT_CAPTURE_GROUP",
        Instr::SAVE_RIGHT_CAPTURE_GROUP => "SAVE_RIGHT_CAPTURE_GROUP",
        Instr::SAVE_RIGHT_NAMED_CAPTURE_GROUP => {
            "SAVE_RIGHT_NAMED_CAPTURE_GROUP"
        }
        Instr::CLEAR_CAPTURE_GROUP => "CLEAR_CAPTURE_GROUP",
        Instr::REPEAT => "REPEAT",
        Instr::RESET_REPEAT => "RESET_REPEAT",
        Instr::CHECKPOINT => "CHECKPOINT",
        Instr::EXIT => "EXIT",
        _ => "UNKNOWN",
    }
}

fn fmt_operands(
    f: &mut Formatter<'_>,
    args: &[Word],
    strings: &StringTable,
) -> std::fmt::Result {
    for op in compare::decode_operands(args) {
        match op {
            CompareOperand::Inverse => write!(f, " INVERSE")?,
            CompareOperand::TemporaryInverse => write!(f, " TMP_INVERSE")?,
            CompareOperand::AnyChar => write!(f, " ANY_CHAR")?,
            CompareOperand::Char(cp) => write!(f, " CHAR {:#04x}", cp)?,
            CompareOperand::CharRange(r) => {
                write!(f, " RANGE {:#04x}-{:#04x}", r.from, r.to)?
            }
            CompareOperand::CharClass(c) => write!(f, " CLASS {:?}", c)?,
            CompareOperand::Property(p) => write!(f, " PROP {:?}", p)?,
            CompareOperand::GeneralCategory(c) => write!(f, " GC {:?}", c)?,
            CompareOperand::Script(s) => write!(f, " SCRIPT {:?}", s)?,
            CompareOperand::ScriptExtension(s) => {
                write!(f, " SCRIPT_EXT {:?}", s)?
            }
            CompareOperand::String(i) => {
                write!(f, " STR {:?}", strings.get(i))?
            }
            CompareOperand::StringSet(set) => {
                write!(f, " STR_SET [")?;
                for (n, i) in set.iter().enumerate() {
                    if n > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{:?}", strings.get(*i))?;
                }
                write!(f, "]")?;
            }
            CompareOperand::LookupTable(table) => {
                write!(f, " TABLE [")?;
                for (n, r) in table.ranges.iter().enumerate() {
                    if n > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{:#04x}-{:#04x}", r.from, r.to)?;
                }
                write!(f, "]")?;
                if !table.insensitive.is_empty() {
                    write!(f, " FOLDED [")?;
                    for (n, r) in table.insensitive.iter().enumerate() {
                        if n > 0 {
                            write!(f, " ")?;
                        }
                        write!(f, "{:#04x}-{:#04x}", r.from, r.to)?;
                    }
                    write!(f, "]")?;
                }
            }
            CompareOperand::Reference(group) => write!(f, " REF {}", group)?,
            CompareOperand::NamedReference(name) => {
                write!(f, " NAMED_REF {:?}", strings.get(name))?
            }
            CompareOperand::And => write!(f, " AND")?,
            CompareOperand::Or => write!(f, " OR")?,
            CompareOperand::EndAndOr => write!(f, " END_AND_OR")?,
            CompareOperand::Subtract => write!(f, " SUBTRACT")?,
        }
    }
    Ok(())
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        for (instr, addr) in self.iter() {
            let (_, width) = decode_instr(&self.code, addr);
            match instr {
                Instr::Compare(args) => {
                    write!(f, "{:05x}: COMPARE", addr)?;
                    fmt_operands(f, args.args, &self.strings)?;
                    writeln!(f)?;
                }
                Instr::CompareSimple(args) => {
                    write!(f, "{:05x}: COMPARE_SIMPLE", addr)?;
                    fmt_operands(f, args.args, &self.strings)?;
                    writeln!(f)?;
                }
                Instr::Jump(_)
                | Instr::ForkJump(_)
                | Instr::ForkStay(_)
                | Instr::ForkReplaceJump(_)
                | Instr::ForkReplaceStay(_) => {
                    writeln!(
                        f,
                        "{:05x}: {} {:05x}",
                        addr,
                        opcode_name(self.code[addr]),
                        instr.jump_target(addr, width).unwrap(),
                    )?;
                }
                Instr::JumpNonEmpty { checkpoint, form, .. } => {
                    writeln!(
                        f,
                        "{:05x}: JUMP_NON_EMPTY({}) {:05x} cp={}",
                        addr,
                        opcode_name(form),
                        instr.jump_target(addr, width).unwrap(),
                        checkpoint,
                    )?;
                }
                Instr::ForkIf { form, condition, .. } => {
                    writeln!(
                        f,
                        "{:05x}: FORK_IF({}, {}) {:05x}",
                        addr,
                        opcode_name(form),
                        condition,
                        instr.jump_target(addr, width).unwrap(),
                    )?;
                }
                Instr::Repeat { count, id, .. } => {
                    writeln!(
                        f,
                        "{:05x}: REPEAT {:05x} count={} id={}",
                        addr,
                        instr.jump_target(addr, width).unwrap(),
                        count,
                        id,
                    )?;
                }
                Instr::SeekTo(cp) => {
                    writeln!(f, "{:05x}: SEEK_TO {:#04x}", addr, cp)?;
                }
                Instr::FailIfEmpty(cp) => {
                    writeln!(f, "{:05x}: FAIL_IF_EMPTY cp={}", addr, cp)?;
                }
                Instr::Checkpoint(id) => {
                    writeln!(f, "{:05x}: CHECKPOINT id={}", addr, id)?;
                }
                Instr::GoBack(count) => {
                    writeln!(f, "{:05x}: GO_BACK {}", addr, count)?;
                }
                Instr::CheckBoundary(kind) => {
                    writeln!(f, "{:05x}: CHECK_BOUNDARY {}", addr, kind)?;
                }
                Instr::SaveLeftCaptureGroup(group)
                | Instr::SaveRightCaptureGroup(group)
                | Instr::ClearCaptureGroup(group) => {
                    writeln!(
                        f,
                        "{:05x}: {} {}",
                        addr,
                        opcode_name(self.code[addr]),
                        group,
                    )?;
                }
                Instr::SaveRightNamedCaptureGroup { group, name } => {
                    writeln!(
                        f,
                        "{:05x}: SAVE_RIGHT_NAMED_CAPTURE_GROUP {} {:?}",
                        addr,
                        group,
                        self.strings.get(name as u32),
                    )?;
                }
                Instr::ResetRepeat(id) => {
                    writeln!(f, "{:05x}: RESET_REPEAT id={}", addr, id)?;
                }
                _ => {
                    writeln!(
                        f,
                        "{:05x}: {}",
                        addr,
                        opcode_name(self.code[addr])
                    )?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn string_table_interning() {
        let mut table = StringTable::default();
        assert_eq!(table.intern("ab"), 0);
        assert_eq!(table.intern("cd"), 1);
        assert_eq!(table.intern("ab"), 0);
        assert_eq!(table.get(1), "cd");
    }

    #[test]
    fn append_remaps_string_operands() {
        let mut target = Program::new();
        target.emit_compare_string("xy");

        let mut other = Program::new();
        other.emit_compare_string("ab");
        other.emit_compare_string("xy");

        target.append_program(other);
        assert_eq!(target.strings().len(), 2);

        let ops: Vec<_> = target
            .iter()
            .map(|(instr, _)| match instr {
                Instr::Compare(args) => compare::decode_operands(args.args),
                _ => panic!("expected a compare"),
            })
            .collect();
        assert_eq!(
            ops,
            vec![
                vec![CompareOperand::String(0)],
                vec![CompareOperand::String(1)],
                vec![CompareOperand::String(0)],
            ]
        );
    }

    #[test]
    fn disassembly() {
        let mut program = Program::new();
        program.emit_compare_char('a' as u32);
        program.emit_jump(Instr::FORK_STAY, -7);
        assert_eq!(
            program.to_string(),
            "\n00000: COMPARE CHAR 0x61\n00005: FORK_STAY 00000\n"
        );
    }
}
