/*!
Generic bytecode edit engine.

Given a program and a set of ordered, disjoint `(range, replacement)`
edits, the rewriter rebuilds the program with every range excised, every
replacement spliced in, and every jump offset in the kept instructions
recomputed against the new addresses. Replacement code is spliced verbatim:
any jump it contains must be internal to the replacement (the dot-star
rewrite's two-instruction loop is the canonical example).

A jump whose target cannot be relocated — it lands inside a replaced range
(other than at its start) or inside the body of a multi-word instruction —
is an upstream bug: the rewriter aborts with the whole program attached
rather than emit code that silently jumps somewhere else.
*/

use rustc_hash::FxHashMap;

use crate::instr::{decode_instr, jump_slot, Word};
use crate::program::Program;

/// A single range replacement: the instructions in `[start, end)` are
/// removed and `replacement` is spliced in their place.
#[derive(Debug)]
pub(crate) struct Edit {
    pub start: usize,
    pub end: usize,
    pub replacement: Vec<Word>,
}

/// Decision returned by the callback of [`Rewriter::rebuild_each`] for
/// every visited instruction.
pub(crate) enum Visit {
    /// Keep the instruction, relocating its jump offset if it has one.
    Keep,
    /// Drop the instruction.
    Remove,
    /// Drop the instruction and splice these words in its place.
    Replace(Vec<Word>),
}

/// Rebuilds a program after a set of edits, relocating every jump.
pub(crate) struct Rewriter<'a> {
    program: &'a Program,
    /// The pattern the program was compiled from; diagnostics only.
    pattern: &'a str,
    /// Instruction boundaries of the input program: `(addr, width)`.
    instrs: Vec<(usize, usize)>,
}

impl<'a> Rewriter<'a> {
    pub fn new(program: &'a Program, pattern: &'a str) -> Self {
        let mut instrs = Vec::new();
        let mut addr = 0;
        while addr < program.len() {
            let (_, width) = decode_instr(&program.code, addr);
            instrs.push((addr, width));
            addr += width;
        }
        Self { program, pattern, instrs }
    }

    /// Visits every instruction once and rebuilds the program from the
    /// returned decisions. The uniform "delete, optionally insert
    /// something else" form used by the passes that edit single
    /// instructions.
    pub fn rebuild_each(
        self,
        mut visit: impl FnMut(&Program, usize, usize) -> Visit,
    ) -> Program {
        let actions: Vec<Visit> = self
            .instrs
            .iter()
            .map(|&(addr, width)| visit(self.program, addr, width))
            .collect();

        let mut map = FxHashMap::default();
        let mut new_ip = 0;
        for (&(addr, width), action) in self.instrs.iter().zip(&actions) {
            map.insert(addr, new_ip);
            match action {
                Visit::Keep => new_ip += width,
                Visit::Remove => {}
                Visit::Replace(replacement) => new_ip += replacement.len(),
            }
        }
        map.insert(self.program.len(), new_ip);

        let mut result = Program {
            code: Vec::with_capacity(new_ip),
            strings: self.program.strings.clone(),
            capture_groups: self.program.capture_groups,
        };
        for (&(addr, width), action) in self.instrs.iter().zip(&actions) {
            match action {
                Visit::Keep => {
                    self.copy_relocated(addr, width, &map, &mut result)
                }
                Visit::Remove => {}
                Visit::Replace(replacement) => {
                    result.code.extend_from_slice(replacement)
                }
            }
        }
        result
    }

    /// Applies ordered, disjoint range edits. Out-of-order, overlapping or
    /// instruction-misaligned edits are an internal fault.
    pub fn rebuild_with_edits(self, edits: &[Edit]) -> Program {
        let starts: FxHashMap<usize, usize> =
            self.instrs.iter().map(|&(addr, width)| (addr, width)).collect();
        for (i, edit) in edits.iter().enumerate() {
            assert!(
                edit.start < edit.end,
                "empty edit range {}..{}",
                edit.start,
                edit.end
            );
            assert!(
                starts.contains_key(&edit.start),
                "edit start {} is not an instruction boundary",
                edit.start
            );
            assert!(
                edit.end == self.program.len()
                    || starts.contains_key(&edit.end),
                "edit end {} is not an instruction boundary",
                edit.end
            );
            if let Some(next) = edits.get(i + 1) {
                assert!(
                    edit.end <= next.start,
                    "edits are overlapping or out of order: {}..{} then {}..{}",
                    edit.start,
                    edit.end,
                    next.start,
                    next.end
                );
            }
        }

        let mut map = FxHashMap::default();
        let mut new_ip = 0;
        let mut edit_iter = edits.iter().peekable();
        for &(addr, width) in &self.instrs {
            while edit_iter.peek().map_or(false, |e| e.end <= addr) {
                edit_iter.next();
            }
            match edit_iter.peek() {
                Some(edit) if addr >= edit.start && addr < edit.end => {
                    // Only the first instruction of a replaced range stays
                    // addressable: jumps to it land on the replacement.
                    if addr == edit.start {
                        map.insert(addr, new_ip);
                        new_ip += edit.replacement.len();
                    }
                }
                _ => {
                    map.insert(addr, new_ip);
                    new_ip += width;
                }
            }
        }
        map.insert(self.program.len(), new_ip);

        let mut result = Program {
            code: Vec::with_capacity(new_ip),
            strings: self.program.strings.clone(),
            capture_groups: self.program.capture_groups,
        };
        let mut edit_iter = edits.iter().peekable();
        for &(addr, width) in &self.instrs {
            while edit_iter.peek().map_or(false, |e| e.end <= addr) {
                edit_iter.next();
            }
            match edit_iter.peek() {
                Some(edit) if addr >= edit.start && addr < edit.end => {
                    if addr == edit.start {
                        result.code.extend_from_slice(&edit.replacement);
                    }
                }
                _ => self.copy_relocated(addr, width, &map, &mut result),
            }
        }
        result
    }

    /// Copies one kept instruction into `result`, rewriting its jump
    /// offset through the address map.
    fn copy_relocated(
        &self,
        addr: usize,
        width: usize,
        map: &FxHashMap<usize, usize>,
        result: &mut Program,
    ) {
        let code = &self.program.code;
        let out_start = result.code.len();
        result.code.extend_from_slice(&code[addr..addr + width]);

        let Some(slot) = jump_slot(code[addr]) else { return };
        let old_offset = code[addr + slot.slot] as i64;
        let old_target = if slot.backward {
            addr as i64 - old_offset
        } else {
            addr as i64 + width as i64 + old_offset
        } as usize;

        let new_target = *map.get(&old_target).unwrap_or_else(|| {
            panic!(
                "in pattern /{}/: jump target {} (from {}) not found in \
                 address map{}",
                self.pattern, old_target, addr, self.program
            )
        });
        let new_source = map[&addr];
        let new_offset = if slot.backward {
            new_source as i64 - new_target as i64
        } else {
            new_target as i64 - new_source as i64 - width as i64
        };
        result.code[out_start + slot.slot] = new_offset as Word;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::instr::Instr;

    fn resolved_targets(program: &Program) -> Vec<(usize, usize)> {
        program
            .iter()
            .filter_map(|(instr, addr)| {
                let (_, width) = program.instr_at(addr);
                instr.jump_target(addr, width).map(|t| (addr, t))
            })
            .collect()
    }

    #[test]
    fn empty_edit_list_round_trips() {
        let mut program = Program::new();
        program.emit_jump(Instr::FORK_STAY, 5);
        program.emit_compare_char('a' as u32);
        program.emit_jump(Instr::JUMP, -9);

        let before = program.clone();
        let rebuilt =
            Rewriter::new(&program, "").rebuild_with_edits(&[]);
        assert_eq!(rebuilt.code, before.code);
        assert_eq!(resolved_targets(&rebuilt), resolved_targets(&before));
    }

    #[test]
    fn removing_shifts_downstream_targets() {
        // fork over a to-be-deleted jump: the stored offset shrinks while
        // the resolved target tracks the surviving instruction.
        let mut program = Program::new();
        program.emit_jump(Instr::FORK_JUMP, 2);
        program.emit_jump(Instr::JUMP, 0);
        program.emit_compare_char('a' as u32);

        let rebuilt = Rewriter::new(&program, "").rebuild_each(
            |program, addr, _| match program.instr_at(addr).0 {
                Instr::Jump(0) => Visit::Remove,
                _ => Visit::Keep,
            },
        );
        assert_eq!(
            rebuilt.code,
            vec![
                Instr::FORK_JUMP,
                0,
                Instr::COMPARE,
                1,
                2,
                crate::compare::CompareOperand::CHAR,
                'a' as Word
            ]
        );
    }

    #[test]
    fn backward_repeat_offsets_are_relocated() {
        // compare 'a'; jump 0 (deleted); repeat back to 0
        let mut program = Program::new();
        program.emit_compare_char('a' as u32);
        program.emit_jump(Instr::JUMP, 0);
        program.extend_from_slice(&[Instr::REPEAT, 7, 3, 0]);

        let rebuilt = Rewriter::new(&program, "").rebuild_each(
            |program, addr, _| match program.instr_at(addr).0 {
                Instr::Jump(0) => Visit::Remove,
                _ => Visit::Keep,
            },
        );
        let (repeat, width) = rebuilt.instr_at(5);
        assert_eq!(repeat, Instr::Repeat { offset: 5, count: 3, id: 0 });
        assert_eq!(repeat.jump_target(5, width), Some(0));
    }

    #[test]
    fn range_edits_splice_replacements() {
        let mut program = Program::new();
        program.emit_compare_char('a' as u32);
        program.emit_compare_char('b' as u32);
        program.emit_jump(Instr::JUMP, -12);

        // Replace both compares with a single one.
        let mut replacement = Program::new();
        replacement.emit_compare_char('c' as u32);
        let rebuilt = Rewriter::new(&program, "").rebuild_with_edits(&[
            Edit { start: 0, end: 10, replacement: replacement.code },
        ]);

        let (jump, width) = rebuilt.instr_at(5);
        assert_eq!(jump, Instr::Jump(-7));
        assert_eq!(jump.jump_target(5, width), Some(0));
    }

    #[test]
    #[should_panic(expected = "overlapping or out of order")]
    fn overlapping_edits_are_a_fault() {
        let mut program = Program::new();
        program.emit_compare_char('a' as u32);
        program.emit_compare_char('b' as u32);
        Rewriter::new(&program, "").rebuild_with_edits(&[
            Edit { start: 0, end: 10, replacement: vec![] },
            Edit { start: 5, end: 10, replacement: vec![] },
        ]);
    }

    #[test]
    #[should_panic(expected = "not found in address map")]
    fn jump_into_replaced_range_is_a_fault() {
        let mut program = Program::new();
        program.emit_compare_char('a' as u32);
        program.emit_compare_char('b' as u32);
        // Jumps to the second compare, which is about to vanish.
        program.emit_jump(Instr::JUMP, -7);

        Rewriter::new(&program, "").rebuild_with_edits(&[Edit {
            start: 0,
            end: 10,
            replacement: vec![],
        }]);
    }
}
