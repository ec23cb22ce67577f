/*! A small reference backtracking executor, used only to check that a
rewritten program matches the same inputs as the original. It supports the
instruction shapes the tests produce and panics loudly on anything else,
so a test that drifts outside the supported subset fails instead of
silently passing. */

use rustc_hash::FxHashSet;

use crate::compare::{self, CompareOperand};
use crate::instr::{CompareArgs, ForkCondition, Instr, Word};
use crate::program::Program;

/// True if `program` matches anywhere in `input`.
pub(crate) fn matches(program: &Program, input: &str) -> bool {
    let chars: Vec<char> = input.chars().collect();
    (0..=chars.len()).any(|start| try_match_at(program, &chars, start))
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct State {
    ip: usize,
    pos: usize,
    checkpoints: Vec<(Word, usize)>,
}

impl State {
    fn checkpoint(&self, id: Word) -> Option<usize> {
        self.checkpoints
            .iter()
            .find(|(recorded, _)| *recorded == id)
            .map(|(_, pos)| *pos)
    }

    fn record_checkpoint(&mut self, id: Word) {
        if let Some(entry) =
            self.checkpoints.iter_mut().find(|(recorded, _)| *recorded == id)
        {
            entry.1 = self.pos;
        } else {
            self.checkpoints.push((id, self.pos));
        }
    }
}

fn try_match_at(program: &Program, chars: &[char], start: usize) -> bool {
    let code = program.as_words();
    let mut state = State { ip: 0, pos: start, checkpoints: Vec::new() };
    let mut alternatives: Vec<State> = Vec::new();
    let mut visited: FxHashSet<State> = FxHashSet::default();
    let mut steps = 0u32;

    macro_rules! backtrack {
        () => {
            match alternatives.pop() {
                Some(alternative) => {
                    state = alternative;
                    continue;
                }
                None => return false,
            }
        };
    }

    loop {
        steps += 1;
        assert!(steps < 100_000, "runaway test program: {}", program);

        if state.ip >= code.len() {
            return true;
        }
        if !visited.insert(state.clone()) {
            backtrack!();
        }

        let (instr, width) = program.instr_at(state.ip);
        match instr {
            Instr::Exit => return true,
            Instr::Compare(args) | Instr::CompareSimple(args) => {
                match execute_compare(program, args, chars, state.pos) {
                    Some(consumed) => {
                        state.pos += consumed;
                        state.ip += width;
                    }
                    None => backtrack!(),
                }
            }
            Instr::Jump(_) => {
                state.ip = instr.jump_target(state.ip, width).unwrap();
            }
            Instr::ForkJump(_) | Instr::ForkReplaceJump(_) => {
                if matches!(instr, Instr::ForkReplaceJump(_)) {
                    alternatives.pop();
                }
                let target = instr.jump_target(state.ip, width).unwrap();
                let mut alternative = state.clone();
                alternative.ip = state.ip + width;
                alternatives.push(alternative);
                state.ip = target;
            }
            Instr::ForkStay(_) | Instr::ForkReplaceStay(_) => {
                if matches!(instr, Instr::ForkReplaceStay(_)) {
                    alternatives.pop();
                }
                let target = instr.jump_target(state.ip, width).unwrap();
                let mut alternative = state.clone();
                alternative.ip = target;
                alternatives.push(alternative);
                state.ip += width;
            }
            Instr::JumpNonEmpty { checkpoint, form, .. } => {
                let target = instr.jump_target(state.ip, width).unwrap();
                if state.checkpoint(checkpoint) == Some(state.pos) {
                    // Empty iteration; fall through.
                    state.ip += width;
                } else {
                    match form {
                        Instr::JUMP => state.ip = target,
                        Instr::FORK_JUMP | Instr::FORK_REPLACE_JUMP => {
                            if form == Instr::FORK_REPLACE_JUMP {
                                alternatives.pop();
                            }
                            let mut alternative = state.clone();
                            alternative.ip = state.ip + width;
                            alternatives.push(alternative);
                            state.ip = target;
                        }
                        Instr::FORK_STAY | Instr::FORK_REPLACE_STAY => {
                            if form == Instr::FORK_REPLACE_STAY {
                                alternatives.pop();
                            }
                            let mut alternative = state.clone();
                            alternative.ip = target;
                            alternatives.push(alternative);
                            state.ip += width;
                        }
                        other => panic!(
                            "executor: unsupported JumpNonEmpty form {}",
                            other
                        ),
                    }
                }
            }
            Instr::ForkIf { form, condition, .. } => {
                let holds = condition
                    == ForkCondition::AtStartOfLine as Word
                    && state.pos == 0;
                if holds {
                    assert_eq!(form, Instr::FORK_JUMP);
                    let target =
                        instr.jump_target(state.ip, width).unwrap();
                    let mut alternative = state.clone();
                    alternative.ip = state.ip + width;
                    alternatives.push(alternative);
                    state.ip = target;
                } else {
                    state.ip += width;
                }
            }
            Instr::Checkpoint(id) => {
                state.record_checkpoint(id);
                state.ip += width;
            }
            Instr::FailIfEmpty(id) => {
                if state.checkpoint(id) == Some(state.pos) {
                    backtrack!();
                }
                state.ip += width;
            }
            Instr::SeekTo(cp) => {
                match (state.pos..chars.len())
                    .find(|&i| chars[i] as u32 == cp)
                {
                    Some(found) => {
                        state.pos = found;
                        state.ip += width;
                    }
                    None => backtrack!(),
                }
            }
            Instr::CheckBegin => {
                if state.pos != 0 {
                    backtrack!();
                }
                state.ip += width;
            }
            Instr::CheckEnd => {
                if state.pos != chars.len() {
                    backtrack!();
                }
                state.ip += width;
            }
            _ if instr.is_bookkeeping() => state.ip += width,
            other => {
                panic!("executor: unsupported instruction {:?}", other)
            }
        }
    }
}

/// Evaluates a compare's operand list at `pos`, returning the number of
/// code points consumed on a match. Supports the shapes the tests emit: a
/// sole `String`, a list of positive concrete operands, or a single
/// concrete operand under one leading inversion operator.
fn execute_compare(
    program: &Program,
    args: CompareArgs<'_>,
    chars: &[char],
    pos: usize,
) -> Option<usize> {
    let ops = compare::decode_operands(args.args);

    if let [CompareOperand::String(index)] = ops[..] {
        let literal: Vec<char> =
            program.strings().get(index).chars().collect();
        return chars[pos.min(chars.len())..]
            .starts_with(&literal)
            .then_some(literal.len());
    }

    let (negate, concrete) = match &ops[..] {
        [CompareOperand::Inverse, op]
        | [CompareOperand::TemporaryInverse, op] => (true, vec![op]),
        list => (false, list.iter().collect()),
    };

    let cp = *chars.get(pos)? as u32;
    let mut hit = false;
    for op in concrete {
        hit |= match op {
            CompareOperand::AnyChar => true,
            CompareOperand::Char(c) => cp == *c,
            CompareOperand::CharRange(range) => {
                (range.from..=range.to).contains(&cp)
            }
            CompareOperand::CharClass(class) => {
                crate::chardata::char_class_matches(*class, cp)
            }
            CompareOperand::LookupTable(table) => table
                .ranges
                .iter()
                .any(|range| (range.from..=range.to).contains(&cp)),
            other => {
                panic!("executor: unsupported compare operand {:?}", other)
            }
        };
    }
    (hit != negate).then_some(1)
}
