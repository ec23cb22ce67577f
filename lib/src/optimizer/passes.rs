/*!
The six optimization passes, in their fixed execution order:

1. drop control-flow instructions whose resolved offset is zero;
2. rewrite a whole pattern of literal compares as a substring search;
3. upgrade loops to atomic groups where the follow set cannot overlap;
4. merge runs of single-character compares into one string compare;
5. rewrite `.*`-plus-anchor loops as a seek to the anchor code point;
6. demote single-operand compares to their cheaper fixed-shape form.

Every pass collects its candidates first and issues one consolidated
rewrite; a pass with nothing to do hands its input back unchanged. When a
pass cannot prove a rewrite preserves the matched language it skips the
candidate — approximation is never an option here.
*/

use log::*;
use rustc_hash::FxHashSet;

use super::blocks::Block;
use super::compares::{self, InterpretedCompares};
use super::rewriter::{Edit, Rewriter, Visit};
use crate::compare::{self, CompareOperand};
use crate::instr::{Instr, Word};
use crate::program::Program;

/// Pass 1: deletes jumps and forks whose resolved offset is zero. A
/// zero-offset jump transfers control to the next instruction and a
/// zero-offset fork stacks an alternative identical to falling through, so
/// removal needs no safety condition.
pub(super) fn remove_useless_jumps(
    program: Program,
    pattern: &str,
) -> Program {
    let mut removed = 0usize;
    let result = Rewriter::new(&program, pattern).rebuild_each(
        |program, addr, _| {
            let useless = match program.instr_at(addr).0 {
                Instr::Jump(offset)
                | Instr::JumpNonEmpty { offset, .. }
                | Instr::ForkJump(offset)
                | Instr::ForkStay(offset)
                | Instr::ForkReplaceJump(offset)
                | Instr::ForkReplaceStay(offset)
                | Instr::ForkIf { offset, .. } => offset == 0,
                _ => false,
            };
            if useless {
                removed += 1;
                Visit::Remove
            } else {
                Visit::Keep
            }
        },
    );
    if removed > 0 {
        debug!("removed {} useless jumps from /{}/", removed, pattern);
    }
    result
}

/// Pass 2: if the program is a single block of literal character compares,
/// the whole match is a substring search. Returns the code units the
/// runtime should search for instead of executing bytecode; an empty
/// program is a trivial empty match.
pub(super) fn as_substring_search(
    program: &Program,
    blocks: &[Block],
) -> Option<String> {
    if blocks.len() > 1 {
        return None;
    }
    if blocks.is_empty() {
        return Some(String::new());
    }

    let mut units = String::new();
    for (instr, _) in program.iter() {
        let Instr::Compare(args) = instr else { return None };
        if args.argc == 0 {
            // Matches nothing; a substring search cannot express that.
            return None;
        }
        for op in compare::decode_operands(args.args) {
            let CompareOperand::Char(cp) = op else { return None };
            units.push(char::from_u32(cp)?);
        }
    }
    Some(units)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AtomicPrecondition {
    SatisfiedWithProperHeader,
    SatisfiedWithEmptyHeader,
    NotSatisfied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopForm {
    /// A block forking back to its own start.
    WithoutHeader,
    /// A header block forking over a body that jumps back to it.
    WithHeader,
}

fn eligible_loop_jump(
    program: &Program,
    ip: usize,
    loop_start: usize,
    form: LoopForm,
) -> bool {
    let (instr, width) = program.instr_at(ip);
    match instr {
        Instr::JumpNonEmpty { form: jump_form, .. } => {
            let form_fits = match form {
                LoopForm::WithHeader => jump_form == Instr::JUMP,
                LoopForm::WithoutHeader => {
                    jump_form == Instr::FORK_JUMP
                        || jump_form == Instr::FORK_STAY
                }
            };
            form_fits && instr.jump_target(ip, width) == Some(loop_start)
        }
        Instr::ForkJump(_) | Instr::ForkStay(_) => {
            form == LoopForm::WithoutHeader
                && instr.jump_target(ip, width) == Some(loop_start)
        }
        // An unconditional backward jump is an infinite loop, not a
        // backtracking one; it only closes the loop-with-header form.
        Instr::Jump(_) => {
            form == LoopForm::WithHeader
                && instr.jump_target(ip, width) == Some(loop_start)
        }
        _ => false,
    }
}

/// Checks that the first compare reachable after a loop cannot match
/// anything the loop body matches. `repeated` is scanned for the body's
/// compare sets (following unconditional jumps); `following` is scanned
/// for the first effectful instruction after the loop.
fn atomic_rewrite_precondition(
    program: &Program,
    mut repeated: Block,
    mut following: Block,
    blocks: &[Block],
) -> AtomicPrecondition {
    use AtomicPrecondition::*;

    let mut repeated_values: Vec<Vec<CompareOperand>> = Vec::new();
    let mut seen_actionable = false;
    let mut followed_jumps = 0usize;
    let mut ip = repeated.start;
    while ip < repeated.end {
        let (instr, width) = program.instr_at(ip);
        match instr {
            Instr::Compare(args) => {
                seen_actionable = true;
                let ops = compare::decode_operands(args.args);
                if repeated_values.is_empty()
                    && ops
                        .iter()
                        .any(|op| matches!(op, CompareOperand::AnyChar))
                {
                    return NotSatisfied;
                }
                repeated_values.push(ops);
            }
            Instr::CheckBegin | Instr::CheckEnd => {
                seen_actionable = true;
                if repeated_values.is_empty() {
                    return SatisfiedWithProperHeader;
                }
            }
            Instr::CheckBoundary(_) | Instr::Restore | Instr::GoBack(_) => {
                return NotSatisfied
            }
            Instr::ForkJump(_)
            | Instr::ForkReplaceJump(_)
            | Instr::ForkIf { .. }
            | Instr::JumpNonEmpty { .. } => {
                // We could recursively resolve the follow set, but
                // pretending this goes nowhere is faster.
                if !seen_actionable {
                    return NotSatisfied;
                }
            }
            Instr::Jump(_) => {
                // Unconditional, just follow it.
                let target = instr.jump_target(ip, width).unwrap();
                followed_jumps += 1;
                if followed_jumps > blocks.len() {
                    return NotSatisfied;
                }
                let Some(next) =
                    blocks.iter().find(|block| block.start == target)
                else {
                    return NotSatisfied;
                };
                repeated = *next;
                ip = repeated.start;
                continue;
            }
            _ => {}
        }
        ip += width;
    }
    trace!("collected {} compare lists from loop body", repeated_values.len());

    // Chase empty following blocks: a single unconditional forward jump is
    // looked through, conditional forms give up.
    let mut accept_empty_follow = false;
    let mut followed_jumps = 0usize;
    while following.start == following.end && !accept_empty_follow {
        let (instr, width) = program.instr_at(following.start);
        match instr {
            Instr::Jump(_) => {
                let target =
                    instr.jump_target(following.start, width).unwrap();
                if target < following.start {
                    return NotSatisfied;
                }
                followed_jumps += 1;
                if followed_jumps > blocks.len() {
                    return NotSatisfied;
                }
                let Some(next) =
                    blocks.iter().find(|block| block.start == target)
                else {
                    return NotSatisfied;
                };
                following = *next;
            }
            Instr::ForkJump(_)
            | Instr::ForkIf { .. }
            | Instr::ForkReplaceJump(_)
            | Instr::JumpNonEmpty { .. } => return NotSatisfied,
            _ => accept_empty_follow = true,
        }
    }

    // Find the first compare in the following block; it must not match any
    // of the values the loop body can end with.
    let mut has_compare = false;
    let mut final_instruction = following.start;
    let mut ip = following.start;
    while ip < following.end {
        final_instruction = ip;
        let (instr, width) = program.instr_at(ip);
        match instr {
            Instr::Compare(args) => {
                has_compare = true;
                let ops = compare::decode_operands(args.args);
                if !ops.is_empty() {
                    if ops.iter().any(|op| {
                        matches!(
                            op,
                            CompareOperand::AnyChar
                                | CompareOperand::Reference(_)
                                | CompareOperand::NamedReference(_)
                        )
                    }) {
                        return NotSatisfied;
                    }
                    if repeated_values
                        .iter()
                        .any(|repeated| compares::has_overlap(&ops, repeated))
                    {
                        return NotSatisfied;
                    }
                    return SatisfiedWithProperHeader;
                }
            }
            // Nothing can match past the end.
            Instr::CheckBegin | Instr::CheckEnd => {
                return SatisfiedWithProperHeader
            }
            Instr::CheckBoundary(_) => return NotSatisfied,
            Instr::ForkJump(_)
            | Instr::ForkIf { .. }
            | Instr::ForkReplaceJump(_)
            | Instr::JumpNonEmpty { .. } => {
                if !has_compare {
                    return NotSatisfied;
                }
            }
            _ => {}
        }
        ip += width;
    }

    // If the following block falls through, we can't rewrite it.
    match program.instr_at(final_instruction).0 {
        Instr::Jump(_)
        | Instr::JumpNonEmpty { .. }
        | Instr::ForkJump(_)
        | Instr::ForkReplaceJump(_)
        | Instr::ForkIf { .. } => {}
        _ => return NotSatisfied,
    }

    if has_compare {
        SatisfiedWithProperHeader
    } else {
        SatisfiedWithEmptyHeader
    }
}

/// Pass 3: upgrades the fork of an eligible loop to its fork-replace
/// variant, which discards the previous backtrack point instead of
/// stacking one and thereby makes the repetition atomic.
///
/// Two shapes are recognized: a block that forks back to its own start,
/// and a header that forks over a body ending in an unconditional jump
/// back to the header (including the degenerate case where the body jumps
/// back to the fork instruction itself). Only the first eligible site is
/// rewritten per run; the upgrade changes no instruction widths, so no
/// relocation is needed.
pub(super) fn rewrite_loops_as_atomic_groups(
    program: &mut Program,
    blocks: &[Block],
    pattern: &str,
) {
    use AtomicPrecondition::*;

    let mut candidate: Option<usize> = None;

    'search: for (i, &forking) in blocks.iter().enumerate() {
        let fallback = blocks.get(i + 1).copied();

        // A block whose last instruction forks back to its own start.
        if eligible_loop_jump(
            program,
            forking.end,
            forking.start,
            LoopForm::WithoutHeader,
        ) {
            match fallback {
                // No follow at all: nothing can be matched after the
                // loop, the rewrite is trivially safe.
                None => {
                    candidate = Some(forking.end);
                    break 'search;
                }
                Some(next) => {
                    let precondition = atomic_rewrite_precondition(
                        program, forking, next, blocks,
                    );
                    if precondition != NotSatisfied {
                        candidate = Some(forking.end);
                        break 'search;
                    }
                }
            }
        }

        // A header whose following block jumps back unconditionally,
        // either to the header's start or (degenerate form) to the fork
        // instruction itself.
        if let Some(next) = fallback {
            for loop_start in [forking.start, forking.end] {
                if !eligible_loop_jump(
                    program,
                    next.end,
                    loop_start,
                    LoopForm::WithHeader,
                ) {
                    continue;
                }
                if !matches!(
                    program.instr_at(forking.end).0,
                    Instr::ForkJump(_) | Instr::ForkStay(_)
                ) {
                    continue;
                }
                let satisfied = match blocks.get(i + 2) {
                    None => true,
                    Some(&after) => {
                        atomic_rewrite_precondition(
                            program, next, after, blocks,
                        ) != NotSatisfied
                    }
                };
                if satisfied {
                    candidate = Some(forking.end);
                    break 'search;
                }
            }
        }
    }

    let Some(ip) = candidate else {
        trace!("no atomic-group candidates in /{}/", pattern);
        return;
    };
    debug!("upgrading loop fork at {} in /{}/", ip, pattern);

    let code = &mut program.code;
    match code[ip] {
        Instr::FORK_STAY => code[ip] = Instr::FORK_REPLACE_STAY,
        Instr::FORK_JUMP => code[ip] = Instr::FORK_REPLACE_JUMP,
        Instr::JUMP_NON_EMPTY => {
            let form = &mut code[ip + 3];
            match *form {
                Instr::FORK_STAY => *form = Instr::FORK_REPLACE_STAY,
                Instr::FORK_JUMP => *form = Instr::FORK_REPLACE_JUMP,
                _ => unreachable!(
                    "candidate JumpNonEmpty at {} has form {}",
                    ip, *form
                ),
            }
        }
        opcode => {
            unreachable!("candidate at {} has opcode {:#x}", ip, opcode)
        }
    }
}

/// Pass 4: replaces every run of two or more consecutive single-character
/// compares within a block by one literal-string compare.
pub(super) fn merge_adjacent_char_compares(
    mut program: Program,
    blocks: &[Block],
    pattern: &str,
) -> Program {
    struct Sequence {
        start: usize,
        end: usize,
        chars: String,
    }

    let mut sequences: Vec<Sequence> = Vec::new();
    for block in blocks {
        let mut in_sequence = false;
        let mut sequence_start = 0;
        let mut chars = String::new();
        let mut compares = 0usize;

        let mut ip = block.start;
        while ip <= block.end {
            let (instr, width) = program.instr_at(ip);

            let mut single_char = None;
            if let Instr::Compare(args) = instr {
                let ops = compare::decode_operands(args.args);
                if let [CompareOperand::Char(cp)] = ops[..] {
                    single_char = char::from_u32(cp);
                }
            }

            match single_char {
                Some(c) => {
                    if !in_sequence {
                        sequence_start = ip;
                        chars.clear();
                        compares = 0;
                        in_sequence = true;
                    }
                    chars.push(c);
                    compares += 1;
                }
                None => {
                    if in_sequence && compares >= 2 {
                        sequences.push(Sequence {
                            start: sequence_start,
                            end: ip,
                            chars: std::mem::take(&mut chars),
                        });
                    }
                    in_sequence = false;
                }
            }

            ip += width;
        }

        if in_sequence && compares >= 2 {
            sequences.push(Sequence {
                start: sequence_start,
                end: ip,
                chars,
            });
        }
    }

    if sequences.is_empty() {
        return program;
    }
    debug!(
        "merging {} single-character runs in /{}/",
        sequences.len(),
        pattern
    );

    let edits: Vec<Edit> = sequences
        .into_iter()
        .map(|sequence| {
            let index = program.intern_string(&sequence.chars);
            Edit {
                start: sequence.start,
                end: sequence.end,
                replacement: vec![
                    Instr::COMPARE,
                    1,
                    2,
                    CompareOperand::STRING,
                    index as Word,
                ],
            }
        })
        .collect();

    Rewriter::new(&program, pattern).rebuild_with_edits(&edits)
}

/// Pass 5: rewrites the `.*`-loop skeleton
/// `ForkStay → Checkpoint → Compare AnyChar → [FailIfEmpty] →
/// JumpNonEmpty(back)`, when it is followed (modulo bookkeeping) by a
/// compare reducible to exactly one code point, into a two-instruction
/// seek-to-code-point-then-retry loop.
pub(super) fn rewrite_dot_star_as_seek(
    program: Program,
    blocks: &[Block],
    pattern: &str,
) -> Program {
    struct SeekCandidate {
        fork_ip: usize,
        jump_ip: usize,
        seek_cp: u32,
    }

    let mut candidates: Vec<SeekCandidate> = Vec::new();

    'blocks: for block in blocks {
        let mut ip = block.start;

        // Skip non-matching bookkeeping at the start of the block.
        loop {
            if ip > block.end {
                continue 'blocks;
            }
            let (instr, width) = program.instr_at(ip);
            if instr.is_bookkeeping() {
                ip += width;
            } else {
                break;
            }
        }

        // (1) the fork over the loop
        let (instr, width) = program.instr_at(ip);
        let Instr::ForkStay(_) = instr else { continue };
        let fork_ip = ip;
        let fork_target = instr.jump_target(ip, width).unwrap();
        // The block after the loop is named by the fork target, not
        // necessarily the next sequential block.
        let Some(following) =
            blocks.iter().find(|block| block.start == fork_target)
        else {
            continue;
        };
        ip += width;

        // (2) the checkpoint
        let (instr, width) = program.instr_at(ip);
        let Instr::Checkpoint(checkpoint_id) = instr else { continue };
        ip += width;

        // (3) the any-char compare
        let (instr, width) = program.instr_at(ip);
        let Instr::Compare(args) = instr else { continue };
        let ops = compare::decode_operands(args.args);
        if !matches!(ops[..], [CompareOperand::AnyChar]) {
            continue;
        }
        ip += width;

        // (3.5) an optional empty-iteration guard, a no-op for `.*`
        let (instr, width) = program.instr_at(ip);
        if matches!(instr, Instr::FailIfEmpty(_)) {
            ip += width;
        }

        // (4) the back-jump to the fork, guarding the same checkpoint
        let (instr, width) = program.instr_at(ip);
        let Instr::JumpNonEmpty { checkpoint, .. } = instr else {
            continue;
        };
        if instr.jump_target(ip, width) != Some(fork_ip)
            || checkpoint != checkpoint_id
        {
            continue;
        }
        let jump_ip = ip;

        // The following block must lead with a compare reducible to one
        // code point, with only bookkeeping in between.
        let mut ip = following.start;
        while ip <= following.end {
            let (instr, width) = program.instr_at(ip);
            if instr.is_bookkeeping() {
                ip += width;
                continue;
            }
            let Instr::Compare(args) = instr else { continue 'blocks };
            let ops = compare::decode_operands(args.args);
            let mut interpreted = InterpretedCompares::default();
            if !compares::interpret_compares(
                &ops,
                &mut interpreted,
                Some(program.strings()),
                true,
            ) {
                continue 'blocks;
            }
            if interpreted.ranges.len() != 1
                || !interpreted.negated_ranges.is_empty()
                || !interpreted.char_classes.is_empty()
                || !interpreted.negated_char_classes.is_empty()
                || interpreted.has_any_unicode_property
            {
                continue 'blocks;
            }
            let (&from, &to) = interpreted.ranges.iter().next().unwrap();
            if from != to {
                continue 'blocks;
            }

            if candidates.last().map_or(true, |c| c.fork_ip != fork_ip) {
                candidates.push(SeekCandidate {
                    fork_ip,
                    jump_ip,
                    seek_cp: from,
                });
            }
            continue 'blocks;
        }
    }

    if candidates.is_empty() {
        return program;
    }
    debug!(
        "rewriting {} dot-star loops as seeks in /{}/",
        candidates.len(),
        pattern
    );

    let edits: Vec<Edit> = candidates
        .iter()
        .map(|candidate| Edit {
            start: candidate.fork_ip,
            // The back-jump is 4 words wide.
            end: candidate.jump_ip + 4,
            replacement: vec![
                Instr::SEEK_TO,
                candidate.seek_cp as Word,
                Instr::FORK_STAY,
                // Back to the seek; internal to the replacement.
                (-4_i64) as Word,
            ],
        })
        .collect();

    Rewriter::new(&program, pattern).rebuild_with_edits(&edits)
}

/// Pass 6: re-encodes compares whose operand list is a single concrete
/// comparison as `CompareSimple`, which the VM dispatches without the
/// argument-list framing.
pub(super) fn simplify_single_operand_compares(
    program: Program,
    blocks: &[Block],
    pattern: &str,
) -> Program {
    let mut candidates: FxHashSet<usize> = FxHashSet::default();

    for block in blocks {
        let mut ip = block.start;
        while ip <= block.end {
            let (instr, width) = program.instr_at(ip);
            if let Instr::Compare(args) = instr {
                let ops = compare::decode_operands(args.args);
                if ops.len() == 1
                    && !matches!(
                        ops[0],
                        CompareOperand::Inverse
                            | CompareOperand::TemporaryInverse
                            | CompareOperand::And
                            | CompareOperand::Or
                            | CompareOperand::EndAndOr
                            | CompareOperand::Subtract
                    )
                {
                    candidates.insert(ip);
                }
            }
            ip += width;
        }
    }

    if candidates.is_empty() {
        return program;
    }
    debug!(
        "demoting {} compares to the simple form in /{}/",
        candidates.len(),
        pattern
    );

    Rewriter::new(&program, pattern).rebuild_each(|program, addr, width| {
        if !candidates.contains(&addr) {
            return Visit::Keep;
        }
        // Keep the argument size and the operand, drop the operand count.
        let mut replacement = vec![Instr::COMPARE_SIMPLE];
        replacement
            .extend_from_slice(&program.code[addr + 2..addr + width]);
        Visit::Replace(replacement)
    })
}
