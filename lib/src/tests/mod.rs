/*! End-to-end tests: full pipeline runs checked both structurally and by
differential execution against the reference executor in [`exec`]. */

use pretty_assertions::assert_eq;

use crate::compare::CompareOperand;
use crate::instr::{Instr, Word};
use crate::optimize;
use crate::program::Program;

pub(crate) mod exec;

use exec::matches;

/// Asserts that `before` and `after` agree on every input.
fn assert_equivalent(before: &Program, after: &Program, inputs: &[&str]) {
    for input in inputs {
        assert_eq!(
            matches(before, input),
            matches(after, input),
            "programs disagree on {:?}:\nbefore: {}\nafter: {}",
            input,
            before,
            after
        );
    }
}

/// The bytecode for a greedy `x*` loop with a header, followed by the
/// given follow program: `ForkStay over the loop; body; Jump back`.
fn star_loop_then(body_char: char, follow_char: char) -> Program {
    let mut program = Program::new();
    program.emit_jump(Instr::FORK_STAY, 7);
    program.emit_compare_char(body_char as u32);
    program.emit_jump(Instr::JUMP, -9);
    program.emit_compare_char(follow_char as u32);
    program
}

#[test]
fn literal_pattern_becomes_substring_search() {
    let mut program = Program::new();
    program.emit_compare_char('a' as u32);
    program.emit_compare_char('b' as u32);
    program.emit_compare_char('c' as u32);

    let (_, data) = optimize(program);
    assert_eq!(data.pure_substring_search.as_deref(), Some("abc"));
}

#[test]
fn any_char_blocks_substring_search() {
    let mut program = Program::new();
    program.emit_compare_char('a' as u32);
    program.emit_compare_any_char();
    program.emit_compare_char('c' as u32);

    let (_, data) = optimize(program);
    assert_eq!(data.pure_substring_search, None);
}

#[test]
fn empty_program_is_a_trivial_substring_search() {
    let (_, data) = optimize(Program::new());
    assert_eq!(data.pure_substring_search.as_deref(), Some(""));
}

#[test]
fn disjoint_star_loop_becomes_atomic() {
    let program = star_loop_then('a', 'b');
    let (optimized, _) = optimize(program.clone());

    // The loop fork was upgraded to its replace variant.
    assert_eq!(optimized.as_words()[0], Instr::FORK_REPLACE_STAY);
    assert_equivalent(
        &program,
        &optimized,
        &["aaab", "aaa", "", "b", "ab", "aab", "ba"],
    );
}

#[test]
fn overlapping_star_loop_stays_backtrackable() {
    let program = star_loop_then('a', 'a');
    let (optimized, _) = optimize(program.clone());

    assert_eq!(optimized.as_words()[0], Instr::FORK_STAY);
    assert_equivalent(&program, &optimized, &["aaa", "a", "", "ba"]);
}

/// The canonical `.*x` skeleton:
/// `ForkStay → Checkpoint → Compare AnyChar → JumpNonEmpty(back)`,
/// followed by `Compare 'x'`.
fn dot_star_then_x() -> Program {
    let mut program = Program::new();
    program.emit_jump(Instr::FORK_STAY, 10);
    program.extend_from_slice(&[Instr::CHECKPOINT, 0]);
    program.emit_compare_any_char();
    program.extend_from_slice(&[
        Instr::JUMP_NON_EMPTY,
        (-12_i64) as Word,
        0,
        Instr::JUMP,
    ]);
    program.emit_compare_char('x' as u32);
    program
}

#[test]
fn dot_star_anchor_becomes_seek() {
    let program = dot_star_then_x();
    let (optimized, _) = optimize(program.clone());

    assert_eq!(
        optimized.as_words(),
        &[
            Instr::SEEK_TO,
            'x' as Word,
            Instr::FORK_STAY,
            (-4_i64) as Word,
            Instr::COMPARE_SIMPLE,
            2,
            CompareOperand::CHAR,
            'x' as Word,
        ]
    );
    assert_equivalent(
        &program,
        &optimized,
        &["abc", "abx", "x", "", "xy", "aaxbb"],
    );
}

#[test]
fn adjacent_literals_merge_into_a_string() {
    // Not a pure literal pattern (the end anchor keeps pass 2 away), so
    // the run of single-character compares merges instead.
    let mut program = Program::new();
    program.emit_compare_char('a' as u32);
    program.emit_compare_char('b' as u32);
    program.push(Instr::CHECK_END);

    let (optimized, _) = optimize(program.clone());
    assert_eq!(
        optimized.as_words(),
        &[
            Instr::COMPARE_SIMPLE,
            2,
            CompareOperand::STRING,
            0,
            Instr::CHECK_END,
        ]
    );
    assert_eq!(optimized.strings().get(0), "ab");
    assert_equivalent(&program, &optimized, &["ab", "xab", "aab", "abx", ""]);
}

#[test]
fn leading_anchor_is_recorded() {
    let mut program = Program::new();
    program.push(Instr::CHECK_BEGIN);
    program.emit_compare_char('a' as u32);

    let (_, data) = optimize(program);
    assert!(data.anchored_to_line_start);
    assert!(data.starting_ranges.is_empty());
}

#[test]
fn starting_ranges_are_extracted_and_folded() {
    let mut program = Program::new();
    program.emit_compare(&[
        CompareOperand::Char('A' as u32),
        CompareOperand::Char('0' as u32),
    ]);
    program.push(Instr::CHECK_END);

    let (_, data) = optimize(program);
    assert_eq!(
        data.starting_ranges
            .iter()
            .map(|r| (r.from, r.to))
            .collect::<Vec<_>>(),
        vec![(0x30, 0x30), (0x41, 0x41)]
    );
    assert_eq!(
        data.starting_ranges_insensitive
            .iter()
            .map(|r| (r.from, r.to))
            .collect::<Vec<_>>(),
        vec![(0x30, 0x30), (0x61, 0x61)]
    );
}

#[test]
fn useless_jump_removal_is_idempotent() {
    let mut program = Program::new();
    program.emit_jump(Instr::JUMP, 0);
    program.emit_compare_char('a' as u32);
    program.emit_compare_any_char();

    let (once, _) = optimize(program);
    let (twice, _) = optimize(once.clone());
    assert_eq!(once, twice);
}
