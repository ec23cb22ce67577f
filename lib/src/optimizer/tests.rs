use pretty_assertions::assert_eq;

use super::alternation::append_alternation;
use super::class::append_character_class;
use crate::compare::{self, CharRange, CompareOperand, LookupTable};
use crate::instr::Instr;
use crate::program::Program;
use crate::tests::exec::matches;

fn literal_branch(s: &str) -> Program {
    let mut program = Program::new();
    for c in s.chars() {
        program.emit_compare_char(c as u32);
    }
    program
}

fn count_compares(program: &Program) -> usize {
    program
        .iter()
        .filter(|(instr, _)| {
            matches!(
                instr,
                Instr::Compare(_) | Instr::CompareSimple(_)
            )
        })
        .count()
}

#[test]
fn alternation_with_shared_prefix_uses_the_trie() {
    let mut target = Program::new();
    append_alternation(
        &mut target,
        vec![literal_branch("ab"), literal_branch("ac")],
    )
    .unwrap();

    // The shared 'a' compare is emitted exactly once.
    assert_eq!(count_compares(&target), 3);
    assert_eq!(target.len(), 29);

    assert!(matches(&target, "ab"));
    assert!(matches(&target, "ac"));
    assert!(!matches(&target, "ad"));
    assert!(!matches(&target, "a"));
}

#[test]
fn alternation_without_sharing_uses_the_fork_chain() {
    let mut target = Program::new();
    append_alternation(
        &mut target,
        vec![literal_branch("ab"), literal_branch("cd")],
    )
    .unwrap();

    assert_eq!(target.as_words()[0], Instr::FORK_JUMP);
    assert_eq!(target.len(), 30);

    assert!(matches(&target, "ab"));
    assert!(matches(&target, "cd"));
    assert!(matches(&target, "xxcd"));
    assert!(!matches(&target, "ad"));
}

#[test]
fn reordering_trie_with_overlapping_compares_is_rejected() {
    // Sharing the 'a' prefix of the first and third branch would try the
    // third before the second, whose leading range overlaps 'a'. The
    // chain layout must be chosen.
    let mut range_branch = Program::new();
    range_branch.emit_compare(&[CompareOperand::CharRange(
        CharRange::new('a' as u32, 'c' as u32),
    )]);
    range_branch.emit_compare_char('d' as u32);

    let mut target = Program::new();
    append_alternation(
        &mut target,
        vec![literal_branch("ab"), range_branch, literal_branch("ac")],
    )
    .unwrap();

    // No sharing: every branch's compares are laid out in full.
    assert_eq!(count_compares(&target), 6);
    assert_eq!(target.as_words()[0], Instr::FORK_JUMP);

    assert!(matches(&target, "ab"));
    assert!(matches(&target, "ac"));
    assert!(matches(&target, "bd"));
    assert!(!matches(&target, "bc"));
}

#[test]
fn branch_leading_with_line_anchor_gets_a_conditional_fork() {
    let mut anchored = Program::new();
    anchored.push(Instr::CHECK_BEGIN);
    anchored.emit_compare_char('a' as u32);

    let mut target = Program::new();
    append_alternation(&mut target, vec![anchored, literal_branch("b")])
        .unwrap();

    assert_eq!(target.as_words()[0], Instr::FORK_IF);
    // The lifted condition: at start of line.
    assert_eq!(target.as_words()[3], 0);

    assert!(matches(&target, "a"));
    assert!(matches(&target, "xb"));
    assert!(!matches(&target, "xa"));
}

#[test]
fn alternation_of_one_branch_is_spliced_verbatim() {
    let mut target = Program::new();
    append_alternation(&mut target, vec![literal_branch("ab")]).unwrap();
    assert_eq!(count_compares(&target), 2);
    assert!(matches(&target, "ab"));
    assert!(!matches(&target, "a"));
}

#[test]
fn alternation_merges_string_tables() {
    let mut left = Program::new();
    left.emit_compare_string("xy");
    let mut right = Program::new();
    right.emit_compare_string("xy");
    right.emit_compare_string("z");

    let mut target = Program::new();
    append_alternation(&mut target, vec![left, right]).unwrap();
    assert_eq!(target.strings().len(), 2);
    assert!(matches(&target, "xy"));
    assert!(matches(&target, "xyz"));
}

#[test]
fn too_many_alternatives_is_an_error() {
    let branches: Vec<Program> =
        (0..=255).map(|_| literal_branch("a")).collect();
    let mut target = Program::new();
    assert!(append_alternation(&mut target, branches).is_err());
}

fn decoded_class(ops: Vec<CompareOperand>) -> Vec<CompareOperand> {
    let mut program = Program::new();
    append_character_class(&mut program, ops);
    match program.instr_at(0).0 {
        Instr::Compare(args) => compare::decode_operands(args.args),
        other => panic!("expected a compare, got {:?}", other),
    }
}

#[test]
fn class_ranges_coalesce_into_one_lookup_table() {
    let ops = decoded_class(vec![
        CompareOperand::CharRange(CharRange::new('a' as u32, 'c' as u32)),
        CompareOperand::CharRange(CharRange::new('3' as u32, '9' as u32)),
    ]);
    assert_eq!(
        ops,
        vec![CompareOperand::LookupTable(LookupTable {
            ranges: vec![
                CharRange::new(0x33, 0x39),
                CharRange::new(0x61, 0x63),
            ],
            // a-c is affected by folding, so the shadow table is present.
            insensitive: vec![
                CharRange::new(0x33, 0x39),
                CharRange::new(0x61, 0x63),
            ],
        })]
    );
}

#[test]
fn class_without_letters_has_no_shadow_table() {
    let ops = decoded_class(vec![
        CompareOperand::Char('0' as u32),
        CompareOperand::CharRange(CharRange::new('1' as u32, '5' as u32)),
    ]);
    assert_eq!(
        ops,
        vec![CompareOperand::LookupTable(LookupTable {
            ranges: vec![CharRange::new(0x30, 0x35)],
            insensitive: vec![],
        })]
    );
}

#[test]
fn adjacent_class_entries_coalesce() {
    let ops = decoded_class(vec![
        CompareOperand::Char('a' as u32),
        CompareOperand::CharRange(CharRange::new('b' as u32, 'd' as u32)),
        CompareOperand::Char('e' as u32),
    ]);
    assert_eq!(
        ops,
        vec![CompareOperand::LookupTable(LookupTable {
            ranges: vec![CharRange::new(0x61, 0x65)],
            insensitive: vec![CharRange::new(0x61, 0x65)],
        })]
    );
}

#[test]
fn temporary_inverse_routes_to_the_negated_table() {
    let ops = decoded_class(vec![
        CompareOperand::TemporaryInverse,
        CompareOperand::Char('a' as u32),
        CompareOperand::Char('b' as u32),
    ]);
    assert_eq!(
        ops,
        vec![
            CompareOperand::LookupTable(LookupTable {
                ranges: vec![CharRange::new(0x62, 0x62)],
                insensitive: vec![CharRange::new(0x62, 0x62)],
            }),
            CompareOperand::TemporaryInverse,
            CompareOperand::LookupTable(LookupTable {
                ranges: vec![CharRange::new(0x61, 0x61)],
                insensitive: vec![CharRange::new(0x61, 0x61)],
            }),
        ]
    );
}

#[test]
fn unrepresentable_operand_flushes_the_tables() {
    let ops = decoded_class(vec![
        CompareOperand::Char('a' as u32),
        CompareOperand::CharClass(crate::compare::CharClass::Digit),
        CompareOperand::Char('b' as u32),
    ]);
    assert_eq!(
        ops,
        vec![
            CompareOperand::LookupTable(LookupTable {
                ranges: vec![CharRange::new(0x61, 0x61)],
                insensitive: vec![CharRange::new(0x61, 0x61)],
            }),
            CompareOperand::CharClass(crate::compare::CharClass::Digit),
            CompareOperand::LookupTable(LookupTable {
                ranges: vec![CharRange::new(0x62, 0x62)],
                insensitive: vec![CharRange::new(0x62, 0x62)],
            }),
        ]
    );
}

#[test]
fn any_char_subsumes_the_accumulated_tables() {
    let ops = decoded_class(vec![
        CompareOperand::Char('a' as u32),
        CompareOperand::AnyChar,
    ]);
    assert_eq!(ops, vec![CompareOperand::AnyChar]);
}

#[test]
fn single_operand_classes_are_emitted_verbatim() {
    let ops =
        decoded_class(vec![CompareOperand::Char('a' as u32)]);
    assert_eq!(ops, vec![CompareOperand::Char('a' as u32)]);
}
