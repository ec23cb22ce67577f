/*!
Character-class compiler.

Turns the operand list of a bracket expression into a `Compare`
instruction whose character and range operands are batched into coalesced,
sorted lookup tables. Two range trees are maintained — one for the
currently matched polarity, one for the currently negated polarity — and a
`TemporaryInverse` swaps which of the two is active for exactly one
operand. Operands a table cannot represent flush the accumulated tables
and are emitted verbatim; `And` and `Subtract` additionally force every
subsequent operand to flush individually, since their combining semantics
are not table-representable.
*/

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::chardata::to_ascii_lowercase;
use crate::compare::{CharRange, CompareOperand, LookupTable};
use crate::program::Program;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableInsertion {
    Successful,
    ReplaceWithAnyChar,
    TemporaryInversionNeeded,
    PermanentInversionNeeded,
    FlushOnInsertion,
    FinishFlushOnInsertion,
    CannotPlaceInTable,
}

fn insert_into_lookup_table(
    table: &mut BTreeMap<u32, u32>,
    op: &CompareOperand,
) -> TableInsertion {
    use TableInsertion::*;

    match op {
        CompareOperand::Inverse => PermanentInversionNeeded,
        CompareOperand::TemporaryInverse => TemporaryInversionNeeded,
        CompareOperand::AnyChar => ReplaceWithAnyChar,
        CompareOperand::Char(cp) => {
            let to = table.entry(*cp).or_insert(*cp);
            *to = (*to).max(*cp);
            Successful
        }
        CompareOperand::CharRange(range) => {
            let to = table.entry(range.from).or_insert(range.to);
            *to = (*to).max(range.to);
            Successful
        }
        CompareOperand::EndAndOr => FinishFlushOnInsertion,
        CompareOperand::And | CompareOperand::Subtract => FlushOnInsertion,
        CompareOperand::CharClass(_)
        | CompareOperand::Property(_)
        | CompareOperand::GeneralCategory(_)
        | CompareOperand::Script(_)
        | CompareOperand::ScriptExtension(_)
        | CompareOperand::Reference(_)
        | CompareOperand::NamedReference(_)
        | CompareOperand::StringSet(_)
        | CompareOperand::Or => CannotPlaceInTable,
        // These do not occur in bracket expressions.
        CompareOperand::String(_) | CompareOperand::LookupTable(_) => {
            unreachable!("{:?} operand in a character class", op)
        }
    }
}

/// Coalesces the sorted range tree into a lookup-table operand. The
/// ASCII-case-folded shadow table is attached whenever folding is
/// relevant to the ranges, i.e. any of them covers an ASCII letter.
fn build_lookup_table(table: &BTreeMap<u32, u32>) -> LookupTable {
    let ranges: Vec<CharRange> = table
        .iter()
        .map(|(&from, &to)| CharRange::new(from, to))
        .coalesce(|left, right| {
            if right.from <= left.to.saturating_add(1) {
                Ok(CharRange::new(
                    left.from.min(right.from),
                    left.to.max(right.to),
                ))
            } else {
                Err((left, right))
            }
        })
        .collect();

    let folding_relevant = ranges.iter().any(|range| {
        (range.from <= 0x5A && range.to >= 0x41)
            || (range.from <= 0x7A && range.to >= 0x61)
    });
    let insensitive = if folding_relevant {
        let mut folded: Vec<CharRange> = ranges
            .iter()
            .map(|range| {
                CharRange::new(
                    to_ascii_lowercase(range.from),
                    to_ascii_lowercase(range.to),
                )
            })
            .collect();
        folded.sort_by_key(|range| range.from);
        folded
    } else {
        Vec::new()
    };

    LookupTable { ranges, insensitive }
}

fn flush_tables(
    args: &mut Vec<CompareOperand>,
    table: &mut BTreeMap<u32, u32>,
    inverted_table: &mut BTreeMap<u32, u32>,
) {
    if !table.is_empty() {
        args.push(CompareOperand::LookupTable(build_lookup_table(table)));
    }
    if !inverted_table.is_empty() {
        args.push(CompareOperand::TemporaryInverse);
        args.push(CompareOperand::LookupTable(build_lookup_table(
            inverted_table,
        )));
    }
    table.clear();
    inverted_table.clear();
}

/// Appends a `Compare` instruction for a bracket expression given as a
/// flat operand list.
pub fn append_character_class(
    target: &mut Program,
    ops: Vec<CompareOperand>,
) {
    use TableInsertion::*;

    // Nothing to batch.
    if ops.len() <= 1 {
        target.emit_compare(&ops);
        return;
    }

    let mut args: Vec<CompareOperand> = Vec::new();
    let mut table: BTreeMap<u32, u32> = BTreeMap::new();
    let mut inverted_table: BTreeMap<u32, u32> = BTreeMap::new();
    let mut using_inverted_table = false;
    let mut is_currently_inverted = false;
    let mut invert_for_next_operand = false;
    let mut flush_on_every_insertion = false;

    for op in &ops {
        let revert_after_this_operand = invert_for_next_operand;
        invert_for_next_operand = false;

        let active = if using_inverted_table {
            &mut inverted_table
        } else {
            &mut table
        };
        let outcome = insert_into_lookup_table(active, op);

        match outcome {
            Successful => {
                if flush_on_every_insertion {
                    flush_tables(&mut args, &mut table, &mut inverted_table);
                }
            }
            ReplaceWithAnyChar => {
                table.clear();
                inverted_table.clear();
                args.push(CompareOperand::AnyChar);
            }
            TemporaryInversionNeeded => {
                using_inverted_table = !using_inverted_table;
                is_currently_inverted = !is_currently_inverted;
                invert_for_next_operand = true;
            }
            PermanentInversionNeeded => {
                flush_tables(&mut args, &mut table, &mut inverted_table);
                args.push(CompareOperand::Inverse);
            }
            FlushOnInsertion
            | FinishFlushOnInsertion
            | CannotPlaceInTable => {
                flush_tables(&mut args, &mut table, &mut inverted_table);
                if outcome != CannotPlaceInTable {
                    flush_on_every_insertion = outcome == FlushOnInsertion;
                }
                if is_currently_inverted {
                    args.push(CompareOperand::TemporaryInverse);
                }
                args.push(op.clone());
            }
        }

        if revert_after_this_operand {
            using_inverted_table = !using_inverted_table;
            is_currently_inverted = !is_currently_inverted;
        }
    }

    flush_tables(&mut args, &mut table, &mut inverted_table);
    target.emit_compare(&args);
}
