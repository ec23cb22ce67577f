/*!
Abstract interpretation of compare operand lists.

[`interpret_compares`] evaluates a flat operand list into normalized sets
(matched and negated ranges, classes, Unicode predicates) without running
the VM. [`has_overlap`] builds on it to answer the question driving the
loop-to-atomic-group rewrite: can the left-hand sequence ever match
something the right-hand sequence matches? Every construct the
interpretation cannot reason about makes the answer conservative —
`interpret_compares` reports failure and `has_overlap` reports an overlap —
because the only safe reaction to uncertainty is to leave the program
alone.
*/

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;
use smallvec::{smallvec, SmallVec};

use crate::chardata;
use crate::compare::{CharClass, CompareOperand};
use crate::instr::Word;
use crate::program::StringTable;

/// Scanning a range longer than this against a character class gives up
/// and reports an overlap instead of testing every code point.
const CLASS_SCAN_LIMIT: u32 = 256;

/// The normalized sets a compare operand list evaluates to.
#[derive(Debug, Default)]
pub(crate) struct InterpretedCompares {
    /// Matched ranges, keyed by start. Ranges are inserted as-is, not
    /// coalesced.
    pub ranges: BTreeMap<u32, u32>,
    /// Negated ranges, keyed by start.
    pub negated_ranges: BTreeMap<u32, u32>,
    pub char_classes: FxHashSet<CharClass>,
    pub negated_char_classes: FxHashSet<CharClass>,
    /// Set as soon as any Unicode predicate (of either polarity) is filed.
    pub has_any_unicode_property: bool,
    pub general_categories: FxHashSet<Word>,
    pub negated_general_categories: FxHashSet<Word>,
    pub properties: FxHashSet<Word>,
    pub negated_properties: FxHashSet<Word>,
    pub scripts: FxHashSet<Word>,
    pub negated_scripts: FxHashSet<Word>,
    pub script_extensions: FxHashSet<Word>,
    pub negated_script_extensions: FxHashSet<Word>,
}

impl InterpretedCompares {
    fn insert_range(map: &mut BTreeMap<u32, u32>, from: u32, to: u32) {
        let end = map.entry(from).or_insert(to);
        if *end < to {
            *end = to;
        }
    }

    /// True if no operand was filed into any set.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
            && self.negated_ranges.is_empty()
            && self.char_classes.is_empty()
            && self.negated_char_classes.is_empty()
            && !self.has_any_unicode_property
    }
}

/// Tracks the `Inverse`/`TemporaryInverse` state while scanning an operand
/// list. `TemporaryInverse` applies to exactly the next operand and then
/// auto-clears.
#[derive(Default)]
struct InversionState {
    inverse: bool,
    temporary: bool,
    reset_temporary: bool,
}

impl InversionState {
    /// Called at the start of each operand: clears a temporary inversion
    /// that has already covered its one operand.
    fn begin_operand(&mut self) {
        if self.reset_temporary {
            self.reset_temporary = false;
            self.temporary = false;
        } else {
            self.reset_temporary = true;
        }
    }

    fn current(&self) -> bool {
        self.inverse ^ self.temporary
    }

    fn toggle_inverse(&mut self) {
        self.inverse = !self.inverse;
    }

    fn set_temporary(&mut self) {
        self.temporary = true;
        self.reset_temporary = false;
    }
}

/// Evaluates an operand list into `compares`. Returns false if the list
/// contains a construct the interpretation cannot reason about, in which
/// case the sets are only partially filled and must not be trusted.
///
/// With `as_follow` set (used when the list describes what may follow a
/// loop), single-code-point strings are accepted and filed as that code
/// point; otherwise any string operand is a failure.
pub(crate) fn interpret_compares(
    ops: &[CompareOperand],
    compares: &mut InterpretedCompares,
    strings: Option<&StringTable>,
    as_follow: bool,
) -> bool {
    let mut inversion = InversionState::default();

    for op in ops {
        inversion.begin_operand();

        let inverted = inversion.current();
        match op {
            CompareOperand::Inverse => inversion.toggle_inverse(),
            CompareOperand::TemporaryInverse => inversion.set_temporary(),
            CompareOperand::AnyChar => {
                // If not inverted, this matches everything; no finite set
                // can describe it.
                if !inverted {
                    return false;
                }
            }
            CompareOperand::Char(cp) => {
                let target = if inverted {
                    &mut compares.negated_ranges
                } else {
                    &mut compares.ranges
                };
                InterpretedCompares::insert_range(target, *cp, *cp);
            }
            CompareOperand::String(index) => {
                if !as_follow {
                    return false;
                }
                let Some(strings) = strings else { return false };
                let mut chars = strings.get(*index).chars();
                let (Some(c), None) = (chars.next(), chars.next()) else {
                    // Multi-code-point strings cannot be described as a
                    // single-character set.
                    return false;
                };
                let target = if inverted {
                    &mut compares.negated_ranges
                } else {
                    &mut compares.ranges
                };
                InterpretedCompares::insert_range(
                    target,
                    c as u32,
                    c as u32,
                );
            }
            CompareOperand::StringSet(_) => return false,
            CompareOperand::CharClass(class) => {
                if inverted {
                    compares.negated_char_classes.insert(*class);
                } else {
                    compares.char_classes.insert(*class);
                }
            }
            CompareOperand::CharRange(range) => {
                let target = if inverted {
                    &mut compares.negated_ranges
                } else {
                    &mut compares.ranges
                };
                InterpretedCompares::insert_range(
                    target, range.from, range.to,
                );
            }
            // Already expanded into ranges by the class compiler; seeing
            // one here means the list predates flattening.
            CompareOperand::LookupTable(_) => return false,
            // Handled by the caller before interpretation.
            CompareOperand::Reference(_)
            | CompareOperand::NamedReference(_) => {}
            CompareOperand::Property(property) => {
                compares.has_any_unicode_property = true;
                let word = *property as Word;
                if inverted {
                    compares.negated_properties.insert(word);
                } else {
                    compares.properties.insert(word);
                }
            }
            CompareOperand::GeneralCategory(category) => {
                compares.has_any_unicode_property = true;
                let word = chardata::general_category_to_word(*category);
                if inverted {
                    compares.negated_general_categories.insert(word);
                } else {
                    compares.general_categories.insert(word);
                }
            }
            CompareOperand::Script(script) => {
                compares.has_any_unicode_property = true;
                let word = chardata::script_to_word(*script);
                if inverted {
                    compares.negated_scripts.insert(word);
                } else {
                    compares.scripts.insert(word);
                }
            }
            CompareOperand::ScriptExtension(script) => {
                compares.has_any_unicode_property = true;
                let word = chardata::script_to_word(*script);
                if inverted {
                    compares.negated_script_extensions.insert(word);
                } else {
                    compares.script_extensions.insert(word);
                }
            }
            // The default behaviour for a bracket expression; nothing to
            // do until And is supported.
            CompareOperand::Or | CompareOperand::EndAndOr => {}
            // Unsupported set algebra.
            CompareOperand::And | CompareOperand::Subtract => return false,
        }
    }

    true
}

fn any_unicode_property_matches(
    compares: &InterpretedCompares,
    cp: u32,
) -> bool {
    if compares.negated_general_categories.iter().any(|w| {
        chardata::code_point_has_general_category(
            cp,
            chardata::general_category_from_word(*w),
        )
    }) {
        return false;
    }
    if compares.negated_properties.iter().any(|w| {
        chardata::code_point_has_property(
            cp,
            num_traits::FromPrimitive::from_u64(*w).unwrap(),
        )
    }) {
        return false;
    }
    if compares
        .negated_scripts
        .iter()
        .any(|w| chardata::code_point_has_script(cp, chardata::script_from_word(*w)))
    {
        return false;
    }
    if compares.negated_script_extensions.iter().any(|w| {
        chardata::code_point_has_script_extension(
            cp,
            chardata::script_from_word(*w),
        )
    }) {
        return false;
    }

    if compares.general_categories.iter().any(|w| {
        chardata::code_point_has_general_category(
            cp,
            chardata::general_category_from_word(*w),
        )
    }) {
        return true;
    }
    if compares.properties.iter().any(|w| {
        chardata::code_point_has_property(
            cp,
            num_traits::FromPrimitive::from_u64(*w).unwrap(),
        )
    }) {
        return true;
    }
    if compares
        .scripts
        .iter()
        .any(|w| chardata::code_point_has_script(cp, chardata::script_from_word(*w)))
    {
        return true;
    }
    if compares.script_extensions.iter().any(|w| {
        chardata::code_point_has_script_extension(
            cp,
            chardata::script_from_word(*w),
        )
    }) {
        return true;
    }
    false
}

fn range_overlaps(
    compares: &InterpretedCompares,
    start: u32,
    end: u32,
) -> bool {
    if compares.has_any_unicode_property {
        // Properties are present; instead of testing every code point in
        // the range, assume a multi-code-point range matches.
        return start != end || any_unicode_property_matches(compares, start);
    }
    compares.ranges.iter().any(|(&from, &to)| from <= end && to >= start)
}

fn class_contains(compares: &InterpretedCompares, class: CharClass) -> bool {
    if compares.char_classes.contains(&class) {
        return true;
    }
    if compares.negated_char_classes.contains(&class) {
        return false;
    }
    if compares.ranges.is_empty() {
        return false;
    }
    for (&from, &to) in &compares.ranges {
        if to - from > CLASS_SCAN_LIMIT {
            return true;
        }
        if (from..=to).any(|cp| chardata::char_class_matches(class, cp)) {
            return true;
        }
    }
    false
}

/// Per-disjunction accumulator used while streaming the right-hand
/// sequence. A disjunction's contribution is only resolved at its matching
/// `EndAndOr`.
#[derive(Default)]
struct DisjunctionState {
    in_or: bool,
    matched_in_or: bool,
    inverse_matched_in_or: bool,
}

/// True if the sequence `lhs` can match anything the sequence `rhs`
/// matches. Conservative: any construct the interpretation cannot reason
/// about yields true.
pub(crate) fn has_overlap(
    lhs: &[CompareOperand],
    rhs: &[CompareOperand],
) -> bool {
    // We have to fully interpret the left-hand sequence first: inversion
    // state and covered ranges both matter.
    let mut compares = InterpretedCompares::default();
    if !interpret_compares(lhs, &mut compares, None, false) {
        return true;
    }

    let mut inversion = InversionState::default();
    let mut disjunctions: SmallVec<[DisjunctionState; 2]> =
        smallvec![DisjunctionState::default()];

    macro_rules! in_or {
        () => {
            disjunctions.last().unwrap().in_or
        };
    }

    for op in rhs {
        inversion.begin_operand();
        let inverted = inversion.current();

        match op {
            CompareOperand::Inverse => inversion.toggle_inverse(),
            CompareOperand::TemporaryInverse => inversion.set_temporary(),
            CompareOperand::AnyChar => {
                if !in_or!() && !inverted {
                    return true;
                }
                if in_or!() {
                    let state = disjunctions.last_mut().unwrap();
                    state.matched_in_or = true;
                    state.inverse_matched_in_or = false;
                }
            }
            CompareOperand::Char(cp) => {
                let matched = range_overlaps(&compares, *cp, *cp);
                if !in_or!() && (inverted ^ matched) {
                    return true;
                }
                if in_or!() {
                    let state = disjunctions.last_mut().unwrap();
                    state.matched_in_or |= matched;
                    state.inverse_matched_in_or |= !matched;
                }
            }
            // We'd only need the last character of the string here, but the
            // sets cannot tell where a multi-character match would leave
            // off, so stay conservative.
            CompareOperand::String(_) | CompareOperand::StringSet(_) => {
                return true
            }
            CompareOperand::CharClass(class) => {
                let contains = class_contains(&compares, *class);
                if !in_or!() && (inverted ^ contains) {
                    return true;
                }
                if in_or!() {
                    let state = disjunctions.last_mut().unwrap();
                    state.matched_in_or |= contains;
                    state.inverse_matched_in_or |= !contains;
                }
            }
            CompareOperand::CharRange(range) => {
                let contains =
                    range_overlaps(&compares, range.from, range.to);
                if !in_or!() && (inverted ^ contains) {
                    return true;
                }
                if in_or!() {
                    let state = disjunctions.last_mut().unwrap();
                    state.matched_in_or |= contains;
                    state.inverse_matched_in_or |= !contains;
                }
            }
            CompareOperand::LookupTable(_) => return true,
            CompareOperand::Reference(_)
            | CompareOperand::NamedReference(_) => {}
            CompareOperand::Property(property) => {
                if !compares.ranges.is_empty()
                    || !compares.negated_ranges.is_empty()
                    || !compares.char_classes.is_empty()
                    || !compares.negated_char_classes.is_empty()
                {
                    return true;
                }
                if compares.has_any_unicode_property {
                    let word = *property as Word;
                    let contains = compares.properties.contains(&word);
                    let inverse_contains =
                        compares.negated_properties.contains(&word);
                    if !in_or!() && (inverted ^ contains) {
                        return true;
                    }
                    if !in_or!() && !(inverted ^ inverse_contains) {
                        return true;
                    }
                    if in_or!() {
                        let state = disjunctions.last_mut().unwrap();
                        state.matched_in_or |= contains;
                        state.inverse_matched_in_or |= inverse_contains;
                    }
                }
            }
            CompareOperand::GeneralCategory(category) => {
                if !compares.ranges.is_empty()
                    || !compares.negated_ranges.is_empty()
                    || !compares.char_classes.is_empty()
                    || !compares.negated_char_classes.is_empty()
                {
                    return true;
                }
                if compares.has_any_unicode_property {
                    let word = chardata::general_category_to_word(*category);
                    let contains =
                        compares.general_categories.contains(&word);
                    let inverse_contains =
                        compares.negated_general_categories.contains(&word);
                    if !in_or!() && (inverted ^ contains) {
                        return true;
                    }
                    if !in_or!() && !(inverted ^ inverse_contains) {
                        return true;
                    }
                    if in_or!() {
                        let state = disjunctions.last_mut().unwrap();
                        state.matched_in_or |= contains;
                        state.inverse_matched_in_or |= inverse_contains;
                    }
                }
            }
            CompareOperand::Script(script)
            | CompareOperand::ScriptExtension(script) => {
                if !compares.ranges.is_empty()
                    || !compares.negated_ranges.is_empty()
                    || !compares.char_classes.is_empty()
                    || !compares.negated_char_classes.is_empty()
                {
                    return true;
                }
                if compares.has_any_unicode_property {
                    let word = chardata::script_to_word(*script);
                    let (set, negated_set) =
                        if matches!(op, CompareOperand::Script(_)) {
                            (&compares.scripts, &compares.negated_scripts)
                        } else {
                            (
                                &compares.script_extensions,
                                &compares.negated_script_extensions,
                            )
                        };
                    let contains = set.contains(&word);
                    let inverse_contains = negated_set.contains(&word);
                    if !in_or!() && (inverted ^ contains) {
                        return true;
                    }
                    if !in_or!() && !(inverted ^ inverse_contains) {
                        return true;
                    }
                    if in_or!() {
                        let state = disjunctions.last_mut().unwrap();
                        state.matched_in_or |= contains;
                        state.inverse_matched_in_or |= inverse_contains;
                    }
                }
            }
            CompareOperand::Or => {
                disjunctions.push(DisjunctionState {
                    in_or: true,
                    ..Default::default()
                });
            }
            CompareOperand::EndAndOr => {
                assert!(
                    in_or!(),
                    "EndAndOr operand without a matching Or"
                );
                let state = disjunctions.pop().unwrap();
                if inverted {
                    if !state.inverse_matched_in_or {
                        return true;
                    }
                } else if state.matched_in_or {
                    return true;
                }
            }
            CompareOperand::And | CompareOperand::Subtract => return true,
        }
    }

    // Double-check that the inverse flag was not left on, which would
    // match everything.
    inversion.current()
}

/// Overlap test on two already-interpreted sets. Used by the alternation
/// trie, where the sets of every node are interpreted up front.
pub(crate) fn sets_overlap(
    lhs: &InterpretedCompares,
    rhs: &InterpretedCompares,
) -> bool {
    if lhs.has_any_unicode_property
        || rhs.has_any_unicode_property
        || !lhs.negated_ranges.is_empty()
        || !rhs.negated_ranges.is_empty()
        || !lhs.negated_char_classes.is_empty()
        || !rhs.negated_char_classes.is_empty()
    {
        return true;
    }

    for (&lhs_from, &lhs_to) in &lhs.ranges {
        for (&rhs_from, &rhs_to) in &rhs.ranges {
            if lhs_from <= rhs_to && rhs_from <= lhs_to {
                return true;
            }
        }
    }

    lhs.char_classes.intersection(&rhs.char_classes).next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::CharRange;

    fn interpreted(ops: &[CompareOperand]) -> Option<InterpretedCompares> {
        let mut compares = InterpretedCompares::default();
        interpret_compares(ops, &mut compares, None, false)
            .then_some(compares)
    }

    #[test]
    fn files_operands_by_polarity() {
        let compares = interpreted(&[
            CompareOperand::Char('a' as u32),
            CompareOperand::TemporaryInverse,
            CompareOperand::Char('b' as u32),
            CompareOperand::CharRange(CharRange::new('0' as u32, '9' as u32)),
        ])
        .unwrap();
        assert_eq!(
            compares.ranges.iter().collect::<Vec<_>>(),
            vec![(&0x30, &0x39), (&0x61, &0x61)]
        );
        assert_eq!(
            compares.negated_ranges.iter().collect::<Vec<_>>(),
            vec![(&0x62, &0x62)]
        );
    }

    #[test]
    fn permanent_inverse_covers_the_rest() {
        let compares = interpreted(&[
            CompareOperand::Inverse,
            CompareOperand::Char('a' as u32),
            CompareOperand::Char('b' as u32),
        ])
        .unwrap();
        assert!(compares.ranges.is_empty());
        assert_eq!(compares.negated_ranges.len(), 2);
    }

    #[test]
    fn uninterpretable_operands() {
        assert!(interpreted(&[CompareOperand::AnyChar]).is_none());
        assert!(interpreted(&[CompareOperand::String(0)]).is_none());
        assert!(interpreted(&[
            CompareOperand::Char('a' as u32),
            CompareOperand::And,
            CompareOperand::Char('b' as u32),
        ])
        .is_none());
        // Inverted AnyChar matches nothing and is fine.
        assert!(interpreted(&[
            CompareOperand::TemporaryInverse,
            CompareOperand::AnyChar
        ])
        .is_some());
    }

    #[test]
    fn overlap_of_disjoint_chars() {
        assert!(!has_overlap(
            &[CompareOperand::Char('b' as u32)],
            &[CompareOperand::Char('a' as u32)],
        ));
        assert!(has_overlap(
            &[CompareOperand::Char('a' as u32)],
            &[CompareOperand::Char('a' as u32)],
        ));
    }

    #[test]
    fn overlap_of_ranges() {
        let digits =
            [CompareOperand::CharRange(CharRange::new('0' as u32, '9' as u32))];
        assert!(has_overlap(
            &digits,
            &[CompareOperand::Char('5' as u32)]
        ));
        assert!(!has_overlap(
            &digits,
            &[CompareOperand::Char('a' as u32)]
        ));
        // Partial range overlap in either direction.
        assert!(has_overlap(
            &digits,
            &[CompareOperand::CharRange(CharRange::new(
                '8' as u32, 'z' as u32
            ))]
        ));
    }

    #[test]
    fn overlap_is_conservative_on_opaque_constructs() {
        assert!(has_overlap(
            &[CompareOperand::Char('a' as u32)],
            &[CompareOperand::String(0)],
        ));
        assert!(has_overlap(
            &[CompareOperand::AnyChar],
            &[CompareOperand::Char('a' as u32)],
        ));
    }

    #[test]
    fn overlap_with_classes() {
        assert!(has_overlap(
            &[CompareOperand::CharClass(CharClass::Digit)],
            &[CompareOperand::CharClass(CharClass::Digit)],
        ));
        assert!(!has_overlap(
            &[CompareOperand::Char('7' as u32)],
            &[CompareOperand::CharClass(CharClass::Alpha)],
        ));
        assert!(has_overlap(
            &[CompareOperand::Char('7' as u32)],
            &[CompareOperand::CharClass(CharClass::Digit)],
        ));
    }

    #[test]
    fn overlap_inside_disjunction_resolves_at_end() {
        // (a|b) against {b}: the disjunction matches only at its EndAndOr.
        let lhs = [CompareOperand::Char('b' as u32)];
        let rhs = [
            CompareOperand::Or,
            CompareOperand::Char('a' as u32),
            CompareOperand::Char('b' as u32),
            CompareOperand::EndAndOr,
        ];
        assert!(has_overlap(&lhs, &rhs));

        let rhs_disjoint = [
            CompareOperand::Or,
            CompareOperand::Char('x' as u32),
            CompareOperand::Char('y' as u32),
            CompareOperand::EndAndOr,
        ];
        assert!(!has_overlap(&lhs, &rhs_disjoint));
    }

    #[test]
    #[should_panic(expected = "EndAndOr operand without a matching Or")]
    fn unbalanced_end_and_or_is_a_fault() {
        has_overlap(
            &[CompareOperand::Char('a' as u32)],
            &[CompareOperand::EndAndOr],
        );
    }

    #[test]
    fn set_overlap() {
        let lhs = interpreted(&[CompareOperand::Char('a' as u32)]).unwrap();
        let rhs = interpreted(&[CompareOperand::Char('b' as u32)]).unwrap();
        assert!(!sets_overlap(&lhs, &rhs));

        let rhs = interpreted(&[CompareOperand::CharRange(CharRange::new(
            'a' as u32, 'z' as u32,
        ))])
        .unwrap();
        assert!(sets_overlap(&lhs, &rhs));

        // Negations make the test conservative.
        let negated = interpreted(&[
            CompareOperand::TemporaryInverse,
            CompareOperand::Char('q' as u32),
        ])
        .unwrap();
        assert!(sets_overlap(&lhs, &negated));
    }
}
