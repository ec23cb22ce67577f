/*!
Compare operands: the mini-language embedded in the argument lists of
[`Compare`](crate::instr::Instr::Compare) and
[`CompareSimple`](crate::instr::Instr::CompareSimple) instructions.

An argument list is a flat sequence of operands, each starting with a tag
word. Most operands are a concrete character test (a code point, a range, a
character class, a Unicode predicate, a string); four of them — `Inverse`,
`TemporaryInverse`, `Or` and `EndAndOr` — are control operators over the
flat list rather than tests of their own, which is what makes the list a
tiny stack machine instead of a tree. `And` and `Subtract` are combining
operators the optimizer never reasons about; it treats them as opaque.
*/

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use unicode_general_category::GeneralCategory;
use unicode_script::Script;

use crate::chardata;
use crate::instr::Word;

/// An inclusive range of code points. Packed into a single operand word as
/// `(from << 32) | to`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub struct CharRange {
    /// First code point of the range.
    pub from: u32,
    /// Last code point of the range, inclusive.
    pub to: u32,
}

impl CharRange {
    /// Creates a range from its inclusive bounds.
    pub fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    /// Packs the range into one operand word.
    pub fn pack(self) -> Word {
        ((self.from as Word) << 32) | self.to as Word
    }

    /// Unpacks a range from an operand word.
    pub fn unpack(word: Word) -> Self {
        Self { from: (word >> 32) as u32, to: word as u32 }
    }
}

/// POSIX-style character classes. Stored in bytecode as the enum
/// discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum CharClass {
    Alnum = 0,
    Alpha,
    Blank,
    Cntrl,
    Digit,
    Graph,
    Lower,
    Print,
    Punct,
    Space,
    Upper,
    Word,
    Xdigit,
}

/// Binary Unicode properties understood by the engine. Stored in bytecode
/// as the enum discriminant; membership tests live in [`crate::chardata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum Property {
    Alphabetic = 0,
    Alphanumeric,
    Ascii,
    AsciiHexDigit,
    Control,
    Lowercase,
    Numeric,
    Uppercase,
    WhiteSpace,
}

/// The contents of a pre-flattened lookup-table operand: coalesced, sorted
/// ranges, plus an ASCII-case-folded shadow table that is present only when
/// folding is relevant to the ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTable {
    /// Case-sensitive ranges, coalesced and sorted by start.
    pub ranges: Vec<CharRange>,
    /// ASCII-case-folded ranges, sorted by start. Empty when the sensitive
    /// table is usable as-is for insensitive matching.
    pub insensitive: Vec<CharRange>,
}

/// One decoded compare operand.
#[derive(Debug, Clone, PartialEq)]
pub enum CompareOperand {
    /// Toggles the inversion state for the rest of the list.
    Inverse,
    /// Inverts exactly the next operand.
    TemporaryInverse,
    /// Matches any code point.
    AnyChar,
    /// Matches one code point.
    Char(u32),
    /// Matches a code point range, both ends inclusive.
    CharRange(CharRange),
    /// Matches a POSIX character class.
    CharClass(CharClass),
    /// Matches a binary Unicode property.
    Property(Property),
    /// Matches a Unicode general category.
    GeneralCategory(GeneralCategory),
    /// Matches a Unicode script.
    Script(Script),
    /// Matches a Unicode script extension.
    ScriptExtension(Script),
    /// Matches a literal string from the side table.
    String(u32),
    /// Matches any one of a set of strings from the side table.
    StringSet(Vec<u32>),
    /// A pre-flattened set of ranges. Produced by the character-class
    /// compiler; opaque to the interpreter.
    LookupTable(LookupTable),
    /// Matches a previously captured group.
    Reference(u32),
    /// Matches a previously captured named group; the value is the name's
    /// string-table index.
    NamedReference(u32),
    /// Combines the surrounding operands by intersection.
    And,
    /// Opens a disjunction, closed by `EndAndOr`.
    Or,
    /// Closes the innermost `And`/`Or`.
    EndAndOr,
    /// Combines the surrounding operands by subtraction.
    Subtract,
}

impl CompareOperand {
    pub const INVERSE: Word = 0x00;
    pub const TEMPORARY_INVERSE: Word = 0x01;
    pub const ANY_CHAR: Word = 0x02;
    pub const CHAR: Word = 0x03;
    pub const CHAR_RANGE: Word = 0x04;
    pub const CHAR_CLASS: Word = 0x05;
    pub const PROPERTY: Word = 0x06;
    pub const GENERAL_CATEGORY: Word = 0x07;
    pub const SCRIPT: Word = 0x08;
    pub const SCRIPT_EXTENSION: Word = 0x09;
    pub const STRING: Word = 0x0A;
    pub const STRING_SET: Word = 0x0B;
    pub const LOOKUP_TABLE: Word = 0x0C;
    pub const REFERENCE: Word = 0x0D;
    pub const NAMED_REFERENCE: Word = 0x0E;
    pub const AND: Word = 0x0F;
    pub const OR: Word = 0x10;
    pub const END_AND_OR: Word = 0x11;
    pub const SUBTRACT: Word = 0x12;
}

/// Appends the encoded form of `ops` to `out`.
pub fn encode_operands(ops: &[CompareOperand], out: &mut Vec<Word>) {
    for op in ops {
        match op {
            CompareOperand::Inverse => out.push(CompareOperand::INVERSE),
            CompareOperand::TemporaryInverse => {
                out.push(CompareOperand::TEMPORARY_INVERSE)
            }
            CompareOperand::AnyChar => out.push(CompareOperand::ANY_CHAR),
            CompareOperand::Char(cp) => {
                out.push(CompareOperand::CHAR);
                out.push(*cp as Word);
            }
            CompareOperand::CharRange(range) => {
                out.push(CompareOperand::CHAR_RANGE);
                out.push(range.pack());
            }
            CompareOperand::CharClass(class) => {
                out.push(CompareOperand::CHAR_CLASS);
                out.push(*class as Word);
            }
            CompareOperand::Property(property) => {
                out.push(CompareOperand::PROPERTY);
                out.push(*property as Word);
            }
            CompareOperand::GeneralCategory(category) => {
                out.push(CompareOperand::GENERAL_CATEGORY);
                out.push(chardata::general_category_to_word(*category));
            }
            CompareOperand::Script(script) => {
                out.push(CompareOperand::SCRIPT);
                out.push(chardata::script_to_word(*script));
            }
            CompareOperand::ScriptExtension(script) => {
                out.push(CompareOperand::SCRIPT_EXTENSION);
                out.push(chardata::script_to_word(*script));
            }
            CompareOperand::String(index) => {
                out.push(CompareOperand::STRING);
                out.push(*index as Word);
            }
            CompareOperand::StringSet(indexes) => {
                out.push(CompareOperand::STRING_SET);
                out.push(indexes.len() as Word);
                out.extend(indexes.iter().map(|i| *i as Word));
            }
            CompareOperand::LookupTable(table) => {
                out.push(CompareOperand::LOOKUP_TABLE);
                out.push(table.ranges.len() as Word);
                out.push(table.insensitive.len() as Word);
                out.extend(table.ranges.iter().map(|r| r.pack()));
                out.extend(table.insensitive.iter().map(|r| r.pack()));
            }
            CompareOperand::Reference(group) => {
                out.push(CompareOperand::REFERENCE);
                out.push(*group as Word);
            }
            CompareOperand::NamedReference(name) => {
                out.push(CompareOperand::NAMED_REFERENCE);
                out.push(*name as Word);
            }
            CompareOperand::And => out.push(CompareOperand::AND),
            CompareOperand::Or => out.push(CompareOperand::OR),
            CompareOperand::EndAndOr => out.push(CompareOperand::END_AND_OR),
            CompareOperand::Subtract => out.push(CompareOperand::SUBTRACT),
        }
    }
}

/// Decodes the flat operand list of a compare instruction.
///
/// A malformed list (unknown tag, truncated operand, undecodable predicate
/// id) is an upstream bug and panics.
pub fn decode_operands(args: &[Word]) -> Vec<CompareOperand> {
    let mut ops = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let tag = args[i];
        i += 1;
        let mut value = |i: &mut usize| {
            let v = args[*i];
            *i += 1;
            v
        };
        let op = match tag {
            CompareOperand::INVERSE => CompareOperand::Inverse,
            CompareOperand::TEMPORARY_INVERSE => {
                CompareOperand::TemporaryInverse
            }
            CompareOperand::ANY_CHAR => CompareOperand::AnyChar,
            CompareOperand::CHAR => {
                CompareOperand::Char(value(&mut i) as u32)
            }
            CompareOperand::CHAR_RANGE => {
                CompareOperand::CharRange(CharRange::unpack(value(&mut i)))
            }
            CompareOperand::CHAR_CLASS => {
                let class = value(&mut i);
                CompareOperand::CharClass(
                    CharClass::from_u64(class).unwrap_or_else(|| {
                        panic!("unknown character class id {}", class)
                    }),
                )
            }
            CompareOperand::PROPERTY => {
                let property = value(&mut i);
                CompareOperand::Property(
                    Property::from_u64(property).unwrap_or_else(|| {
                        panic!("unknown property id {}", property)
                    }),
                )
            }
            CompareOperand::GENERAL_CATEGORY => {
                CompareOperand::GeneralCategory(
                    chardata::general_category_from_word(value(&mut i)),
                )
            }
            CompareOperand::SCRIPT => {
                CompareOperand::Script(chardata::script_from_word(value(
                    &mut i,
                )))
            }
            CompareOperand::SCRIPT_EXTENSION => {
                CompareOperand::ScriptExtension(chardata::script_from_word(
                    value(&mut i),
                ))
            }
            CompareOperand::STRING => {
                CompareOperand::String(value(&mut i) as u32)
            }
            CompareOperand::STRING_SET => {
                let count = value(&mut i) as usize;
                let indexes =
                    args[i..i + count].iter().map(|w| *w as u32).collect();
                i += count;
                CompareOperand::StringSet(indexes)
            }
            CompareOperand::LOOKUP_TABLE => {
                let sensitive = value(&mut i) as usize;
                let insensitive = value(&mut i) as usize;
                let ranges = args[i..i + sensitive]
                    .iter()
                    .map(|w| CharRange::unpack(*w))
                    .collect();
                i += sensitive;
                let folded = args[i..i + insensitive]
                    .iter()
                    .map(|w| CharRange::unpack(*w))
                    .collect();
                i += insensitive;
                CompareOperand::LookupTable(LookupTable {
                    ranges,
                    insensitive: folded,
                })
            }
            CompareOperand::REFERENCE => {
                CompareOperand::Reference(value(&mut i) as u32)
            }
            CompareOperand::NAMED_REFERENCE => {
                CompareOperand::NamedReference(value(&mut i) as u32)
            }
            CompareOperand::AND => CompareOperand::And,
            CompareOperand::OR => CompareOperand::Or,
            CompareOperand::END_AND_OR => CompareOperand::EndAndOr,
            CompareOperand::SUBTRACT => CompareOperand::Subtract,
            _ => panic!("unknown compare operand tag {:#x}", tag),
        };
        ops.push(op);
    }
    ops
}

/// Rewrites the string-table indexes inside a compare argument list through
/// `remap`, in place. Used when a program's side table is merged into
/// another's.
pub(crate) fn remap_string_refs(args: &mut [Word], remap: &[u32]) {
    let mut i = 0;
    while i < args.len() {
        let tag = args[i];
        i += 1;
        match tag {
            CompareOperand::STRING | CompareOperand::NAMED_REFERENCE => {
                args[i] = remap[args[i] as usize] as Word;
                i += 1;
            }
            CompareOperand::STRING_SET => {
                let count = args[i] as usize;
                i += 1;
                for index in &mut args[i..i + count] {
                    *index = remap[*index as usize] as Word;
                }
                i += count;
            }
            CompareOperand::LOOKUP_TABLE => {
                let sensitive = args[i] as usize;
                let insensitive = args[i + 1] as usize;
                i += 2 + sensitive + insensitive;
            }
            CompareOperand::CHAR
            | CompareOperand::CHAR_RANGE
            | CompareOperand::CHAR_CLASS
            | CompareOperand::PROPERTY
            | CompareOperand::GENERAL_CATEGORY
            | CompareOperand::SCRIPT
            | CompareOperand::SCRIPT_EXTENSION
            | CompareOperand::REFERENCE => i += 1,
            CompareOperand::INVERSE
            | CompareOperand::TEMPORARY_INVERSE
            | CompareOperand::ANY_CHAR
            | CompareOperand::AND
            | CompareOperand::OR
            | CompareOperand::END_AND_OR
            | CompareOperand::SUBTRACT => {}
            _ => panic!("unknown compare operand tag {:#x}", tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn operand_round_trip() {
        let ops = vec![
            CompareOperand::TemporaryInverse,
            CompareOperand::Char('a' as u32),
            CompareOperand::CharRange(CharRange::new(0x33, 0x39)),
            CompareOperand::CharClass(CharClass::Digit),
            CompareOperand::GeneralCategory(
                GeneralCategory::LowercaseLetter,
            ),
            CompareOperand::Script(Script::Greek),
            CompareOperand::StringSet(vec![0, 2]),
            CompareOperand::LookupTable(LookupTable {
                ranges: vec![CharRange::new(0x61, 0x63)],
                insensitive: vec![CharRange::new(0x61, 0x63)],
            }),
        ];
        let mut encoded = Vec::new();
        encode_operands(&ops, &mut encoded);
        assert_eq!(decode_operands(&encoded), ops);
    }

    #[test]
    fn string_ref_remapping() {
        let ops = vec![
            CompareOperand::String(1),
            CompareOperand::StringSet(vec![0, 1]),
            CompareOperand::Char('x' as u32),
        ];
        let mut encoded = Vec::new();
        encode_operands(&ops, &mut encoded);
        remap_string_refs(&mut encoded, &[5, 3]);
        assert_eq!(
            decode_operands(&encoded),
            vec![
                CompareOperand::String(3),
                CompareOperand::StringSet(vec![5, 3]),
                CompareOperand::Char('x' as u32),
            ]
        );
    }
}
