/*!
Adapter over the character-data layer.

The optimizer consumes Unicode data but never computes it: general-category
and script membership come from the `unicode-general-category` and
`unicode-script` crates, binary properties from the standard library's
`char` classification tables. This module also owns the numeric encoding of
the predicate ids stored in bytecode words: general categories and binary
properties are stored as stable small integers, scripts as their four-byte
ISO 15924 short name packed into a word.
*/

use unicode_general_category::{get_general_category, GeneralCategory};
use unicode_script::{Script, UnicodeScript};

use crate::compare::{CharClass, Property};
use crate::instr::Word;

/// ASCII-lowercases a single code point, leaving non-ASCII-uppercase code
/// points untouched.
pub fn to_ascii_lowercase(cp: u32) -> u32 {
    if (0x41..=0x5A).contains(&cp) {
        cp + 0x20
    } else {
        cp
    }
}

/// True if the code point is an ASCII letter of either case.
pub(crate) fn is_ascii_alpha(cp: u32) -> bool {
    (0x41..=0x5A).contains(&cp) || (0x61..=0x7A).contains(&cp)
}

fn is_ascii_digit(cp: u32) -> bool {
    (0x30..=0x39).contains(&cp)
}

fn is_space_or_line_terminator(cp: u32) -> bool {
    matches!(cp, 0x09 | 0x0A | 0x0B | 0x0C | 0x0D | 0x2028 | 0x2029 | 0xFEFF)
        || code_point_has_general_category(cp, GeneralCategory::SpaceSeparator)
}

/// Membership test for the POSIX-style character classes. These are ASCII
/// semantics, except `Space`, which also covers Unicode space separators
/// and line terminators.
pub fn char_class_matches(class: CharClass, cp: u32) -> bool {
    match class {
        CharClass::Alnum => is_ascii_alpha(cp) || is_ascii_digit(cp),
        CharClass::Alpha => is_ascii_alpha(cp),
        CharClass::Blank => cp == 0x20 || cp == 0x09,
        CharClass::Cntrl => cp <= 0x1F || cp == 0x7F,
        CharClass::Digit => is_ascii_digit(cp),
        CharClass::Graph => (0x21..=0x7E).contains(&cp),
        CharClass::Lower => (0x61..=0x7A).contains(&cp),
        CharClass::Print => (0x20..=0x7E).contains(&cp),
        CharClass::Punct => {
            (0x21..=0x7E).contains(&cp)
                && !is_ascii_alpha(cp)
                && !is_ascii_digit(cp)
        }
        CharClass::Space => is_space_or_line_terminator(cp),
        CharClass::Upper => (0x41..=0x5A).contains(&cp),
        CharClass::Word => {
            is_ascii_alpha(cp) || is_ascii_digit(cp) || cp == 0x5F
        }
        CharClass::Xdigit => {
            is_ascii_digit(cp)
                || (0x41..=0x46).contains(&cp)
                || (0x61..=0x66).contains(&cp)
        }
    }
}

/// Stable numeric id of a general category, for storage in bytecode words.
pub fn general_category_to_word(category: GeneralCategory) -> Word {
    match category {
        GeneralCategory::ClosePunctuation => 0,
        GeneralCategory::ConnectorPunctuation => 1,
        GeneralCategory::Control => 2,
        GeneralCategory::CurrencySymbol => 3,
        GeneralCategory::DashPunctuation => 4,
        GeneralCategory::DecimalNumber => 5,
        GeneralCategory::EnclosingMark => 6,
        GeneralCategory::FinalPunctuation => 7,
        GeneralCategory::Format => 8,
        GeneralCategory::InitialPunctuation => 9,
        GeneralCategory::LetterNumber => 10,
        GeneralCategory::LineSeparator => 11,
        GeneralCategory::LowercaseLetter => 12,
        GeneralCategory::MathSymbol => 13,
        GeneralCategory::ModifierLetter => 14,
        GeneralCategory::ModifierSymbol => 15,
        GeneralCategory::NonspacingMark => 16,
        GeneralCategory::OpenPunctuation => 17,
        GeneralCategory::OtherLetter => 18,
        GeneralCategory::OtherNumber => 19,
        GeneralCategory::OtherPunctuation => 20,
        GeneralCategory::OtherSymbol => 21,
        GeneralCategory::ParagraphSeparator => 22,
        GeneralCategory::PrivateUse => 23,
        GeneralCategory::SpaceSeparator => 24,
        GeneralCategory::SpacingMark => 25,
        GeneralCategory::Surrogate => 26,
        GeneralCategory::TitlecaseLetter => 27,
        GeneralCategory::Unassigned => 28,
        GeneralCategory::UppercaseLetter => 29,
    }
}

/// Inverse of [`general_category_to_word`]. An unknown id is an upstream
/// bug and panics.
pub fn general_category_from_word(word: Word) -> GeneralCategory {
    match word {
        0 => GeneralCategory::ClosePunctuation,
        1 => GeneralCategory::ConnectorPunctuation,
        2 => GeneralCategory::Control,
        3 => GeneralCategory::CurrencySymbol,
        4 => GeneralCategory::DashPunctuation,
        5 => GeneralCategory::DecimalNumber,
        6 => GeneralCategory::EnclosingMark,
        7 => GeneralCategory::FinalPunctuation,
        8 => GeneralCategory::Format,
        9 => GeneralCategory::InitialPunctuation,
        10 => GeneralCategory::LetterNumber,
        11 => GeneralCategory::LineSeparator,
        12 => GeneralCategory::LowercaseLetter,
        13 => GeneralCategory::MathSymbol,
        14 => GeneralCategory::ModifierLetter,
        15 => GeneralCategory::ModifierSymbol,
        16 => GeneralCategory::NonspacingMark,
        17 => GeneralCategory::OpenPunctuation,
        18 => GeneralCategory::OtherLetter,
        19 => GeneralCategory::OtherNumber,
        20 => GeneralCategory::OtherPunctuation,
        21 => GeneralCategory::OtherSymbol,
        22 => GeneralCategory::ParagraphSeparator,
        23 => GeneralCategory::PrivateUse,
        24 => GeneralCategory::SpaceSeparator,
        25 => GeneralCategory::SpacingMark,
        26 => GeneralCategory::Surrogate,
        27 => GeneralCategory::TitlecaseLetter,
        28 => GeneralCategory::Unassigned,
        29 => GeneralCategory::UppercaseLetter,
        _ => panic!("unknown general category id {}", word),
    }
}

/// Encodes a script as its four-byte ISO 15924 short name packed into a
/// word.
pub fn script_to_word(script: Script) -> Word {
    script
        .short_name()
        .bytes()
        .fold(0u64, |acc, byte| (acc << 8) | byte as u64)
}

/// Inverse of [`script_to_word`]. An id that does not unpack to a known
/// short name is an upstream bug and panics.
pub fn script_from_word(word: Word) -> Script {
    let bytes = [
        (word >> 24) as u8,
        (word >> 16) as u8,
        (word >> 8) as u8,
        word as u8,
    ];
    std::str::from_utf8(&bytes)
        .ok()
        .and_then(Script::from_short_name)
        .unwrap_or_else(|| panic!("unknown script id {:#x}", word))
}

/// True if the code point has the given general category.
pub(crate) fn code_point_has_general_category(
    cp: u32,
    category: GeneralCategory,
) -> bool {
    match char::from_u32(cp) {
        Some(c) => get_general_category(c) == category,
        // Surrogates cannot be represented as `char`.
        None => category == GeneralCategory::Surrogate,
    }
}

/// True if the code point has the given binary property.
pub(crate) fn code_point_has_property(cp: u32, property: Property) -> bool {
    let Some(c) = char::from_u32(cp) else { return false };
    match property {
        Property::Alphabetic => c.is_alphabetic(),
        Property::Alphanumeric => c.is_alphanumeric(),
        Property::Ascii => c.is_ascii(),
        Property::AsciiHexDigit => c.is_ascii_hexdigit(),
        Property::Control => c.is_control(),
        Property::Lowercase => c.is_lowercase(),
        Property::Numeric => c.is_numeric(),
        Property::Uppercase => c.is_uppercase(),
        Property::WhiteSpace => c.is_whitespace(),
    }
}

/// True if the code point belongs to the given script.
pub(crate) fn code_point_has_script(cp: u32, script: Script) -> bool {
    char::from_u32(cp).map_or(false, |c| c.script() == script)
}

/// True if the given script is among the code point's script extensions.
pub(crate) fn code_point_has_script_extension(
    cp: u32,
    script: Script,
) -> bool {
    char::from_u32(cp)
        .map_or(false, |c| c.script_extension().contains_script(script))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_folding() {
        assert_eq!(to_ascii_lowercase('A' as u32), 'a' as u32);
        assert_eq!(to_ascii_lowercase('z' as u32), 'z' as u32);
        assert_eq!(to_ascii_lowercase('0' as u32), '0' as u32);
        // Non-ASCII uppercase is untouched by ASCII folding.
        assert_eq!(to_ascii_lowercase('Å' as u32), 'Å' as u32);
    }

    #[test]
    fn predicate_id_round_trip() {
        for word in 0..30 {
            let category = general_category_from_word(word);
            assert_eq!(general_category_to_word(category), word);
        }
        let latin = script_to_word(Script::Latin);
        assert_eq!(script_from_word(latin), Script::Latin);
    }

    #[test]
    fn class_membership() {
        assert!(char_class_matches(CharClass::Word, '_' as u32));
        assert!(char_class_matches(CharClass::Xdigit, 'f' as u32));
        assert!(!char_class_matches(CharClass::Xdigit, 'g' as u32));
        assert!(char_class_matches(CharClass::Space, 0x2028));
    }
}
