// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Textual address grammar -> [`Tag`].
//!
//! ```text
//! addr  := DB <n> , <type><offset>[.<len_or_bit>]
//!        | <area_letter><type_letter><offset>[.<bit>]
//!        | <area_letter><offset>.<bit>            ; short bit form
//! area_letter   := I|E|Q|A|M
//! type_letter   := X|B|C|I|W|DI|DW|R|LR|S|WS
//! ```

use crate::constant::{DataType, MemoryArea};
use crate::error::AddressError;
use crate::tag::Tag;

/// Parse a textual address such as `"DB1,I30"` or `"MX0.6"` into a [`Tag`].
pub fn parse_address(input: &str) -> Result<Tag, AddressError> {
    let trimmed = input.trim();
    let upper = trimmed.to_ascii_uppercase();

    if let Some(rest) = upper.strip_prefix("DB") {
        return parse_db_form(trimmed, &upper, rest);
    }

    parse_area_form(trimmed, &upper)
}

fn syntax_err(input: &str, reason: impl Into<String>) -> AddressError {
    AddressError::Syntax {
        input: input.to_string(),
        reason: reason.into(),
    }
}

fn parse_db_form(original: &str, upper: &str, rest: &str) -> Result<Tag, AddressError> {
    let comma = rest
        .find(',')
        .ok_or_else(|| syntax_err(original, "expected ',' after DB number"))?;
    let (db_digits, after_comma) = rest.split_at(comma);
    let db_number: u32 = db_digits
        .parse()
        .map_err(|_| syntax_err(original, "expected a numeric DB number"))?;
    let body = &after_comma[1..]; // skip ','

    let (data_type, offset_str) = take_type_letter(body)
        .ok_or_else(|| syntax_err(original, "expected a type letter after ','"))?;
    let (start, suffix) = take_offset_and_suffix(offset_str)
        .ok_or_else(|| syntax_err(original, "expected a numeric offset"))?;

    build_tag(original, upper, MemoryArea::DataBlock, db_number, data_type, start, suffix)
}

fn parse_area_form(original: &str, upper: &str) -> Result<Tag, AddressError> {
    let mut chars = upper.char_indices();
    let (_, area_char) = chars
        .next()
        .ok_or_else(|| syntax_err(original, "empty address"))?;
    let area = area_letter_to_area(area_char)
        .ok_or_else(|| syntax_err(original, "unknown area letter"))?;
    let rest = &upper[area_char.len_utf8()..];

    // Short bit form: area_letter immediately followed by a digit.
    if rest.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        let (start, suffix) = take_offset_and_suffix(rest)
            .ok_or_else(|| syntax_err(original, "expected a numeric offset"))?;
        let bit = suffix.ok_or_else(|| {
            syntax_err(original, "short bit form requires a '.' bit offset")
        })?;
        if bit > 7 {
            return Err(AddressError::OutOfRange {
                field: "bit_offset",
                value: bit as i64,
            });
        }
        return Tag::new(area, 0, DataType::Bit, start, bit as u8, 1);
    }

    let (data_type, offset_str) = take_type_letter(rest)
        .ok_or_else(|| syntax_err(original, "expected a type letter"))?;
    let (start, suffix) = take_offset_and_suffix(offset_str)
        .ok_or_else(|| syntax_err(original, "expected a numeric offset"))?;

    build_tag(original, upper, area, 0, data_type, start, suffix)
}

fn build_tag(
    original: &str,
    _upper: &str,
    area: MemoryArea,
    db_number: u32,
    data_type: DataType,
    start: u32,
    suffix: Option<u32>,
) -> Result<Tag, AddressError> {
    match data_type {
        DataType::Bit => {
            let bit = suffix.unwrap_or(0);
            if bit > 7 {
                return Err(AddressError::OutOfRange {
                    field: "bit_offset",
                    value: bit as i64,
                });
            }
            Tag::new(area, db_number, data_type, start, bit as u8, 1)
        }
        DataType::String | DataType::WString => {
            let length = suffix.ok_or_else(|| {
                syntax_err(original, "STRING/WSTRING address requires a declared length")
            })?;
            Tag::new(area, db_number, data_type, start, 0, length)
        }
        _ => {
            if suffix.is_some() {
                return Err(syntax_err(
                    original,
                    "scalar types take no trailing length/bit suffix",
                ));
            }
            Tag::new(area, db_number, data_type, start, 0, 1)
        }
    }
}

fn area_letter_to_area(c: char) -> Option<MemoryArea> {
    match c {
        'I' | 'E' => Some(MemoryArea::ProcessInput),
        'Q' | 'A' => Some(MemoryArea::ProcessOutput),
        'M' => Some(MemoryArea::Merker),
        _ => None,
    }
}

/// Longest-match type-letter prefix (two-char letters first: DI, DW, WS, LR).
fn take_type_letter(s: &str) -> Option<(DataType, &str)> {
    const TWO_CHAR: &[(&str, DataType)] = &[
        ("DI", DataType::DInt),
        ("DW", DataType::DWord),
        ("WS", DataType::WString),
        ("LR", DataType::LReal),
    ];
    for (prefix, ty) in TWO_CHAR {
        if let Some(rest) = s.strip_prefix(prefix) {
            return Some((*ty, rest));
        }
    }
    const ONE_CHAR: &[(char, DataType)] = &[
        ('X', DataType::Bit),
        ('B', DataType::Byte),
        ('C', DataType::Char),
        ('I', DataType::Int),
        ('W', DataType::Word),
        ('R', DataType::Real),
        ('S', DataType::String),
    ];
    let mut chars = s.char_indices();
    let (_, first) = chars.next()?;
    for (letter, ty) in ONE_CHAR {
        if first == *letter {
            return Some((*ty, &s[first.len_utf8()..]));
        }
    }
    None
}

/// Parse leading digits as the offset, then an optional `.<digits>` suffix.
fn take_offset_and_suffix(s: &str) -> Option<(u32, Option<u32>)> {
    let digit_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if digit_end == 0 {
        return None;
    }
    let start: u32 = s[..digit_end].parse().ok()?;
    let rest = &s[digit_end..];
    if rest.is_empty() {
        return Some((start, None));
    }
    let rest = rest.strip_prefix('.')?;
    if rest.is_empty() {
        return None;
    }
    let suffix: u32 = rest.parse().ok()?;
    Some((start, Some(suffix)))
}

/// Render a tag back into one canonical textual form (`DB{n},{type}{start}`
/// for DB tags, `{area}{type}{start}` otherwise), with a `.{suffix}` for BIT
/// and STRING/WSTRING. Exists so `parse_address(&format_tag(t)) == t` can be
/// checked (spec invariant #1).
pub fn format_tag(tag: &Tag) -> String {
    let type_letter = match tag.data_type() {
        DataType::Bit => "X",
        DataType::Byte => "B",
        DataType::Char => "C",
        DataType::Int => "I",
        DataType::Word => "W",
        DataType::DInt => "DI",
        DataType::DWord => "DW",
        DataType::Real => "R",
        DataType::LReal => "LR",
        DataType::String => "S",
        DataType::WString => "WS",
    };

    let suffix = match tag.data_type() {
        DataType::Bit => format!(".{}", tag.bit_offset()),
        DataType::String | DataType::WString => format!(".{}", tag.length()),
        _ => String::new(),
    };

    if tag.memory_area() == MemoryArea::DataBlock {
        format!(
            "DB{},{}{}{}",
            tag.db_number(),
            type_letter,
            tag.start(),
            suffix
        )
    } else {
        let area_letter = match tag.memory_area() {
            MemoryArea::ProcessInput => "I",
            MemoryArea::ProcessOutput => "Q",
            MemoryArea::Merker => "M",
            MemoryArea::DataBlock | MemoryArea::Counter | MemoryArea::Timer => unreachable!(),
        };
        format!("{}{}{}{}", area_letter, type_letter, tag.start(), suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s4_parse_db_bit() {
        let tag = parse_address("DB1,X0.6").unwrap();
        assert_eq!(tag.memory_area(), MemoryArea::DataBlock);
        assert_eq!(tag.db_number(), 1);
        assert_eq!(tag.data_type(), DataType::Bit);
        assert_eq!(tag.start(), 0);
        assert_eq!(tag.bit_offset(), 6);
        assert_eq!(tag.byte_size(), 1);
    }

    #[test]
    fn parse_db_int() {
        let tag = parse_address("DB1,I30").unwrap();
        assert_eq!(tag.data_type(), DataType::Int);
        assert_eq!(tag.start(), 30);
        assert_eq!(tag.length(), 1);
    }

    #[test]
    fn parse_db_string_with_declared_length() {
        let tag = parse_address("DB1,S10.254").unwrap();
        assert_eq!(tag.data_type(), DataType::String);
        assert_eq!(tag.start(), 10);
        assert_eq!(tag.length(), 254);
        assert_eq!(tag.byte_size(), 256);
    }

    #[test]
    fn parse_area_form_with_type_letter() {
        let tag = parse_address("MW10").unwrap();
        assert_eq!(tag.memory_area(), MemoryArea::Merker);
        assert_eq!(tag.data_type(), DataType::Word);
        assert_eq!(tag.start(), 10);
    }

    #[test]
    fn parse_short_bit_form() {
        let tag = parse_address("M0.6").unwrap();
        assert_eq!(tag.memory_area(), MemoryArea::Merker);
        assert_eq!(tag.data_type(), DataType::Bit);
        assert_eq!(tag.bit_offset(), 6);
    }

    #[test]
    fn input_output_aliases() {
        let e = parse_address("EB3").unwrap();
        let i = parse_address("IB3").unwrap();
        assert_eq!(e, i);
        let a = parse_address("AB3").unwrap();
        let q = parse_address("QB3").unwrap();
        assert_eq!(a, q);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_address("").is_err());
        assert!(parse_address("ZZ123").is_err());
        assert!(parse_address("DB1,I30.5").is_err());
        assert!(parse_address("M0").is_err());
    }

    #[test]
    fn round_trips_canonical_forms() {
        for text in [
            "DB1,X0.6",
            "DB1,I30",
            "DB1,S10.254",
            "MW10",
            "M0.6",
            "IB3",
            "QB3",
        ] {
            let tag = parse_address(text).unwrap();
            let formatted = format_tag(&tag);
            let reparsed = parse_address(&formatted).unwrap();
            assert_eq!(tag, reparsed, "round-trip mismatch for {}", text);
        }
    }
}
