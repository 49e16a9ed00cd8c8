// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The `.dat` word-stream interchange format.
//!
//! One [`Word`] per line:
//!
//! ```text
//! <data: 16 hex digits> <last: 0|1> <keep: 2 hex digits>
//! ```
//!
//! The data field is printed most significant byte first, so byte 0
//! of the word is the rightmost pair of digits. Anything after a `#`
//! is a comment; blank lines are ignored.

use crate::engine::word::Word;
use std::io;
use std::io::BufRead;
use std::io::Write;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatError {
    #[error("line {line}: expected 3 fields, found {found}")]
    FieldCount { line: usize, found: usize },

    #[error("line {line}: bad {field} field {val:?}")]
    BadField { line: usize, field: &'static str, val: String },

    #[error("line {line}: keep 0x{keep:02X} is not contiguous")]
    BadKeep { line: usize, keep: u8 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn parse_line(line: usize, text: &str) -> Result<Option<Word>, DatError> {
    let text = match text.split_once('#') {
        Some((before, _)) => before,
        None => text,
    };

    let fields: Vec<&str> = text.split_whitespace().collect();
    match fields.len() {
        0 => return Ok(None),
        3 => {}
        found => return Err(DatError::FieldCount { line, found }),
    }

    let bad = |field, val: &str| DatError::BadField {
        line,
        field,
        val: val.to_string(),
    };

    if fields[0].len() != 16 {
        return Err(bad("data", fields[0]));
    }
    let data =
        u64::from_str_radix(fields[0], 16).map_err(|_| bad("data", fields[0]))?;

    let last = match fields[1] {
        "0" => false,
        "1" => true,
        val => return Err(bad("last", val)),
    };

    if fields[2].len() != 2 {
        return Err(bad("keep", fields[2]));
    }
    let keep =
        u8::from_str_radix(fields[2], 16).map_err(|_| bad("keep", fields[2]))?;

    let w = Word::new(data, keep, last);
    // Only the final word of a frame may be partial.
    if !w.is_well_formed() {
        return Err(DatError::BadKeep { line, keep });
    }
    Ok(Some(w))
}

/// Read every word from `reader`.
pub fn read_words<R: BufRead>(reader: R) -> Result<Vec<Word>, DatError> {
    let mut words = vec![];
    for (i, text) in reader.lines().enumerate() {
        if let Some(w) = parse_line(i + 1, &text?)? {
            words.push(w);
        }
    }
    Ok(words)
}

/// Parse words from a string.
pub fn parse_words(text: &str) -> Result<Vec<Word>, DatError> {
    read_words(text.as_bytes())
}

/// Write `words` to `writer`, one per line.
pub fn write_words<'a, W, I>(writer: &mut W, words: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a Word>,
{
    for w in words {
        writeln!(writer, "{:016X} {} {:02X}", w.data, w.last as u8, w.keep)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::word::frame_to_words;

    #[test]
    fn parse_with_comments() {
        let text = "\
# an ICMP echo request
0000FFFFFFFFFFFF 0 FF

0045000800000000 0 ff   # EtherType and version
0000000000004443 1 03
";
        let words = parse_words(text).unwrap();
        assert_eq!(words.len(), 3);
        assert_eq!(words[0].byte(0), 0xFF);
        assert_eq!(words[0].byte(6), 0x00);
        assert_eq!(words[1].be16(4), 0x0800);
        assert_eq!(words[2], Word::new(0x4443, 0x03, true));
    }

    #[test]
    fn write_then_read() {
        let words = frame_to_words(b"a frame of nineteen");
        let mut out = vec![];
        write_words(&mut out, &words).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().last().unwrap().ends_with(" 1 07"));
        assert_eq!(parse_words(&text).unwrap(), words);
    }

    #[test]
    fn bad_lines() {
        assert!(matches!(
            parse_words("00 1"),
            Err(DatError::FieldCount { line: 1, found: 2 })
        ));
        assert!(matches!(
            parse_words("\n00000000000000ZZ 1 01"),
            Err(DatError::BadField { line: 2, field: "data", .. })
        ));
        assert!(matches!(
            parse_words("0000000000000000 2 01"),
            Err(DatError::BadField { field: "last", .. })
        ));
        assert!(matches!(
            parse_words("0000000000000000 0 0F"),
            Err(DatError::BadKeep { keep: 0x0F, .. })
        ));
        assert!(matches!(
            parse_words("0000000000000000 1 05"),
            Err(DatError::BadKeep { keep: 0x05, .. })
        ));
    }
}
