// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The stream transfer unit.
//!
//! Every channel in the stack carries [`Word`]s: 8 bytes of data, a
//! per-byte valid mask (`keep`) and an end-of-frame marker (`last`).
//! Byte `i` of a word sits in bits `8i..8i+7` of `data`, so a frame is
//! laid out in words in the order its bytes appear on the wire:
//!
//! ```text
//!   data:   63     56 55     48 ...  15      8 7       0
//!          +---------+---------+ ... +---------+---------+
//!          | byte 7  | byte 6  |     | byte 1  | byte 0  |
//!          +---------+---------+ ... +---------+---------+
//!   keep:    bit 7     bit 6           bit 1     bit 0
//! ```
//!
//! Multi-byte protocol fields are in network order within the bytes;
//! the `be16()` accessor performs the network-to-host swap.

use serde::Deserialize;
use serde::Serialize;

/// Number of data bytes in a word.
pub const WORD_BYTES: usize = 8;

/// One transfer unit of a streamed frame.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct Word {
    pub data: u64,
    pub keep: u8,
    pub last: bool,
}

impl Word {
    pub const FULL_KEEP: u8 = 0xFF;

    /// A word carrying no valid bytes.
    pub const EMPTY: Self = Self { data: 0, keep: 0, last: false };

    pub const fn new(data: u64, keep: u8, last: bool) -> Self {
        Self { data, keep, last }
    }

    /// Build a word from up to 8 bytes, setting `keep` to cover them.
    pub fn from_bytes(bytes: &[u8], last: bool) -> Self {
        debug_assert!(bytes.len() <= WORD_BYTES);
        let mut raw = [0u8; WORD_BYTES];
        raw[..bytes.len()].copy_from_slice(bytes);
        Self {
            data: u64::from_le_bytes(raw),
            keep: keep_from_len(bytes.len()),
            last,
        }
    }

    /// All 8 data bytes, valid or not.
    #[inline]
    pub fn bytes(&self) -> [u8; WORD_BYTES] {
        self.data.to_le_bytes()
    }

    /// The valid bytes of this word.
    pub fn valid_bytes(&self) -> heapless::Vec<u8, WORD_BYTES> {
        self.bytes()
            .into_iter()
            .enumerate()
            .filter(|(i, _)| self.keep & (1 << i) != 0)
            .map(|(_, b)| b)
            .collect()
    }

    #[inline]
    pub fn byte(&self, i: usize) -> u8 {
        (self.data >> (8 * i)) as u8
    }

    #[inline]
    pub fn set_byte(&mut self, i: usize, val: u8) {
        let shift = 8 * i;
        self.data = (self.data & !(0xFF << shift)) | ((val as u64) << shift);
    }

    /// Read the network-order 16-bit field at bytes `i` and `i + 1`,
    /// returned in host order.
    #[inline]
    pub fn be16(&self, i: usize) -> u16 {
        u16::from_be_bytes([self.byte(i), self.byte(i + 1)])
    }

    /// Write `val` as a network-order 16-bit field at bytes `i` and
    /// `i + 1`.
    #[inline]
    pub fn set_be16(&mut self, i: usize, val: u16) {
        let [hi, lo] = val.to_be_bytes();
        self.set_byte(i, hi);
        self.set_byte(i + 1, lo);
    }

    /// Whether byte `i` is valid.
    #[inline]
    pub fn has_byte(&self, i: usize) -> bool {
        self.keep & (1 << i) != 0
    }

    /// Number of valid bytes.
    #[inline]
    pub fn len(&self) -> usize {
        keep_count(self.keep)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keep == 0
    }

    /// The 16-bit checksum lane `j` (bytes `2j` and `2j + 1`) in host
    /// order, with invalid bytes counted as zero.
    #[inline]
    pub fn lane(&self, j: usize) -> u16 {
        let hi = if self.has_byte(2 * j) { self.byte(2 * j) } else { 0 };
        let lo =
            if self.has_byte(2 * j + 1) { self.byte(2 * j + 1) } else { 0 };
        u16::from_be_bytes([hi, lo])
    }

    /// Zero every byte whose keep bit is clear.
    pub fn clear_invalid(&mut self) {
        self.data &= keep_to_mask(self.keep);
    }

    /// Truncate the word to its first `len` bytes and mark it last.
    pub fn truncate(&mut self, len: usize) {
        self.keep &= keep_from_len(len);
        self.last = true;
    }

    /// A non-final word must have every byte valid; a final word must
    /// carry a prefix mask.
    pub fn is_well_formed(&self) -> bool {
        if self.last {
            self.keep & self.keep.wrapping_add(1) == 0
        } else {
            self.keep == Self::FULL_KEEP
        }
    }
}

/// Population count of a keep mask.
#[inline]
pub fn keep_count(keep: u8) -> usize {
    keep.count_ones() as usize
}

/// The prefix keep mask covering `len` bytes; anything at or above 8
/// yields a full mask.
#[inline]
pub fn keep_from_len(len: usize) -> u8 {
    if len >= WORD_BYTES { Word::FULL_KEEP } else { ((1u16 << len) - 1) as u8 }
}

/// Expand a keep mask to a 64-bit data mask.
#[inline]
pub fn keep_to_mask(keep: u8) -> u64 {
    (0..WORD_BYTES)
        .filter(|i| keep & (1 << i) != 0)
        .fold(0u64, |mask, i| mask | (0xFF << (8 * i)))
}

/// Merge bytes `shift..8` of `prev` with bytes `0..shift` of `cur`.
///
/// The result carries `prev`'s upper bytes in its lower positions and
/// `cur`'s lower bytes in its upper positions; `last` is left clear.
/// A `shift` of zero yields `prev` unchanged.
pub fn merge(prev: &Word, cur: &Word, shift: usize) -> Word {
    debug_assert!(shift < WORD_BYTES);
    if shift == 0 {
        return Word { last: false, ..*prev };
    }

    let bits = 8 * shift;
    Word {
        data: (prev.data >> bits) | (cur.data << (64 - bits)),
        keep: (prev.keep >> shift) | (cur.keep << (WORD_BYTES - shift)),
        last: false,
    }
}

/// Re-emit a stream with its first `shift` bytes removed, one word in
/// and at most one word out per call.
///
/// The realigner holds the previously pushed word. Each push emits
/// the merge of the held word and the new one. When the final word
/// carries more than `shift` valid bytes, those bytes cannot fit in
/// the merged word and a residue word must be taken with
/// [`Realign::residue`] before the next stream starts.
///
/// A realigner may be seeded with a word whose bytes `shift..8` are
/// to be emitted ahead of the stream; this is how a header is
/// prepended to a body that does not start on a word boundary.
#[derive(Clone, Debug, Default)]
pub struct Realign {
    shift: usize,
    prev: Option<Word>,
    residue: bool,
}

impl Realign {
    pub fn new(shift: usize) -> Self {
        debug_assert!(shift < WORD_BYTES);
        Self { shift, prev: None, residue: false }
    }

    pub fn seeded(shift: usize, seed: Word) -> Self {
        debug_assert!(shift < WORD_BYTES);
        Self { shift, prev: Some(Word { last: false, ..seed }), residue: false }
    }

    /// Whether a residue word is waiting to be taken.
    pub fn has_residue(&self) -> bool {
        self.residue
    }

    /// Push the next word of the stream and return the word to emit,
    /// if any.
    pub fn push(&mut self, cur: Word) -> Option<Word> {
        debug_assert!(!self.residue, "residue not taken");
        let spill = cur.last && cur.len() > self.shift;

        let out = match self.prev.take() {
            Some(prev) => {
                let mut out = merge(&prev, &cur, self.shift);
                out.last = cur.last && !spill;
                Some(out)
            }

            None => None,
        };

        if spill {
            self.prev = Some(cur);
            self.residue = true;
        } else if !cur.last {
            self.prev = Some(cur);
        }

        out
    }

    /// Take the residue word left by a final word, if any.
    pub fn residue(&mut self) -> Option<Word> {
        if !self.residue {
            return None;
        }

        self.residue = false;
        let prev = self.prev.take()?;
        let mut out = merge(&prev, &Word::EMPTY, self.shift);
        out.last = true;
        Some(out)
    }
}

/// Split a frame into words.
pub fn frame_to_words(frame: &[u8]) -> Vec<Word> {
    let n = frame.chunks(WORD_BYTES).len();
    frame
        .chunks(WORD_BYTES)
        .enumerate()
        .map(|(i, chunk)| Word::from_bytes(chunk, i + 1 == n))
        .collect()
}

/// Concatenate the valid bytes of a sequence of words.
pub fn words_to_frame<'a, I>(words: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a Word>,
{
    words.into_iter().flat_map(|w| w.valid_bytes()).collect()
}
