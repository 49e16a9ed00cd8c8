// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Types for calculating the internet checksum.
//!
//! This module contains two accumulators for the "internet checksum".
//!
//! * [`Checksum`] is a rolling one's complement sum that delays
//!   summing the carries until the sum is finalized. It is used when a
//!   header is built or patched as a whole: the IPv4 header prepended
//!   to generated ICMP messages, and the RFC 1624 incremental update
//!   that turns an Echo Request into an Echo Reply.
//!
//! * [`LaneSum`] is the streaming form used by the receive stages.
//!   Each word delivers four 16-bit fields and each field has its own
//!   lane; a lane folds its carry back in immediately, so no lane ever
//!   holds more than 17 bits. The lanes are combined only once the
//!   whole message has been seen.
//!
//! # Checksums and Endianness
//!
//! All sums in this module are computed over 16-bit values in host
//! order, i.e. every pair of network-order bytes is read with
//! `from_be_bytes()`. The one's complement sum is byte-order
//! independent (RFC 1071 §1.B) as long as the summed values and the
//! stored checksum agree on the order, so a checksum produced here is
//! written back to the header with `to_be_bytes()`.
//!
//! # Relevant RFCs
//!
//! * 1071 Computing the Internet Checksum
//!
//! * 1624 Computation of the Internet Checksum via Incremental Update

use super::word::Word;

/// Fold the carries of a 32-bit sum back into 16 bits.
#[inline]
pub fn fold(mut sum: u32) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum >> 16) + (sum & 0xFFFF);
    }

    sum as u16
}

/// The checksum value, as it is contained in a network header.
///
/// This is meant to hold the value as it is stored in the header
/// itself, in host order. Notably, it contains the value with one's
/// complement applied.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderChecksum {
    inner: u16,
}

impl HeaderChecksum {
    /// Return the header value of this checksum.
    pub fn value(&self) -> u16 {
        self.inner
    }

    /// Return the network-order bytes of this checksum.
    pub fn bytes(&self) -> [u8; 2] {
        self.inner.to_be_bytes()
    }

    /// Wrap the checksum as read from a header.
    ///
    /// NOTE: This could just as well be a `From<u16>` implementation,
    /// but the "wrap" verbiage is meant to make it clear that we are
    /// wrapping a value which represents a header checksum -- i.e.,
    /// the one's complement of a one's complement sum.
    pub fn wrap(hc: u16) -> Self {
        Self { inner: hc }
    }
}

impl From<Checksum> for HeaderChecksum {
    /// Finalize the rolling checksum and put it into header form by
    /// performing one's complement.
    fn from(mut csum: Checksum) -> HeaderChecksum {
        Self { inner: !csum.finalize() }
    }
}

/// A rolling one's complement checksum calculation.
///
/// This is useful for keeping a rolling checksum in a more efficient
/// manner; as opposed to constantly taking the one's complement
/// (bitwise negation), incrementally updating the sum, and then
/// re-applying one's complement. It also delays summing the carries
/// until the finalized sum is needed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
}

impl Checksum {
    /// Creates a new checksum counter.
    pub fn new() -> Self {
        Self::from(0)
    }

    /// Create a new rolling checksum, starting with the passed in
    /// `bytes`.
    pub fn compute(bytes: &[u8]) -> Self {
        Self { inner: csum_add(0, bytes) }
    }

    /// Update the sum by adding the contents of `bytes`.
    ///
    /// An odd trailing byte is summed as if padded with a zero byte.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_add(self.inner, bytes);
    }

    /// Update the sum by subtracting the contents of `bytes`.
    ///
    /// This is useful for incrementally updating an existing checksum
    /// where only a portion of the bytes are being rewritten.
    pub fn sub_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_sub(self.inner, bytes);
    }

    pub fn add_u16(&mut self, val: u16) {
        self.inner += val as u32;
    }

    pub fn sub_u16(&mut self, val: u16) {
        self.inner += (!val) as u32;
    }

    /// Finalize the sum by adding up all the accumulated carries and
    /// returning the resulting value as a `u16`.
    pub fn finalize(&mut self) -> u16 {
        let out = fold(self.inner);
        self.inner = out as u32;
        out
    }
}

impl From<HeaderChecksum> for Checksum {
    // Convert a header's checksum into a rolling checksum.
    fn from(hc: HeaderChecksum) -> Self {
        Self { inner: (!hc.value()) as u32 }
    }
}

impl From<u32> for Checksum {
    fn from(csum: u32) -> Self {
        Self { inner: csum }
    }
}

impl core::ops::Add for Checksum {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self { inner: self.inner + other.inner }
    }
}

impl core::ops::AddAssign for Checksum {
    fn add_assign(&mut self, other: Self) {
        self.inner += other.inner
    }
}

fn csum_add(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);
    for pair in &mut chunks {
        csum += u16::from_be_bytes([pair[0], pair[1]]) as u32;
    }

    if let [odd] = chunks.remainder() {
        csum += u16::from_be_bytes([*odd, 0]) as u32;
    }

    csum
}

fn csum_sub(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);
    for pair in &mut chunks {
        csum += (!u16::from_be_bytes([pair[0], pair[1]])) as u32;
    }

    if let [odd] = chunks.remainder() {
        csum += (!u16::from_be_bytes([*odd, 0])) as u32;
    }

    csum
}

/// Apply the RFC 1624 incremental update `HC' = ~(~HC + ~m + m')` for
/// a 16-bit field changing from `old` to `new`.
pub fn incremental_update(
    hc: HeaderChecksum,
    old: u16,
    new: u16,
) -> HeaderChecksum {
    let mut csum = Checksum::from(hc);
    csum.sub_u16(old);
    csum.add_u16(new);
    HeaderChecksum::from(csum)
}

/// Four one's complement lanes, one per 16-bit field of a word.
///
/// Each lane is updated with an immediate end-around-carry fold, so a
/// lane never needs more than 17 bits while a sum is being added.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LaneSum {
    lanes: [u16; 4],
}

impl LaneSum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a sum computed elsewhere, such as a pseudo-header.
    pub fn seeded(seed: u16) -> Self {
        Self { lanes: [seed, 0, 0, 0] }
    }

    pub fn from_lanes(lanes: [u16; 4]) -> Self {
        Self { lanes }
    }

    pub fn lanes(&self) -> [u16; 4] {
        self.lanes
    }

    /// Add a 16-bit field to lane `j`.
    #[inline]
    pub fn add_lane(&mut self, j: usize, val: u16) {
        self.lanes[j] = add_fold(self.lanes[j], val);
    }

    /// Add every lane of `w`, counting invalid bytes as zero.
    pub fn add_word(&mut self, w: &Word) {
        for j in 0..4 {
            self.add_lane(j, w.lane(j));
        }
    }

    /// Combine the lanes into a single folded sum.
    ///
    /// The lanes are paired as `(0, 2)` and `(1, 3)` and the pairs
    /// summed, mirroring a two-level adder tree.
    pub fn combine(&self) -> u16 {
        let [s0, s1, s2, s3] = self.lanes;
        add_fold(add_fold(s0, s2), add_fold(s1, s3))
    }

    /// Whether the summed message, checksum field included, verifies:
    /// the one's complement of the sum is zero.
    pub fn verifies(&self) -> bool {
        !self.combine() == 0
    }

    /// The header checksum a message with these lanes (and a zero
    /// checksum field) should carry.
    pub fn header_checksum(&self) -> HeaderChecksum {
        HeaderChecksum::wrap(!self.combine())
    }
}

/// One's complement addition of two 16-bit values with the carry
/// folded back in: `sum = (sum + (sum >> 16)) & 0xFFFF`.
#[inline]
pub fn add_fold(a: u16, b: u16) -> u16 {
    let sum = a as u32 + b as u32;
    ((sum + (sum >> 16)) & 0xFFFF) as u16
}
