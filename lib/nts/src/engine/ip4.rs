// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! IPv4 header layout as seen by the word stream, and the per-datagram
//! records exchanged by the header validation stages.
//!
//! Two layouts matter. On ingress the IPv4 header starts at byte 6 of
//! word 1, behind the 14-byte Ethernet header. Once the checksum
//! validator has stripped the Ethernet header every stream is
//! *IP-aligned*: IPv4 byte 0 is byte 0 of word 0.
//!
//! ```text
//!  IP-aligned      byte 0    1    2    3    4    5    6    7
//!          word 0 | ver/ihl | tos | total len | ident     | flags/off |
//!          word 1 | ttl | proto | hdr csum   | source address        |
//!          word 2 | destination address      | (L4 bytes 0..4)       |
//! ```

use super::word::Word;
use crate::engine::checksum::Checksum;
use crate::engine::checksum::HeaderChecksum;
use crate::engine::checksum::LaneSum;
use nts_api::Ipv4Addr;
use nts_api::Protocol;
use serde::Deserialize;
use serde::Serialize;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const IPV4_VERSION: u8 = 4;
pub const IPV4_HDR_LEN_MIN: usize = 20;
pub const IPV4_HDR_LEN_MAX: usize = 60;
pub const IPV4_HDR_VER_IHL: u8 = 0x45;

/// The More-Fragments flag, in host order.
pub const IPV4_MF: u16 = 0x2000;
pub const IPV4_FRAG_OFFSET_MASK: u16 = 0x1FFF;

/// Field offsets of an Ethernet-framed ingress stream, as `(word,
/// byte)` pairs.
pub mod framed {
    pub const ETHER_TYPE: (usize, usize) = (1, 4);
    pub const VER_IHL: (usize, usize) = (1, 6);
    pub const TOTAL_LEN: (usize, usize) = (2, 0);
    pub const FLAGS_FRAG: (usize, usize) = (2, 4);
    /// The destination address straddles words 3 and 4.
    pub const DST_HI: (usize, usize) = (3, 6);
    pub const DST_LO: (usize, usize) = (4, 0);
}

/// Field offsets of an IP-aligned stream, as `(word, byte)` pairs.
pub mod aligned {
    pub const VER_IHL: (usize, usize) = (0, 0);
    pub const TOTAL_LEN: (usize, usize) = (0, 2);
    pub const TTL: (usize, usize) = (1, 0);
    pub const PROTO: (usize, usize) = (1, 1);
    pub const HDR_CSUM: (usize, usize) = (1, 2);
    pub const SRC: (usize, usize) = (1, 4);
    pub const DST: (usize, usize) = (2, 0);
}

/// The IHL nibble, in 32-bit words.
#[inline]
pub fn ihl(ver_ihl: u8) -> u8 {
    ver_ihl & 0x0F
}

#[inline]
pub fn version(ver_ihl: u8) -> u8 {
    ver_ihl >> 4
}

/// Whether a flags/fragment-offset field describes an unfragmented
/// datagram: MF clear and offset zero. DF is ignored.
#[inline]
pub fn is_unfragmented(flags_frag: u16) -> bool {
    flags_frag & IPV4_MF == 0 && flags_frag & IPV4_FRAG_OFFSET_MASK == 0
}

/// Read the 4-byte address at `byte` of `w` (IP-aligned words carry
/// whole addresses at bytes 4-7 and 0-3).
pub fn addr_at(w: &Word, byte: usize) -> Ipv4Addr {
    Ipv4Addr::from([
        w.byte(byte),
        w.byte(byte + 1),
        w.byte(byte + 2),
        w.byte(byte + 3),
    ])
}

/// Write `ip` to bytes `byte..byte + 4` of `w`.
pub fn set_addr_at(w: &mut Word, byte: usize, ip: Ipv4Addr) {
    for (i, b) in ip.bytes().into_iter().enumerate() {
        w.set_byte(byte + i, b);
    }
}

/// The TTL of datagrams we originate.
pub const IPV4_DEF_TTL: u8 = 0x80;

/// The option-less IPv4 header in wire format.
#[repr(C)]
#[derive(Clone, Copy, Debug, Immutable, IntoBytes, KnownLayout, Unaligned)]
pub struct Ipv4HdrRaw {
    pub ver_hdr_len: u8,
    pub dscp_ecn: u8,
    pub total_len: [u8; 2],
    pub ident: [u8; 2],
    pub frag_and_flags: [u8; 2],
    pub ttl: u8,
    pub proto: u8,
    pub csum: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

impl Ipv4HdrRaw {
    /// A header with no identification and no flags, its checksum
    /// filled in.
    pub fn new(
        src: Ipv4Addr,
        dst: Ipv4Addr,
        proto: Protocol,
        total_len: u16,
    ) -> Self {
        let mut hdr = Self {
            ver_hdr_len: IPV4_HDR_VER_IHL,
            dscp_ecn: 0,
            total_len: total_len.to_be_bytes(),
            ident: [0; 2],
            frag_and_flags: [0; 2],
            ttl: IPV4_DEF_TTL,
            proto: u8::from(proto),
            csum: [0; 2],
            src: src.bytes(),
            dst: dst.bytes(),
        };
        let hc = HeaderChecksum::from(Checksum::compute(hdr.as_bytes()));
        hdr.csum = hc.bytes();
        hdr
    }
}

/// The partial header sums and header checks of one datagram, as
/// produced by the checksum validator.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SubSums {
    pub sum: LaneSum,
    /// The destination is ours, the limited broadcast, or our
    /// subnet's directed broadcast.
    pub ip_match: bool,
    pub version_valid: bool,
    pub fragment_valid: bool,
}

/// The accept decision for one datagram.
///
/// All three checks travel together so that the dropper consumes
/// exactly one record per datagram.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct Verdict {
    pub checksum_valid: bool,
    pub version_valid: bool,
    pub fragment_valid: bool,
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        self.checksum_valid && self.version_valid && self.fragment_valid
    }
}
