// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Ethernet framing of outgoing datagrams.

use super::fifo::Fifo;
use super::ip4::addr_at;
use super::ip4::aligned;
use super::stat::RxStats;
use super::word::Realign;
use super::word::Word;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use core::fmt;
use core::fmt::Display;
use nts_api::Ipv4Addr;
use nts_api::MacAddr;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const ETHER_TYPE_IPV4: u16 = 0x0800;
pub const ETHER_TYPE_ARP: u16 = 0x0806;

pub const ETHER_ADDR_LEN: usize = 6;
pub const ETHER_HDR_SZ: usize = 14;

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum EtherType {
    Ipv4,
    Arp,
    Unknown(u16),
}

impl From<u16> for EtherType {
    fn from(raw: u16) -> Self {
        match raw {
            ETHER_TYPE_ARP => Self::Arp,
            ETHER_TYPE_IPV4 => Self::Ipv4,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<EtherType> for u16 {
    fn from(et: EtherType) -> Self {
        match et {
            EtherType::Ipv4 => ETHER_TYPE_IPV4,
            EtherType::Arp => ETHER_TYPE_ARP,
            EtherType::Unknown(val) => val,
        }
    }
}

impl Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:04X}", u16::from(*self))
    }
}

/// The Ethernet header in wire format.
#[repr(C)]
#[derive(Clone, Copy, Debug, Immutable, IntoBytes, KnownLayout, Unaligned)]
pub struct EtherHdrRaw {
    pub dst: [u8; ETHER_ADDR_LEN],
    pub src: [u8; ETHER_ADDR_LEN],
    pub ether_type: [u8; 2],
}

impl EtherHdrRaw {
    pub fn new(dst: MacAddr, src: MacAddr, ether_type: EtherType) -> Self {
        Self {
            dst: dst.bytes(),
            src: src.bytes(),
            ether_type: u16::from(ether_type).to_be_bytes(),
        }
    }
}

/// Resolve the next-hop MAC address of an outgoing datagram.
///
/// The receive stack does not own an ARP table; whoever builds it
/// supplies one.
pub trait NeighborLookup: Send + Sync {
    fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr>;
}

/// A fixed set of neighbors.
#[derive(Clone, Debug, Default)]
pub struct StaticNeighbors {
    map: BTreeMap<Ipv4Addr, MacAddr>,
}

impl StaticNeighbors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ip: Ipv4Addr, mac: MacAddr) -> Option<MacAddr> {
        self.map.insert(ip, mac)
    }
}

impl FromIterator<(Ipv4Addr, MacAddr)> for StaticNeighbors {
    fn from_iter<T: IntoIterator<Item = (Ipv4Addr, MacAddr)>>(
        iter: T,
    ) -> Self {
        Self { map: iter.into_iter().collect() }
    }
}

impl NeighborLookup for StaticNeighbors {
    fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.map.get(&ip).copied()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    /// Buffer the words up to the destination address.
    Collect,
    Header,
    Body,
    Drop,
}

/// The number of words that must be seen before the destination of an
/// IP-aligned datagram is known.
const DST_WORDS: usize = aligned::DST.0 + 1;

/// Prepend an Ethernet header to each IP-aligned datagram.
///
/// The header is 14 bytes: its first word is emitted whole, and its
/// last 6 bytes seed a realigner that shifts the datagram 2 bytes
/// down behind them.
#[derive(Debug)]
pub struct EtherEncap {
    mac: MacAddr,
    state: State,
    buf: heapless::Deque<Word, DST_WORDS>,
    hdr: [u8; ETHER_HDR_SZ],
    realign: Realign,
    stats: RxStats,
}

impl EtherEncap {
    pub fn new(mac: MacAddr) -> Self {
        Self {
            mac,
            state: State::Collect,
            buf: heapless::Deque::new(),
            hdr: [0; ETHER_HDR_SZ],
            realign: Realign::new(2),
            stats: RxStats::default(),
        }
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    fn resolve(
        &mut self,
        neighbors: &dyn NeighborLookup,
        log: &dyn LogProvider,
    ) -> bool {
        let Some(dst_word) = self.buf.back() else { return false };
        let dst = addr_at(dst_word, aligned::DST.1);

        match neighbors.lookup(dst) {
            Some(mac) => {
                let hdr = EtherHdrRaw::new(mac, self.mac, EtherType::Ipv4);
                self.hdr.copy_from_slice(hdr.as_bytes());
                true
            }

            None => {
                log.log(LogLevel::Warn, &format!("no neighbor for {dst}"));
                self.stats.neighbor_miss += 1;
                false
            }
        }
    }

    pub fn try_step(
        &mut self,
        input: &mut Fifo<Word>,
        out: &mut Fifo<Word>,
        neighbors: &dyn NeighborLookup,
        log: &dyn LogProvider,
    ) -> bool {
        match self.state {
            State::Collect => {
                let Some(w) = input.read() else { return false };
                let pushed = self.buf.push_back(w).is_ok();
                debug_assert!(pushed, "the deque is drained whenever it fills");

                if self.buf.len() < DST_WORDS {
                    if w.last {
                        log.log(
                            LogLevel::Error,
                            "outgoing datagram shorter than an IPv4 header",
                        );
                        self.buf.clear();
                    }
                    return true;
                }

                if self.resolve(neighbors, log) {
                    self.state = State::Header;
                } else {
                    self.buf.clear();
                    if !w.last {
                        self.state = State::Drop;
                    }
                }
            }

            State::Header => {
                if out.is_full() {
                    return false;
                }

                out.write(Word::from_bytes(&self.hdr[..8], false));

                // Bytes 8..14 of the header land in bytes 2..8 of the
                // seed, the part the realigner emits.
                let mut seed = [0u8; 8];
                seed[2..].copy_from_slice(&self.hdr[8..]);
                self.realign =
                    Realign::seeded(2, Word::from_bytes(&seed, false));
                self.state = State::Body;
            }

            State::Body => {
                if out.is_full() {
                    return false;
                }

                if let Some(w) = self.realign.residue() {
                    out.write(w);
                    self.stats.frames_out += 1;
                    self.state = State::Collect;
                    return true;
                }

                let w = match self.buf.pop_front() {
                    Some(w) => w,
                    None => match input.read() {
                        Some(w) => w,
                        None => return false,
                    },
                };

                if let Some(o) = self.realign.push(w) {
                    out.write(o);
                }

                if w.last && !self.realign.has_residue() {
                    self.stats.frames_out += 1;
                    self.state = State::Collect;
                }
            }

            State::Drop => {
                let Some(w) = input.read() else { return false };
                if w.last {
                    self.state = State::Collect;
                }
            }
        }

        true
    }
}
