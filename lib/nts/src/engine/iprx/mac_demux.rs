// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Ingress MAC filter and EtherType demultiplexer.

use crate::engine::ether::ETHER_TYPE_ARP;
use crate::engine::ether::ETHER_TYPE_IPV4;
use crate::engine::fifo::Fifo;
use crate::engine::ip4::framed;
use crate::engine::stat::RxStats;
use crate::engine::word::Word;
use nts_api::MacAddr;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Route {
    Arp,
    Ipv4,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    /// Expect the destination MAC.
    Dst,
    /// Expect the EtherType.
    EtherType,
    Forward(Route),
    Drain,
}

/// Accepts frames addressed to the local MAC or to broadcast and
/// routes them by EtherType.
///
/// The route is only known once word 1 is seen, so every word leaves
/// one step after it arrives; the final word is flushed on the step
/// following its arrival.
#[derive(Debug)]
pub struct MacProtocolDemux {
    mac: MacAddr,
    state: State,
    held: Option<Word>,
    stats: RxStats,
}

impl MacProtocolDemux {
    pub fn new(mac: MacAddr) -> Self {
        Self { mac, state: State::Dst, held: None, stats: RxStats::default() }
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    fn accepts(&self, w: &Word) -> bool {
        let b = w.bytes();
        let dst = MacAddr::from([b[0], b[1], b[2], b[3], b[4], b[5]]);
        dst == self.mac || dst.is_broadcast()
    }

    fn end_of(&mut self, w: &Word) {
        self.state = if w.last { State::Dst } else { State::Drain };
    }

    pub fn try_step(
        &mut self,
        input: &mut Fifo<Word>,
        arp: &mut Fifo<Word>,
        ipv4: &mut Fifo<Word>,
    ) -> bool {
        if let State::Forward(route) = self.state {
            let out = match route {
                Route::Arp => &mut *arp,
                Route::Ipv4 => &mut *ipv4,
            };

            if let Some(held) = self.held.filter(|w| w.last) {
                if out.is_full() {
                    return false;
                }

                out.write(held);
                self.held = None;
                self.state = State::Dst;
                return true;
            }

            if input.is_empty() || out.is_full() {
                return false;
            }

            let Some(w) = input.read() else { return false };
            if let Some(held) = self.held.replace(w) {
                out.write(held);
            }
            return true;
        }

        let Some(&w) = input.peek() else {
            return false;
        };

        match self.state {
            State::Dst => {
                input.read();
                self.stats.frames_in += 1;

                if w.last {
                    self.stats.runt_frame += 1;
                } else if !self.accepts(&w) {
                    self.stats.mac_mismatch += 1;
                    self.state = State::Drain;
                } else {
                    self.held = Some(w);
                    self.state = State::EtherType;
                }
            }

            State::EtherType => {
                let (_, et) = framed::ETHER_TYPE;
                if !w.has_byte(et + 1) {
                    input.read();
                    self.stats.runt_frame += 1;
                    self.held = None;
                    self.end_of(&w);
                    return true;
                }

                let (route, out) = match w.be16(et) {
                    ETHER_TYPE_ARP => (Route::Arp, &mut *arp),
                    ETHER_TYPE_IPV4 => (Route::Ipv4, &mut *ipv4),

                    _ => {
                        input.read();
                        self.stats.ethertype_unknown += 1;
                        self.held = None;
                        self.end_of(&w);
                        return true;
                    }
                };

                if out.is_full() {
                    return false;
                }

                input.read();
                if let Some(held) = self.held.replace(w) {
                    out.write(held);
                }

                match route {
                    Route::Arp => self.stats.arp_frames += 1,
                    Route::Ipv4 => self.stats.ipv4_frames += 1,
                }
                self.state = State::Forward(route);
            }

            State::Drain => {
                input.read();
                if w.last {
                    self.state = State::Dst;
                }
            }

            State::Forward(_) => unreachable!(),
        }

        true
    }
}
