// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Route accepted datagrams by protocol.

use crate::engine::fifo::Fifo;
use crate::engine::ip4::aligned;
use crate::engine::stat::RxStats;
use crate::engine::word::Word;
use nts_api::Protocol;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Route {
    TtlExpired,
    Icmp,
    Udp,
    Tcp,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    First,
    /// Expect word 1, which carries TTL and protocol.
    Classify,
    Forward(Route),
    Drain,
}

/// The output channels of the demux.
pub struct L4Channels<'a> {
    pub ttl: &'a mut Fifo<Word>,
    pub icmp: &'a mut Fifo<Word>,
    pub udp: &'a mut Fifo<Word>,
    pub tcp: &'a mut Fifo<Word>,
}

impl L4Channels<'_> {
    fn get(&mut self, route: Route) -> &mut Fifo<Word> {
        match route {
            Route::TtlExpired => &mut *self.ttl,
            Route::Icmp => &mut *self.icmp,
            Route::Udp => &mut *self.udp,
            Route::Tcp => &mut *self.tcp,
        }
    }
}

/// Send each IP-aligned datagram to the channel of its protocol.
///
/// A datagram arriving with a TTL of 1 cannot be forwarded by us or
/// anyone else; it goes to the TTL-expired channel whatever its
/// protocol. Like the MAC demux, the route is decided on word 1 and
/// every word leaves one step late.
#[derive(Debug)]
pub struct L4ProtocolDemux {
    state: State,
    held: Option<Word>,
    stats: RxStats,
}

impl Default for L4ProtocolDemux {
    fn default() -> Self {
        Self { state: State::First, held: None, stats: RxStats::default() }
    }
}

impl L4ProtocolDemux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    fn classify(w: &Word) -> Option<Route> {
        let (_, ttl) = aligned::TTL;
        let (_, proto) = aligned::PROTO;

        if w.byte(ttl) == 1 {
            return Some(Route::TtlExpired);
        }

        match Protocol::from(w.byte(proto)) {
            Protocol::ICMP => Some(Route::Icmp),
            Protocol::UDP => Some(Route::Udp),
            Protocol::TCP => Some(Route::Tcp),
            Protocol::Unknown(_) => None,
        }
    }

    fn count(&mut self, route: Option<Route>) {
        let ctr = match route {
            Some(Route::TtlExpired) => &mut self.stats.ttl_expired,
            Some(Route::Icmp) => &mut self.stats.icmp_in,
            Some(Route::Udp) => &mut self.stats.udp_in,
            Some(Route::Tcp) => &mut self.stats.tcp_in,
            None => &mut self.stats.proto_unknown,
        };
        *ctr += 1;
    }

    /// Emit the held word, clearing the bytes past its keep mask if it
    /// ends the datagram.
    fn emit(out: &mut Fifo<Word>, mut w: Word) {
        if w.last {
            w.clear_invalid();
        }
        out.write(w);
    }

    pub fn try_step(
        &mut self,
        input: &mut Fifo<Word>,
        mut outs: L4Channels<'_>,
    ) -> bool {
        if let State::Forward(route) = self.state {
            let out = outs.get(route);

            if let Some(held) = self.held.filter(|w| w.last) {
                if out.is_full() {
                    return false;
                }

                Self::emit(out, held);
                self.held = None;
                self.state = State::First;
                return true;
            }

            if input.is_empty() || out.is_full() {
                return false;
            }

            let Some(w) = input.read() else { return false };
            if let Some(held) = self.held.replace(w) {
                Self::emit(out, held);
            }
            return true;
        }

        let Some(&w) = input.peek() else {
            return false;
        };

        match self.state {
            State::First => {
                input.read();
                if w.last {
                    // No TTL or protocol.
                    self.stats.proto_unknown += 1;
                } else {
                    self.held = Some(w);
                    self.state = State::Classify;
                }
            }

            State::Classify => {
                let route = Self::classify(&w);
                if let Some(route) = route {
                    if outs.get(route).is_full() {
                        return false;
                    }
                }

                input.read();
                self.count(route);
                match route {
                    Some(route) => {
                        if let Some(held) = self.held.replace(w) {
                            Self::emit(outs.get(route), held);
                        }
                        self.state = State::Forward(route);
                    }

                    None => {
                        self.held = None;
                        self.state =
                            if w.last { State::First } else { State::Drain };
                    }
                }
            }

            State::Drain => {
                input.read();
                if w.last {
                    self.state = State::First;
                }
            }

            State::Forward(_) => unreachable!(),
        }

        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::word::frame_to_words;
    use crate::engine::word::keep_to_mask;
    use crate::engine::word::words_to_frame;
    use nts_test_utils::*;

    #[derive(Default)]
    struct Outs {
        ttl: Vec<u8>,
        icmp: Vec<u8>,
        udp: Vec<u8>,
        tcp: Vec<u8>,
    }

    fn demux(dgrams: &[Vec<u8>]) -> (Outs, RxStats) {
        let mut input = Fifo::new("in", 256);
        let mut ttl = Fifo::new("ttl", 256);
        let mut icmp = Fifo::new("icmp", 256);
        let mut udp = Fifo::new("udp", 256);
        let mut tcp = Fifo::new("tcp", 256);
        for d in dgrams {
            frame_to_words(d).into_iter().for_each(|w| input.write(w));
        }

        let mut l4 = L4ProtocolDemux::new();
        while l4.try_step(
            &mut input,
            L4Channels {
                ttl: &mut ttl,
                icmp: &mut icmp,
                udp: &mut udp,
                tcp: &mut tcp,
            },
        ) {}

        let collect = |f: &mut Fifo<Word>| {
            let words: Vec<Word> = f.drain().collect();
            assert!(words.iter().all(Word::is_well_formed));
            words_to_frame(&words)
        };
        let outs = Outs {
            ttl: collect(&mut ttl),
            icmp: collect(&mut icmp),
            udp: collect(&mut udp),
            tcp: collect(&mut tcp),
        };
        (outs, *l4.stats())
    }

    fn dgram(proto: u8, ttl: u8) -> Vec<u8> {
        let frame = Ipv4Frame {
            proto,
            ttl,
            payload: vec![proto; 11],
            ..Default::default()
        };
        frame.datagram()
    }

    #[test]
    fn routes_by_protocol() {
        let icmp = dgram(PROTO_ICMP, 64);
        let udp = dgram(PROTO_UDP, 64);
        let tcp = dgram(PROTO_TCP, 64);
        let gre = dgram(47, 64);
        let (outs, stats) =
            demux(&[icmp.clone(), gre, udp.clone(), tcp.clone()]);

        assert_eq!(outs.icmp, icmp);
        assert_eq!(outs.udp, udp);
        assert_eq!(outs.tcp, tcp);
        assert!(outs.ttl.is_empty());
        assert_eq!(stats.proto_unknown, 1);
    }

    #[test]
    fn ttl_one_expires_regardless_of_protocol() {
        let udp = dgram(PROTO_UDP, 1);
        let tcp = dgram(PROTO_TCP, 1);
        let (outs, stats) = demux(&[udp.clone(), tcp.clone()]);

        let mut expected = udp;
        expected.extend(tcp);
        assert_eq!(outs.ttl, expected);
        assert!(outs.udp.is_empty() && outs.tcp.is_empty());
        assert_eq!(stats.ttl_expired, 2);
    }

    #[test]
    fn final_word_is_cleared_past_keep() {
        let mut input = Fifo::new("in", 8);
        let mut icmp = Fifo::new("icmp", 8);
        let (mut ttl, mut udp, mut tcp) =
            (Fifo::new("t", 8), Fifo::new("u", 8), Fifo::new("p", 8));
        let d = dgram(PROTO_ICMP, 64);
        for mut w in frame_to_words(&d) {
            // Garbage past the end of the datagram.
            w.data |= !keep_to_mask(w.keep);
            input.write(w);
        }

        let mut l4 = L4ProtocolDemux::new();
        while l4.try_step(
            &mut input,
            L4Channels {
                ttl: &mut ttl,
                icmp: &mut icmp,
                udp: &mut udp,
                tcp: &mut tcp,
            },
        ) {}

        let last = icmp.drain().last().unwrap();
        assert!(last.last);
        assert_eq!(last.data & !keep_to_mask(last.keep), 0);
    }
}
