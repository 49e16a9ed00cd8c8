// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Deliver received UDP datagrams.

use super::PortTable;
use super::UdpRxMeta;
use crate::engine::fifo::Fifo;
use crate::engine::stat::RxStats;
use crate::engine::word::Word;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Action {
    Deliver,
    Unreachable,
    Drop,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Idle,
    Excerpt(Action),
    /// Handle datagram word `n`.
    Data(Action, usize),
}

/// The inputs of the handler, all produced per datagram.
pub struct HandlerInputs<'a> {
    pub meta: &'a mut Fifo<UdpRxMeta>,
    pub excerpt: &'a mut Fifo<Word>,
    pub data: &'a mut Fifo<Word>,
    pub verdicts: &'a mut Fifo<bool>,
}

/// The outputs of the handler.
pub struct HandlerOutputs<'a> {
    /// Metadata of delivered datagrams.
    pub app_meta: &'a mut Fifo<UdpRxMeta>,
    /// Payloads of delivered datagrams, one per `app_meta` record.
    pub app_data: &'a mut Fifo<Word>,
    /// Excerpts of datagrams sent to closed ports.
    pub unreach: &'a mut Fifo<Word>,
}

/// Decide the fate of each UDP datagram once its verdict is known.
///
/// A datagram with a bad checksum is dropped. One for a closed port
/// is dropped and its excerpt goes to the ICMP engine to become a
/// Port Unreachable. Otherwise its payload is delivered, unless it is
/// empty.
#[derive(Debug)]
pub struct RxPacketHandler {
    ports: Arc<PortTable>,
    state: State,
    meta: UdpRxMeta,
    stats: RxStats,
}

impl RxPacketHandler {
    pub fn new(ports: Arc<PortTable>) -> Self {
        Self {
            ports,
            state: State::Idle,
            meta: UdpRxMeta::default(),
            stats: RxStats::default(),
        }
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    fn decide(&mut self, valid: bool) -> Action {
        if !valid {
            return Action::Drop;
        }

        if !self.ports.is_open(self.meta.pair.dst.port) {
            self.stats.udp_port_closed += 1;
            return Action::Unreachable;
        }

        if self.meta.len == 0 {
            self.stats.udp_empty += 1;
            return Action::Drop;
        }

        Action::Deliver
    }

    pub fn try_step(
        &mut self,
        ins: HandlerInputs<'_>,
        outs: HandlerOutputs<'_>,
    ) -> bool {
        match self.state {
            State::Idle => {
                if ins.meta.is_empty() || ins.verdicts.is_empty() {
                    return false;
                }

                let action = match (ins.meta.read(), ins.verdicts.read()) {
                    (Some(meta), Some(valid)) => {
                        self.meta = meta;
                        self.decide(valid)
                    }
                    _ => return false,
                };
                self.state = State::Excerpt(action);
                true
            }

            State::Excerpt(action) => {
                let forward = action == Action::Unreachable;
                if forward && outs.unreach.is_full() {
                    return false;
                }

                let Some(w) = ins.excerpt.read() else { return false };
                if forward {
                    outs.unreach.write(w);
                }
                if w.last {
                    self.state = State::Data(action, 0);
                }
                true
            }

            State::Data(action, n) => {
                let deliver = action == Action::Deliver;
                if deliver && n == 0 && outs.app_meta.is_full() {
                    return false;
                }
                if deliver && n > 0 && outs.app_data.is_full() {
                    return false;
                }

                let Some(w) = ins.data.read() else { return false };
                if deliver {
                    // Word 0 is the UDP header.
                    if n == 0 {
                        outs.app_meta.write(self.meta);
                        self.stats.udp_delivered += 1;
                    } else {
                        outs.app_data.write(w);
                    }
                }

                self.state = if w.last {
                    State::Idle
                } else {
                    State::Data(action, n + 1)
                };
                true
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::word::frame_to_words;
    use crate::engine::word::words_to_frame;
    use nts_api::SockAddr;
    use nts_api::SocketPair;
    use nts_test_utils::udp::*;
    use nts_test_utils::*;

    struct Rx {
        ports: Arc<PortTable>,
        meta: Fifo<UdpRxMeta>,
        excerpt: Fifo<Word>,
        data: Fifo<Word>,
        verdicts: Fifo<bool>,
        app_meta: Fifo<UdpRxMeta>,
        app_data: Fifo<Word>,
        unreach: Fifo<Word>,
        handler: RxPacketHandler,
    }

    impl Rx {
        fn new() -> Self {
            let ports = Arc::new(PortTable::new());
            Self {
                handler: RxPacketHandler::new(Arc::clone(&ports)),
                ports,
                meta: Fifo::new("meta", 8),
                excerpt: Fifo::new("excerpt", 64),
                data: Fifo::new("data", 256),
                verdicts: Fifo::new("verdicts", 8),
                app_meta: Fifo::new("app meta", 8),
                app_data: Fifo::new("app data", 256),
                unreach: Fifo::new("unreach", 64),
            }
        }

        // Feed a datagram as the strip stage and checker would.
        fn feed(&mut self, dport: u16, payload: &[u8], valid: bool) {
            let frame = udp_frame(7000, dport, payload);
            let dgram = frame.datagram();
            self.meta.write(UdpRxMeta {
                pair: SocketPair {
                    src: SockAddr { addr: REMOTE_IP, port: 7000 },
                    dst: SockAddr { addr: LOCAL_IP, port: dport },
                },
                len: payload.len() as u16,
            });
            for w in frame_to_words(&dgram[..IPV4_HDR_LEN + UDP_HDR_LEN]) {
                self.excerpt.write(w);
            }
            for w in frame_to_words(&dgram[IPV4_HDR_LEN..]) {
                self.data.write(w);
            }
            self.verdicts.write(valid);
        }

        fn run(&mut self) {
            while self.handler.try_step(
                HandlerInputs {
                    meta: &mut self.meta,
                    excerpt: &mut self.excerpt,
                    data: &mut self.data,
                    verdicts: &mut self.verdicts,
                },
                HandlerOutputs {
                    app_meta: &mut self.app_meta,
                    app_data: &mut self.app_data,
                    unreach: &mut self.unreach,
                },
            ) {}
        }
    }

    #[test]
    fn delivers_to_open_ports() {
        let mut rx = Rx::new();
        rx.ports.listen(5000);
        rx.feed(5000, b"first payload", true);
        rx.feed(5000, b"second", true);
        rx.run();

        let meta: Vec<UdpRxMeta> = rx.app_meta.drain().collect();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta[0].len, 13);
        assert_eq!(meta[1].pair.src.port, 7000);

        let words: Vec<Word> = rx.app_data.drain().collect();
        let payloads: Vec<Vec<u8>> =
            words.split_inclusive(|w| w.last).map(words_to_frame).collect();
        assert_eq!(payloads[0], b"first payload");
        assert_eq!(payloads[1], b"second");
        assert!(rx.unreach.is_empty());
        assert_eq!(rx.handler.stats().udp_delivered, 2);
        assert!(rx.data.is_empty() && rx.excerpt.is_empty());
    }

    #[test]
    fn closed_port_sends_excerpt() {
        let mut rx = Rx::new();
        rx.feed(5000, b"nobody home", true);
        rx.run();

        assert!(rx.app_meta.is_empty() && rx.app_data.is_empty());
        let excerpt: Vec<Word> = rx.unreach.drain().collect();
        assert_eq!(words_to_frame(&excerpt).len(), 28);
        assert!(excerpt.last().unwrap().last);
        assert_eq!(rx.handler.stats().udp_port_closed, 1);
    }

    #[test]
    fn drops_invalid_and_empty() {
        let mut rx = Rx::new();
        rx.ports.listen(5000);
        rx.feed(5000, b"bad", false);
        rx.feed(5000, b"", true);
        // A bad checksum wins over a closed port.
        rx.feed(6000, b"bad", false);
        rx.run();

        assert!(rx.app_meta.is_empty() && rx.app_data.is_empty());
        assert!(rx.unreach.is_empty());
        assert!(rx.data.is_empty() && rx.excerpt.is_empty());
        assert_eq!(rx.handler.stats().udp_empty, 1);
    }
}
