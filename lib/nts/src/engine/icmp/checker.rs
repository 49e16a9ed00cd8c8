// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Verify incoming ICMP messages and turn Echo Requests into replies.

use super::EchoDecision;
use super::ICMP_HDR_LEN;
use super::MessageType;
use super::aligned as icmp;
use super::echo_reply_field;
use super::echo_request_field;
use crate::engine::checksum::HeaderChecksum;
use crate::engine::checksum::LaneSum;
use crate::engine::checksum::incremental_update;
use crate::engine::fifo::Fifo;
use crate::engine::ip4::IPV4_HDR_LEN_MIN;
use crate::engine::ip4::addr_at;
use crate::engine::ip4::aligned as ip;
use crate::engine::ip4::ihl;
use crate::engine::ip4::set_addr_at;
use crate::engine::stat::RxStats;
use crate::engine::word::WORD_BYTES;
use crate::engine::word::Word;

/// Words buffered until both addresses have been seen.
const HEAD_WORDS: usize = ip::DST.0 + 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Head,
    Flush,
    Body,
}

/// Verify the checksum of each ICMP message and prepare its reply.
///
/// Every message is forwarded to the echo data channel with its
/// addresses swapped and, for an Echo Request, its type rewritten to
/// Echo Reply. Since the checksum is only known at the end of the
/// message, the [`EchoDecision`] trails the data; the inserter holds
/// the data until the decision arrives.
#[derive(Debug)]
pub struct IcmpChecksumChecker {
    state: State,
    buf: heapless::Deque<Word, HEAD_WORDS>,
    idx: usize,
    /// Bytes of the datagram seen so far.
    len: usize,
    /// The IPv4 header length, in bytes.
    hdr_len: usize,
    sum: LaneSum,
    /// Type and code, once seen.
    type_code: Option<u16>,
    hc: u16,
    /// The final word has been read.
    done: bool,
    stats: RxStats,
}

impl Default for IcmpChecksumChecker {
    fn default() -> Self {
        Self {
            state: State::Head,
            buf: heapless::Deque::new(),
            idx: 0,
            len: 0,
            hdr_len: IPV4_HDR_LEN_MIN,
            sum: LaneSum::new(),
            type_code: None,
            hc: 0,
            done: false,
            stats: RxStats::default(),
        }
    }
}

impl IcmpChecksumChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    /// Sum the lanes of `w` that belong to the ICMP message and note
    /// the header fields.
    fn accumulate(&mut self, w: &Word) {
        let idx = self.idx;
        self.idx += 1;
        self.len += w.len();

        if idx == ip::VER_IHL.0 {
            self.hdr_len = ihl(w.byte(ip::VER_IHL.1)) as usize * 4;
        }

        for j in 0..4 {
            if idx * WORD_BYTES + 2 * j >= self.hdr_len {
                self.sum.add_lane(j, w.lane(j));
            }
        }

        // Only an option-less header puts the ICMP header in word 2.
        if idx == icmp::TYPE.0
            && self.hdr_len == IPV4_HDR_LEN_MIN
            && w.has_byte(icmp::CSUM.1 + 1)
        {
            self.type_code = Some(w.be16(icmp::TYPE.1));
            self.hc = w.be16(icmp::CSUM.1);
        }
    }

    /// Swap the addresses and rewrite the type of the buffered head.
    fn rewrite(&mut self) {
        if self.buf.len() < HEAD_WORDS {
            return;
        }

        let mut it = self.buf.iter_mut().skip(ip::SRC.0);
        let (Some(w1), Some(w2)) = (it.next(), it.next()) else {
            return;
        };

        let src = addr_at(w1, ip::SRC.1);
        let dst = addr_at(w2, ip::DST.1);
        set_addr_at(w1, ip::SRC.1, dst);
        set_addr_at(w2, ip::DST.1, src);

        if self.type_code == Some(echo_request_field()) {
            w2.set_byte(icmp::TYPE.1, MessageType::ECHO_REPLY.into());
        }
    }

    fn decide(&mut self) -> EchoDecision {
        let echo = self.type_code == Some(echo_request_field());

        let decision = if !self.sum.verifies() {
            self.stats.icmp_csum_bad += 1;
            EchoDecision::Drop
        } else if !echo || self.len < self.hdr_len + ICMP_HDR_LEN {
            self.stats.icmp_not_echo += 1;
            EchoDecision::Drop
        } else {
            EchoDecision::Forward(incremental_update(
                HeaderChecksum::wrap(self.hc),
                echo_request_field(),
                echo_reply_field(),
            ))
        };

        self.idx = 0;
        self.len = 0;
        self.hdr_len = IPV4_HDR_LEN_MIN;
        self.sum = LaneSum::new();
        self.type_code = None;
        decision
    }

    pub fn try_step(
        &mut self,
        input: &mut Fifo<Word>,
        data: &mut Fifo<Word>,
        decisions: &mut Fifo<EchoDecision>,
    ) -> bool {
        match self.state {
            State::Flush => {
                if data.is_full() {
                    return false;
                }

                if let Some(w) = self.buf.pop_front() {
                    data.write(w);
                }
                if self.buf.is_empty() {
                    self.state =
                        if self.done { State::Head } else { State::Body };
                    self.done = false;
                }
                true
            }

            State::Head => {
                if input.is_empty() || decisions.is_full() {
                    return false;
                }

                let Some(w) = input.read() else { return false };
                self.accumulate(&w);
                let pushed = self.buf.push_back(w).is_ok();
                debug_assert!(pushed, "the head is flushed at HEAD_WORDS");

                if w.last {
                    decisions.write(self.decide());
                    self.done = true;
                }

                if w.last || self.buf.len() == HEAD_WORDS {
                    self.rewrite();
                    self.state = State::Flush;
                }
                true
            }

            State::Body => {
                if input.is_empty() || data.is_full() || decisions.is_full() {
                    return false;
                }

                let Some(w) = input.read() else { return false };
                self.accumulate(&w);
                data.write(w);

                if w.last {
                    decisions.write(self.decide());
                    self.state = State::Head;
                }
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
    use nts_test_utils::icmp::*;
    use nts_test_utils::*;

    fn check(dgrams: &[Vec<u8>]) -> (Vec<u8>, Vec<EchoDecision>, RxStats) {
        let mut input = Fifo::new("in", 256);
        let mut data = Fifo::new("data", 256);
        let mut decisions = Fifo::new("decisions", 8);
        for d in dgrams {
            frame_to_words(d).into_iter().for_each(|w| input.write(w));
        }

        let mut c = IcmpChecksumChecker::new();
        while c.try_step(&mut input, &mut data, &mut decisions) {}
        let words: Vec<Word> = data.drain().collect();
        (words_to_frame(&words), decisions.drain().collect(), *c.stats())
    }

    #[test]
    fn echo_request_becomes_reply() {
        for data in [&b""[..], b"A", b"ABCD", b"0123456789abcdefXYZ"] {
            let req = echo_request_frame(data).datagram();
            let (mut out, decisions, _) = check(&[req]);

            let [EchoDecision::Forward(hc)] = decisions[..] else {
                panic!("no reply for {data:?}: {decisions:?}");
            };

            // Write the checksum as the inserter would; the result must
            // be the reply built from scratch.
            out[22..24].copy_from_slice(&hc.bytes());
            let expected = Ipv4Frame {
                ip_src: LOCAL_IP,
                ip_dst: REMOTE_IP,
                payload: echo_reply(ECHO_IDENT, ECHO_SEQ, data),
                ..Default::default()
            };
            assert_eq!(out, expected.datagram(), "{data:?}");
        }
    }

    #[test]
    fn drops_bad_checksum_and_non_echo() {
        let mut bad = echo_request_frame(b"ABCD").datagram();
        corrupt(&mut bad, 30);
        let reply = Ipv4Frame {
            payload: echo_reply(ECHO_IDENT, ECHO_SEQ, b"ABCD"),
            ..Default::default()
        }
        .datagram();
        let with_opts = Ipv4Frame {
            options: vec![1; 4],
            ..echo_request_frame(b"ABCD")
        }
        .datagram();

        let (out, decisions, stats) =
            check(&[bad.clone(), reply.clone(), with_opts.clone()]);
        assert_eq!(decisions, vec![EchoDecision::Drop; 3]);
        assert_eq!(stats.icmp_csum_bad, 1);
        assert_eq!(stats.icmp_not_echo, 2);
        // Every message is still forwarded, for the inserter to drain.
        assert_eq!(out.len(), bad.len() + reply.len() + with_opts.len());
    }

    #[test]
    fn message_shorter_than_icmp_header() {
        let req = echo_request_frame(b"").datagram();
        let (out, decisions, _) = check(&[req[..22].to_vec()]);
        assert_eq!(out.len(), 22);
        assert_eq!(decisions, vec![EchoDecision::Drop]);
    }
}
