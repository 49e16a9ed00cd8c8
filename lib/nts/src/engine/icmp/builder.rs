// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Build ICMP error messages.

use super::ICMP_ERR_EXCERPT_LEN;
use super::ICMP_HDR_LEN;
use super::IcmpError;
use super::IcmpErrorMeta;
use crate::engine::checksum::HeaderChecksum;
use crate::engine::checksum::LaneSum;
use crate::engine::fifo::Fifo;
use crate::engine::ip4::IPV4_HDR_LEN_MIN;
use crate::engine::ip4::addr_at;
use crate::engine::ip4::aligned;
use crate::engine::ip4::ihl;
use crate::engine::stat::RxStats;
use crate::engine::word::WORD_BYTES;
use crate::engine::word::Word;
use crate::engine::word::keep_from_len;

/// Words of the trigger held until its source address is known.
const HEAD_WORDS: usize = aligned::SRC.0 + 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Idle,
    Head(IcmpError),
    Header(IcmpError),
    Excerpt(IcmpError),
    Checksum(IcmpError),
    Drain(IcmpError),
}

/// The trigger channels of the builder.
pub struct Triggers<'a> {
    /// Datagrams that arrived with a TTL of 1.
    pub ttl: &'a mut Fifo<Word>,
    /// Excerpts of UDP datagrams for closed ports.
    pub unreach: &'a mut Fifo<Word>,
}

impl Triggers<'_> {
    fn get(&mut self, err: IcmpError) -> &mut Fifo<Word> {
        match err {
            IcmpError::TtlExceeded => &mut *self.ttl,
            IcmpError::PortUnreachable => &mut *self.unreach,
        }
    }
}

/// The outputs of the builder.
pub struct ErrorOutputs<'a> {
    pub meta: &'a mut Fifo<IcmpErrorMeta>,
    /// The ICMP message: header, then excerpt.
    pub body: &'a mut Fifo<Word>,
    pub csum: &'a mut Fifo<HeaderChecksum>,
}

/// Turn each trigger datagram into an ICMP error message.
///
/// The message quotes the trigger's IPv4 header and the first 8 bytes
/// past it, or the whole trigger if it is shorter. Its IPv4 header is
/// added downstream from the [`IcmpErrorMeta`] emitted as soon as the
/// trigger's source is known; its checksum trails the body on a side
/// channel.
#[derive(Debug)]
pub struct ControlMessageBuilder {
    state: State,
    buf: heapless::Deque<Word, HEAD_WORDS>,
    /// Excerpt bytes still to be emitted.
    remaining: usize,
    /// The trigger's final word has been read.
    trigger_done: bool,
    sum: LaneSum,
    stats: RxStats,
}

impl Default for ControlMessageBuilder {
    fn default() -> Self {
        Self {
            state: State::Idle,
            buf: heapless::Deque::new(),
            remaining: 0,
            trigger_done: false,
            sum: LaneSum::new(),
            stats: RxStats::default(),
        }
    }
}

impl ControlMessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    /// Read the head of the trigger. Returns whether progress was made.
    fn head(
        &mut self,
        err: IcmpError,
        input: &mut Fifo<Word>,
        meta: &mut Fifo<IcmpErrorMeta>,
    ) -> bool {
        let Some(&w) = input.peek() else { return false };
        let (src_word, src_byte) = aligned::SRC;

        if self.buf.len() < src_word {
            input.read();
            let pushed = self.buf.push_back(w).is_ok();
            debug_assert!(pushed, "buffer holds up to the source word");
            if w.last {
                self.stats.icmp_trigger_runt += 1;
                self.buf.clear();
                self.state = State::Idle;
            }
            return true;
        }

        if !w.has_byte(src_byte + 3) {
            input.read();
            self.stats.icmp_trigger_runt += 1;
            self.buf.clear();
            self.state =
                if w.last { State::Idle } else { State::Drain(err) };
            return true;
        }

        if meta.is_full() {
            return false;
        }
        input.read();
        let pushed = self.buf.push_back(w).is_ok();
        debug_assert!(pushed, "buffer holds up to the source word");

        let Some(w0) = self.buf.front() else { return true };
        let (_, tl) = aligned::TOTAL_LEN;
        let hdr_words = ihl(w0.byte(aligned::VER_IHL.1)) as usize;
        let hdr_len = (hdr_words * 4).max(IPV4_HDR_LEN_MIN);
        let excerpt_len =
            (hdr_len + ICMP_ERR_EXCERPT_LEN).min(w0.be16(tl) as usize);

        meta.write(IcmpErrorMeta {
            remote: addr_at(&w, src_byte),
            total_len: (IPV4_HDR_LEN_MIN + ICMP_HDR_LEN + excerpt_len) as u16,
        });
        match err {
            IcmpError::TtlExceeded => self.stats.ttl_exceeded_sent += 1,
            IcmpError::PortUnreachable => self.stats.port_unreach_sent += 1,
        }

        self.remaining = excerpt_len;
        self.trigger_done = w.last;
        self.sum = LaneSum::new();
        self.state = State::Header(err);
        true
    }

    /// The next excerpt word: buffered, read from the trigger, or zero
    /// fill if the trigger ended short of its Total-Length.
    fn next_excerpt_word(&mut self, input: &mut Fifo<Word>) -> Option<Word> {
        if let Some(w) = self.buf.pop_front() {
            return Some(w);
        }

        if self.trigger_done {
            return Some(Word::EMPTY);
        }

        let w = input.read()?;
        self.trigger_done = w.last;
        Some(w)
    }

    pub fn try_step(
        &mut self,
        mut triggers: Triggers<'_>,
        outs: ErrorOutputs<'_>,
    ) -> bool {
        match self.state {
            State::Idle => {
                // Expired datagrams take priority.
                let err = if !triggers.ttl.is_empty() {
                    IcmpError::TtlExceeded
                } else if !triggers.unreach.is_empty() {
                    IcmpError::PortUnreachable
                } else {
                    return false;
                };
                self.state = State::Head(err);
                true
            }

            State::Head(err) => self.head(err, triggers.get(err), outs.meta),

            State::Header(err) => {
                if outs.body.is_full() {
                    return false;
                }

                let mut hdr = Word::from_bytes(&[0; ICMP_HDR_LEN], false);
                hdr.set_byte(0, err.msg_type().into());
                hdr.set_byte(1, err.code());
                self.sum.add_word(&hdr);
                outs.body.write(hdr);
                self.state = State::Excerpt(err);
                true
            }

            State::Excerpt(err) => {
                if outs.body.is_full() {
                    return false;
                }

                let input = triggers.get(err);
                let Some(mut w) = self.next_excerpt_word(input) else {
                    return false;
                };

                let n = self.remaining.min(WORD_BYTES);
                w.clear_invalid();
                w.keep = keep_from_len(n);
                self.remaining -= n;
                w.last = self.remaining == 0;

                self.sum.add_word(&w);
                outs.body.write(w);
                if w.last {
                    self.state = State::Checksum(err);
                }
                true
            }

            State::Checksum(err) => {
                if outs.csum.is_full() {
                    return false;
                }

                outs.csum.write(self.sum.header_checksum());
                self.buf.clear();
                self.state = if self.trigger_done {
                    State::Idle
                } else {
                    State::Drain(err)
                };
                true
            }

            State::Drain(err) => {
                let Some(w) = triggers.get(err).read() else { return false };
                if w.last {
                    self.state = State::Idle;
                }
                true
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::checksum::Checksum;
    use crate::engine::word::frame_to_words;
    use crate::engine::word::words_to_frame;
    use nts_test_utils::udp::*;
    use nts_test_utils::*;

    struct Built {
        meta: Vec<IcmpErrorMeta>,
        body: Vec<Word>,
        csum: Vec<HeaderChecksum>,
        stats: RxStats,
    }

    fn build(ttl_in: &[Vec<u8>], unreach_in: &[Vec<u8>]) -> Built {
        let mut ttl = Fifo::new("ttl", 256);
        let mut unreach = Fifo::new("unreach", 256);
        let mut meta = Fifo::new("meta", 8);
        let mut body = Fifo::new("body", 256);
        let mut csum = Fifo::new("csum", 8);
        for d in ttl_in {
            frame_to_words(d).into_iter().for_each(|w| ttl.write(w));
        }
        for d in unreach_in {
            frame_to_words(d).into_iter().for_each(|w| unreach.write(w));
        }

        let mut b = ControlMessageBuilder::new();
        while b.try_step(
            Triggers { ttl: &mut ttl, unreach: &mut unreach },
            ErrorOutputs { meta: &mut meta, body: &mut body, csum: &mut csum },
        ) {}

        Built {
            meta: meta.drain().collect(),
            body: body.drain().collect(),
            csum: csum.drain().collect(),
            stats: *b.stats(),
        }
    }

    // Split a stream of messages at each final word.
    fn messages(words: &[Word]) -> Vec<Vec<u8>> {
        words
            .split_inclusive(|w| w.last)
            .map(words_to_frame)
            .collect()
    }

    #[test]
    fn time_exceeded_quotes_header_and_8_bytes() {
        let trigger = udp_frame(4000, 53, &[0xEE; 100]);
        let trigger = Ipv4Frame { ttl: 1, ..trigger }.datagram();
        let b = build(&[trigger.clone()], &[]);

        assert_eq!(
            b.meta,
            vec![IcmpErrorMeta { remote: REMOTE_IP, total_len: 20 + 8 + 28 }]
        );

        let msgs = messages(&b.body);
        assert_eq!(msgs.len(), 1);
        let msg = &msgs[0];
        assert_eq!(msg[..8], [11, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(msg[8..], trigger[..28]);

        let mut with_csum = msg.clone();
        with_csum[2..4].copy_from_slice(&b.csum[0].bytes());
        assert_eq!(Checksum::compute(&with_csum).finalize(), 0xFFFF);
        assert_eq!(b.stats.ttl_exceeded_sent, 1);
    }

    #[test]
    fn quotes_options_and_short_triggers_whole() {
        let opts = udp_frame_with_options(vec![1; 8], 1, 2, b"xyz");
        let short =
            Ipv4Frame { ttl: 1, payload: vec![1, 2, 3], ..opts.clone() };
        let opts = Ipv4Frame { ttl: 1, ..opts }.datagram();

        let b = build(&[opts.clone(), short.datagram()], &[]);
        let msgs = messages(&b.body);
        assert_eq!(msgs[0][8..], opts[..36]);
        // 28 bytes of header plus the 3 bytes of payload.
        assert_eq!(msgs[1][8..], short.datagram()[..]);
        assert_eq!(b.meta[1].total_len as usize, 28 + 31);
        assert_eq!(b.csum.len(), 2);
    }

    #[test]
    fn ttl_exceeded_goes_first() {
        let udp = udp_frame(1, 2, b"unreach").datagram();
        let excerpt = udp[..28].to_vec();
        let expired = Ipv4Frame { ttl: 1, ..Default::default() }.datagram();

        let b = build(&[expired], &[excerpt.clone()]);
        let msgs = messages(&b.body);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0][0], 11);
        assert_eq!(msgs[1][..2], [3, 3]);
        assert_eq!(msgs[1][8..], excerpt[..]);
        assert_eq!(b.stats.port_unreach_sent, 1);
    }

    #[test]
    fn discards_triggers_without_source() {
        let d = Ipv4Frame { ttl: 1, ..Default::default() }.datagram();
        let b = build(&[d[..10].to_vec(), d[..14].to_vec()], &[]);
        assert!(b.meta.is_empty() && b.body.is_empty() && b.csum.is_empty());
        assert_eq!(b.stats.icmp_trigger_runt, 2);
    }
}
