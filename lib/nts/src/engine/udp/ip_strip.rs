// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Strip the IPv4 header from UDP datagrams.

use super::UDP_HDR_LEN;
use super::UdpRxMeta;
use super::aligned as udp;
use crate::engine::checksum::Checksum;
use crate::engine::fifo::Fifo;
use crate::engine::ip4::IPV4_HDR_LEN_MAX;
use crate::engine::ip4::IPV4_HDR_LEN_MIN;
use crate::engine::ip4::addr_at;
use crate::engine::ip4::aligned as ip;
use crate::engine::ip4::ihl;
use crate::engine::stat::RxStats;
use crate::engine::word::Realign;
use crate::engine::word::WORD_BYTES;
use crate::engine::word::Word;
use crate::engine::word::keep_from_len;
use nts_api::Ipv4Addr;
use nts_api::PROTO_UDP;
use nts_api::SockAddr;
use nts_api::SocketPair;

/// Enough words for the longest IPv4 header and a UDP header.
const HEAD_WORDS: usize =
    (IPV4_HDR_LEN_MAX + UDP_HDR_LEN).div_ceil(WORD_BYTES);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Fill,
    Emit,
    /// Emit excerpt word `n`.
    Excerpt(usize),
    Data,
}

/// The outputs of the strip stage.
pub struct StripOutputs<'a> {
    /// The folded pseudo-header sum.
    pub seed: &'a mut Fifo<u16>,
    pub meta: &'a mut Fifo<UdpRxMeta>,
    /// The IPv4 header and the first 8 UDP bytes.
    pub excerpt: &'a mut Fifo<Word>,
    /// The UDP datagram, starting at byte 0 of a word.
    pub data: &'a mut Fifo<Word>,
}

/// Split each IP-aligned UDP datagram into the records the rest of
/// the UDP path needs.
///
/// The UDP header starts at byte `IHL * 4`: byte 0 of a word when the
/// IHL is even, byte 4 when it is odd. Nothing is emitted until the
/// whole UDP header has been buffered; a datagram that ends before
/// then is dropped.
#[derive(Debug)]
pub struct IpStrip {
    state: State,
    buf: heapless::Vec<Word, HEAD_WORDS>,
    hdr_len: usize,
    /// The final word is in the buffer.
    done: bool,
    /// Next buffered word to feed the realigner.
    next: usize,
    realign: Realign,
    stats: RxStats,
}

impl Default for IpStrip {
    fn default() -> Self {
        Self {
            state: State::Fill,
            buf: heapless::Vec::new(),
            hdr_len: IPV4_HDR_LEN_MIN,
            done: false,
            next: 0,
            realign: Realign::new(0),
            stats: RxStats::default(),
        }
    }
}

impl IpStrip {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    fn excerpt_len(&self) -> usize {
        self.hdr_len + UDP_HDR_LEN
    }

    /// The byte at offset `off` of the buffered datagram.
    fn byte(&self, off: usize) -> u8 {
        let (word, byte) = (off / WORD_BYTES, off % WORD_BYTES);
        self.buf.get(word).map_or(0, |w| w.byte(byte))
    }

    /// The 16-bit UDP header field at `(word, byte)` of the UDP
    /// header.
    fn udp_field(&self, (word, byte): (usize, usize)) -> u16 {
        let off = self.hdr_len + word * WORD_BYTES + byte;
        u16::from_be_bytes([self.byte(off), self.byte(off + 1)])
    }

    fn buffered_len(&self) -> usize {
        self.buf.iter().map(Word::len).sum()
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.hdr_len = IPV4_HDR_LEN_MIN;
        self.done = false;
        self.state = State::Fill;
    }

    fn emit_meta(&mut self, outs: &mut StripOutputs<'_>) {
        let addr = |(word, byte): (usize, usize)| {
            self.buf.get(word).map_or(Ipv4Addr::ANY_ADDR, |w| addr_at(w, byte))
        };
        let src = addr(ip::SRC);
        let dst = addr(ip::DST);
        let len = self.udp_field(udp::LEN);

        let mut csum = Checksum::new();
        csum.add_u16(PROTO_UDP as u16);
        src.halves().into_iter().for_each(|h| csum.add_u16(h));
        dst.halves().into_iter().for_each(|h| csum.add_u16(h));
        csum.add_u16(len);
        outs.seed.write(csum.finalize());

        let sport = self.udp_field(udp::SRC_PORT);
        let dport = self.udp_field(udp::DST_PORT);

        outs.meta.write(UdpRxMeta {
            pair: SocketPair {
                src: SockAddr { addr: src, port: sport },
                dst: SockAddr { addr: dst, port: dport },
            },
            len: len.saturating_sub(UDP_HDR_LEN as u16),
        });
    }

    pub fn try_step(
        &mut self,
        input: &mut Fifo<Word>,
        mut outs: StripOutputs<'_>,
    ) -> bool {
        match self.state {
            State::Fill => {
                let Some(w) = input.read() else { return false };
                let pushed = self.buf.push(w).is_ok();
                debug_assert!(pushed, "header buffer holds a maximal header");

                if self.buf.len() == 1 {
                    let words = ihl(w.byte(ip::VER_IHL.1)) as usize;
                    self.hdr_len = (words * 4).max(IPV4_HDR_LEN_MIN);
                }

                if self.buffered_len() >= self.excerpt_len() {
                    self.done = w.last;
                    self.state = State::Emit;
                } else if w.last || self.buf.is_full() {
                    self.stats.udp_runt += 1;
                    self.reset();
                }
            }

            State::Emit => {
                if outs.seed.is_full() || outs.meta.is_full() {
                    return false;
                }

                self.emit_meta(&mut outs);
                self.state = State::Excerpt(0);
            }

            State::Excerpt(n) => {
                if outs.excerpt.is_full() {
                    return false;
                }

                let Some(mut w) = self.buf.get(n).copied() else {
                    self.reset();
                    return true;
                };

                let rem = self.excerpt_len() - n * WORD_BYTES;
                if rem <= WORD_BYTES {
                    w.keep = keep_from_len(rem);
                    w.clear_invalid();
                    w.last = true;

                    self.next = self.hdr_len / WORD_BYTES;
                    self.realign = Realign::new(self.hdr_len % WORD_BYTES);
                    self.state = State::Data;
                } else {
                    self.state = State::Excerpt(n + 1);
                }
                outs.excerpt.write(w);
            }

            State::Data => {
                if outs.data.is_full() {
                    return false;
                }

                if let Some(w) = self.realign.residue() {
                    outs.data.write(w);
                    self.reset();
                    return true;
                }

                let w = match self.buf.get(self.next) {
                    Some(&w) => {
                        self.next += 1;
                        w
                    }

                    None if self.done => {
                        self.reset();
                        return true;
                    }

                    None => match input.read() {
                        Some(w) => w,
                        None => return false,
                    },
                };

                if let Some(o) = self.realign.push(w) {
                    outs.data.write(o);
                }

                if w.last && !self.realign.has_residue() {
                    self.reset();
                }
            }
        }

        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::checksum::LaneSum;
    use crate::engine::word::frame_to_words;
    use crate::engine::word::words_to_frame;
    use nts_test_utils::udp::udp_frame;
    use nts_test_utils::udp::udp_frame_with_options;
    use nts_test_utils::*;

    #[derive(Default)]
    struct Stripped {
        seeds: Vec<u16>,
        meta: Vec<UdpRxMeta>,
        excerpts: Vec<Vec<u8>>,
        data: Vec<Vec<Word>>,
        stats: RxStats,
    }

    fn strip(dgrams: &[Vec<u8>]) -> Stripped {
        let mut input = Fifo::new("in", 256);
        let mut seed = Fifo::new("seed", 8);
        let mut meta = Fifo::new("meta", 8);
        let mut excerpt = Fifo::new("excerpt", 64);
        let mut data = Fifo::new("data", 256);
        for d in dgrams {
            frame_to_words(d).into_iter().for_each(|w| input.write(w));
        }

        let mut s = IpStrip::new();
        while s.try_step(
            &mut input,
            StripOutputs {
                seed: &mut seed,
                meta: &mut meta,
                excerpt: &mut excerpt,
                data: &mut data,
            },
        ) {}

        let split = |f: &mut Fifo<Word>| -> Vec<Vec<Word>> {
            let words: Vec<Word> = f.drain().collect();
            assert!(words.iter().all(Word::is_well_formed));
            words.split_inclusive(|w| w.last).map(|s| s.to_vec()).collect()
        };

        Stripped {
            seeds: seed.drain().collect(),
            meta: meta.drain().collect(),
            excerpts: split(&mut excerpt).iter().map(words_to_frame).collect(),
            data: split(&mut data),
            stats: *s.stats(),
        }
    }

    #[test]
    fn aligned_and_unaligned_headers() {
        let payload = b"hello, world";
        let cases = [vec![], vec![1; 4], vec![1; 8], vec![1; 40]];

        for opts in cases {
            let hdr_len = IPV4_HDR_LEN + opts.len();
            let frame = udp_frame_with_options(opts, 7000, 5000, payload);
            let dgram = frame.datagram();
            let s = strip(&[dgram.clone()]);

            assert_eq!(s.stats.udp_runt, 0);
            assert_eq!(
                s.meta,
                vec![UdpRxMeta {
                    pair: SocketPair {
                        src: SockAddr { addr: REMOTE_IP, port: 7000 },
                        dst: SockAddr { addr: LOCAL_IP, port: 5000 },
                    },
                    len: payload.len() as u16,
                }]
            );
            assert_eq!(s.excerpts, vec![dgram[..hdr_len + 8].to_vec()]);
            assert_eq!(s.data.len(), 1);
            assert_eq!(words_to_frame(&s.data[0]), dgram[hdr_len..]);

            // The seed completes the UDP checksum.
            let mut sum = LaneSum::seeded(s.seeds[0]);
            s.data[0].iter().for_each(|w| sum.add_word(w));
            assert!(sum.verifies(), "hdr_len {hdr_len}");
        }
    }

    #[test]
    fn header_only_datagram() {
        let dgram = udp_frame(1, 2, b"").datagram();
        let s = strip(&[dgram.clone(), dgram]);
        assert_eq!(s.meta.len(), 2);
        assert_eq!(s.meta[0].len, 0);
        assert_eq!(words_to_frame(&s.data[1]).len(), UDP_HDR_LEN);
    }

    #[test]
    fn runts_are_dropped() {
        let dgram = udp_frame(1, 2, b"payload").datagram();
        let opts = udp_frame_with_options(vec![1; 12], 1, 2, b"").datagram();
        let whole = udp_frame(3, 4, b"x").datagram();

        let s = strip(&[dgram[..27].to_vec(), opts[..39].to_vec(), whole]);
        assert_eq!(s.stats.udp_runt, 2);
        assert_eq!(s.meta.len(), 1);
        assert_eq!(s.meta[0].pair.src.port, 3);
        assert_eq!(s.excerpts.len(), 1);
        assert_eq!(s.data.len(), 1);
    }
}
