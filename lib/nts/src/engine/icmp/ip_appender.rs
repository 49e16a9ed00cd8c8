// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Prepend an IPv4 header to generated ICMP messages.

use super::IcmpErrorMeta;
use crate::engine::fifo::Fifo;
use crate::engine::ip4::IPV4_HDR_LEN_MIN;
use crate::engine::ip4::Ipv4HdrRaw;
use crate::engine::word::Realign;
use crate::engine::word::WORD_BYTES;
use crate::engine::word::Word;
use nts_api::Ipv4Addr;
use nts_api::Protocol;
use zerocopy::IntoBytes;

/// The header bytes past the last whole word.
const HDR_TAIL: usize = IPV4_HDR_LEN_MIN % WORD_BYTES;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Idle,
    /// Emit header word `n`.
    Header(usize),
    Body,
}

/// Give each ICMP error message its IPv4 header.
///
/// The header is 20 bytes. Its first two words go out whole and its
/// last 4 bytes seed a realigner that shifts the message behind them.
#[derive(Debug)]
pub struct IpHeaderAppender {
    local: Ipv4Addr,
    state: State,
    hdr: [u8; IPV4_HDR_LEN_MIN],
    realign: Realign,
}

impl IpHeaderAppender {
    pub fn new(local: Ipv4Addr) -> Self {
        Self {
            local,
            state: State::Idle,
            hdr: [0; IPV4_HDR_LEN_MIN],
            realign: Realign::new(HDR_TAIL),
        }
    }

    pub fn try_step(
        &mut self,
        meta: &mut Fifo<IcmpErrorMeta>,
        body: &mut Fifo<Word>,
        out: &mut Fifo<Word>,
    ) -> bool {
        match self.state {
            State::Idle => {
                let Some(m) = meta.read() else { return false };
                let hdr = Ipv4HdrRaw::new(
                    self.local,
                    m.remote,
                    Protocol::ICMP,
                    m.total_len,
                );
                self.hdr.copy_from_slice(hdr.as_bytes());
                self.state = State::Header(0);
            }

            State::Header(n) => {
                if out.is_full() {
                    return false;
                }

                let start = n * WORD_BYTES;
                out.write(Word::from_bytes(
                    &self.hdr[start..start + WORD_BYTES],
                    false,
                ));

                if start + 2 * WORD_BYTES <= IPV4_HDR_LEN_MIN {
                    self.state = State::Header(n + 1);
                    return true;
                }

                let mut seed = [0u8; WORD_BYTES];
                seed[WORD_BYTES - HDR_TAIL..]
                    .copy_from_slice(&self.hdr[IPV4_HDR_LEN_MIN - HDR_TAIL..]);
                self.realign =
                    Realign::seeded(HDR_TAIL, Word::from_bytes(&seed, false));
                self.state = State::Body;
            }

            State::Body => {
                if out.is_full() {
                    return false;
                }

                if let Some(w) = self.realign.residue() {
                    out.write(w);
                    self.state = State::Idle;
                    return true;
                }

                let Some(w) = body.read() else { return false };
                if let Some(o) = self.realign.push(w) {
                    out.write(o);
                }

                if w.last && !self.realign.has_residue() {
                    self.state = State::Idle;
                }
            }
        }

        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::word::frame_to_words;
    use crate::engine::word::words_to_frame;
    use nts_test_utils::*;

    fn append(msgs: &[(IcmpErrorMeta, Vec<u8>)]) -> Vec<Vec<u8>> {
        let mut meta = Fifo::new("meta", msgs.len().max(1));
        let mut body = Fifo::new("body", 256);
        let mut out = Fifo::new("out", 256);
        for (m, b) in msgs {
            meta.write(*m);
            frame_to_words(b).into_iter().for_each(|w| body.write(w));
        }

        let mut app = IpHeaderAppender::new(LOCAL_IP);
        while app.try_step(&mut meta, &mut body, &mut out) {}

        let words: Vec<Word> = out.drain().collect();
        assert!(words.iter().all(Word::is_well_formed));
        words.split_inclusive(|w| w.last).map(words_to_frame).collect()
    }

    #[test]
    fn prepends_header_to_any_length() {
        // Bodies ending on each byte of a word, with and without a
        // residue word.
        let msgs: Vec<_> = (8..=16)
            .map(|len| {
                let m = IcmpErrorMeta {
                    remote: REMOTE_IP,
                    total_len: (IPV4_HDR_LEN + len) as u16,
                };
                (m, (0..len as u8).collect::<Vec<u8>>())
            })
            .collect();

        let out = append(&msgs);
        assert_eq!(out.len(), msgs.len());

        for (dgram, (_, body)) in out.iter().zip(&msgs) {
            let mut frame = vec![0u8; ETHER_HDR_LEN];
            frame[12..14].copy_from_slice(&[0x08, 0x00]);
            frame.extend_from_slice(dgram);

            let ip = parse_ipv4_frame(&frame);
            assert_eq!(ip.ip_src, LOCAL_IP);
            assert_eq!(ip.ip_dst, REMOTE_IP);
            assert_eq!(ip.ttl, 0x80);
            assert_eq!(ip.proto, PROTO_ICMP);
            assert_eq!(&ip.payload, body);
            assert_eq!(dgram[4..8], [0; 4]);
        }
    }
}
