// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use crate::engine::fifo::Fifo;
use crate::engine::ip4::Verdict;
use crate::engine::stat::RxStats;
use crate::engine::word::Word;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Idle,
    Forward,
    Drop,
}

/// Forward or discard each IP-aligned datagram according to its
/// [`Verdict`].
#[derive(Debug)]
pub struct InvalidPacketDropper {
    state: State,
    stats: RxStats,
}

impl Default for InvalidPacketDropper {
    fn default() -> Self {
        Self { state: State::Idle, stats: RxStats::default() }
    }
}

impl InvalidPacketDropper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    pub fn try_step(
        &mut self,
        verdicts: &mut Fifo<Verdict>,
        input: &mut Fifo<Word>,
        out: &mut Fifo<Word>,
    ) -> bool {
        let Some(&w) = input.peek() else {
            return false;
        };

        match self.state {
            State::Idle => {
                let Some(&v) = verdicts.peek() else {
                    return false;
                };

                if v.is_valid() {
                    if out.is_full() {
                        return false;
                    }
                    out.write(w);
                    self.stats.ip_accepted += 1;
                    self.state = State::Forward;
                } else {
                    // Checksum failures were counted when the verdict
                    // was made.
                    if !v.version_valid {
                        self.stats.ip_hdr_bad += 1;
                    } else if !v.fragment_valid {
                        self.stats.ip_fragment += 1;
                    }
                    self.state = State::Drop;
                }

                verdicts.read();
            }

            State::Forward => {
                if out.is_full() {
                    return false;
                }
                out.write(w);
            }

            State::Drop => {}
        }

        input.read();
        if w.last {
            self.state = State::Idle;
        }
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::word::frame_to_words;
    use crate::engine::word::words_to_frame;

    const VALID: Verdict = Verdict {
        checksum_valid: true,
        version_valid: true,
        fragment_valid: true,
    };

    #[test]
    fn forwards_only_valid_datagrams() {
        let mut verdicts = Fifo::new("verdicts", 8);
        let mut input = Fifo::new("in", 64);
        let mut out = Fifo::new("out", 64);

        let a: Vec<u8> = (0..20).collect();
        let b: Vec<u8> = (100..140).collect();
        let c: Vec<u8> = (200..205).collect();
        let frag = Verdict { fragment_valid: false, ..VALID };
        for (v, d) in [(VALID, &a), (frag, &b), (VALID, &c)] {
            verdicts.write(v);
            frame_to_words(d).into_iter().for_each(|w| input.write(w));
        }

        let mut d = InvalidPacketDropper::new();
        while d.try_step(&mut verdicts, &mut input, &mut out) {}

        let mut expected = a.clone();
        expected.extend(&c);
        let out: Vec<Word> = out.drain().collect();
        assert_eq!(words_to_frame(&out), expected);
        assert_eq!(out.iter().filter(|w| w.last).count(), 2);
        assert_eq!(d.stats().ip_accepted, 2);
        assert_eq!(d.stats().ip_fragment, 1);
    }

    #[test]
    fn waits_for_verdict() {
        let mut verdicts = Fifo::new("verdicts", 8);
        let mut input = Fifo::new("in", 64);
        let mut out = Fifo::new("out", 64);
        input.write(Word::from_bytes(&[1, 2, 3], true));

        let mut d = InvalidPacketDropper::new();
        assert!(!d.try_step(&mut verdicts, &mut input, &mut out));
        verdicts.write(VALID);
        assert!(d.try_step(&mut verdicts, &mut input, &mut out));
        assert_eq!(out.len(), 1);
    }
}
