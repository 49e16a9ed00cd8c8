// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Trim Ethernet padding off IP-aligned datagrams.

use crate::engine::fifo::Fifo;
use crate::engine::ip4::aligned;
use crate::engine::stat::RxStats;
use crate::engine::word::WORD_BYTES;
use crate::engine::word::Word;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    /// Expect word 0, which carries Total-Length.
    First,
    Pass,
    /// Discard what follows the datagram.
    Drain,
}

/// Cut each datagram at its Total-Length.
///
/// A frame shorter than its Total-Length passes unchanged; the
/// checksum stages downstream will reject it.
#[derive(Debug)]
pub struct CutLength {
    state: State,
    idx: usize,
    total_len: usize,
    stats: RxStats,
}

impl Default for CutLength {
    fn default() -> Self {
        Self {
            state: State::First,
            idx: 0,
            total_len: 0,
            stats: RxStats::default(),
        }
    }
}

impl CutLength {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    fn cut(&mut self, mut w: Word) -> Word {
        let start = self.idx * WORD_BYTES;
        self.idx += 1;

        // A zero Total-Length means there is nothing to cut against.
        if self.total_len == 0 || start + WORD_BYTES < self.total_len {
            return w;
        }

        let orig = w;
        w.truncate(self.total_len - start);
        if w.keep != orig.keep || !orig.last {
            self.stats.ip_trimmed += 1;
        }

        if !orig.last {
            self.state = State::Drain;
        }
        w
    }

    pub fn try_step(
        &mut self,
        input: &mut Fifo<Word>,
        out: &mut Fifo<Word>,
    ) -> bool {
        let Some(&w) = input.peek() else {
            return false;
        };

        if self.state == State::Drain {
            input.read();
            if w.last {
                self.state = State::First;
            }
            return true;
        }

        if out.is_full() {
            return false;
        }
        input.read();

        if self.state == State::First {
            let (_, tl) = aligned::TOTAL_LEN;
            self.idx = 0;
            self.total_len =
                if w.has_byte(tl + 1) { w.be16(tl) as usize } else { 0 };
            self.state = State::Pass;
        }

        let o = self.cut(w);
        out.write(o);
        if o.last && self.state == State::Pass {
            self.state = State::First;
        }
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::word::frame_to_words;
    use crate::engine::word::keep_count;
    use crate::engine::word::words_to_frame;
    use itertools::Itertools;

    // A datagram of `len` bytes carrying `len` as its Total-Length,
    // followed by `pad` bytes of padding.
    fn datagram(len: usize, pad: usize) -> Vec<u8> {
        let mut d: Vec<u8> = (0..(len + pad)).map(|i| i as u8).collect();
        d[2..4].copy_from_slice(&(len as u16).to_be_bytes());
        d
    }

    fn cut(frames: &[Vec<u8>]) -> (Vec<Word>, RxStats) {
        let mut input = Fifo::new("in", 256);
        let mut out = Fifo::new("out", 256);
        for f in frames {
            frame_to_words(f).into_iter().for_each(|w| input.write(w));
        }

        let mut c = CutLength::new();
        while c.try_step(&mut input, &mut out) {}
        (out.drain().collect(), *c.stats())
    }

    #[test]
    fn output_length_is_total_length() {
        for (len, pad) in (20..=40).cartesian_product([0, 1, 7, 8, 26]) {
            let (out, _) = cut(&[datagram(len, pad)]);
            assert_eq!(words_to_frame(&out), datagram(len, pad)[..len]);

            let last = out.last().unwrap();
            assert!(last.last);
            let tail = if len % 8 == 0 { 8 } else { len % 8 };
            assert_eq!(keep_count(last.keep), tail, "{len} {pad}");
            assert_eq!(out.iter().filter(|w| w.last).count(), 1);
        }
    }

    #[test]
    fn back_to_back_datagrams() {
        let (out, stats) = cut(&[datagram(21, 30), datagram(28, 0)]);
        let mut expected = datagram(21, 0);
        expected.extend(datagram(28, 0));
        assert_eq!(words_to_frame(&out), expected);
        assert_eq!(stats.ip_trimmed, 1);
    }

    #[test]
    fn short_datagram_passes_unchanged() {
        let mut d = datagram(20, 0);
        d[2..4].copy_from_slice(&60u16.to_be_bytes());
        let (out, stats) = cut(&[d.clone()]);
        assert_eq!(words_to_frame(&out), d);
        assert_eq!(stats.ip_trimmed, 0);
    }
}
