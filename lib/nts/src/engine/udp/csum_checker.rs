// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Verify the UDP checksum.

use super::aligned as udp;
use crate::engine::checksum::LaneSum;
use crate::engine::fifo::Fifo;
use crate::engine::stat::RxStats;
use crate::engine::word::Word;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Idle,
    Body,
}

/// Sum each UDP datagram, seeded with its pseudo-header sum, and
/// forward it along with a verdict.
///
/// A datagram is valid when its checksum is zero (not computed by the
/// sender) or the sum verifies, and it is exactly as long as its
/// Length field says.
#[derive(Debug)]
pub struct UdpChecksumChecker {
    state: State,
    sum: LaneSum,
    len: usize,
    udp_len: usize,
    csum_zero: bool,
    stats: RxStats,
}

impl Default for UdpChecksumChecker {
    fn default() -> Self {
        Self {
            state: State::Idle,
            sum: LaneSum::new(),
            len: 0,
            udp_len: 0,
            csum_zero: false,
            stats: RxStats::default(),
        }
    }
}

impl UdpChecksumChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    fn verdict(&mut self) -> bool {
        let valid = (self.csum_zero || self.sum.verifies())
            && self.len == self.udp_len;
        if !valid {
            self.stats.udp_csum_bad += 1;
        }
        valid
    }

    pub fn try_step(
        &mut self,
        seeds: &mut Fifo<u16>,
        input: &mut Fifo<Word>,
        out: &mut Fifo<Word>,
        verdicts: &mut Fifo<bool>,
    ) -> bool {
        if self.state == State::Idle {
            if input.is_empty() {
                return false;
            }
            let Some(seed) = seeds.read() else { return false };
            self.sum = LaneSum::seeded(seed);
            self.len = 0;
            self.udp_len = 0;
            self.csum_zero = false;
            self.state = State::Body;
            return true;
        }

        let Some(w) = input.peek() else { return false };
        if out.is_full() || (w.last && verdicts.is_full()) {
            return false;
        }

        let Some(w) = input.read() else { return false };
        if self.len == 0 {
            self.udp_len = w.be16(udp::LEN.1) as usize;
            self.csum_zero =
                w.has_byte(udp::CSUM.1 + 1) && w.be16(udp::CSUM.1) == 0;
        }
        self.len += w.len();
        self.sum.add_word(&w);
        out.write(w);

        if w.last {
            let v = self.verdict();
            verdicts.write(v);
            self.state = State::Idle;
        }
        true
    }
}
