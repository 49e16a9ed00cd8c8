// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Filter datagrams longer than the configured maximum.

use crate::engine::fifo::Fifo;
use crate::engine::ip4::framed;
use crate::engine::stat::RxStats;
use crate::engine::word::Word;

/// The words held back until Total-Length is known.
const DEPTH: usize = framed::TOTAL_LEN.0;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Fill,
    Forward,
    Flush,
    Drop,
}

/// Drops any Ethernet-framed IPv4 datagram whose Total-Length exceeds
/// `max_datagram_size`.
///
/// Total-Length sits in word 2, so words 0 and 1 are held in a
/// two-deep shift buffer until the decision is made. Every word is
/// emitted two steps after it arrives and the buffer is flushed once
/// the final word is in.
#[derive(Debug)]
pub struct DatagramLengthFilter {
    max_datagram_size: u16,
    state: State,
    buf: heapless::Deque<Word, DEPTH>,
    stats: RxStats,
}

impl DatagramLengthFilter {
    pub fn new(max_datagram_size: u16) -> Self {
        Self {
            max_datagram_size,
            state: State::Fill,
            buf: heapless::Deque::new(),
            stats: RxStats::default(),
        }
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    /// Shift `w` in and the oldest word out.
    fn shift(&mut self, w: Word, out: &mut Fifo<Word>) {
        if let Some(old) = self.buf.pop_front() {
            out.write(old);
        }
        let pushed = self.buf.push_back(w).is_ok();
        debug_assert!(pushed, "a word was popped before the push");
        self.state = if w.last { State::Flush } else { State::Forward };
    }

    fn discard(&mut self, w: &Word) {
        self.buf.clear();
        self.state = if w.last { State::Fill } else { State::Drop };
    }

    pub fn try_step(
        &mut self,
        input: &mut Fifo<Word>,
        out: &mut Fifo<Word>,
    ) -> bool {
        if self.state == State::Flush {
            if out.is_full() {
                return false;
            }

            if let Some(w) = self.buf.pop_front() {
                out.write(w);
            }
            if self.buf.is_empty() {
                self.state = State::Fill;
            }
            return true;
        }

        let Some(&w) = input.peek() else {
            return false;
        };

        match self.state {
            State::Fill if self.buf.len() < DEPTH => {
                input.read();
                let pushed = self.buf.push_back(w).is_ok();
                debug_assert!(pushed, "filling stops at DEPTH words");
                if w.last {
                    self.stats.length_runt += 1;
                    self.buf.clear();
                }
            }

            State::Fill => {
                let (_, tl) = framed::TOTAL_LEN;
                if !w.has_byte(tl + 1) {
                    input.read();
                    self.stats.length_runt += 1;
                    self.discard(&w);
                    return true;
                }

                if w.be16(tl) > self.max_datagram_size {
                    input.read();
                    self.stats.oversize += 1;
                    self.discard(&w);
                    return true;
                }

                if out.is_full() {
                    return false;
                }

                input.read();
                self.shift(w, out);
            }

            State::Forward => {
                if out.is_full() {
                    return false;
                }

                input.read();
                self.shift(w, out);
            }

            State::Drop => {
                input.read();
                if w.last {
                    self.state = State::Fill;
                }
            }

            State::Flush => unreachable!(),
        }

        true
    }
}
