// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Write the ICMP checksum into outgoing messages.

use super::EchoDecision;
use super::aligned as icmp;
use crate::engine::checksum::HeaderChecksum;
use crate::engine::fifo::Fifo;
use crate::engine::stat::RxStats;
use crate::engine::word::Word;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Path {
    Echo,
    Error,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Idle,
    Stream { path: Path, csum: HeaderChecksum, idx: usize },
    Drain,
}

/// The echo path: reply data and the checker's decisions.
pub struct EchoPath<'a> {
    pub data: &'a mut Fifo<Word>,
    pub decisions: &'a mut Fifo<EchoDecision>,
}

/// The error path: complete datagrams and their ICMP checksums.
pub struct ErrorPath<'a> {
    pub data: &'a mut Fifo<Word>,
    pub csums: &'a mut Fifo<HeaderChecksum>,
}

/// Merge the echo and error paths onto the ICMP output.
///
/// A message is only started once both its data and its checksum are
/// available; the echo path goes first.
#[derive(Debug)]
pub struct IcmpChecksumInserter {
    state: State,
    stats: RxStats,
}

impl Default for IcmpChecksumInserter {
    fn default() -> Self {
        Self { state: State::Idle, stats: RxStats::default() }
    }
}

impl IcmpChecksumInserter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    pub fn try_step(
        &mut self,
        echo: EchoPath<'_>,
        error: ErrorPath<'_>,
        out: &mut Fifo<Word>,
    ) -> bool {
        match self.state {
            State::Idle => {
                if !echo.data.is_empty() {
                    if let Some(d) = echo.decisions.read() {
                        self.state = match d {
                            EchoDecision::Forward(csum) => {
                                self.stats.echo_replies += 1;
                                let path = Path::Echo;
                                State::Stream { path, csum, idx: 0 }
                            }
                            EchoDecision::Drop => State::Drain,
                        };
                        return true;
                    }
                }

                if error.data.is_empty() {
                    return false;
                }
                let Some(csum) = error.csums.read() else { return false };
                self.state = State::Stream { path: Path::Error, csum, idx: 0 };
                true
            }

            State::Stream { path, csum, idx } => {
                let input = match path {
                    Path::Echo => echo.data,
                    Path::Error => error.data,
                };
                if input.is_empty() || out.is_full() {
                    return false;
                }

                let Some(mut w) = input.read() else { return false };
                if idx == icmp::CSUM.0 {
                    w.set_be16(icmp::CSUM.1, csum.value());
                }
                out.write(w);

                self.state = if w.last {
                    State::Idle
                } else {
                    State::Stream { path, csum, idx: idx + 1 }
                };
                true
            }

            State::Drain => {
                let Some(w) = echo.data.read() else { return false };
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
    use crate::engine::word::frame_to_words;
    use crate::engine::word::words_to_frame;

    struct Rig {
        echo_data: Fifo<Word>,
        decisions: Fifo<EchoDecision>,
        err_data: Fifo<Word>,
        csums: Fifo<HeaderChecksum>,
        out: Fifo<Word>,
        ins: IcmpChecksumInserter,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                echo_data: Fifo::new("echo", 64),
                decisions: Fifo::new("decisions", 8),
                err_data: Fifo::new("err", 64),
                csums: Fifo::new("csums", 8),
                out: Fifo::new("out", 64),
                ins: IcmpChecksumInserter::new(),
            }
        }

        fn run(&mut self) -> Vec<Vec<u8>> {
            while self.ins.try_step(
                EchoPath {
                    data: &mut self.echo_data,
                    decisions: &mut self.decisions,
                },
                ErrorPath { data: &mut self.err_data, csums: &mut self.csums },
                &mut self.out,
            ) {}

            let words: Vec<Word> = self.out.drain().collect();
            words.split_inclusive(|w| w.last).map(words_to_frame).collect()
        }
    }

    fn msg(fill: u8) -> Vec<u8> {
        vec![fill; 30]
    }

    fn push(f: &mut Fifo<Word>, bytes: &[u8]) {
        frame_to_words(bytes).into_iter().for_each(|w| f.write(w));
    }

    #[test]
    fn writes_checksum_at_icmp_offset() {
        let mut rig = Rig::new();
        push(&mut rig.err_data, &msg(0xAA));
        rig.csums.write(HeaderChecksum::wrap(0x1234));

        let out = rig.run();
        let mut expected = msg(0xAA);
        expected[22..24].copy_from_slice(&[0x12, 0x34]);
        assert_eq!(out, vec![expected]);
    }

    #[test]
    fn echo_first_and_drop_drains() {
        let mut rig = Rig::new();
        push(&mut rig.echo_data, &msg(1));
        push(&mut rig.echo_data, &msg(2));
        push(&mut rig.err_data, &msg(3));
        rig.decisions.write(EchoDecision::Drop);
        rig.decisions.write(EchoDecision::Forward(HeaderChecksum::wrap(7)));
        rig.csums.write(HeaderChecksum::wrap(9));

        let out = rig.run();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0][0], 2);
        assert_eq!(out[0][22..24], [0, 7]);
        assert_eq!(out[1][0], 3);
        assert_eq!(out[1][22..24], [0, 9]);
        assert_eq!(rig.ins.stats().echo_replies, 1);
    }

    #[test]
    fn waits_for_decision() {
        let mut rig = Rig::new();
        push(&mut rig.echo_data, &msg(1));
        assert!(rig.run().is_empty());
        assert_eq!(rig.echo_data.len(), 4);

        rig.decisions.write(EchoDecision::Forward(HeaderChecksum::wrap(0)));
        assert_eq!(rig.run().len(), 1);
    }
}
