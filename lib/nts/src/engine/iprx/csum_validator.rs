// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! IPv4 header checksum validation.
//!
//! The validator sums the header of each Ethernet-framed datagram in
//! four lanes as it streams past, checks the header fields it can
//! judge locally, and re-emits the datagram IP-aligned. The lane sums
//! and checks leave on a side channel as one [`SubSums`] record,
//! which the combiner folds into the final [`Verdict`].

use crate::engine::checksum::LaneSum;
use crate::engine::fifo::Fifo;
use crate::engine::ip4::IPV4_VERSION;
use crate::engine::ip4::SubSums;
use crate::engine::ip4::Verdict;
use crate::engine::ip4::framed;
use crate::engine::ip4::ihl;
use crate::engine::ip4::is_unfragmented;
use crate::engine::ip4::version;
use crate::engine::stat::RxStats;
use crate::engine::word::Realign;
use crate::engine::word::Word;
use nts_api::Ipv4Addr;

/// The IP header starts at byte 6 of word 1; shifting out 6 bytes
/// makes it start at byte 0.
const IP_SHIFT: usize = framed::VER_IHL.1;

/// The per-datagram header state of the validator.
#[derive(Clone, Copy, Debug, Default)]
struct Header {
    /// Header fields still to be summed; `None` until the IHL is
    /// known.
    budget: Option<usize>,
    sum: LaneSum,
    ver_ihl: u8,
    total_len: Option<u16>,
    fragment_valid: bool,
    dst_hi: Option<u16>,
    dst: Option<Ipv4Addr>,
}

impl Header {
    fn consume(&mut self, w: &Word, lanes: core::ops::Range<usize>) {
        for j in lanes {
            match self.budget {
                Some(n) if n > 0 => {
                    self.sum.add_lane(j, w.lane(j));
                    self.budget = Some(n - 1);
                }
                _ => break,
            }
        }
    }

    fn version_valid(&self) -> bool {
        let ihl = ihl(self.ver_ihl) as u16;
        match self.total_len {
            Some(len) => {
                version(self.ver_ihl) == IPV4_VERSION
                    && ihl >= 5
                    && len >= ihl * 4
            }
            None => false,
        }
    }
}

/// Verify the IPv4 header checksum of each datagram and strip its
/// Ethernet header.
#[derive(Debug)]
pub struct Ipv4ChecksumValidator {
    local: Ipv4Addr,
    directed_bcast: Ipv4Addr,
    idx: usize,
    hdr: Header,
    sums_sent: bool,
    emitted: bool,
    realign: Realign,
    stats: RxStats,
}

impl Ipv4ChecksumValidator {
    pub fn new(local: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Self {
            local,
            directed_bcast: local.directed_bcast(netmask),
            idx: 0,
            hdr: Header::default(),
            sums_sent: false,
            emitted: false,
            realign: Realign::new(IP_SHIFT),
            stats: RxStats::default(),
        }
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    fn is_local(&self, dst: Ipv4Addr) -> bool {
        dst == self.local
            || dst == Ipv4Addr::LOCAL_BCAST
            || dst == self.directed_bcast
    }

    fn sub_sums(&self) -> SubSums {
        SubSums {
            sum: self.hdr.sum,
            ip_match: self.hdr.dst.is_some_and(|dst| self.is_local(dst)),
            version_valid: self.hdr.version_valid(),
            fragment_valid: self.hdr.fragment_valid,
        }
    }

    fn accumulate(&mut self, idx: usize, w: &Word) {
        let hdr = &mut self.hdr;

        if idx == framed::VER_IHL.0 {
            let (_, b) = framed::VER_IHL;
            if w.has_byte(b) {
                hdr.ver_ihl = w.byte(b);
                hdr.budget = Some(ihl(hdr.ver_ihl).max(5) as usize * 2);
            }
            hdr.consume(w, 3..4);
            return;
        }

        if idx == framed::TOTAL_LEN.0 {
            let (_, tl) = framed::TOTAL_LEN;
            let (_, ff) = framed::FLAGS_FRAG;
            if w.has_byte(tl + 1) {
                hdr.total_len = Some(w.be16(tl));
            }
            hdr.fragment_valid =
                w.has_byte(ff + 1) && is_unfragmented(w.be16(ff));
        }

        if idx == framed::DST_HI.0 && w.has_byte(framed::DST_HI.1 + 1) {
            hdr.dst_hi = Some(w.be16(framed::DST_HI.1));
        }

        if idx == framed::DST_LO.0 && w.has_byte(framed::DST_LO.1 + 1) {
            if let Some(hi) = hdr.dst_hi {
                let lo = w.be16(framed::DST_LO.1);
                let dst = ((hi as u32) << 16) | lo as u32;
                hdr.dst = Some(Ipv4Addr::from(dst));
            }
        }

        hdr.consume(w, 0..4);
    }

    fn end_frame(&mut self) {
        self.idx = 0;
        self.hdr = Header::default();
        self.sums_sent = false;
        self.emitted = false;
    }

    pub fn try_step(
        &mut self,
        input: &mut Fifo<Word>,
        out: &mut Fifo<Word>,
        sums: &mut Fifo<SubSums>,
    ) -> bool {
        if self.realign.has_residue() {
            if out.is_full() {
                return false;
            }

            if let Some(w) = self.realign.residue() {
                out.write(w);
            }
            return true;
        }

        if input.is_empty() || out.is_full() || sums.is_full() {
            return false;
        }

        let Some(w) = input.read() else { return false };
        let idx = self.idx;
        self.idx += 1;

        // The Ethernet header carries nothing of interest past the
        // demux.
        if idx == 0 {
            if w.last {
                self.end_frame();
            }
            return true;
        }

        self.accumulate(idx, &w);
        if let Some(o) = self.realign.push(w) {
            out.write(o);
            self.emitted = true;
        }
        self.emitted |= self.realign.has_residue();

        if !self.sums_sent && self.hdr.budget == Some(0) {
            sums.write(self.sub_sums());
            self.sums_sent = true;
        }

        if w.last {
            // Data and verdicts must stay paired: whatever reached the
            // output gets exactly one record.
            if !self.sums_sent && self.emitted {
                self.stats.ip_hdr_truncated += 1;
                sums.write(SubSums { ip_match: false, ..self.sub_sums() });
            }
            self.end_frame();
        }

        true
    }
}

/// Fold the lane sums of each datagram into its final [`Verdict`].
#[derive(Debug, Default)]
pub struct FinalChecksumCombiner {
    stats: RxStats,
}

impl FinalChecksumCombiner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    pub fn try_step(
        &mut self,
        sums: &mut Fifo<SubSums>,
        verdicts: &mut Fifo<Verdict>,
    ) -> bool {
        if sums.is_empty() || verdicts.is_full() {
            return false;
        }

        let Some(s) = sums.read() else { return false };
        let verifies = s.sum.verifies();
        if !verifies {
            self.stats.ip_csum_bad += 1;
        } else if !s.ip_match {
            self.stats.ip_not_local += 1;
        }

        verdicts.write(Verdict {
            checksum_valid: verifies && s.ip_match,
            version_valid: s.version_valid,
            fragment_valid: s.fragment_valid,
        });
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::word::frame_to_words;
    use crate::engine::word::words_to_frame;
    use nts_test_utils::*;

    struct Out {
        data: Vec<Word>,
        verdicts: Vec<Verdict>,
        stats: RxStats,
    }

    fn validate(frames: &[Vec<u8>]) -> Out {
        let mut input = Fifo::new("in", 2048);
        let mut out = Fifo::new("out", 2048);
        let mut sums = Fifo::new("sums", 16);
        let mut verdicts = Fifo::new("verdicts", 16);
        for f in frames {
            frame_to_words(f).into_iter().for_each(|w| input.write(w));
        }

        let mut v = Ipv4ChecksumValidator::new(LOCAL_IP, NETMASK);
        let mut c = FinalChecksumCombiner::new();
        while v.try_step(&mut input, &mut out, &mut sums)
            | c.try_step(&mut sums, &mut verdicts)
        {}

        let mut stats = *v.stats();
        stats += c.stats();
        Out {
            data: out.drain().collect(),
            verdicts: verdicts.drain().collect(),
            stats,
        }
    }

    const VALID: Verdict = Verdict {
        checksum_valid: true,
        version_valid: true,
        fragment_valid: true,
    };

    #[test]
    fn strips_ethernet_and_accepts() {
        for len in 0..=17 {
            let f =
                Ipv4Frame { payload: vec![0xC3; len], ..Default::default() };
            let out = validate(&[f.build()]);
            assert_eq!(words_to_frame(&out.data), f.datagram(), "len {len}");
            assert!(out.data.iter().all(Word::is_well_formed));
            assert_eq!(out.verdicts, vec![VALID], "len {len}");
        }
    }

    #[test]
    fn accepts_options() {
        for opts in [vec![1; 4], vec![1; 8], vec![1; 40]] {
            let f = Ipv4Frame { options: opts, ..Default::default() };
            let out = validate(&[f.build()]);
            assert_eq!(words_to_frame(&out.data), f.datagram());
            assert_eq!(out.verdicts, vec![VALID]);
        }
    }

    #[test]
    fn accepts_broadcasts() {
        let directed = Ipv4Addr::from_const([10, 12, 200, 255]);
        for dst in [Ipv4Addr::LOCAL_BCAST, directed] {
            let f = Ipv4Frame { ip_dst: dst, ..Default::default() };
            assert_eq!(validate(&[f.build()]).verdicts, vec![VALID]);
        }
    }

    #[test]
    fn rejects_bad_checksum_and_foreign_dst() {
        let mut bad = Ipv4Frame::default().build();
        // Low byte of the identification field.
        corrupt(&mut bad, ETHER_HDR_LEN + 5);
        let foreign = Ipv4Frame {
            ip_dst: Ipv4Addr::from_const([10, 12, 201, 50]),
            ..Default::default()
        };

        let out = validate(&[bad, foreign.build()]);
        assert_eq!(out.verdicts.len(), 2);
        assert!(out.verdicts.iter().all(|v| !v.checksum_valid));
        assert_eq!(out.stats.ip_csum_bad, 1);
        assert_eq!(out.stats.ip_not_local, 1);
    }

    #[test]
    fn flags_fragments_and_bad_versions() {
        let mf = Ipv4Frame { flags_frag: 0x2000, ..Default::default() };
        let off = Ipv4Frame { flags_frag: 0x0010, ..Default::default() };
        let short = Ipv4Frame { total_len: Some(19), ..Default::default() };

        let out = validate(&[mf.build(), off.build(), short.build()]);
        assert!(!out.verdicts[0].fragment_valid);
        assert!(!out.verdicts[1].fragment_valid);
        assert!(out.verdicts[0].checksum_valid);
        assert!(!out.verdicts[2].version_valid);
    }

    #[test]
    fn truncated_header_keeps_data_and_verdicts_paired() {
        let full = Ipv4Frame::default().build();

        // Ends inside word 1, before any IP byte.
        let out = validate(&[full[..13].to_vec()]);
        assert!(out.data.is_empty() && out.verdicts.is_empty());

        // Ends inside the header.
        for len in [15, 20, 30] {
            let out = validate(&[full[..len].to_vec()]);
            assert_eq!(words_to_frame(&out.data), full[14..len]);
            assert_eq!(out.verdicts.len(), 1, "len {len}");
            assert!(!out.verdicts[0].checksum_valid);
            assert_eq!(out.stats.ip_hdr_truncated, 1);
        }
    }

    #[test]
    fn combiner_folds_lanes() {
        let mut sums = Fifo::new("sums", 1);
        let mut verdicts = Fifo::new("verdicts", 1);
        sums.write(SubSums {
            sum: LaneSum::from_lanes([0xFFFF, 0x0000, 0x0000, 0x0000]),
            ip_match: true,
            version_valid: true,
            fragment_valid: true,
        });

        let mut c = FinalChecksumCombiner::new();
        assert!(c.try_step(&mut sums, &mut verdicts));
        assert_eq!(verdicts.read(), Some(VALID));
        assert!(!c.try_step(&mut sums, &mut verdicts));
    }
}
