// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The assembled receive stack.

use super::checksum::HeaderChecksum;
use super::ether::EtherEncap;
use super::ether::NeighborLookup;
use super::fifo::ChannelUsage;
use super::fifo::Fifo;
use super::icmp::ControlMessageBuilder;
use super::icmp::EchoDecision;
use super::icmp::IcmpChecksumChecker;
use super::icmp::IcmpChecksumInserter;
use super::icmp::IcmpErrorMeta;
use super::icmp::IpHeaderAppender;
use super::icmp::builder::ErrorOutputs;
use super::icmp::builder::Triggers;
use super::icmp::inserter::EchoPath;
use super::icmp::inserter::ErrorPath;
use super::ip4::SubSums;
use super::ip4::Verdict;
use super::iprx::CutLength;
use super::iprx::DatagramLengthFilter;
use super::iprx::FinalChecksumCombiner;
use super::iprx::InvalidPacketDropper;
use super::iprx::Ipv4ChecksumValidator;
use super::iprx::L4Channels;
use super::iprx::L4ProtocolDemux;
use super::iprx::MacProtocolDemux;
use super::stat::RxStats;
use super::udp::IpStrip;
use super::udp::PortTable;
use super::udp::RxPacketHandler;
use super::udp::UdpChecksumChecker;
use super::udp::UdpRxMeta;
use super::udp::ip_strip::StripOutputs;
use super::udp::rx_handler::HandlerInputs;
use super::udp::rx_handler::HandlerOutputs;
use super::word::Word;
use super::word::frame_to_words;
use super::word::words_to_frame;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use crate::provider::Providers;
use nts_api::CfgError;
use nts_api::NtsCfg;
use std::sync::Arc;
use thiserror::Error;

/// Depth of the channels that may hold a whole frame while a stage
/// downstream waits for its verdict.
pub const FRAME_DEPTH: usize = 2048;

/// Depth of pass-through channels; enough for the longest IPv4
/// header plus the words a stage holds back.
pub const STREAM_DEPTH: usize = 16;

/// Depth of the per-datagram side channels.
pub const RECORD_DEPTH: usize = 16;

#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum PushError {
    #[error("ingress channel is full ({free} of {depth} words free)")]
    Full { free: usize, depth: usize },

    #[error("the stack is disabled")]
    Disabled,
}

struct Stages {
    mac: MacProtocolDemux,
    length: DatagramLengthFilter,
    validator: Ipv4ChecksumValidator,
    combiner: FinalChecksumCombiner,
    dropper: InvalidPacketDropper,
    cut: CutLength,
    l4: L4ProtocolDemux,
    icmp_checker: IcmpChecksumChecker,
    strip: IpStrip,
    udp_checker: UdpChecksumChecker,
    handler: RxPacketHandler,
    builder: ControlMessageBuilder,
    appender: IpHeaderAppender,
    inserter: IcmpChecksumInserter,
    encap: EtherEncap,
}

struct Channels {
    ingress: Fifo<Word>,
    arp: Fifo<Word>,
    ipv4: Fifo<Word>,
    filtered: Fifo<Word>,
    aligned: Fifo<Word>,
    sums: Fifo<SubSums>,
    verdicts: Fifo<Verdict>,
    accepted: Fifo<Word>,
    trimmed: Fifo<Word>,

    ttl: Fifo<Word>,
    icmp: Fifo<Word>,
    udp: Fifo<Word>,
    tcp: Fifo<Word>,

    echo_data: Fifo<Word>,
    echo_decisions: Fifo<EchoDecision>,
    err_meta: Fifo<IcmpErrorMeta>,
    err_body: Fifo<Word>,
    err_csums: Fifo<HeaderChecksum>,
    err_data: Fifo<Word>,
    icmp_out: Fifo<Word>,
    egress: Fifo<Word>,

    udp_seeds: Fifo<u16>,
    udp_meta: Fifo<UdpRxMeta>,
    udp_excerpt: Fifo<Word>,
    udp_data: Fifo<Word>,
    udp_checked: Fifo<Word>,
    udp_verdicts: Fifo<bool>,
    unreach: Fifo<Word>,
    app_meta: Fifo<UdpRxMeta>,
    app_data: Fifo<Word>,
}

impl Channels {
    fn new() -> Self {
        Self {
            ingress: Fifo::new("ingress", FRAME_DEPTH),
            arp: Fifo::new("arp", FRAME_DEPTH),
            ipv4: Fifo::new("ipv4", STREAM_DEPTH),
            filtered: Fifo::new("filtered", STREAM_DEPTH),
            aligned: Fifo::new("aligned", STREAM_DEPTH),
            sums: Fifo::new("sums", RECORD_DEPTH),
            verdicts: Fifo::new("verdicts", RECORD_DEPTH),
            accepted: Fifo::new("accepted", STREAM_DEPTH),
            trimmed: Fifo::new("trimmed", STREAM_DEPTH),

            ttl: Fifo::new("ttl expired", FRAME_DEPTH),
            icmp: Fifo::new("icmp", STREAM_DEPTH),
            udp: Fifo::new("udp", STREAM_DEPTH),
            tcp: Fifo::new("tcp", FRAME_DEPTH),

            echo_data: Fifo::new("echo data", FRAME_DEPTH),
            echo_decisions: Fifo::new("echo decisions", RECORD_DEPTH),
            err_meta: Fifo::new("error meta", RECORD_DEPTH),
            err_body: Fifo::new("error body", STREAM_DEPTH),
            err_csums: Fifo::new("error checksums", RECORD_DEPTH),
            err_data: Fifo::new("error data", FRAME_DEPTH),
            icmp_out: Fifo::new("icmp out", STREAM_DEPTH),
            egress: Fifo::new("icmp egress", FRAME_DEPTH),

            udp_seeds: Fifo::new("udp seeds", RECORD_DEPTH),
            udp_meta: Fifo::new("udp meta", RECORD_DEPTH),
            udp_excerpt: Fifo::new("udp excerpt", FRAME_DEPTH),
            udp_data: Fifo::new("udp data", STREAM_DEPTH),
            udp_checked: Fifo::new("udp checked", FRAME_DEPTH),
            udp_verdicts: Fifo::new("udp verdicts", RECORD_DEPTH),
            unreach: Fifo::new("port unreachable", FRAME_DEPTH),
            app_meta: Fifo::new("app meta", RECORD_DEPTH),
            app_data: Fifo::new("app data", FRAME_DEPTH),
        }
    }
}

/// Pop one complete frame off `f`, if one is there.
fn pop_frame(f: &mut Fifo<Word>) -> Option<Vec<u8>> {
    if !f.iter().any(|w| w.last) {
        return None;
    }

    let mut words = vec![];
    while let Some(w) = f.read() {
        words.push(w);
        if w.last {
            break;
        }
    }
    Some(words_to_frame(&words))
}

/// The receive stack: every stage and every channel between them.
///
/// Frames are pushed into the ingress channel and [`RxStack::run`]
/// moves them through the stages. What comes out is left in the
/// output channels for the caller to pop:
///
/// * ARP frames, untouched.
/// * TCP datagrams, IP-aligned.
/// * ICMP replies and errors, as complete Ethernet frames.
/// * UDP payloads for open ports, each with its [`UdpRxMeta`].
pub struct RxStack {
    cfg: NtsCfg,
    log: Box<dyn LogProvider>,
    ports: Arc<PortTable>,
    neighbors: Box<dyn NeighborLookup>,
    stages: Stages,
    ch: Channels,
}

impl RxStack {
    pub fn new(
        cfg: NtsCfg,
        providers: Providers,
        ports: Arc<PortTable>,
        neighbors: Box<dyn NeighborLookup>,
    ) -> Result<Self, CfgError> {
        cfg.validate()?;

        let log = providers.log;
        log.log(
            LogLevel::Note,
            &format!(
                "nts: mac {} ip {}/{} max datagram {} {}",
                cfg.mac,
                cfg.ip,
                u32::from(cfg.netmask).leading_ones(),
                cfg.max_datagram_size,
                if cfg.enabled { "enabled" } else { "disabled" },
            ),
        );

        let stages = Stages {
            mac: MacProtocolDemux::new(cfg.mac),
            length: DatagramLengthFilter::new(cfg.max_datagram_size),
            validator: Ipv4ChecksumValidator::new(cfg.ip, cfg.netmask),
            combiner: FinalChecksumCombiner::new(),
            dropper: InvalidPacketDropper::new(),
            cut: CutLength::new(),
            l4: L4ProtocolDemux::new(),
            icmp_checker: IcmpChecksumChecker::new(),
            strip: IpStrip::new(),
            udp_checker: UdpChecksumChecker::new(),
            handler: RxPacketHandler::new(Arc::clone(&ports)),
            builder: ControlMessageBuilder::new(),
            appender: IpHeaderAppender::new(cfg.ip),
            inserter: IcmpChecksumInserter::new(),
            encap: EtherEncap::new(cfg.mac),
        };

        Ok(Self { cfg, log, ports, neighbors, stages, ch: Channels::new() })
    }

    pub fn cfg(&self) -> &NtsCfg {
        &self.cfg
    }

    pub fn is_enabled(&self) -> bool {
        self.cfg.enabled
    }

    /// Start or stop admitting traffic.
    ///
    /// While disabled, pushes are refused and whatever is already in
    /// the ingress channel stays there until the stack is enabled
    /// again.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.cfg.enabled != enabled {
            let state = if enabled { "enabled" } else { "disabled" };
            self.log.log(LogLevel::Note, &format!("nts: {state}"));
        }
        self.cfg.enabled = enabled;
    }

    /// Open a UDP port. Returns false for port 0.
    pub fn listen(&self, port: u16) -> bool {
        let ok = self.ports.listen(port);
        if ok {
            self.log.log(LogLevel::Note, &format!("nts: listen on {port}"));
        }
        ok
    }

    /// Close a UDP port, returning whether it was open.
    pub fn close(&self, port: u16) -> bool {
        let was_open = self.ports.close(port);
        if was_open {
            self.log.log(LogLevel::Note, &format!("nts: closed {port}"));
        }
        was_open
    }

    fn check_push(&self, words: usize) -> Result<(), PushError> {
        if !self.cfg.enabled {
            return Err(PushError::Disabled);
        }

        let free = self.ch.ingress.free();
        if free < words {
            return Err(PushError::Full {
                free,
                depth: self.ch.ingress.depth(),
            });
        }

        Ok(())
    }

    /// Push one word of an Ethernet frame.
    pub fn push_word(&mut self, w: Word) -> Result<(), PushError> {
        self.check_push(1)?;
        if !w.is_well_formed() {
            self.log.log(
                LogLevel::Error,
                &format!("malformed ingress word {w:?}"),
            );
            debug_assert!(w.is_well_formed(), "malformed word {w:?}");
        }
        self.ch.ingress.write(w);
        Ok(())
    }

    /// Push a whole Ethernet frame; it is admitted only if all of it
    /// fits.
    pub fn push_frame(&mut self, frame: &[u8]) -> Result<(), PushError> {
        let words = frame_to_words(frame);
        self.check_push(words.len())?;
        words.into_iter().for_each(|w| self.ch.ingress.write(w));
        Ok(())
    }

    /// Give every stage, in pipeline order, one chance to advance.
    /// Returns whether any of them did.
    pub fn step(&mut self) -> bool {
        let st = &mut self.stages;
        let ch = &mut self.ch;
        let mut progress = false;

        if self.cfg.enabled {
            progress |=
                st.mac.try_step(&mut ch.ingress, &mut ch.arp, &mut ch.ipv4);
        }
        progress |= st.length.try_step(&mut ch.ipv4, &mut ch.filtered);
        progress |= st.validator.try_step(
            &mut ch.filtered,
            &mut ch.aligned,
            &mut ch.sums,
        );
        progress |= st.combiner.try_step(&mut ch.sums, &mut ch.verdicts);
        progress |= st.dropper.try_step(
            &mut ch.verdicts,
            &mut ch.aligned,
            &mut ch.accepted,
        );
        progress |= st.cut.try_step(&mut ch.accepted, &mut ch.trimmed);
        progress |= st.l4.try_step(
            &mut ch.trimmed,
            L4Channels {
                ttl: &mut ch.ttl,
                icmp: &mut ch.icmp,
                udp: &mut ch.udp,
                tcp: &mut ch.tcp,
            },
        );

        progress |= st.icmp_checker.try_step(
            &mut ch.icmp,
            &mut ch.echo_data,
            &mut ch.echo_decisions,
        );

        progress |= st.strip.try_step(
            &mut ch.udp,
            StripOutputs {
                seed: &mut ch.udp_seeds,
                meta: &mut ch.udp_meta,
                excerpt: &mut ch.udp_excerpt,
                data: &mut ch.udp_data,
            },
        );
        progress |= st.udp_checker.try_step(
            &mut ch.udp_seeds,
            &mut ch.udp_data,
            &mut ch.udp_checked,
            &mut ch.udp_verdicts,
        );
        progress |= st.handler.try_step(
            HandlerInputs {
                meta: &mut ch.udp_meta,
                excerpt: &mut ch.udp_excerpt,
                data: &mut ch.udp_checked,
                verdicts: &mut ch.udp_verdicts,
            },
            HandlerOutputs {
                app_meta: &mut ch.app_meta,
                app_data: &mut ch.app_data,
                unreach: &mut ch.unreach,
            },
        );

        progress |= st.builder.try_step(
            Triggers { ttl: &mut ch.ttl, unreach: &mut ch.unreach },
            ErrorOutputs {
                meta: &mut ch.err_meta,
                body: &mut ch.err_body,
                csum: &mut ch.err_csums,
            },
        );
        progress |= st.appender.try_step(
            &mut ch.err_meta,
            &mut ch.err_body,
            &mut ch.err_data,
        );
        progress |= st.inserter.try_step(
            EchoPath {
                data: &mut ch.echo_data,
                decisions: &mut ch.echo_decisions,
            },
            ErrorPath { data: &mut ch.err_data, csums: &mut ch.err_csums },
            &mut ch.icmp_out,
        );
        progress |= st.encap.try_step(
            &mut ch.icmp_out,
            &mut ch.egress,
            self.neighbors.as_ref(),
            self.log.as_ref(),
        );

        progress
    }

    /// Step until no stage can advance. Returns the number of rounds
    /// that made progress.
    pub fn run(&mut self) -> usize {
        let mut rounds = 0;
        while self.step() {
            rounds += 1;
        }
        self.check_quiescent();
        rounds
    }

    // Once quiescent, and unless the dropper is held back by a full
    // output, a complete datagram can only be waiting at the dropper
    // if its verdict went missing.
    fn check_quiescent(&self) {
        let orphan = self.ch.verdicts.is_empty()
            && !self.ch.accepted.is_full()
            && self.ch.aligned.iter().any(|w| w.last);
        if orphan {
            self.log.log(
                LogLevel::Error,
                "datagram waiting at the dropper without a verdict",
            );
        }
        debug_assert!(!orphan, "datagram without verdict");
    }

    /// The next ARP frame, as received.
    pub fn pop_arp(&mut self) -> Option<Vec<u8>> {
        pop_frame(&mut self.ch.arp)
    }

    /// The next TCP datagram, IPv4 header included.
    pub fn pop_tcp(&mut self) -> Option<Vec<u8>> {
        pop_frame(&mut self.ch.tcp)
    }

    /// The next outgoing ICMP frame.
    pub fn pop_icmp_frame(&mut self) -> Option<Vec<u8>> {
        pop_frame(&mut self.ch.egress)
    }

    /// The next UDP payload delivered to an open port.
    pub fn pop_udp(&mut self) -> Option<(UdpRxMeta, Vec<u8>)> {
        if !self.ch.app_data.iter().any(|w| w.last) {
            return None;
        }

        let meta = self.ch.app_meta.read()?;
        let payload = pop_frame(&mut self.ch.app_data)?;
        Some((meta, payload))
    }

    /// The depth and high-water mark of every channel, in pipeline
    /// order.
    pub fn channel_usage(&self) -> Vec<ChannelUsage> {
        let ch = &self.ch;
        vec![
            ch.ingress.usage(),
            ch.arp.usage(),
            ch.ipv4.usage(),
            ch.filtered.usage(),
            ch.aligned.usage(),
            ch.sums.usage(),
            ch.verdicts.usage(),
            ch.accepted.usage(),
            ch.trimmed.usage(),
            ch.ttl.usage(),
            ch.icmp.usage(),
            ch.udp.usage(),
            ch.tcp.usage(),
            ch.echo_data.usage(),
            ch.echo_decisions.usage(),
            ch.err_meta.usage(),
            ch.err_body.usage(),
            ch.err_csums.usage(),
            ch.err_data.usage(),
            ch.icmp_out.usage(),
            ch.egress.usage(),
            ch.udp_seeds.usage(),
            ch.udp_meta.usage(),
            ch.udp_excerpt.usage(),
            ch.udp_data.usage(),
            ch.udp_checked.usage(),
            ch.udp_verdicts.usage(),
            ch.unreach.usage(),
            ch.app_meta.usage(),
            ch.app_data.usage(),
        ]
    }

    /// The counters of every stage, summed.
    pub fn stats(&self) -> RxStats {
        let st = &self.stages;
        let mut stats = RxStats::default();
        for s in [
            st.mac.stats(),
            st.length.stats(),
            st.validator.stats(),
            st.combiner.stats(),
            st.dropper.stats(),
            st.cut.stats(),
            st.l4.stats(),
            st.icmp_checker.stats(),
            st.strip.stats(),
            st.udp_checker.stats(),
            st.handler.stats(),
            st.builder.stats(),
            st.inserter.stats(),
            st.encap.stats(),
        ] {
            stats += s;
        }
        stats
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::ether::StaticNeighbors;
    use crate::provider::CaptureLog;
    use nts_test_utils::icmp::*;
    use nts_test_utils::*;

    fn stack_with_log() -> (RxStack, Arc<CaptureLog>) {
        let log = Arc::new(CaptureLog::default());
        let providers = Providers { log: Box::new(Arc::clone(&log)) };
        let neighbors: StaticNeighbors =
            [(REMOTE_IP, REMOTE_MAC)].into_iter().collect();
        let stack = RxStack::new(
            cfg(),
            providers,
            Arc::new(PortTable::new()),
            Box::new(neighbors),
        )
        .unwrap();
        (stack, log)
    }

    #[test]
    fn rejects_bad_cfg() {
        let mut bad = cfg();
        bad.max_datagram_size = 10;
        let res = RxStack::new(
            bad,
            Providers::default(),
            Arc::new(PortTable::new()),
            Box::new(StaticNeighbors::new()),
        );
        assert!(matches!(res, Err(CfgError::BadMaxDatagramSize { .. })));
    }

    #[test]
    fn logs_cfg_and_ports() {
        let (stack, log) = stack_with_log();
        assert!(stack.listen(5000));
        assert!(!stack.listen(0));
        assert!(stack.close(5000));
        assert!(!stack.close(5000));

        let msgs = log.msgs.lock().unwrap();
        let notes: Vec<&str> = msgs.iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(
            notes,
            vec![
                "nts: mac 02:08:20:AA:BB:CC ip 10.12.200.50/24 \
                 max datagram 1500 enabled",
                "nts: listen on 5000",
                "nts: closed 5000",
            ]
        );
        assert!(msgs.iter().all(|(l, _)| *l == LogLevel::Note));
    }

    #[test]
    fn disabled_stack_holds_frames() {
        let (mut stack, _) = stack_with_log();
        let frame = echo_request_frame(b"ABCD").build();
        stack.push_frame(&frame).unwrap();

        stack.set_enabled(false);
        assert!(!stack.is_enabled());
        assert_eq!(stack.push_frame(&frame), Err(PushError::Disabled));
        stack.run();
        assert!(stack.pop_icmp_frame().is_none());
        assert_eq!(stack.stats().frames_in, 0);

        stack.set_enabled(true);
        stack.run();
        assert!(stack.pop_icmp_frame().is_some());
        assert_eq!(stack.stats().echo_replies, 1);
    }

    #[test]
    fn channel_usage_tracks_high_water() {
        let (mut stack, _) = stack_with_log();
        let frame = echo_request_frame(b"ABCD").build();
        stack.push_frame(&frame).unwrap();
        stack.run();

        let usage = stack.channel_usage();
        assert_eq!(usage[0].name, "ingress");
        assert_eq!(usage[0].high_water, frame.len().div_ceil(8));
        assert!(usage.iter().all(|u| u.high_water <= u.depth));
        let egress = usage.iter().find(|u| u.name == "icmp egress");
        assert!(egress.is_some_and(|u| u.high_water > 0));
        let app = usage.iter().find(|u| u.name == "app data");
        assert_eq!(app.map(|u| u.high_water), Some(0));
    }

    #[test]
    fn ingress_full() {
        let (mut stack, _) = stack_with_log();
        let big = vec![0u8; (FRAME_DEPTH + 1) * 8];
        assert_eq!(
            stack.push_frame(&big),
            Err(PushError::Full { free: FRAME_DEPTH, depth: FRAME_DEPTH })
        );
    }

    #[test]
    fn arp_and_tcp_pass_through() {
        let (mut stack, _) = stack_with_log();
        let arp =
            ether_frame(MacAddr::BROADCAST, REMOTE_MAC, 0x0806, &[7; 28]);
        let tcp = Ipv4Frame {
            proto: PROTO_TCP,
            payload: vec![9; 20],
            ..Default::default()
        };
        stack.push_frame(&arp).unwrap();
        stack.push_frame(&tcp.build()).unwrap();
        stack.run();

        assert_eq!(stack.pop_arp(), Some(arp));
        assert_eq!(stack.pop_tcp(), Some(tcp.datagram()));
        assert_eq!(stack.pop_arp(), None);
        let stats = stack.stats();
        assert_eq!((stats.arp_frames, stats.tcp_in), (1, 1));
    }
}
