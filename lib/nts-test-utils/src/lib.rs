// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Common routines for receive stack tests.
//!
//! Frames are built and checked with `smoltcp` wire types so that the
//! stack is always tested against an independent implementation of
//! the protocols it parses.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

pub mod icmp;
pub mod udp;

pub use nts_api::Ipv4Addr;
pub use nts_api::MacAddr;
pub use nts_api::NtsCfg;
pub use nts_api::PROTO_ICMP;
pub use nts_api::PROTO_TCP;
pub use nts_api::PROTO_UDP;
pub use smoltcp::wire::EthernetFrame;
pub use smoltcp::wire::EthernetProtocol;
pub use smoltcp::wire::IpProtocol;
pub use smoltcp::wire::Ipv4Packet;

pub const ETHER_HDR_LEN: usize = 14;
pub const IPV4_HDR_LEN: usize = 20;

/// The interface under test.
pub const LOCAL_MAC: MacAddr =
    MacAddr::from_const([0x02, 0x08, 0x20, 0xAA, 0xBB, 0xCC]);
pub const LOCAL_IP: Ipv4Addr = Ipv4Addr::from_const([10, 12, 200, 50]);
pub const NETMASK: Ipv4Addr = Ipv4Addr::from_const([255, 255, 255, 0]);

/// A peer on the same segment.
pub const REMOTE_MAC: MacAddr =
    MacAddr::from_const([0x02, 0x08, 0x20, 0x11, 0x22, 0x33]);
pub const REMOTE_IP: Ipv4Addr = Ipv4Addr::from_const([10, 12, 200, 7]);

/// The configuration every test stack starts from.
pub fn cfg() -> NtsCfg {
    let mut cfg = NtsCfg::new(LOCAL_MAC, LOCAL_IP);
    cfg.netmask = NETMASK;
    cfg
}

/// A description of an Ethernet-framed IPv4 datagram.
///
/// Every field defaults to a well-formed datagram from the remote
/// peer to the interface under test; tests override the one field
/// they are interested in breaking.
#[derive(Clone, Debug)]
pub struct Ipv4Frame {
    pub eth_src: MacAddr,
    pub eth_dst: MacAddr,
    pub ip_src: Ipv4Addr,
    pub ip_dst: Ipv4Addr,
    pub ttl: u8,
    pub ident: u16,
    /// Flags and fragment offset, as they appear on the wire.
    pub flags_frag: u16,
    pub proto: u8,
    /// Raw option bytes; the length must be a multiple of 4.
    pub options: Vec<u8>,
    pub payload: Vec<u8>,
    /// Overrides the computed Total-Length.
    pub total_len: Option<u16>,
    /// Bytes appended after the datagram, as Ethernet padding.
    pub padding: usize,
}

impl Default for Ipv4Frame {
    fn default() -> Self {
        Self {
            eth_src: REMOTE_MAC,
            eth_dst: LOCAL_MAC,
            ip_src: REMOTE_IP,
            ip_dst: LOCAL_IP,
            ttl: 64,
            ident: 0x1234,
            flags_frag: 0x4000,
            proto: PROTO_ICMP,
            options: vec![],
            payload: vec![],
            total_len: None,
            padding: 0,
        }
    }
}

impl Ipv4Frame {
    pub fn hdr_len(&self) -> usize {
        IPV4_HDR_LEN + self.options.len()
    }

    /// The datagram bytes, without the Ethernet header or padding.
    pub fn datagram(&self) -> Vec<u8> {
        let frame = self.build();
        frame[ETHER_HDR_LEN..frame.len() - self.padding].to_vec()
    }

    /// Build the frame with a correct IPv4 header checksum.
    pub fn build(&self) -> Vec<u8> {
        let hdr_len = self.hdr_len();
        assert!(self.options.len() % 4 == 0 && hdr_len <= 60);
        let total_len = self
            .total_len
            .unwrap_or((hdr_len + self.payload.len()) as u16);

        let mut buf = vec![
            0u8;
            ETHER_HDR_LEN + hdr_len + self.payload.len() + self.padding
        ];

        let mut eth = EthernetFrame::new_unchecked(&mut buf[..]);
        eth.set_dst_addr(self.eth_dst.into());
        eth.set_src_addr(self.eth_src.into());
        eth.set_ethertype(EthernetProtocol::Ipv4);

        let ip_buf = &mut buf[ETHER_HDR_LEN..];
        ip_buf[IPV4_HDR_LEN..hdr_len].copy_from_slice(&self.options);
        ip_buf[hdr_len..hdr_len + self.payload.len()]
            .copy_from_slice(&self.payload);
        ip_buf[6..8].copy_from_slice(&self.flags_frag.to_be_bytes());

        let mut ip = Ipv4Packet::new_unchecked(&mut ip_buf[..]);
        ip.set_version(4);
        ip.set_header_len(hdr_len as u8);
        ip.set_dscp(0);
        ip.set_ecn(0);
        ip.set_total_len(total_len);
        ip.set_ident(self.ident);
        ip.set_hop_limit(self.ttl);
        ip.set_next_header(IpProtocol::from(self.proto));
        ip.set_src_addr(self.ip_src.into());
        ip.set_dst_addr(self.ip_dst.into());
        ip.fill_checksum();

        buf
    }
}

/// An Ethernet frame with an arbitrary EtherType and body.
pub fn ether_frame(
    dst: MacAddr,
    src: MacAddr,
    ethertype: u16,
    body: &[u8],
) -> Vec<u8> {
    let mut buf = vec![0u8; ETHER_HDR_LEN + body.len()];
    let mut eth = EthernetFrame::new_unchecked(&mut buf[..]);
    eth.set_dst_addr(dst.into());
    eth.set_src_addr(src.into());
    eth.set_ethertype(EthernetProtocol::from(ethertype));
    eth.payload_mut().copy_from_slice(body);
    buf
}

/// Flip every bit of the byte at `offset`.
pub fn corrupt(frame: &mut [u8], offset: usize) {
    frame[offset] ^= 0xFF;
}

/// The parsed Ethernet and IPv4 headers of an output frame.
#[derive(Clone, Debug)]
pub struct ParsedIpv4 {
    pub eth_src: MacAddr,
    pub eth_dst: MacAddr,
    pub ip_src: Ipv4Addr,
    pub ip_dst: Ipv4Addr,
    pub ttl: u8,
    pub proto: u8,
    pub total_len: u16,
    /// The IPv4 payload, bounded by Total-Length.
    pub payload: Vec<u8>,
}

/// Parse an Ethernet-framed IPv4 datagram, asserting that it is
/// well formed and that its header checksum verifies.
pub fn parse_ipv4_frame(frame: &[u8]) -> ParsedIpv4 {
    let eth = EthernetFrame::new_checked(frame).expect("Ethernet frame");
    assert_eq!(eth.ethertype(), EthernetProtocol::Ipv4);

    let ip = Ipv4Packet::new_checked(eth.payload()).expect("IPv4 packet");
    assert_eq!(ip.version(), 4);
    assert!(ip.verify_checksum(), "bad IPv4 header checksum");

    ParsedIpv4 {
        eth_src: eth.src_addr().into(),
        eth_dst: eth.dst_addr().into(),
        ip_src: ip.src_addr().into(),
        ip_dst: ip.dst_addr().into(),
        ttl: ip.hop_limit(),
        proto: ip.next_header().into(),
        total_len: ip.total_len(),
        payload: ip.payload().to_vec(),
    }
}
