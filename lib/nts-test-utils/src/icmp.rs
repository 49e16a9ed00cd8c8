// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Routines for ICMP testing.

use super::*;
use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::Icmpv4Message;
use smoltcp::wire::Icmpv4Packet;
use smoltcp::wire::Icmpv4Repr;

pub const ECHO_IDENT: u16 = 0x0BAD;
pub const ECHO_SEQ: u16 = 7;

/// The ICMP bytes of an Echo Request.
pub fn echo_request(ident: u16, seq_no: u16, data: &[u8]) -> Vec<u8> {
    let req = Icmpv4Repr::EchoRequest { ident, seq_no, data };
    let mut bytes = vec![0u8; req.buffer_len()];
    let mut pkt = Icmpv4Packet::new_unchecked(&mut bytes);
    req.emit(&mut pkt, &ChecksumCapabilities::default());
    bytes
}

/// The ICMP bytes of an Echo Reply.
pub fn echo_reply(ident: u16, seq_no: u16, data: &[u8]) -> Vec<u8> {
    let reply = Icmpv4Repr::EchoReply { ident, seq_no, data };
    let mut bytes = vec![0u8; reply.buffer_len()];
    let mut pkt = Icmpv4Packet::new_unchecked(&mut bytes);
    reply.emit(&mut pkt, &ChecksumCapabilities::default());
    bytes
}

/// A complete Echo Request frame from the remote peer.
pub fn echo_request_frame(data: &[u8]) -> Ipv4Frame {
    Ipv4Frame {
        proto: PROTO_ICMP,
        payload: echo_request(ECHO_IDENT, ECHO_SEQ, data),
        ..Default::default()
    }
}

/// A parsed ICMP message whose checksum has been verified.
#[derive(Clone, Debug)]
pub struct ParsedIcmp {
    pub ip: ParsedIpv4,
    pub msg_type: Icmpv4Message,
    pub code: u8,
    /// The 4 bytes following the checksum: identifier and sequence
    /// number for echo messages, unused for errors.
    pub rest: [u8; 4],
    /// The message body following the 8-byte ICMP header.
    pub data: Vec<u8>,
}

/// Parse an Ethernet-framed ICMP message, asserting that both the
/// IPv4 and ICMP checksums verify.
pub fn parse_icmp_frame(frame: &[u8]) -> ParsedIcmp {
    let ip = parse_ipv4_frame(frame);
    assert_eq!(ip.proto, PROTO_ICMP);

    let icmp = Icmpv4Packet::new_checked(&ip.payload[..]).expect("ICMP");
    assert!(icmp.verify_checksum(), "bad ICMP checksum");
    let msg_type = icmp.msg_type();
    let code = icmp.msg_code();
    let raw = &ip.payload;
    let rest = [raw[4], raw[5], raw[6], raw[7]];
    let data = raw[8..].to_vec();

    ParsedIcmp { ip, msg_type, code, rest, data }
}
