// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Routines for UDP testing.

use super::*;
use smoltcp::wire::IpAddress;
use smoltcp::wire::UdpPacket;

pub const UDP_HDR_LEN: usize = 8;

/// The UDP bytes of a datagram with a correct checksum.
pub fn udp_datagram(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut bytes = vec![0u8; UDP_HDR_LEN + payload.len()];
    let mut pkt = UdpPacket::new_unchecked(&mut bytes[..]);
    pkt.set_src_port(src_port);
    pkt.set_dst_port(dst_port);
    pkt.set_len((UDP_HDR_LEN + payload.len()) as u16);
    pkt.payload_mut().copy_from_slice(payload);
    pkt.fill_checksum(
        &IpAddress::Ipv4(src.into()),
        &IpAddress::Ipv4(dst.into()),
    );
    bytes
}

/// A complete UDP frame from the remote peer.
pub fn udp_frame(src_port: u16, dst_port: u16, payload: &[u8]) -> Ipv4Frame {
    Ipv4Frame {
        proto: PROTO_UDP,
        payload: udp_datagram(REMOTE_IP, LOCAL_IP, src_port, dst_port, payload),
        ..Default::default()
    }
}

/// A UDP frame whose IPv4 header carries `options`, with the UDP
/// checksum computed over the same addresses.
pub fn udp_frame_with_options(
    options: Vec<u8>,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Ipv4Frame {
    Ipv4Frame { options, ..udp_frame(src_port, dst_port, payload) }
}
