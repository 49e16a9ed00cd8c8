// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The UDP receive path.
//!
//! ```text
//!  IpStrip ──datagram, seed──▶ UdpChecksumChecker
//!     │                         │datagram, verdict
//!     └──meta, excerpt───────▶ RxPacketHandler ──▶ app
//! ```
//!
//! The handler delivers the payload of valid datagrams for open ports
//! to the application, and hands the excerpt of datagrams for closed
//! ports to the ICMP engine.

pub mod csum_checker;
pub mod ip_strip;
pub mod port_table;
pub mod rx_handler;

pub use csum_checker::UdpChecksumChecker;
pub use ip_strip::IpStrip;
pub use port_table::PortTable;
pub use rx_handler::RxPacketHandler;

use nts_api::SocketPair;
use serde::Deserialize;
use serde::Serialize;

pub const UDP_HDR_LEN: usize = 8;

/// UDP header field offsets of a realigned datagram, as `(word,
/// byte)` pairs.
pub mod aligned {
    pub const SRC_PORT: (usize, usize) = (0, 0);
    pub const DST_PORT: (usize, usize) = (0, 2);
    pub const LEN: (usize, usize) = (0, 4);
    pub const CSUM: (usize, usize) = (0, 6);
}

/// What the application learns about a received datagram.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct UdpRxMeta {
    pub pair: SocketPair,
    /// Payload length, in bytes, as claimed by the UDP header.
    pub len: u16,
}
