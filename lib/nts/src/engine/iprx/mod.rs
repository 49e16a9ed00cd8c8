// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The IPv4 receive pipeline.
//!
//! Ingress frames flow through these stages in order:
//!
//! ```text
//!  MacProtocolDemux ──arp──▶
//!        │ipv4
//!  DatagramLengthFilter
//!        │
//!  Ipv4ChecksumValidator ──sums──▶ FinalChecksumCombiner
//!        │                                │verdict
//!  InvalidPacketDropper ◀─────────────────┘
//!        │
//!  CutLength
//!        │
//!  L4ProtocolDemux ──▶ {ttl expired, icmp, udp, tcp}
//! ```
//!
//! Up to the validator streams are Ethernet-framed; from the validator
//! on they are IP-aligned.

pub mod csum_validator;
pub mod cut_length;
pub mod dropper;
pub mod l4_demux;
pub mod length_filter;
pub mod mac_demux;

pub use csum_validator::FinalChecksumCombiner;
pub use csum_validator::Ipv4ChecksumValidator;
pub use cut_length::CutLength;
pub use dropper::InvalidPacketDropper;
pub use l4_demux::L4Channels;
pub use l4_demux::L4ProtocolDemux;
pub use length_filter::DatagramLengthFilter;
pub use mac_demux::MacProtocolDemux;
