// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The ICMP engine.
//!
//! Two paths meet at the checksum inserter:
//!
//! * The echo path. The [`checker::IcmpChecksumChecker`] verifies each
//!   incoming message, rewrites an Echo Request into an Echo Reply as
//!   it streams past, and hands the inserter either the reply's
//!   checksum or an instruction to drop it.
//!
//! * The error path. The [`builder::ControlMessageBuilder`] turns
//!   expired and undeliverable datagrams into Time Exceeded and Port
//!   Unreachable messages, and the [`ip_appender::IpHeaderAppender`]
//!   gives each one an IPv4 header.

pub mod builder;
pub mod checker;
pub mod inserter;
pub mod ip_appender;

pub use builder::ControlMessageBuilder;
pub use checker::IcmpChecksumChecker;
pub use inserter::IcmpChecksumInserter;
pub use ip_appender::IpHeaderAppender;

use super::checksum::HeaderChecksum;
use core::fmt;
use core::fmt::Display;
use nts_api::Ipv4Addr;
use serde::Deserialize;
use serde::Serialize;
use smoltcp::wire;

pub const ICMP_HDR_LEN: usize = 8;

/// Bytes of the offending datagram quoted past its IPv4 header.
pub const ICMP_ERR_EXCERPT_LEN: usize = 8;

pub const CODE_TTL_EXCEEDED: u8 = 0;
pub const CODE_PORT_UNREACHABLE: u8 = 3;

/// ICMP field offsets of an IP-aligned stream whose IPv4 header has
/// no options, as `(word, byte)` pairs.
pub mod aligned {
    pub const TYPE: (usize, usize) = (2, 4);
    pub const CODE: (usize, usize) = (2, 5);
    pub const CSUM: (usize, usize) = (2, 6);
}

/// The ICMPv4 message type.
///
/// We wrap smoltcp's Icmpv4Message type so that we may provide a
/// serde implementation. We call this "message type" instead of just
/// "message" because that's what it is: the type field of the larger
/// ICMP message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct MessageType {
    inner: wire::Icmpv4Message,
}

impl MessageType {
    pub const ECHO_REPLY: Self = Self { inner: wire::Icmpv4Message::EchoReply };
    pub const ECHO_REQUEST: Self =
        Self { inner: wire::Icmpv4Message::EchoRequest };
    pub const DST_UNREACHABLE: Self =
        Self { inner: wire::Icmpv4Message::DstUnreachable };
    pub const TIME_EXCEEDED: Self =
        Self { inner: wire::Icmpv4Message::TimeExceeded };
}

impl From<wire::Icmpv4Message> for MessageType {
    fn from(inner: wire::Icmpv4Message) -> Self {
        Self { inner }
    }
}

impl From<MessageType> for wire::Icmpv4Message {
    fn from(mt: MessageType) -> Self {
        mt.inner
    }
}

impl From<MessageType> for u8 {
    fn from(mt: MessageType) -> u8 {
        u8::from(mt.inner)
    }
}

impl From<u8> for MessageType {
    fn from(val: u8) -> Self {
        Self { inner: wire::Icmpv4Message::from(val) }
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

/// The type and code of an Echo Request, as one host-order field.
pub fn echo_request_field() -> u16 {
    u16::from_be_bytes([MessageType::ECHO_REQUEST.into(), 0])
}

/// The type and code of an Echo Reply, as one host-order field.
pub fn echo_reply_field() -> u16 {
    u16::from_be_bytes([MessageType::ECHO_REPLY.into(), 0])
}

/// What the inserter is to do with one message on the echo path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EchoDecision {
    /// Send the reply with this ICMP checksum.
    Forward(HeaderChecksum),
    Drop,
}

/// The ICMP error messages the builder generates.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IcmpError {
    TtlExceeded,
    PortUnreachable,
}

impl IcmpError {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Self::TtlExceeded => MessageType::TIME_EXCEEDED,
            Self::PortUnreachable => MessageType::DST_UNREACHABLE,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::TtlExceeded => CODE_TTL_EXCEEDED,
            Self::PortUnreachable => CODE_PORT_UNREACHABLE,
        }
    }
}

/// What the IP header appender needs to know about an error message
/// before its body arrives.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IcmpErrorMeta {
    /// The source of the offending datagram.
    pub remote: Ipv4Addr,
    /// Total-Length of the outgoing datagram.
    pub total_len: u16,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn message_types() {
        assert_eq!(u8::from(MessageType::ECHO_REQUEST), 8);
        assert_eq!(u8::from(MessageType::ECHO_REPLY), 0);
        assert_eq!(u8::from(IcmpError::PortUnreachable.msg_type()), 3);
        assert_eq!(u8::from(IcmpError::TtlExceeded.msg_type()), 11);
        assert_eq!(MessageType::from(11), MessageType::TIME_EXCEEDED);
        assert_eq!(echo_request_field(), 0x0800);
        assert_eq!(echo_reply_field(), 0x0000);
    }
}
