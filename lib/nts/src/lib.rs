// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The receive side of a network transport stack for a hardware
//! offload engine.
//!
//! Ethernet frames go in as a stream of 64-bit [`engine::Word`]s. The
//! stack filters them by MAC address, validates and demultiplexes the
//! IPv4 datagrams they carry, answers Echo Requests, reports expired
//! TTLs and closed UDP ports over ICMP, and delivers UDP payloads to
//! the application. ARP and TCP traffic is passed through untouched.
//! [`engine::RxStack`] ties it all together.

#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub use nts_api as api;

#[cfg(feature = "std")]
pub mod dat;
pub mod engine;
#[cfg(feature = "std")]
pub mod print;
pub mod provider;
