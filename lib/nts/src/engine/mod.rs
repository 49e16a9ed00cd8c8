// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The receive engine.
//!
//! Every stage is a state machine advanced by `try_step()`, which
//! moves at most one word (or one side-channel record) and reports
//! whether it made progress. Stages are connected by bounded
//! [`fifo::Fifo`] channels and scheduled by [`pipeline::RxStack`].
pub mod checksum;
pub mod ether;
pub mod fifo;
pub mod icmp;
pub mod ip4;
pub mod iprx;
pub mod pipeline;
pub mod stat;
pub mod udp;
pub mod word;

pub use pipeline::PushError;
pub use pipeline::RxStack;
pub use stat::RxStats;
pub use word::Word;
