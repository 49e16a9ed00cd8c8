// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Types shared between the NTS receive stack and its consumers: the
//! management plane that configures it and the applications that
//! drain it.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub mod cfg;
pub mod ip;
pub mod mac;

pub use cfg::*;
pub use ip::*;
pub use mac::*;
