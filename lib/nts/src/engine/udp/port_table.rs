// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The table of listening UDP ports.

use std::sync::Mutex;
use std::sync::MutexGuard;

const PORT_WORDS: usize = (u16::MAX as usize + 1) / 64;

/// One bit per UDP port.
///
/// The table is shared between the receive path, which only looks
/// ports up, and whoever opens and closes them. A single mutex
/// serializes every access, so a lookup always sees the latest
/// completed `listen()` or `close()`.
#[derive(Debug)]
pub struct PortTable {
    bits: Mutex<Box<[u64; PORT_WORDS]>>,
}

impl Default for PortTable {
    fn default() -> Self {
        Self { bits: Mutex::new(Box::new([0; PORT_WORDS])) }
    }
}

#[inline]
fn slot(port: u16) -> (usize, u64) {
    (port as usize / 64, 1 << (port % 64))
}

impl PortTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Box<[u64; PORT_WORDS]>> {
        // A panic while holding the lock cannot leave a bitmap
        // half-written.
        self.bits.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open `port`. Port 0 cannot be opened.
    pub fn listen(&self, port: u16) -> bool {
        if port == 0 {
            return false;
        }

        let (idx, bit) = slot(port);
        self.lock()[idx] |= bit;
        true
    }

    /// Close `port`, returning whether it was open.
    pub fn close(&self, port: u16) -> bool {
        let (idx, bit) = slot(port);
        let mut bits = self.lock();
        let was_open = bits[idx] & bit != 0;
        bits[idx] &= !bit;
        was_open
    }

    pub fn is_open(&self, port: u16) -> bool {
        let (idx, bit) = slot(port);
        self.lock()[idx] & bit != 0
    }

    /// The open ports, in ascending order.
    pub fn open_ports(&self) -> Vec<u16> {
        let bits = self.lock();
        (0..=u16::MAX)
            .filter(|&p| {
                let (idx, bit) = slot(p);
                bits[idx] & bit != 0
            })
            .collect()
    }
}
