// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Bounded channels between pipeline stages.

use std::collections::VecDeque;

/// A bounded first-in first-out channel.
///
/// A stage may only write to a channel that is not full and only read
/// from one that is not empty; callers check first and decline to
/// advance otherwise. Writing to a full channel is a scheduling bug.
/// How close a channel has come to filling up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChannelUsage {
    pub name: &'static str,
    pub depth: usize,
    pub high_water: usize,
}

#[derive(Clone, Debug)]
pub struct Fifo<T> {
    name: &'static str,
    depth: usize,
    inner: VecDeque<T>,
    high_water: usize,
}

impl<T> Fifo<T> {
    pub fn new(name: &'static str, depth: usize) -> Self {
        assert!(depth > 0, "channel {name} must have a depth");
        Self {
            name,
            depth,
            inner: VecDeque::with_capacity(depth),
            high_water: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.len() >= self.depth
    }

    /// Report the deepest this channel has ever been.
    pub fn usage(&self) -> ChannelUsage {
        ChannelUsage {
            name: self.name,
            depth: self.depth,
            high_water: self.high_water,
        }
    }

    /// Look at the head of the channel without consuming it.
    pub fn peek(&self) -> Option<&T> {
        self.inner.front()
    }

    pub fn read(&mut self) -> Option<T> {
        self.inner.pop_front()
    }

    /// Write `val` to the tail of the channel.
    ///
    /// # Panics
    ///
    /// If the channel is full.
    pub fn write(&mut self, val: T) {
        assert!(!self.is_full(), "write to full channel {}", self.name);
        self.inner.push_back(val);
        self.high_water = self.high_water.max(self.inner.len());
    }

    /// Room left in the channel.
    pub fn free(&self) -> usize {
        self.depth.saturating_sub(self.inner.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.inner.iter()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.inner.drain(..)
    }
}
