// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Providers allow the stack to work in different contexts by
//! allowing various implementations of core services to be plugged
//! into it. For now that is logging: a unit test wants `println!`,
//! the replay tool wants structured output through `slog`.

use core::fmt;
use core::fmt::Display;

/// The set of all platform-specific providers required by the stack.
pub struct Providers {
    pub log: Box<dyn LogProvider>,
}

impl Default for Providers {
    fn default() -> Self {
        Self { log: Box::new(PrintlnLog) }
    }
}

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the stack is running.
///
/// Logging levels are provided by [`LogLevel`]. These levels will map
/// to the underlying provider with varying degrees of success.
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{level_s}")
    }
}

#[derive(Clone, Copy)]
pub struct PrintlnLog;

impl LogProvider for PrintlnLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{level} {msg}");
    }
}

/// Log through a [`slog::Logger`].
#[cfg(feature = "std")]
pub struct SlogLog {
    log: slog::Logger,
}

#[cfg(feature = "std")]
impl SlogLog {
    pub fn new(log: slog::Logger) -> Self {
        Self { log }
    }
}

#[cfg(feature = "std")]
impl LogProvider for SlogLog {
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Note => slog::info!(self.log, "{}", msg),
            LogLevel::Warn => slog::warn!(self.log, "{}", msg),
            LogLevel::Error => slog::error!(self.log, "{}", msg),
        }
    }
}

/// A provider that keeps every message, for tests that assert on what
/// was logged.
#[cfg(test)]
#[derive(Default)]
pub struct CaptureLog {
    pub msgs: std::sync::Mutex<Vec<(LogLevel, String)>>,
}

#[cfg(test)]
impl LogProvider for std::sync::Arc<CaptureLog> {
    fn log(&self, level: LogLevel, msg: &str) {
        self.msgs.lock().unwrap().push((level, msg.to_string()));
    }
}
