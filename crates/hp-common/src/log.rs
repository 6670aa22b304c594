// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Event log for the hotpatch engine
//!
//! A fixed-capacity ring of formatted entries. Formatting goes through
//! `heapless::String`, so logging never allocates and silently truncates
//! long messages. When the ring is full the oldest entry is overwritten
//! and counted in [`LogBuffer::overwritten`].
//!
//! Only the patch manager logs. The guard and fault monitor run inside the
//! context-switch and trap paths and record counters instead.

use core::fmt::{self, Write};
use heapless::String;

/// Maximum log message length
pub const MAX_LOG_MESSAGE_LEN: usize = 96;

/// Log buffer size (number of entries)
pub const LOG_BUFFER_SIZE: usize = 16;

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    /// Internal consistency failures
    Error = 0,
    /// Rejected patches and refused requests
    Warn = 1,
    /// Patch lifecycle events
    Info = 2,
    /// Step-by-step pipeline detail
    Debug = 3,
    /// Very verbose
    Trace = 4,
}

impl LogLevel {
    /// Get a short prefix for the log level
    #[must_use]
    pub const fn prefix(&self) -> char {
        match self {
            Self::Error => 'E',
            Self::Warn => 'W',
            Self::Info => 'I',
            Self::Debug => 'D',
            Self::Trace => 'T',
        }
    }
}

/// Subsystem that produced a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    /// Patch manager pipeline
    Manager,
    /// Slot table
    Slots,
    /// Code arena
    Code,
    /// Applicator context
    Applicator,
    /// Privilege guard
    Guard,
    /// Fault monitor
    Fault,
}

impl Component {
    /// Short tag used in formatted output
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Manager => "mgr",
            Self::Slots => "slot",
            Self::Code => "code",
            Self::Applicator => "appl",
            Self::Guard => "guard",
            Self::Fault => "fault",
        }
    }
}

/// Log entry structure
#[derive(Clone)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Timestamp in scheduler ticks
    pub timestamp: u32,
    /// Originating subsystem
    pub component: Component,
    /// Log message
    pub message: String<MAX_LOG_MESSAGE_LEN>,
}

impl fmt::Debug for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:08X}] {} [{}] {}",
            self.timestamp,
            self.level.prefix(),
            self.component.tag(),
            self.message
        )
    }
}

/// Circular log buffer
pub struct LogBuffer {
    entries: [Option<LogEntry>; LOG_BUFFER_SIZE],
    write_index: usize,
    count: usize,
    overwritten: u32,
    min_level: LogLevel,
}

impl LogBuffer {
    /// Create a new empty log buffer
    #[must_use]
    pub const fn new() -> Self {
        const NONE: Option<LogEntry> = None;
        Self {
            entries: [NONE; LOG_BUFFER_SIZE],
            write_index: 0,
            count: 0,
            overwritten: 0,
            min_level: LogLevel::Info,
        }
    }

    /// Set the minimum log level
    pub fn set_min_level(&mut self, level: LogLevel) {
        self.min_level = level;
    }

    /// Check if a log level should be recorded
    #[must_use]
    pub const fn should_log(&self, level: LogLevel) -> bool {
        (level as u8) <= (self.min_level as u8)
    }

    /// Format and record an entry
    pub fn log(&mut self, level: LogLevel, timestamp: u32, component: Component, args: fmt::Arguments<'_>) {
        if !self.should_log(level) {
            return;
        }

        let mut message = String::<MAX_LOG_MESSAGE_LEN>::new();
        let _ = Truncating(&mut message).write_fmt(args);

        if self.count == LOG_BUFFER_SIZE {
            self.overwritten = self.overwritten.saturating_add(1);
        } else {
            self.count += 1;
        }
        self.entries[self.write_index] = Some(LogEntry {
            level,
            timestamp,
            component,
            message,
        });
        self.write_index = (self.write_index + 1) % LOG_BUFFER_SIZE;
    }

    /// Get the number of entries
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Check if buffer is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of entries lost to wrap-around
    #[must_use]
    pub const fn overwritten(&self) -> u32 {
        self.overwritten
    }

    /// Most recent entry
    #[must_use]
    pub fn last(&self) -> Option<&LogEntry> {
        if self.count == 0 {
            return None;
        }
        let index = (self.write_index + LOG_BUFFER_SIZE - 1) % LOG_BUFFER_SIZE;
        self.entries[index].as_ref()
    }

    /// Clear all entries
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
        self.write_index = 0;
        self.count = 0;
    }

    /// Iterate over entries, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> + '_ {
        let start = if self.count < LOG_BUFFER_SIZE { 0 } else { self.write_index };
        (0..self.count).filter_map(move |i| self.entries[(start + i) % LOG_BUFFER_SIZE].as_ref())
    }
}

/// Writer that keeps whatever fits instead of failing the whole fragment
struct Truncating<'a>(&'a mut String<MAX_LOG_MESSAGE_LEN>);

impl Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Log an error
#[macro_export]
macro_rules! log_error {
    ($buffer:expr, $ts:expr, $component:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Error, $ts, $component, format_args!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($buffer:expr, $ts:expr, $component:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Warn, $ts, $component, format_args!($($arg)*))
    };
}

/// Log an informational message
#[macro_export]
macro_rules! log_info {
    ($buffer:expr, $ts:expr, $component:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Info, $ts, $component, format_args!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($buffer:expr, $ts:expr, $component:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Debug, $ts, $component, format_args!($($arg)*))
    };
}

/// Log a trace-level message
#[macro_export]
macro_rules! log_trace {
    ($buffer:expr, $ts:expr, $component:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Trace, $ts, $component, format_args!($($arg)*))
    };
}
