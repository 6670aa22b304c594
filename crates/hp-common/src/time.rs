// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Time utilities for the hotpatch engine
//!
//! Fault timestamps come from a free-running 32-bit cycle counter, so
//! arithmetic on them wraps. Manager waits are accounted in milliseconds.

use core::ops::{Add, AddAssign};

/// Raw value of the free-running cycle counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CycleCount(u32);

impl CycleCount {
    /// Create from a raw counter value
    #[must_use]
    pub const fn new(cycles: u32) -> Self {
        Self(cycles)
    }

    /// Get the raw counter value
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Cycles elapsed between this sample and `now`, assuming at most one wrap
    #[must_use]
    pub const fn elapsed(&self, now: Self) -> u32 {
        now.0.wrapping_sub(self.0)
    }
}

impl From<u32> for CycleCount {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Duration in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Millis(u32);

impl Millis {
    /// Create from milliseconds
    #[must_use]
    pub const fn new(ms: u32) -> Self {
        Self(ms)
    }

    /// Get as milliseconds
    #[must_use]
    pub const fn as_millis(&self) -> u32 {
        self.0
    }

    /// Zero duration
    pub const ZERO: Self = Self(0);
}

impl From<u32> for Millis {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Add for Millis {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Millis {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_count_wraps() {
        let before = CycleCount::new(u32::MAX - 9);
        let after = CycleCount::new(5);
        assert_eq!(before.elapsed(after), 15);
    }

    #[test]
    fn test_millis_saturates() {
        let mut total = Millis::new(u32::MAX - 1);
        total += Millis::new(10);
        assert_eq!(total.as_millis(), u32::MAX);
    }
}
