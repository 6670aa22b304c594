// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Hotpatch engine configuration
//!
//! The memory layout is fixed at link time: the linker script places the
//! patchable functions, slot table, code arena and applicator context in
//! dedicated sections, and the integrator mirrors those addresses here.
//! Nothing in this module changes at runtime.

use crate::constants::DEFAULT_POLL_INTERVAL_MS;
use crate::errors::{Error, Result};
use crate::log::LogLevel;

/// Half-open address range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange {
    /// First address in the range
    pub start: u32,
    /// One past the last address
    pub end: u32,
}

impl AddressRange {
    /// Create a range from its bounds
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Create a range from a base address and a size
    #[must_use]
    pub const fn from_base_size(base: u32, size: u32) -> Self {
        Self {
            start: base,
            end: base.saturating_add(size),
        }
    }

    /// Size in bytes
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// Check if the range is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Check if a single address lies inside the range
    #[must_use]
    pub const fn contains(&self, address: u32) -> bool {
        address >= self.start && address < self.end
    }

    /// Check if `len` bytes starting at `address` lie entirely inside the range
    #[must_use]
    pub const fn contains_span(&self, address: u32, len: u32) -> bool {
        match address.checked_add(len) {
            Some(end) => address >= self.start && end <= self.end,
            None => false,
        }
    }

    /// Check if `other` lies entirely inside this range
    #[must_use]
    pub const fn encloses(&self, other: &Self) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// Check if two ranges share at least one address
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Addresses of every region the engine touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    /// Patchable function region; the only place patches may target
    pub firmware: AddressRange,
    /// Slot table and quarantine buffer
    pub metadata: AddressRange,
    /// Patch code arena
    pub code: AddressRange,
    /// Applicator context
    pub context: AddressRange,
    /// Staging buffer for incoming patches; must lie inside `metadata`
    pub quarantine: AddressRange,
}

impl MemoryLayout {
    /// nRF52840 reference layout (256KB RAM, power-of-two aligned regions)
    pub const NRF52840: Self = Self {
        firmware: AddressRange::from_base_size(0x2000_8000, 0x1000), // 4KB
        metadata: AddressRange::from_base_size(0x2000_A000, 0x800), // 2KB
        code: AddressRange::from_base_size(0x2000_B000, 0x400), // 1KB
        context: AddressRange::from_base_size(0x2000_C000, 0x20), // 32B
        quarantine: AddressRange::from_base_size(0x2000_A400, 0x110),
    };

    /// Check that the layout is usable
    ///
    /// Every region must be non-empty, the four guarded regions must not
    /// overlap each other, and the quarantine must sit inside the metadata
    /// region so it shares that region's protection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] on any violation.
    pub fn validate(&self) -> Result<()> {
        let guarded = self.guarded_regions();

        if guarded.iter().any(AddressRange::is_empty) || self.quarantine.is_empty() {
            return Err(Error::InvalidConfiguration);
        }

        for (i, a) in guarded.iter().enumerate() {
            if guarded[i + 1..].iter().any(|b| a.overlaps(b)) {
                return Err(Error::InvalidConfiguration);
            }
        }

        if !self.metadata.encloses(&self.quarantine) {
            return Err(Error::InvalidConfiguration);
        }

        Ok(())
    }

    /// The four regions reprogrammed on context switches
    ///
    /// Stray writes into any of them are the faults the engine absorbs.
    #[must_use]
    pub const fn guarded_regions(&self) -> [AddressRange; 4] {
        [self.code, self.firmware, self.context, self.metadata]
    }
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::NRF52840
    }
}

/// Patch manager configuration
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Memory layout
    pub layout: MemoryLayout,
    /// Sleep between completion checks after yielding gives up
    pub poll_interval_ms: u32,
    /// Minimum level recorded in the manager log
    pub log_level: LogLevel,
}

impl ManagerConfig {
    /// Default configuration
    pub const DEFAULT: Self = Self {
        layout: MemoryLayout::NRF52840,
        poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        log_level: LogLevel::Info,
    };

    /// Default timing with a custom layout
    #[must_use]
    pub const fn with_layout(layout: MemoryLayout) -> Self {
        Self {
            layout,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            log_level: LogLevel::Info,
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
