// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! HAL error types

use core::fmt;

/// HAL error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// Protection unit not present or not initialized
    NotInitialized,
    /// Region number beyond what the protection unit provides
    InvalidRegion,
    /// Region size is not a supported power of two
    InvalidRegionSize,
    /// Region base is not aligned to its size
    InvalidAlignment,
    /// Address is not mapped
    OutOfBounds,
    /// Access refused by the protection unit
    AccessDenied,
    /// Store address is not halfword aligned
    MisalignedAccess,
}

impl HalError {
    /// Get error code
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::NotInitialized => 0x0801,
            Self::InvalidRegion => 0x0810,
            Self::InvalidRegionSize => 0x0811,
            Self::InvalidAlignment => 0x0812,
            Self::OutOfBounds => 0x0820,
            Self::AccessDenied => 0x0821,
            Self::MisalignedAccess => 0x0822,
        }
    }

    /// Get error description
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not initialized",
            Self::InvalidRegion => "invalid region number",
            Self::InvalidRegionSize => "invalid region size",
            Self::InvalidAlignment => "region base not aligned to size",
            Self::OutOfBounds => "address out of bounds",
            Self::AccessDenied => "access denied",
            Self::MisalignedAccess => "misaligned access",
        }
    }

    /// Check if the error came from region programming rather than a data access
    #[must_use]
    pub const fn is_region_error(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized | Self::InvalidRegion | Self::InvalidRegionSize | Self::InvalidAlignment
        )
    }
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:04X}] {}", self.code(), self.description())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for HalError {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "[0x{:04X}] {}", self.code(), self.description());
    }
}

impl From<HalError> for hp_common::Error {
    fn from(e: HalError) -> Self {
        if e.is_region_error() {
            Self::RegionProgrammingFailed
        } else {
            Self::MemoryAccessFailed
        }
    }
}

/// HAL Result type
pub type HalResult<T> = Result<T, HalError>;
