// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Error types for the hotpatch engine
//!
//! This module defines the unified error type returned by every fallible
//! hotpatch operation. Errors are `Copy`, carry no heap data and map to a
//! stable 16-bit code so they can be reported over a debug link unchanged.
//!
//! Protection faults are never turned into an [`Error`]. They are absorbed by
//! the fault monitor and only show up in its diagnostics.

use core::fmt;

/// Result type alias for hotpatch operations
pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the hotpatch engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Malformed Input Errors (0x01xx)
    // =========================================================================
    /// Patch buffer is empty or absent
    InvalidDataPointer,
    /// Buffer length is zero, too short for a header, or larger than the quarantine
    InvalidSize,
    /// Declared code size is zero or above the configured maximum
    InvalidCodeSize,
    /// Declared code size does not match the bytes following the header
    CodeSizeMismatch,
    /// Header type field is not a known patch type
    InvalidType,
    /// Target address is outside the patchable region or misaligned
    InvalidTargetAddress,
    /// Another live patch already targets the same address
    DuplicateTarget,
    /// Replacement code does not fit in the applicator payload
    DataSizeMismatch,

    // =========================================================================
    // Capacity Errors (0x02xx)
    // =========================================================================
    /// Every slot is in use
    NoFreeSlots,
    /// Code arena cannot satisfy the allocation
    NoFreeCode,
    /// An installation is already outstanding in the applicator context
    ApplicationPending,

    // =========================================================================
    // Internal Consistency Errors (0x03xx)
    // =========================================================================
    /// No slot carries the requested identifier
    SlotNotFound,
    /// Slot is not in the state required by the operation
    InvalidSlotState,
    /// Slot index is out of range
    InvalidSlotIndex,
    /// Code address was not produced by the allocator
    InvalidCodePointer,
    /// No slot is waiting to be scheduled
    NoPendingHotpatch,
    /// Identifier is reserved or could not be assigned
    InvalidIdentifier,
    /// Installation ran but the applicator reported a failed store
    ApplyFailed,
    /// Memory layout is inconsistent
    InvalidConfiguration,

    // =========================================================================
    // Hardware Errors (0x04xx)
    // =========================================================================
    /// Protection region could not be programmed
    RegionProgrammingFailed,
    /// Patchable memory could not be read or written
    MemoryAccessFailed,
}

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The submitted patch is wrong and will never be accepted as-is
    Malformed,
    /// Resources are exhausted; the same patch may succeed later
    Capacity,
    /// Engine state is inconsistent with the request
    Internal,
    /// Underlying hardware refused the operation
    Hardware,
}

impl Error {
    /// Get the numeric error code
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            // Malformed input (0x01xx)
            Self::InvalidDataPointer => 0x0101,
            Self::InvalidSize => 0x0103,
            Self::InvalidCodeSize => 0x0104,
            Self::CodeSizeMismatch => 0x0105,
            Self::InvalidType => 0x0106,
            Self::InvalidTargetAddress => 0x0107,
            Self::DuplicateTarget => 0x0108,
            Self::DataSizeMismatch => 0x0109,

            // Capacity (0x02xx)
            Self::NoFreeSlots => 0x0201,
            Self::NoFreeCode => 0x0202,
            Self::ApplicationPending => 0x0203,

            // Internal (0x03xx)
            Self::SlotNotFound => 0x0301,
            Self::InvalidSlotState => 0x0302,
            Self::InvalidSlotIndex => 0x0303,
            Self::InvalidCodePointer => 0x0304,
            Self::NoPendingHotpatch => 0x0305,
            Self::InvalidIdentifier => 0x0306,
            Self::ApplyFailed => 0x0307,
            Self::InvalidConfiguration => 0x0308,

            // Hardware (0x04xx)
            Self::RegionProgrammingFailed => 0x0401,
            Self::MemoryAccessFailed => 0x0402,
        }
    }

    /// Classify the error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self.code() >> 8 {
            0x01 => ErrorKind::Malformed,
            0x02 => ErrorKind::Capacity,
            0x04 => ErrorKind::Hardware,
            _ => ErrorKind::Internal,
        }
    }

    /// Check whether resubmitting the same patch later can succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Capacity)
    }

    /// Get a short description of the error
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::InvalidDataPointer => "invalid data pointer",
            Self::InvalidSize => "invalid size",
            Self::InvalidCodeSize => "invalid code size",
            Self::CodeSizeMismatch => "code size mismatch",
            Self::InvalidType => "invalid patch type",
            Self::InvalidTargetAddress => "invalid target address",
            Self::DuplicateTarget => "duplicate target",
            Self::DataSizeMismatch => "data size mismatch",
            Self::NoFreeSlots => "no free slots",
            Self::NoFreeCode => "no free code memory",
            Self::ApplicationPending => "application pending",
            Self::SlotNotFound => "slot not found",
            Self::InvalidSlotState => "invalid slot state",
            Self::InvalidSlotIndex => "invalid slot index",
            Self::InvalidCodePointer => "invalid code pointer",
            Self::NoPendingHotpatch => "no pending hotpatch",
            Self::InvalidIdentifier => "invalid identifier",
            Self::ApplyFailed => "apply failed",
            Self::InvalidConfiguration => "invalid configuration",
            Self::RegionProgrammingFailed => "region programming failed",
            Self::MemoryAccessFailed => "memory access failed",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:04X}] {}", self.code(), self.description())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "[0x{:04X}] {}", self.code(), self.description());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_follows_code_category() {
        assert_eq!(Error::InvalidType.kind(), ErrorKind::Malformed);
        assert_eq!(Error::DuplicateTarget.kind(), ErrorKind::Malformed);
        assert_eq!(Error::NoFreeCode.kind(), ErrorKind::Capacity);
        assert_eq!(Error::SlotNotFound.kind(), ErrorKind::Internal);
        assert_eq!(Error::RegionProgrammingFailed.kind(), ErrorKind::Hardware);
    }

    #[test]
    fn test_only_capacity_is_retryable() {
        assert!(Error::NoFreeSlots.is_retryable());
        assert!(Error::ApplicationPending.is_retryable());
        assert!(!Error::InvalidSize.is_retryable());
        assert!(!Error::InvalidSlotState.is_retryable());
    }
}
