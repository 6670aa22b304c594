// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Build-time constants for the hotpatch engine
//!
//! These values size every fixed buffer in the engine. Slot count and arena
//! size can be overridden per instance through const generics; the values
//! here are the defaults.

// =============================================================================
// Patch Format
// =============================================================================

/// Size of the wire header preceding patch code
pub const HP_HEADER_SIZE: usize = 16;

/// Maximum accepted patch code size in bytes
pub const HP_MAX_CODE_SIZE: usize = 256;

/// Largest accepted flat patch buffer (header plus code)
pub const HP_MAX_PATCH_SIZE: usize = HP_HEADER_SIZE + HP_MAX_CODE_SIZE;

/// Quarantine buffer capacity
pub const HP_QUARANTINE_SIZE: usize = HP_MAX_PATCH_SIZE;

// =============================================================================
// Slots and Applicator
// =============================================================================

/// Default number of patch slots
pub const HP_SLOT_COUNT: usize = 3;

/// Bytes written to the target by one installation
pub const HP_APPLICATOR_DATA_LENGTH: usize = 8;

/// First identifier handed out; zero is reserved for "no identifier"
pub const HP_FIRST_IDENTIFIER: u32 = 1;

// =============================================================================
// Code Arena
// =============================================================================

/// Bookkeeping header in front of every arena block
pub const CODE_NODE_HEADER_SIZE: usize = 8;

/// Smallest payload worth splitting off as a separate free block
pub const CODE_MIN_SPLIT_SIZE: usize = 8;

/// Allocation granularity of the code arena
pub const CODE_ALIGNMENT: usize = 4;

/// Default arena size: one maximal block plus header per slot, one spare header, 8-byte aligned
pub const CODE_ARENA_SIZE: usize =
    align_up(HP_SLOT_COUNT * (HP_MAX_CODE_SIZE + CODE_NODE_HEADER_SIZE) + CODE_NODE_HEADER_SIZE, 8);

/// Capacity of the allocator's free-block index
pub const MAX_CODE_BLOCKS: usize = 16;

// =============================================================================
// Manager Timing
// =============================================================================

/// Sleep between completion checks once yielding has not been enough
pub const DEFAULT_POLL_INTERVAL_MS: u32 = 10;

/// Yields attempted before falling back to timed sleeps
pub const YIELD_ATTEMPTS_BEFORE_SLEEP: u32 = 4;

/// Round `value` up to a multiple of `align` (power of two)
#[must_use]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_arena_holds_one_max_block_per_slot() {
        assert_eq!(CODE_ARENA_SIZE, 800);
        assert!(CODE_ARENA_SIZE >= HP_SLOT_COUNT * (HP_MAX_CODE_SIZE + CODE_NODE_HEADER_SIZE));
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(5, 4), 8);
        assert_eq!(align_up(8, 8), 8);
    }
}
