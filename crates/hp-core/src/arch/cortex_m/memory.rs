// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Direct access to patchable memory

use core::ptr;

use hp_common::config::AddressRange;
use hp_hal::{HalError, HalResult, PatchableMemory};

/// Volatile reads and halfword stores within one address window
///
/// The window is the patchable firmware region. Whether a store succeeds is
/// decided by the MPU, not by this type; a store the MPU refuses raises a
/// MemManage fault and is reported as [`HalError::AccessDenied`].
pub struct DirectMemory {
    window: AddressRange,
}

impl DirectMemory {
    /// Access `window`
    ///
    /// # Safety
    ///
    /// `window` must be RAM that nothing else treats as a Rust object.
    #[must_use]
    pub const unsafe fn new(window: AddressRange) -> Self {
        Self { window }
    }
}

impl PatchableMemory for DirectMemory {
    fn read(&self, address: u32, buffer: &mut [u8]) -> HalResult<()> {
        let len = u32::try_from(buffer.len()).map_err(|_| HalError::OutOfBounds)?;
        if !self.window.contains_span(address, len) {
            return Err(HalError::OutOfBounds);
        }
        for (offset, byte) in (address..).zip(buffer.iter_mut()) {
            // SAFETY: The address lies inside the window the caller vouched
            // for in `new`, and byte reads have no alignment requirement.
            *byte = unsafe { ptr::read_volatile(offset as *const u8) };
        }
        Ok(())
    }

    fn store_halfword(&self, address: u32, value: u16) -> HalResult<()> {
        if address % 2 != 0 {
            return Err(HalError::MisalignedAccess);
        }
        if !self.window.contains_span(address, 2) {
            return Err(HalError::OutOfBounds);
        }
        // SAFETY: Aligned address inside the window the caller vouched for.
        // The store is volatile so it is neither merged nor reordered across
        // the barriers the guard issues around it.
        let landed = unsafe {
            ptr::write_volatile(address as *mut u16, value);
            ptr::read_volatile(address as *const u16)
        };

        // A refused store in a guarded region is absorbed by the fault
        // monitor and skipped, so only the read-back tells it apart.
        if landed == value {
            Ok(())
        } else {
            Err(HalError::AccessDenied)
        }
    }
}
