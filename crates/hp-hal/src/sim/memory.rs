// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Simulated target memory

use core::cell::{Cell, RefCell};
use std::vec;
use std::vec::Vec;

use super::mpu::SimMpu;
use crate::error::{HalError, HalResult};
use crate::traits::{AccessLevel, FaultSource, MemManageStatus, PatchableMemory};

#[derive(Debug)]
struct Window {
    base: u32,
    bytes: Vec<u8>,
}

impl Window {
    fn offset_of(&self, address: u32, len: usize) -> Option<usize> {
        let offset = usize::try_from(address.checked_sub(self.base)?).ok()?;
        (offset.checked_add(len)? <= self.bytes.len()).then_some(offset)
    }
}

/// Byte-addressable memory made of mapped windows, guarded by a [`SimMpu`]
///
/// Reads are never checked. Stores are checked against the MPU at the
/// current access level; a denied store leaves memory untouched, latches a
/// data access violation with the faulting address and returns
/// [`HalError::AccessDenied`].
#[derive(Debug)]
pub struct SimMemory<'m> {
    mpu: &'m SimMpu,
    windows: RefCell<Vec<Window>>,
    level: Cell<AccessLevel>,
    status: Cell<MemManageStatus>,
    cycles: Cell<u32>,
    stores: Cell<u32>,
}

impl<'m> SimMemory<'m> {
    /// Create memory with no windows mapped
    #[must_use]
    pub fn new(mpu: &'m SimMpu) -> Self {
        Self {
            mpu,
            windows: RefCell::new(Vec::new()),
            level: Cell::new(AccessLevel::Privileged),
            status: Cell::new(MemManageStatus::default()),
            cycles: Cell::new(0),
            stores: Cell::new(0),
        }
    }

    /// Map a zero-filled window of `size` bytes at `base`
    pub fn map(&self, base: u32, size: u32) {
        self.windows.borrow_mut().push(Window {
            base,
            bytes: vec![0; size as usize],
        });
    }

    /// Copy bytes into memory without any protection check
    ///
    /// # Errors
    ///
    /// Returns [`HalError::OutOfBounds`] if the range is not mapped.
    pub fn load(&self, address: u32, bytes: &[u8]) -> HalResult<()> {
        let mut windows = self.windows.borrow_mut();
        let (window, offset) = Self::locate(&mut windows, address, bytes.len())?;
        window.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Read `len` bytes, panicking on unmapped addresses
    #[must_use]
    pub fn peek(&self, address: u32, len: usize) -> Vec<u8> {
        let mut buffer = vec![0; len];
        self.read(address, &mut buffer).unwrap_or_else(|e| panic!("peek at {address:#010X}: {e}"));
        buffer
    }

    /// Set the privilege level used for subsequent stores
    pub fn set_access_level(&self, level: AccessLevel) {
        self.level.set(level);
    }

    /// Store a word at the current access level, as a task would
    ///
    /// # Errors
    ///
    /// Same as [`PatchableMemory::store_halfword`].
    pub fn store_word(&self, address: u32, value: u32) -> HalResult<()> {
        self.store(address, &value.to_le_bytes())
    }

    /// Number of stores that reached memory
    #[must_use]
    pub fn store_count(&self) -> u32 {
        self.stores.get()
    }

    /// Advance the cycle counter
    pub fn advance_cycles(&self, cycles: u32) {
        self.cycles.set(self.cycles.get().wrapping_add(cycles));
    }

    fn locate<'w>(windows: &'w mut [Window], address: u32, len: usize) -> HalResult<(&'w mut Window, usize)> {
        windows
            .iter_mut()
            .find_map(|w| w.offset_of(address, len).map(|offset| (w, offset)))
            .ok_or(HalError::OutOfBounds)
    }

    fn store(&self, address: u32, bytes: &[u8]) -> HalResult<()> {
        self.advance_cycles(1);

        let mut windows = self.windows.borrow_mut();
        let (window, offset) = Self::locate(&mut windows, address, bytes.len())?;

        let level = self.level.get();
        if let Some(denied) = (address..address + bytes.len() as u32).find(|&a| !self.mpu.allows_write(a, level)) {
            self.status.set(MemManageStatus {
                data_access_violation: true,
                instruction_access_violation: false,
                address_valid: true,
                fault_address: denied,
            });
            return Err(HalError::AccessDenied);
        }

        window.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.stores.set(self.stores.get() + 1);
        Ok(())
    }
}

impl PatchableMemory for SimMemory<'_> {
    fn read(&self, address: u32, buffer: &mut [u8]) -> HalResult<()> {
        let mut windows = self.windows.borrow_mut();
        let (window, offset) = Self::locate(&mut windows, address, buffer.len())?;
        buffer.copy_from_slice(&window.bytes[offset..offset + buffer.len()]);
        Ok(())
    }

    fn store_halfword(&self, address: u32, value: u16) -> HalResult<()> {
        if address % 2 != 0 {
            return Err(HalError::MisalignedAccess);
        }
        self.store(address, &value.to_le_bytes())
    }
}

impl FaultSource for SimMemory<'_> {
    fn memmanage_status(&self) -> MemManageStatus {
        self.status.get()
    }

    fn clear_memmanage_status(&self) {
        self.status.set(MemManageStatus::default());
    }

    fn read_instruction(&self, address: u32) -> u16 {
        let mut halfword = [0u8; 2];
        match self.read(address, &mut halfword) {
            Ok(()) => u16::from_le_bytes(halfword),
            Err(_) => 0,
        }
    }

    fn cycle_count(&self) -> u32 {
        self.cycles.get()
    }
}
