// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Simulated memory protection unit

use core::cell::{Cell, RefCell};
use std::vec::Vec;

use crate::error::{HalError, HalResult};
use crate::traits::{Access, AccessLevel, HardwareAccessControl, RegionId};

/// Number of regions provided by the simulated unit
pub const SIM_REGION_COUNT: usize = 8;

/// One programmed region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgrammedRegion {
    /// Base address
    pub base: u32,
    /// Size in bytes
    pub size: u32,
    /// Rights
    pub access: Access,
}

impl ProgrammedRegion {
    const fn contains(&self, address: u32) -> bool {
        address >= self.base && (address - self.base) < self.size
    }
}

/// Simulated MPU
///
/// Shared by reference: `&SimMpu` implements [`HardwareAccessControl`] so the
/// guard can own a handle while tests inspect the same unit.
#[derive(Debug, Default)]
pub struct SimMpu {
    programmed: RefCell<[Option<ProgrammedRegion>; SIM_REGION_COUNT]>,
    effective: RefCell<[Option<ProgrammedRegion>; SIM_REGION_COUNT]>,
    history: RefCell<Vec<(RegionId, Access)>>,
    syncs: Cell<u32>,
}

impl SimMpu {
    /// Create a unit with every region disabled
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective configuration of a region
    #[must_use]
    pub fn region(&self, region: RegionId) -> Option<ProgrammedRegion> {
        self.effective.borrow().get(usize::from(region)).copied().flatten()
    }

    /// Number of synchronization barriers executed
    #[must_use]
    pub fn sync_count(&self) -> u32 {
        self.syncs.get()
    }

    /// Every `program_region` call so far, in order
    #[must_use]
    pub fn history(&self) -> Vec<(RegionId, Access)> {
        self.history.borrow().clone()
    }

    /// Forget recorded programming history
    pub fn clear_history(&self) {
        self.history.borrow_mut().clear();
    }

    /// Effective region deciding an address
    ///
    /// Overlapping regions resolve to the highest-numbered one, as on ARMv7-M.
    #[must_use]
    pub fn matching_region(&self, address: u32) -> Option<ProgrammedRegion> {
        self.effective
            .borrow()
            .iter()
            .rev()
            .flatten()
            .find(|r| r.contains(address))
            .copied()
    }

    /// Check if a write at `level` to `address` is allowed
    ///
    /// Addresses outside every region fall back to the default map:
    /// privileged accesses pass, unprivileged ones fault.
    #[must_use]
    pub fn allows_write(&self, address: u32, level: AccessLevel) -> bool {
        match self.matching_region(address) {
            Some(region) => region.access.permission.allows_write(level),
            None => matches!(level, AccessLevel::Privileged),
        }
    }
}

impl HardwareAccessControl for &SimMpu {
    fn program_region(&mut self, region: RegionId, base: u32, size: u32, access: Access) -> HalResult<()> {
        let index = usize::from(region);
        if index >= SIM_REGION_COUNT {
            return Err(HalError::InvalidRegion);
        }
        if size == 0 {
            return Err(HalError::InvalidRegionSize);
        }

        self.programmed.borrow_mut()[index] = Some(ProgrammedRegion { base, size, access });
        self.history.borrow_mut().push((region, access));
        Ok(())
    }

    fn synchronize(&mut self) {
        *self.effective.borrow_mut() = *self.programmed.borrow();
        self.syncs.set(self.syncs.get() + 1);
    }
}
