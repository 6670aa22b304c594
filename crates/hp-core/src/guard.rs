// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Privilege guard
//!
//! Context-switch hook that widens memory rights only while the manager task
//! runs. Four regions are guarded:
//!
//! | Region   | MPU # | Granted      | Revoked          |
//! |----------|-------|--------------|------------------|
//! | code     | 4     | read/write   | read-only        |
//! | firmware | 5     | read/write   | read-only        |
//! | context  | 6     | read/write   | read-only, XN    |
//! | metadata | 7     | read/write   | read-only, XN    |
//!
//! Firmware is only ever granted for the duration of one installation,
//! inside the switch-in path, and revoked again before the manager resumes.
//!
//! The hook runs in the scheduler's switch path: it never blocks, never
//! logs and reports programming failures through [`GuardStats`] only.

use hp_common::config::{AddressRange, MemoryLayout};
use hp_common::Result;
use hp_hal::{Access, ContextSwitchHook, HardwareAccessControl, PatchableMemory, RegionId};

use crate::applicator::ApplicatorContext;

/// MPU region guarding the code arena
pub const REGION_CODE: RegionId = 4;
/// MPU region guarding the patchable firmware
pub const REGION_FIRMWARE: RegionId = 5;
/// MPU region guarding the applicator context
pub const REGION_CONTEXT: RegionId = 6;
/// MPU region guarding the slot table and quarantine
pub const REGION_METADATA: RegionId = 7;

/// One guarded region and its two rights states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardRegion {
    /// MPU region number
    pub id: RegionId,
    /// Covered addresses
    pub range: AddressRange,
    /// Rights while the manager runs
    pub granted: Access,
    /// Rights otherwise
    pub revoked: Access,
}

impl GuardRegion {
    const fn executable(id: RegionId, range: AddressRange) -> Self {
        Self {
            id,
            range,
            granted: Access::READ_WRITE,
            revoked: Access::READ_ONLY,
        }
    }

    const fn data(id: RegionId, range: AddressRange) -> Self {
        Self {
            id,
            range,
            granted: Access::READ_WRITE.no_execute(),
            revoked: Access::READ_ONLY.no_execute(),
        }
    }
}

/// The four guarded regions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardRegions {
    /// Code arena
    pub code: GuardRegion,
    /// Patchable firmware
    pub firmware: GuardRegion,
    /// Applicator context
    pub context: GuardRegion,
    /// Slot table and quarantine
    pub metadata: GuardRegion,
}

impl GuardRegions {
    /// Derive the region table from a memory layout
    #[must_use]
    pub const fn from_layout(layout: &MemoryLayout) -> Self {
        Self {
            code: GuardRegion::executable(REGION_CODE, layout.code),
            firmware: GuardRegion::executable(REGION_FIRMWARE, layout.firmware),
            context: GuardRegion::data(REGION_CONTEXT, layout.context),
            metadata: GuardRegion::data(REGION_METADATA, layout.metadata),
        }
    }

    /// All regions, in MPU number order
    #[must_use]
    pub const fn all(&self) -> [GuardRegion; 4] {
        [self.code, self.firmware, self.context, self.metadata]
    }
}

/// Guard counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardStats {
    /// Switches into the manager task
    pub entries: u32,
    /// Switches out of the manager task
    pub exits: u32,
    /// Installations performed
    pub installs: u32,
    /// Region programming calls the hardware refused
    pub programming_failures: u32,
}

/// Context-switch guard for the manager task
pub struct PrivilegeGuard<'a, H, M: ?Sized> {
    hw: H,
    regions: GuardRegions,
    applicator: &'a ApplicatorContext,
    memory: &'a M,
    stats: GuardStats,
}

impl<'a, H, M> PrivilegeGuard<'a, H, M>
where
    H: HardwareAccessControl,
    M: PatchableMemory + ?Sized,
{
    /// Create a guard for `layout`
    pub fn new(hw: H, layout: &MemoryLayout, applicator: &'a ApplicatorContext, memory: &'a M) -> Self {
        Self {
            hw,
            regions: GuardRegions::from_layout(layout),
            applicator,
            memory,
            stats: GuardStats::default(),
        }
    }

    /// Program every guarded region with its revoked rights
    ///
    /// Called once at boot before the scheduler starts. Unlike the switch
    /// path, failures here are reported to the caller.
    ///
    /// # Errors
    ///
    /// [`hp_common::Error::RegionProgrammingFailed`] if a region is rejected.
    pub fn install_baseline(&mut self) -> Result<()> {
        for region in self.regions.all() {
            self.hw
                .program_region(region.id, region.range.start, region.range.size(), region.revoked)?;
        }
        self.hw.synchronize();
        Ok(())
    }

    /// Manager task is about to run
    pub fn on_enter_manager(&mut self) {
        self.stats.entries = self.stats.entries.wrapping_add(1);
        self.grant(self.regions.context);

        if self.applicator.is_scheduled() {
            self.grant(self.regions.firmware);
            self.hw.synchronize();
            self.applicator.apply(self.memory);
            self.revoke(self.regions.firmware);
            self.stats.installs = self.stats.installs.wrapping_add(1);
        }

        self.grant(self.regions.metadata);
        self.grant(self.regions.code);
        self.hw.synchronize();
    }

    /// Manager task was switched out
    pub fn on_leave_manager(&mut self) {
        self.stats.exits = self.stats.exits.wrapping_add(1);
        self.revoke(self.regions.context);
        self.revoke(self.regions.metadata);
        self.revoke(self.regions.code);
        self.hw.synchronize();
    }

    /// Guard counters
    #[must_use]
    pub const fn stats(&self) -> GuardStats {
        self.stats
    }

    /// Guarded region table
    #[must_use]
    pub const fn regions(&self) -> &GuardRegions {
        &self.regions
    }

    fn grant(&mut self, region: GuardRegion) {
        self.program(region, region.granted);
    }

    fn revoke(&mut self, region: GuardRegion) {
        self.program(region, region.revoked);
    }

    fn program(&mut self, region: GuardRegion, access: Access) {
        if self
            .hw
            .program_region(region.id, region.range.start, region.range.size(), access)
            .is_err()
        {
            self.stats.programming_failures = self.stats.programming_failures.wrapping_add(1);
        }
    }
}

impl<H, M> ContextSwitchHook for PrivilegeGuard<'_, H, M>
where
    H: HardwareAccessControl,
    M: PatchableMemory + ?Sized,
{
    fn on_context_switch(&mut self, entering_manager: bool, leaving_manager: bool) {
        match (entering_manager, leaving_manager) {
            (true, false) => self.on_enter_manager(),
            (false, true) => self.on_leave_manager(),
            _ => {}
        }
    }
}
