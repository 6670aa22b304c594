// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! HAL trait definitions
//!
//! The hotpatch engine never touches hardware directly. It reaches the
//! protection unit, patchable memory, the scheduler and the fault status
//! registers through the traits in this module, so the same core logic runs
//! on a Cortex-M target and against the host simulator.

use crate::error::HalResult;

/// Protection region number
pub type RegionId = u8;

/// Access rights for a protection region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// No access from any privilege level
    NoAccess,
    /// Privileged read/write, unprivileged none
    PrivilegedReadWrite,
    /// Read-only from every privilege level
    ReadOnly,
    /// Read/write from every privilege level
    ReadWrite,
}

impl Permission {
    /// Check if a write at `level` is allowed
    #[must_use]
    pub const fn allows_write(&self, level: AccessLevel) -> bool {
        match self {
            Self::ReadWrite => true,
            Self::PrivilegedReadWrite => matches!(level, AccessLevel::Privileged),
            Self::ReadOnly | Self::NoAccess => false,
        }
    }

    /// Check if a read at `level` is allowed
    #[must_use]
    pub const fn allows_read(&self, level: AccessLevel) -> bool {
        match self {
            Self::ReadWrite | Self::ReadOnly => true,
            Self::PrivilegedReadWrite => matches!(level, AccessLevel::Privileged),
            Self::NoAccess => false,
        }
    }
}

/// Permission plus execute-never flag, as programmed into one region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Access {
    /// Read/write rights
    pub permission: Permission,
    /// Instruction fetches fault when set
    pub execute_never: bool,
}

impl Access {
    /// Read-only, executable
    pub const READ_ONLY: Self = Self {
        permission: Permission::ReadOnly,
        execute_never: false,
    };

    /// Read/write, executable
    pub const READ_WRITE: Self = Self {
        permission: Permission::ReadWrite,
        execute_never: false,
    };

    /// Same rights with instruction fetch disabled
    #[must_use]
    pub const fn no_execute(self) -> Self {
        Self {
            permission: self.permission,
            execute_never: true,
        }
    }
}

/// Privilege level of a memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessLevel {
    /// Handler mode or privileged thread
    Privileged,
    /// Unprivileged thread
    Unprivileged,
}

/// Latched memory-management fault status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemManageStatus {
    /// A data access violated region permissions
    pub data_access_violation: bool,
    /// An instruction fetch violated region permissions
    pub instruction_access_violation: bool,
    /// `fault_address` holds the faulting data address
    pub address_valid: bool,
    /// Faulting data address (meaningful only when `address_valid`)
    pub fault_address: u32,
}

impl MemManageStatus {
    /// Faulting data address, if the hardware latched one
    #[must_use]
    pub const fn data_fault_address(&self) -> Option<u32> {
        if self.data_access_violation && self.address_valid {
            Some(self.fault_address)
        } else {
            None
        }
    }
}

/// Memory protection unit interface
///
/// Programming a region does not take effect until [`synchronize`] runs.
///
/// [`synchronize`]: HardwareAccessControl::synchronize
pub trait HardwareAccessControl {
    /// Program one region with its base, size and rights
    ///
    /// # Errors
    ///
    /// Returns an error if the region number, size or alignment is not
    /// supported by the unit.
    fn program_region(&mut self, region: RegionId, base: u32, size: u32, access: Access) -> HalResult<()>;

    /// Make previously programmed regions visible to the next instruction
    fn synchronize(&mut self);
}

/// Memory holding patch targets
///
/// Stores go through `&self` because the target is live firmware memory
/// shared with the rest of the system.
pub trait PatchableMemory {
    /// Read bytes starting at `address`
    ///
    /// # Errors
    ///
    /// Returns an error if the range is not mapped or not readable.
    fn read(&self, address: u32, buffer: &mut [u8]) -> HalResult<()>;

    /// Store one halfword at a halfword-aligned address
    ///
    /// # Errors
    ///
    /// Returns an error if the address is unmapped, misaligned or
    /// write-protected.
    fn store_halfword(&self, address: u32, value: u16) -> HalResult<()>;
}

/// Scheduler services used by the manager task
pub trait TaskControl {
    /// Give up the CPU; returns once this task is switched back in
    fn yield_now(&self);

    /// Sleep for at least `ms` milliseconds
    fn delay_ms(&self, ms: u32);

    /// Run `f` with interrupts masked
    fn critical_section<R>(&self, f: impl FnOnce() -> R) -> R;

    /// Scheduler tick counter, used for log timestamps
    fn ticks(&self) -> u32;
}

/// Memory-management fault status registers
pub trait FaultSource {
    /// Read the latched fault status
    fn memmanage_status(&self) -> MemManageStatus;

    /// Clear the latched fault status
    fn clear_memmanage_status(&self);

    /// Read the first halfword of the instruction at `address`
    fn read_instruction(&self, address: u32) -> u16;

    /// Free-running cycle counter
    fn cycle_count(&self) -> u32;
}

/// Called by the scheduler on every context switch
pub trait ContextSwitchHook {
    /// `entering_manager` is true when the next task is the privileged manager,
    /// `leaving_manager` when the previous task was
    fn on_context_switch(&mut self, entering_manager: bool, leaving_manager: bool);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_matrix() {
        assert!(Permission::ReadWrite.allows_write(AccessLevel::Unprivileged));
        assert!(Permission::PrivilegedReadWrite.allows_write(AccessLevel::Privileged));
        assert!(!Permission::PrivilegedReadWrite.allows_write(AccessLevel::Unprivileged));
        assert!(!Permission::ReadOnly.allows_write(AccessLevel::Privileged));
        assert!(Permission::ReadOnly.allows_read(AccessLevel::Unprivileged));
        assert!(!Permission::NoAccess.allows_read(AccessLevel::Privileged));
    }

    #[test]
    fn test_fault_address_requires_valid_flag() {
        let status = MemManageStatus {
            data_access_violation: true,
            fault_address: 0x2000_A000,
            ..MemManageStatus::default()
        };
        assert_eq!(status.data_fault_address(), None);

        let status = MemManageStatus {
            address_valid: true,
            ..status
        };
        assert_eq!(status.data_fault_address(), Some(0x2000_A000));
    }
}
