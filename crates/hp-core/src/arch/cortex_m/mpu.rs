// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! ARM Cortex-M Memory Protection Unit (MPU) backend
//!
//! Programs the ARMv7-M MPU for the privilege guard. Each guarded region is
//! one MPU region, so every region must be a power of two of at least 32
//! bytes and aligned to its own size. The linker script is expected to
//! place the guarded sections accordingly; misplaced regions are rejected
//! rather than rounded.
//!
//! # Region Layout
//!
//! | Region | Purpose              | Granted | Revoked      |
//! |--------|----------------------|---------|--------------|
//! | 0-3    | Platform (untouched) | -       | -            |
//! | 4      | Patch code arena     | RW      | RO           |
//! | 5      | Patchable firmware   | RW      | RO           |
//! | 6      | Applicator context   | RW, XN  | RO, XN       |
//! | 7      | Slot table           | RW, XN  | RO, XN       |
//!
//! All guarded regions use normal, non-cacheable memory (TEX=1, C=0, B=0)
//! so installed patch bytes are in RAM once the barrier completes.

use hp_hal::{Access, HalError, HalResult, Permission, RegionId};

#[cfg(target_arch = "arm")]
use core::ptr;

#[cfg(target_arch = "arm")]
use hp_hal::HardwareAccessControl;

// ============================================================================
// MPU Register Definitions (ARMv7-M)
// ============================================================================

/// MPU base address
#[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
const MPU_BASE: u32 = 0xE000_ED90;

/// MPU Type Register
#[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
const MPU_TYPE: u32 = MPU_BASE;

/// MPU Control Register
#[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
const MPU_CTRL: u32 = MPU_BASE + 0x04;

/// MPU Region Number Register
#[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
const MPU_RNR: u32 = MPU_BASE + 0x08;

/// MPU Region Base Address Register
#[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
const MPU_RBAR: u32 = MPU_BASE + 0x0C;

/// MPU Region Attribute and Size Register
#[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
const MPU_RASR: u32 = MPU_BASE + 0x10;

// MPU_CTRL bits
#[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
const MPU_CTRL_ENABLE: u32 = 1 << 0; // Enable MPU
#[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
const MPU_CTRL_PRIVDEFENA: u32 = 1 << 2; // Default map for privileged access

// MPU_RBAR bits
const MPU_RBAR_VALID: u32 = 1 << 4; // Use REGION field to select region
const MPU_RBAR_REGION_MASK: u32 = 0xF;

// MPU_RASR bits
const MPU_RASR_ENABLE: u32 = 1 << 0;
const MPU_RASR_SIZE_SHIFT: u32 = 1; // Size field (bits 5:1)
const MPU_RASR_B: u32 = 1 << 16; // Bufferable
const MPU_RASR_C: u32 = 1 << 17; // Cacheable
const MPU_RASR_TEX_SHIFT: u32 = 19;
const MPU_RASR_AP_SHIFT: u32 = 24;
const MPU_RASR_XN: u32 = 1 << 28; // Execute never

/// Number of regions on ARMv7-M parts this backend supports
pub const MPU_REGION_COUNT: RegionId = 8;

/// Smallest region the MPU can describe
pub const MPU_MIN_REGION_SIZE: u32 = 32;

/// Normal memory, outer and inner non-cacheable
const NORMAL_NON_CACHEABLE_TEX: u32 = 1;

// ============================================================================
// Register Encoding
// ============================================================================

/// AP field value for a permission
#[must_use]
pub const fn access_permission_bits(permission: Permission) -> u32 {
    match permission {
        Permission::NoAccess => 0b000,
        Permission::PrivilegedReadWrite => 0b001,
        Permission::ReadWrite => 0b011,
        Permission::ReadOnly => 0b110,
    }
}

/// RBAR/RASR pair for one region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionEncoding {
    /// Region Base Address Register value (with VALID and REGION set)
    pub rbar: u32,
    /// Region Attribute and Size Register value
    pub rasr: u32,
}

impl RegionEncoding {
    /// Encode a region
    ///
    /// # Errors
    ///
    /// [`HalError::InvalidRegion`] for a region number the MPU lacks,
    /// [`HalError::InvalidRegionSize`] unless `size` is a power of two of at
    /// least 32 bytes, [`HalError::InvalidAlignment`] unless `base` is
    /// aligned to `size`.
    pub const fn new(region: RegionId, base: u32, size: u32, access: Access) -> HalResult<Self> {
        if region >= MPU_REGION_COUNT {
            return Err(HalError::InvalidRegion);
        }
        if size < MPU_MIN_REGION_SIZE || !size.is_power_of_two() {
            return Err(HalError::InvalidRegionSize);
        }
        if base & (size - 1) != 0 {
            return Err(HalError::InvalidAlignment);
        }

        // SIZE field: region spans 2^(SIZE+1) bytes
        let size_field = size.trailing_zeros() - 1;

        let mut rasr = MPU_RASR_ENABLE
            | (size_field << MPU_RASR_SIZE_SHIFT)
            | (NORMAL_NON_CACHEABLE_TEX << MPU_RASR_TEX_SHIFT)
            | (access_permission_bits(access.permission) << MPU_RASR_AP_SHIFT);
        if access.execute_never {
            rasr |= MPU_RASR_XN;
        }

        Ok(Self {
            rbar: base | MPU_RBAR_VALID | (region as u32 & MPU_RBAR_REGION_MASK),
            rasr,
        })
    }

    /// Check if the region is marked cacheable or bufferable
    #[must_use]
    pub const fn is_cached(&self) -> bool {
        self.rasr & (MPU_RASR_C | MPU_RASR_B) != 0
    }
}

// ============================================================================
// MPU Driver
// ============================================================================

/// ARMv7-M MPU driver
#[cfg(target_arch = "arm")]
pub struct CortexMpu {
    _private: (),
}

#[cfg(target_arch = "arm")]
impl CortexMpu {
    /// Take the MPU
    ///
    /// # Safety
    ///
    /// At most one instance may exist; it is the only writer of the MPU
    /// region registers.
    #[must_use]
    pub const unsafe fn steal() -> Self {
        Self { _private: () }
    }

    /// Number of data regions the MPU reports
    #[must_use]
    pub fn region_count(&self) -> u8 {
        // SAFETY: MPU_TYPE is an architecturally defined read-only register.
        let mpu_type = unsafe { ptr::read_volatile(MPU_TYPE as *const u32) };
        ((mpu_type >> 8) & 0xFF) as u8
    }

    /// Turn the MPU on, keeping the default map for privileged code
    ///
    /// # Errors
    ///
    /// [`HalError::NotInitialized`] if the part has no MPU.
    pub fn enable(&mut self) -> HalResult<()> {
        if self.region_count() < MPU_REGION_COUNT {
            return Err(HalError::NotInitialized);
        }
        // SAFETY: MPU_CTRL is architecturally defined; the barriers below make
        // the new setting visible before the next access.
        unsafe {
            ptr::write_volatile(MPU_CTRL as *mut u32, MPU_CTRL_ENABLE | MPU_CTRL_PRIVDEFENA);
        }
        super::dsb();
        super::isb();
        Ok(())
    }
}

#[cfg(target_arch = "arm")]
impl HardwareAccessControl for CortexMpu {
    fn program_region(&mut self, region: RegionId, base: u32, size: u32, access: Access) -> HalResult<()> {
        let encoding = RegionEncoding::new(region, base, size, access)?;

        // SAFETY: RNR/RBAR/RASR are architecturally defined MPU registers and
        // this driver is their only writer. The sequence is not interruptible
        // so a context switch cannot observe RNR pointing at another region.
        super::interrupt_free(|| unsafe {
            ptr::write_volatile(MPU_RNR as *mut u32, u32::from(region));
            ptr::write_volatile(MPU_RBAR as *mut u32, encoding.rbar);
            ptr::write_volatile(MPU_RASR as *mut u32, encoding.rasr);
        });
        Ok(())
    }

    fn synchronize(&mut self) {
        super::dsb();
        super::isb();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_region_encoding() {
        // 4KB at 0x2000_8000, region 5, read-only
        let enc = RegionEncoding::new(5, 0x2000_8000, 0x1000, Access::READ_ONLY).unwrap();
        assert_eq!(enc.rbar, 0x2000_8000 | 0x10 | 5);
        // SIZE = 11, TEX = 1, AP = 0b110
        assert_eq!(enc.rasr, 1 | (11 << 1) | (1 << 19) | (0b110 << 24));
        assert!(!enc.is_cached());
    }

    #[test]
    fn test_execute_never_and_read_write() {
        let enc = RegionEncoding::new(6, 0x2000_C000, 32, Access::READ_WRITE.no_execute()).unwrap();
        assert_eq!((enc.rasr >> 1) & 0x1F, 4);
        assert_eq!((enc.rasr >> 24) & 0x7, 0b011);
        assert_ne!(enc.rasr & (1 << 28), 0);
    }

    #[test]
    fn test_rejects_unencodable_regions() {
        assert_eq!(
            RegionEncoding::new(8, 0x2000_0000, 32, Access::READ_ONLY),
            Err(HalError::InvalidRegion)
        );
        assert_eq!(
            RegionEncoding::new(4, 0x2000_0000, 16, Access::READ_ONLY),
            Err(HalError::InvalidRegionSize)
        );
        assert_eq!(
            RegionEncoding::new(4, 0x2000_0000, 0x300, Access::READ_ONLY),
            Err(HalError::InvalidRegionSize)
        );
        assert_eq!(
            RegionEncoding::new(4, 0x2000_0100, 0x400, Access::READ_ONLY),
            Err(HalError::InvalidAlignment)
        );
    }

    #[test]
    fn test_reference_layout_encodes() {
        let layout = hp_common::MemoryLayout::NRF52840;
        for (id, range) in (4..).zip(layout.guarded_regions()) {
            assert!(RegionEncoding::new(id, range.start, range.size(), Access::READ_ONLY).is_ok());
        }
    }

    #[test]
    fn test_permission_bits() {
        assert_eq!(access_permission_bits(Permission::NoAccess), 0);
        assert_eq!(access_permission_bits(Permission::PrivilegedReadWrite), 1);
    }
}
