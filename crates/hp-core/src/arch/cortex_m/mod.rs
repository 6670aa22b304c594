// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! ARM Cortex-M architecture support
//!
//! - MPU region programming for the privilege guard
//! - Volatile halfword stores for the applicator
//! - MemManage trap entry routed to the fault monitor

pub mod mpu;

#[cfg(target_arch = "arm")]
pub mod exceptions;
#[cfg(target_arch = "arm")]
pub mod memory;

// ============================================================================
// Cortex-M Core Register Addresses
// ============================================================================

/// System Control Block (SCB) base address
pub const SCB_BASE: u32 = 0xE000_ED00;

/// SCB registers
pub mod scb {
    /// System Handler Control and State Register
    pub const SHCSR: u32 = super::SCB_BASE + 0x24;
    /// Configurable Fault Status Register (MMFSR is the low byte)
    pub const CFSR: u32 = super::SCB_BASE + 0x28;
    /// MemManage Fault Address Register
    pub const MMFAR: u32 = super::SCB_BASE + 0x34;

    /// SHCSR bit: MemManage exception enabled
    pub const SHCSR_MEMFAULTENA: u32 = 1 << 16;

    /// MMFSR bit: instruction access violation
    pub const MMFSR_IACCVIOL: u32 = 1 << 0;
    /// MMFSR bit: data access violation
    pub const MMFSR_DACCVIOL: u32 = 1 << 1;
    /// MMFSR bit: MMFAR holds a valid address
    pub const MMFSR_MMARVALID: u32 = 1 << 7;
    /// All MMFSR bits, write-one-to-clear
    pub const MMFSR_MASK: u32 = 0xFF;
}

/// DWT cycle counter
pub const DWT_CYCCNT: u32 = 0xE000_1004;

// ============================================================================
// Core Functions
// ============================================================================

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        use core::arch::asm;

        /// Data Synchronization Barrier
        #[inline]
        pub fn dsb() {
            // SAFETY: DSB SY is always safe. It ensures all outstanding memory
            // transactions complete before the next instruction.
            unsafe {
                asm!("dsb sy", options(nomem, nostack));
            }
        }

        /// Instruction Synchronization Barrier
        #[inline]
        pub fn isb() {
            // SAFETY: ISB SY is always safe. It flushes the pipeline so new MPU
            // settings apply to the next instruction fetched.
            unsafe {
                asm!("isb sy", options(nomem, nostack));
            }
        }

        /// Disable interrupts and return previous state
        #[inline]
        pub fn disable_interrupts_save() -> u32 {
            let primask: u32;
            // SAFETY: MRS saves PRIMASK, then CPSID I masks interrupts. Both are
            // standard instructions in privileged mode; the value is handed back
            // to restore_interrupts().
            unsafe {
                asm!(
                    "mrs {}, PRIMASK",
                    "cpsid i",
                    out(reg) primask,
                    options(nomem, nostack)
                );
            }
            primask
        }

        /// Restore interrupt state
        #[inline]
        pub fn restore_interrupts(primask: u32) {
            // SAFETY: MSR restores a PRIMASK value previously obtained from
            // disable_interrupts_save().
            unsafe {
                asm!("msr PRIMASK, {}", in(reg) primask, options(nomem, nostack));
            }
        }

        /// Wait for interrupt
        #[inline]
        pub fn wfi() {
            // SAFETY: WFI is always safe; it halts the core until an interrupt.
            unsafe {
                asm!("wfi", options(nomem, nostack));
            }
        }
    } else {
        use core::sync::atomic::{fence, Ordering};

        /// Data Synchronization Barrier (host: full fence)
        #[inline]
        pub fn dsb() {
            fence(Ordering::SeqCst);
        }

        /// Instruction Synchronization Barrier (host: full fence)
        #[inline]
        pub fn isb() {
            fence(Ordering::SeqCst);
        }
    }
}

/// Run `f` with interrupts masked
#[cfg(target_arch = "arm")]
#[inline]
pub fn interrupt_free<R>(f: impl FnOnce() -> R) -> R {
    let primask = disable_interrupts_save();
    let result = f();
    restore_interrupts(primask);
    result
}
