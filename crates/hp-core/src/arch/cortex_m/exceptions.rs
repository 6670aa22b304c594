// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! ARM Cortex-M MemManage handling
//!
//! `MemManage_Handler` hands the stacked exception frame to the installed
//! [`FaultMonitor`]. Faults the monitor absorbs return straight to the
//! faulting task with its PC advanced; everything else goes to the forward
//! handler, which by default parks the core.
//!
//! # Fault Analysis
//!
//! The MemManage Fault Status Register (low byte of CFSR) says whether the
//! fault was a data access and whether MMFAR holds the address. Both must be
//! set for the monitor to consider a fault.

use core::arch::global_asm;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use hp_hal::{FaultSource, MemManageStatus};

use super::scb;
use crate::fault::{ExceptionFrame, FaultDisposition, FaultMonitor};

// ============================================================================
// Fault Status Source
// ============================================================================

/// MemManage status read from the System Control Block
pub struct ScbFaultSource;

impl FaultSource for ScbFaultSource {
    fn memmanage_status(&self) -> MemManageStatus {
        // SAFETY: CFSR and MMFAR are architecturally defined SCB registers;
        // reading them has no side effects.
        let (cfsr, mmfar) = unsafe {
            (
                ptr::read_volatile(scb::CFSR as *const u32),
                ptr::read_volatile(scb::MMFAR as *const u32),
            )
        };

        MemManageStatus {
            data_access_violation: cfsr & scb::MMFSR_DACCVIOL != 0,
            instruction_access_violation: cfsr & scb::MMFSR_IACCVIOL != 0,
            address_valid: cfsr & scb::MMFSR_MMARVALID != 0,
            fault_address: mmfar,
        }
    }

    fn clear_memmanage_status(&self) {
        // SAFETY: CFSR bits are write-one-to-clear; writing only the MMFSR
        // byte leaves bus and usage fault status untouched.
        unsafe {
            ptr::write_volatile(scb::CFSR as *mut u32, scb::MMFSR_MASK);
        }
    }

    fn read_instruction(&self, address: u32) -> u16 {
        // SAFETY: `address` is the stacked PC of the faulting task, which
        // points at executable memory the task was just running from.
        unsafe { ptr::read_volatile((address & !1) as *const u16) }
    }

    fn cycle_count(&self) -> u32 {
        // SAFETY: DWT CYCCNT is a read-only view of the cycle counter. It
        // reads zero if the DWT is not enabled.
        unsafe { ptr::read_volatile(super::DWT_CYCCNT as *const u32) }
    }
}

// ============================================================================
// Handler Registration
// ============================================================================

/// Type for the handler of faults the monitor does not absorb
pub type ForwardHandlerFn = fn(&ExceptionFrame);

/// Installed monitor, null until [`install_fault_monitor`] runs
static MONITOR: AtomicPtr<FaultMonitor> = AtomicPtr::new(ptr::null_mut());

/// Forward handler
static mut FORWARD_HANDLER: Option<ForwardHandlerFn> = None;

/// Route MemManage faults to `monitor` and enable the MemManage exception
pub fn install_fault_monitor(monitor: &'static FaultMonitor) {
    MONITOR.store((monitor as *const FaultMonitor).cast_mut(), Ordering::Release);
    enable_memmanage_fault();
}

/// Set the handler for faults the monitor does not absorb
///
/// # Safety
/// Must be called before enabling interrupts
pub unsafe fn set_forward_handler(handler: ForwardHandlerFn) {
    FORWARD_HANDLER = Some(handler);
}

/// Default policy for unabsorbed faults: park the core
fn default_forward_handler(_frame: &ExceptionFrame) {
    loop {
        super::wfi();
    }
}

/// Enable MemManage as its own exception instead of escalating to HardFault
fn enable_memmanage_fault() {
    // SAFETY: SHCSR is an architecturally defined SCB register; setting
    // MEMFAULTENA is a read-modify-write of a single enable bit.
    unsafe {
        let shcsr = ptr::read_volatile(scb::SHCSR as *const u32);
        ptr::write_volatile(scb::SHCSR as *mut u32, shcsr | scb::SHCSR_MEMFAULTENA);
    }

    super::dsb();
    super::isb();
}

// ============================================================================
// Exception Handler
// ============================================================================

// MemManage Fault handler (using global_asm! for stable Rust)
//
// Passes the active stack's frame pointer to the Rust handler and returns
// through the saved EXC_RETURN, so an absorbed fault resumes the task at
// the adjusted PC.
global_asm!(
    ".syntax unified",
    ".thumb",
    ".section .text.MemManage_Handler",
    ".global MemManage_Handler",
    ".type MemManage_Handler, %function",
    ".thumb_func",
    "MemManage_Handler:",
    "    tst lr, #4",
    "    ite eq",
    "    mrseq r0, msp",
    "    mrsne r0, psp",
    "    push {{r4, lr}}",
    "    bl hp_memmanage_handler",
    "    pop {{r4, pc}}",
    ".size MemManage_Handler, . - MemManage_Handler",
);

#[no_mangle]
extern "C" fn hp_memmanage_handler(frame: *mut ExceptionFrame) {
    // SAFETY: The frame pointer comes from the assembly trampoline and points
    // at the hardware-stacked registers of the faulting context, which stay
    // valid and unaliased until exception return.
    let frame = unsafe { &mut *frame };

    let monitor = MONITOR.load(Ordering::Acquire);
    // SAFETY: A non-null pointer was stored from a `&'static FaultMonitor`.
    if let Some(monitor) = unsafe { monitor.as_ref() } {
        if let FaultDisposition::Recovered { .. } = monitor.handle(frame, &ScbFaultSource) {
            return;
        }
    }

    // SAFETY: FORWARD_HANDLER is set once before interrupts are enabled and
    // only read here.
    let forward = unsafe { FORWARD_HANDLER };
    match forward {
        Some(handler) => handler(frame),
        None => default_forward_handler(frame),
    }
}
