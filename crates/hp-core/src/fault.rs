// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Protection fault monitor
//!
//! A data access violation inside one of the guarded regions is the guard
//! doing its job: some task other than the manager tried to write patch
//! state or firmware. The monitor absorbs such faults by stepping the
//! faulting task past the offending store and recording the event. Any
//! other fault is handed back for the platform's default policy.
//!
//! The monitor runs in the trap path. It keeps its diagnostics in atomics,
//! has a single writer and never blocks.

use core::sync::atomic::{AtomicU32, Ordering};

use hp_common::config::{AddressRange, MemoryLayout};
use hp_common::time::CycleCount;
use hp_hal::FaultSource;

/// Registers stacked by hardware on exception entry
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExceptionFrame {
    /// R0
    pub r0: u32,
    /// R1
    pub r1: u32,
    /// R2
    pub r2: u32,
    /// R3
    pub r3: u32,
    /// R12
    pub r12: u32,
    /// Link Register
    pub lr: u32,
    /// Program Counter (faulting instruction)
    pub pc: u32,
    /// Program Status Register
    pub xpsr: u32,
}

/// Width in bytes of the Thumb instruction starting with `first_halfword`
///
/// Halfwords with bits [15:11] of `0b11101`, `0b11110` or `0b11111` open a
/// 32-bit instruction; everything else is 16-bit.
#[must_use]
pub const fn thumb_instruction_width(first_halfword: u16) -> u32 {
    if (first_halfword & 0xF800) >= 0xE800 {
        4
    } else {
        2
    }
}

/// What the trap entry should do after the monitor ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultDisposition {
    /// Absorbed; the frame's PC was advanced by `skipped` bytes
    Recovered {
        /// Bytes skipped
        skipped: u32,
    },
    /// Not a guarded-region fault; apply the default policy
    Forward,
}

/// Point-in-time copy of the fault counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaultSnapshot {
    /// Absorbed faults since boot
    pub count: u32,
    /// Data address of the most recent absorbed fault
    pub last_address: u32,
    /// Instruction address of the most recent absorbed fault
    pub last_pc: u32,
    /// Cycle counter when the most recent absorbed fault was taken
    pub last_cycle: CycleCount,
}

/// Guarded-region fault monitor
pub struct FaultMonitor {
    regions: [AddressRange; 4],
    count: AtomicU32,
    last_address: AtomicU32,
    last_pc: AtomicU32,
    last_cycle: AtomicU32,
}

impl FaultMonitor {
    /// Create a monitor for the guarded regions of `layout`
    #[must_use]
    pub const fn new(layout: &MemoryLayout) -> Self {
        Self {
            regions: layout.guarded_regions(),
            count: AtomicU32::new(0),
            last_address: AtomicU32::new(0),
            last_pc: AtomicU32::new(0),
            last_cycle: AtomicU32::new(0),
        }
    }

    /// Check if `address` lies in a guarded region
    #[must_use]
    pub fn is_guarded(&self, address: u32) -> bool {
        self.regions.iter().any(|r| r.contains(address))
    }

    /// Handle a memory-management fault taken with `frame` stacked
    pub fn handle<S: FaultSource + ?Sized>(&self, frame: &mut ExceptionFrame, source: &S) -> FaultDisposition {
        let status = source.memmanage_status();
        let Some(address) = status.data_fault_address() else {
            return FaultDisposition::Forward;
        };
        if !self.is_guarded(address) {
            return FaultDisposition::Forward;
        }

        let skipped = thumb_instruction_width(source.read_instruction(frame.pc));

        self.count
            .store(self.count.load(Ordering::Relaxed).wrapping_add(1), Ordering::Relaxed);
        self.last_address.store(address, Ordering::Relaxed);
        self.last_pc.store(frame.pc, Ordering::Relaxed);
        self.last_cycle.store(source.cycle_count(), Ordering::Release);

        frame.pc = frame.pc.wrapping_add(skipped);
        source.clear_memmanage_status();

        FaultDisposition::Recovered { skipped }
    }

    /// Current counters
    #[must_use]
    pub fn diagnostics(&self) -> FaultSnapshot {
        let last_cycle = CycleCount::new(self.last_cycle.load(Ordering::Acquire));
        FaultSnapshot {
            count: self.count.load(Ordering::Relaxed),
            last_address: self.last_address.load(Ordering::Relaxed),
            last_pc: self.last_pc.load(Ordering::Relaxed),
            last_cycle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use hp_hal::MemManageStatus;

    struct FakeScb {
        status: Cell<MemManageStatus>,
        instruction: u16,
        cycles: u32,
    }

    impl FakeScb {
        fn data_fault(address: u32, instruction: u16) -> Self {
            Self {
                status: Cell::new(MemManageStatus {
                    data_access_violation: true,
                    instruction_access_violation: false,
                    address_valid: true,
                    fault_address: address,
                }),
                instruction,
                cycles: 4242,
            }
        }
    }

    impl FaultSource for FakeScb {
        fn memmanage_status(&self) -> MemManageStatus {
            self.status.get()
        }
        fn clear_memmanage_status(&self) {
            self.status.set(MemManageStatus::default());
        }
        fn read_instruction(&self, _address: u32) -> u16 {
            self.instruction
        }
        fn cycle_count(&self) -> u32 {
            self.cycles
        }
    }

    const LAYOUT: MemoryLayout = MemoryLayout::NRF52840;

    #[test]
    fn test_instruction_width_decoding() {
        assert_eq!(thumb_instruction_width(0x6008), 2); // str r0, [r1]
        assert_eq!(thumb_instruction_width(0xE7FE), 2); // b .
        assert_eq!(thumb_instruction_width(0xE800), 4);
        assert_eq!(thumb_instruction_width(0xF8C1), 4); // str.w
        assert_eq!(thumb_instruction_width(0xFFFF), 4);
    }

    #[test]
    fn test_guarded_fault_skips_16_bit_store() {
        let monitor = FaultMonitor::new(&LAYOUT);
        let scb = FakeScb::data_fault(LAYOUT.metadata.start + 0x10, 0x6008);
        let mut frame = ExceptionFrame {
            pc: 0x0000_1000,
            ..ExceptionFrame::default()
        };

        assert_eq!(monitor.handle(&mut frame, &scb), FaultDisposition::Recovered { skipped: 2 });
        assert_eq!(frame.pc, 0x0000_1002);
        assert_eq!(scb.memmanage_status(), MemManageStatus::default());

        let snapshot = monitor.diagnostics();
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.last_address, LAYOUT.metadata.start + 0x10);
        assert_eq!(snapshot.last_pc, 0x0000_1000);
        assert_eq!(snapshot.last_cycle, CycleCount::new(4242));
    }

    #[test]
    fn test_guarded_fault_skips_32_bit_store() {
        let monitor = FaultMonitor::new(&LAYOUT);
        let scb = FakeScb::data_fault(LAYOUT.code.start, 0xF8C1);
        let mut frame = ExceptionFrame {
            pc: 0x0000_2000,
            ..ExceptionFrame::default()
        };

        assert_eq!(monitor.handle(&mut frame, &scb), FaultDisposition::Recovered { skipped: 4 });
        assert_eq!(frame.pc, 0x0000_2004);
    }

    #[test]
    fn test_unguarded_fault_forwarded_untouched() {
        let monitor = FaultMonitor::new(&LAYOUT);
        let scb = FakeScb::data_fault(0x2003_0000, 0x6008);
        let mut frame = ExceptionFrame {
            pc: 0x0000_1000,
            ..ExceptionFrame::default()
        };

        assert_eq!(monitor.handle(&mut frame, &scb), FaultDisposition::Forward);
        assert_eq!(frame.pc, 0x0000_1000);
        assert!(scb.memmanage_status().data_access_violation);
        assert_eq!(monitor.diagnostics().count, 0);
    }

    #[test]
    fn test_fault_without_valid_address_forwarded() {
        let monitor = FaultMonitor::new(&LAYOUT);
        let scb = FakeScb::data_fault(LAYOUT.context.start, 0x6008);
        scb.status.set(MemManageStatus {
            address_valid: false,
            ..scb.status.get()
        });
        let mut frame = ExceptionFrame::default();

        assert_eq!(monitor.handle(&mut frame, &scb), FaultDisposition::Forward);
    }
}
