// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Integration tests for hp-core
//!
//! The full pipeline on the host: a simulated MPU and memory, the privilege
//! guard driven by a simulated scheduler, and the patch manager running as
//! the privileged task.

use hp_common::config::{ManagerConfig, MemoryLayout};
use hp_common::constants::HP_MAX_PATCH_SIZE;
use hp_core::guard::REGION_FIRMWARE;
use hp_core::{
    ApplicatorContext, CodeAllocator, PatchImage, PatchManager, PatchStorage, PatchType, PrivilegeGuard, Quarantine,
    SlotTable,
};
use hp_hal::sim::{SimMemory, SimMpu, SimTaskControl};

const LAYOUT: MemoryLayout = MemoryLayout::NRF52840;

/// Wire up a booted system: baseline protection installed, manager running
///
/// The long form swaps in another access-control backend and wraps the
/// guard before it reaches the scheduler.
macro_rules! boot {
    ($mpu:ident, $memory:ident, $applicator:ident, $task:ident, $manager:ident) => {
        boot!($mpu, $memory, $applicator, $task, $manager, hw: &$mpu, hook: ::core::convert::identity);
    };
    ($mpu:ident, $memory:ident, $applicator:ident, $task:ident, $manager:ident, hw: $hw:expr, hook: $hook:expr) => {
        let $mpu = SimMpu::new();
        let $memory = SimMemory::new(&$mpu);
        $memory.map(LAYOUT.firmware.start, LAYOUT.firmware.size());
        $memory.map(LAYOUT.metadata.start, LAYOUT.metadata.size());
        let $applicator = ApplicatorContext::new();
        let $task = SimTaskControl::new(($hook)(PrivilegeGuard::new($hw, &LAYOUT, &$applicator, &$memory)));

        let mut slots = SlotTable::new();
        let mut code = CodeAllocator::new();
        let mut quarantine = Quarantine::new();
        let storage = PatchStorage {
            slots: &mut slots,
            code: &mut code,
            quarantine: &mut quarantine,
        };
        #[allow(unused_mut)]
        let mut $manager: PatchManager<'_, _, _> =
            PatchManager::new(ManagerConfig::DEFAULT, storage, &$applicator, &$memory, &$task);
        $manager.init().unwrap();
        $task.hook_mut().install_baseline().unwrap();
        $task.switch_in();
    };
}

/// Build a patch buffer
fn image(patch_type: PatchType, target: u32, code: &[u8]) -> ([u8; HP_MAX_PATCH_SIZE], usize) {
    let mut buffer = [0u8; HP_MAX_PATCH_SIZE];
    let len = PatchImage::encode(patch_type, target, code, &mut buffer).unwrap();
    (buffer, len)
}

const ORIGINAL: [u8; 8] = [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7];

mod submit_tests {
    use super::*;
    use hp_core::{encode_branch_trampoline, SlotStatus};

    #[test]
    fn test_replacement_installed_and_tail_preserved() {
        boot!(mpu, memory, applicator, task, manager);
        let target = LAYOUT.firmware.start + 0x100;
        memory.load(target, &ORIGINAL).unwrap();
        assert_eq!(manager.free_slot_count(), 3);

        let (buffer, len) = image(PatchType::Replacement, target, &[1, 2, 3, 4]);
        let id = manager.submit(&buffer[..len]).unwrap();

        assert_eq!(manager.free_slot_count(), 2);
        assert_eq!(memory.peek(target, 8), [1, 2, 3, 4, 0xA4, 0xA5, 0xA6, 0xA7]);
        let slot = manager.slots().find_by_identifier(id).unwrap();
        assert_eq!(slot.status(), SlotStatus::Active);
        assert_eq!(slot.original_bytes(), &ORIGINAL);
        assert_eq!(applicator.generation(), 1);
        assert_eq!(task.hook().stats().installs, 1);
    }

    #[test]
    fn test_redirect_installs_trampoline_to_staged_code() {
        boot!(mpu, memory, applicator, task, manager);
        let target = LAYOUT.firmware.start + 0x42;
        let body = [0x70, 0x47, 0x00, 0xBF, 0x00, 0xBF, 0x70, 0x47, 0x00, 0xBF, 0x00, 0xBF];

        let (buffer, len) = image(PatchType::Redirect, target, &body);
        let id = manager.submit(&buffer[..len]).unwrap();

        let header = *manager.slots().find_by_identifier(id).unwrap().header().unwrap();
        assert!(manager.code().contains(header.code_address));
        assert_eq!(&manager.code().block(header.code_address).unwrap()[..body.len()], &body);
        assert_eq!(
            memory.peek(target, 8),
            encode_branch_trampoline(target, header.code_address, true)
        );
    }

    #[test]
    fn test_identifiers_unique_and_increasing() {
        boot!(mpu, memory, applicator, task, manager);

        let mut ids = [None; 3];
        for (i, id) in ids.iter_mut().enumerate() {
            let (buffer, len) = image(PatchType::Replacement, LAYOUT.firmware.start + 0x10 * i as u32, &[0xFF; 2]);
            *id = Some(manager.submit(&buffer[..len]).unwrap());
        }
        assert!(ids[0] < ids[1] && ids[1] < ids[2]);
        assert_eq!(ids[0].map(|id| id.get()), Some(1));
        assert_eq!(manager.stats().applied, 3);
    }

    #[test]
    fn test_await_completes_on_first_switch_in() {
        boot!(mpu, memory, applicator, task, manager);

        let (buffer, len) = image(PatchType::Replacement, LAYOUT.firmware.start, &[1, 2]);
        manager.submit(&buffer[..len]).unwrap();

        assert_eq!(manager.stats().await_iterations, 1);
        assert_eq!(task.yield_count(), 1);
        assert_eq!(task.delay_count(), 0);
    }
}

mod rejection_tests {
    use super::*;
    use hp_common::Error;

    #[test]
    fn test_oversized_buffer_rejected_before_any_allocation() {
        boot!(mpu, memory, applicator, task, manager);
        let free_code = manager.code().free_bytes();

        let oversized = [0u8; HP_MAX_PATCH_SIZE + 1];
        assert_eq!(manager.submit(&oversized), Err(Error::InvalidSize));
        assert_eq!(manager.free_slot_count(), 3);
        assert_eq!(manager.code().free_bytes(), free_code);
    }

    #[test]
    fn test_empty_and_zero_code_rejected() {
        boot!(mpu, memory, applicator, task, manager);

        assert_eq!(manager.submit(&[]), Err(Error::InvalidDataPointer));

        let (mut buffer, _) = image(PatchType::Replacement, LAYOUT.firmware.start, &[1, 2]);
        buffer[8..12].copy_from_slice(&0u32.to_le_bytes());
        assert_eq!(manager.submit(&buffer[..16]), Err(Error::InvalidCodeSize));
        assert_eq!(manager.free_slot_count(), 3);
    }

    #[test]
    fn test_unknown_type_rejected_without_side_effects() {
        boot!(mpu, memory, applicator, task, manager);
        let free_code = manager.code().free_bytes();

        let (mut buffer, len) = image(PatchType::Replacement, LAYOUT.firmware.start, &[1, 2, 3, 4]);
        buffer[..4].copy_from_slice(&5u32.to_le_bytes());

        let err = manager.submit(&buffer[..len]).unwrap_err();
        assert_eq!(err, Error::InvalidType);
        assert!(!err.is_retryable());
        assert_eq!(manager.free_slot_count(), 3);
        assert_eq!(manager.code().free_bytes(), free_code);
    }

    #[test]
    fn test_target_outside_firmware_rejected() {
        boot!(mpu, memory, applicator, task, manager);
        let free_code = manager.code().free_bytes();

        for target in [LAYOUT.firmware.start - 2, LAYOUT.firmware.end, LAYOUT.metadata.start] {
            let (buffer, len) = image(PatchType::Replacement, target, &[1, 2]);
            assert_eq!(manager.submit(&buffer[..len]), Err(Error::InvalidTargetAddress));
        }
        assert_eq!(manager.free_slot_count(), 3);
        assert_eq!(manager.code().free_bytes(), free_code);
        assert_eq!(manager.stats().rejected, 3);
    }

    #[test]
    fn test_duplicate_target_rejected_either_way() {
        boot!(mpu, memory, applicator, task, manager);
        let target = LAYOUT.firmware.start + 0x80;

        // Staged but not yet scheduled
        let (first, len) = image(PatchType::Redirect, target, &[0xAA; 32]);
        manager.receive(&first[..len]).unwrap();
        let free_code = manager.code().free_bytes();

        let (second, len) = image(PatchType::Replacement, target, &[1, 2]);
        assert_eq!(manager.submit(&second[..len]), Err(Error::DuplicateTarget));
        assert_eq!(manager.code().free_bytes(), free_code);

        // Already active
        let first = manager.schedule_next_pending().unwrap();
        manager.await_completion(first).unwrap();
        let (third, len) = image(PatchType::Replacement, target, &[3, 4]);
        assert_eq!(manager.receive(&third[..len]), Err(Error::DuplicateTarget));
        assert_eq!(manager.free_slot_count(), 2);
    }

    #[test]
    fn test_full_table_is_retryable() {
        boot!(mpu, memory, applicator, task, manager);

        for i in 0..3 {
            let (buffer, len) = image(PatchType::Replacement, LAYOUT.firmware.start + 0x20 * i, &[1, 2]);
            manager.submit(&buffer[..len]).unwrap();
        }

        let (buffer, len) = image(PatchType::Replacement, LAYOUT.firmware.start + 0x200, &[1, 2]);
        let err = manager.submit(&buffer[..len]).unwrap_err();
        assert_eq!(err, Error::NoFreeSlots);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_quarantine_erased_after_rejection() {
        boot!(mpu, memory, applicator, task, manager);

        let (buffer, len) = image(PatchType::Replacement, LAYOUT.firmware.end, &[0x5A; 8]);
        assert!(manager.receive(&buffer[..len]).is_err());
        assert!(manager.quarantine().is_empty());
        assert!(manager.quarantine().contents().is_empty());
    }
}

mod scheduling_tests {
    use super::*;
    use hp_common::Error;
    use hp_core::SlotStatus;

    #[test]
    fn test_second_schedule_refused_while_first_in_flight() {
        boot!(mpu, memory, applicator, task, manager);
        let first_target = LAYOUT.firmware.start + 0x10;
        let second_target = LAYOUT.firmware.start + 0x20;

        let (buffer, len) = image(PatchType::Replacement, first_target, &[1, 1]);
        let first = manager.receive(&buffer[..len]).unwrap();
        let (buffer, len) = image(PatchType::Replacement, second_target, &[2, 2]);
        let second = manager.receive(&buffer[..len]).unwrap();

        manager.schedule(first).unwrap();
        assert_eq!(manager.schedule(second), Err(Error::ApplicationPending));

        // First request untouched, second still waiting
        assert_eq!(applicator.entry().map(|e| e.target_address), Some(first_target));
        assert_eq!(manager.slots().find_by_identifier(first).unwrap().status(), SlotStatus::Scheduled);
        assert_eq!(manager.slots().find_by_identifier(second).unwrap().status(), SlotStatus::Pending);
        assert_eq!(manager.stats().scheduling_conflicts, 1);

        manager.await_completion(first).unwrap();
        manager.schedule(second).unwrap();
        manager.await_completion(second).unwrap();
        assert_eq!(memory.peek(second_target, 2), [2, 2]);
    }

    #[test]
    fn test_schedule_requires_pending_slot() {
        boot!(mpu, memory, applicator, task, manager);

        let (buffer, len) = image(PatchType::Replacement, LAYOUT.firmware.start, &[1, 2]);
        let id = manager.submit(&buffer[..len]).unwrap();
        assert_eq!(manager.schedule(id), Err(Error::InvalidSlotState));
        assert_eq!(manager.await_completion(id), Err(Error::InvalidSlotState));
    }

    #[test]
    fn test_revert_restores_original_and_frees_resources() {
        boot!(mpu, memory, applicator, task, manager);
        let target = LAYOUT.firmware.start + 0x300;
        memory.load(target, &ORIGINAL).unwrap();
        let free_code = manager.code().free_bytes();

        let (buffer, len) = image(PatchType::Redirect, target, &[0x70, 0x47, 0x00, 0xBF]);
        let id = manager.submit(&buffer[..len]).unwrap();
        assert_ne!(memory.peek(target, 8), ORIGINAL);

        manager.revert(id).unwrap();
        assert_eq!(memory.peek(target, 8), ORIGINAL);
        assert_eq!(manager.free_slot_count(), 3);
        assert_eq!(manager.code().free_bytes(), free_code);
        assert_eq!(manager.slots().find_by_identifier(id), Err(Error::SlotNotFound));
        assert_eq!(manager.stats().reverted, 1);
        assert_eq!(applicator.generation(), 2);
    }

    #[test]
    fn test_revert_requires_active_patch() {
        boot!(mpu, memory, applicator, task, manager);

        let (buffer, len) = image(PatchType::Replacement, LAYOUT.firmware.start, &[1, 2]);
        let id = manager.receive(&buffer[..len]).unwrap();
        assert_eq!(manager.revert(id), Err(Error::InvalidSlotState));
    }
}

mod install_failure_tests {
    use super::*;
    use hp_common::Error;
    use hp_core::ApplyOutcome;
    use hp_hal::{Access, AccessLevel, HalError, HalResult, HardwareAccessControl, RegionId};

    /// MPU that never lets the firmware region become writable
    struct FirmwareLocked<'a>(&'a SimMpu);

    impl HardwareAccessControl for FirmwareLocked<'_> {
        fn program_region(&mut self, region: RegionId, base: u32, size: u32, access: Access) -> HalResult<()> {
            if region == REGION_FIRMWARE && access.permission.allows_write(AccessLevel::Privileged) {
                return Err(HalError::AccessDenied);
            }
            self.0.program_region(region, base, size, access)
        }

        fn synchronize(&mut self) {
            self.0.synchronize();
        }
    }

    #[test]
    fn test_refused_firmware_grant_fails_install_and_releases_slot() {
        boot!(mpu, memory, applicator, task, manager, hw: FirmwareLocked(&mpu), hook: ::core::convert::identity);
        let target = LAYOUT.firmware.start + 0x180;
        memory.load(target, &ORIGINAL).unwrap();
        let free_code = manager.code().free_bytes();

        let (buffer, len) = image(PatchType::Replacement, target, &[1, 2, 3, 4]);
        assert_eq!(manager.submit(&buffer[..len]), Err(Error::ApplyFailed));

        assert_eq!(applicator.outcome(), ApplyOutcome::Faulted);
        assert!(!applicator.is_scheduled());
        assert_eq!(manager.free_slot_count(), 3);
        assert_eq!(manager.code().free_bytes(), free_code);
        assert_eq!(memory.peek(target, 8), ORIGINAL);
        assert_eq!(task.hook().stats().programming_failures, 1);
        assert_eq!(manager.stats().applied, 0);
    }

    #[test]
    fn test_failed_install_leaves_table_usable() {
        boot!(mpu, memory, applicator, task, manager, hw: FirmwareLocked(&mpu), hook: ::core::convert::identity);

        for i in 0..4 {
            let (buffer, len) = image(PatchType::Replacement, LAYOUT.firmware.start + 0x10 * i, &[1, 2]);
            assert_eq!(manager.submit(&buffer[..len]), Err(Error::ApplyFailed));
        }
        assert_eq!(manager.free_slot_count(), 3);
        assert_eq!(applicator.generation(), 4);
    }
}

mod await_tests {
    use super::*;
    use core::ops::{Deref, DerefMut};
    use hp_common::constants::YIELD_ATTEMPTS_BEFORE_SLEEP;
    use hp_common::time::Millis;
    use hp_core::SlotStatus;
    use hp_hal::ContextSwitchHook;

    /// Keeps the next `held` switch-ins of the manager away from the guard
    struct HeldSwitchIns<G> {
        guard: G,
        held: u32,
    }

    impl<G> HeldSwitchIns<G> {
        fn new(guard: G) -> Self {
            Self { guard, held: 0 }
        }
    }

    impl<G: ContextSwitchHook> ContextSwitchHook for HeldSwitchIns<G> {
        fn on_context_switch(&mut self, entering_manager: bool, leaving_manager: bool) {
            if entering_manager && self.held > 0 {
                self.held -= 1;
                return;
            }
            self.guard.on_context_switch(entering_manager, leaving_manager);
        }
    }

    impl<G> Deref for HeldSwitchIns<G> {
        type Target = G;

        fn deref(&self) -> &G {
            &self.guard
        }
    }

    impl<G> DerefMut for HeldSwitchIns<G> {
        fn deref_mut(&mut self) -> &mut G {
            &mut self.guard
        }
    }

    #[test]
    fn test_await_falls_back_to_bounded_sleeps() {
        boot!(mpu, memory, applicator, task, manager, hw: &mpu, hook: HeldSwitchIns::new);
        let target = LAYOUT.firmware.start + 0x60;
        let poll = ManagerConfig::DEFAULT.poll_interval_ms;

        let (buffer, len) = image(PatchType::Replacement, target, &[9, 8]);
        let id = manager.receive(&buffer[..len]).unwrap();
        manager.schedule(id).unwrap();

        // Every yield plus two sleeps pass without the guard running
        task.hook_mut().held = YIELD_ATTEMPTS_BEFORE_SLEEP + 2;
        manager.await_completion(id).unwrap();

        assert_eq!(task.yield_count(), YIELD_ATTEMPTS_BEFORE_SLEEP);
        assert_eq!(task.delay_count(), 3);
        assert_eq!(task.elapsed_ms(), poll * 3);
        assert_eq!(manager.stats().waited, Millis::new(poll * 3));
        assert_eq!(manager.stats().await_iterations, YIELD_ATTEMPTS_BEFORE_SLEEP + 3);
        assert_eq!(manager.slots().find_by_identifier(id).unwrap().status(), SlotStatus::Active);
        assert_eq!(memory.peek(target, 2), [9, 8]);
    }

    #[test]
    fn test_prompt_install_never_sleeps() {
        boot!(mpu, memory, applicator, task, manager, hw: &mpu, hook: HeldSwitchIns::new);

        let (buffer, len) = image(PatchType::Replacement, LAYOUT.firmware.start, &[1, 2]);
        let id = manager.receive(&buffer[..len]).unwrap();
        manager.schedule(id).unwrap();
        task.hook_mut().held = YIELD_ATTEMPTS_BEFORE_SLEEP - 1;
        manager.await_completion(id).unwrap();

        assert_eq!(task.yield_count(), YIELD_ATTEMPTS_BEFORE_SLEEP);
        assert_eq!(task.delay_count(), 0);
        assert_eq!(manager.stats().waited, Millis::new(0));
    }
}

mod protection_tests {
    use super::*;
    use hp_core::fault::{ExceptionFrame, FaultDisposition};
    use hp_core::FaultMonitor;
    use hp_hal::{AccessLevel, FaultSource, HalError, Permission};

    /// A task's code window with a 32-bit store at its start
    const TASK_CODE: u32 = 0x2001_0000;
    const STR_W: [u8; 4] = [0xC1, 0xF8, 0x00, 0x00];

    #[test]
    fn test_firmware_read_only_once_installed() {
        boot!(mpu, memory, applicator, task, manager);
        let target = LAYOUT.firmware.start + 0x40;

        let (buffer, len) = image(PatchType::Replacement, target, &[1, 2, 3, 4]);
        manager.submit(&buffer[..len]).unwrap();

        assert_eq!(
            mpu.region(REGION_FIRMWARE).map(|r| r.access.permission),
            Some(Permission::ReadOnly)
        );
        assert_eq!(memory.store_word(target, 0), Err(HalError::AccessDenied));
        assert_eq!(memory.peek(target, 4), [1, 2, 3, 4]);
    }

    #[test]
    fn test_task_write_to_slot_table_absorbed() {
        boot!(mpu, memory, applicator, task, manager);
        memory.map(TASK_CODE, 0x100);
        memory.load(TASK_CODE, &STR_W).unwrap();
        let monitor = FaultMonitor::new(&LAYOUT);

        // Some other task runs
        task.switch_out();
        memory.set_access_level(AccessLevel::Unprivileged);

        let slot_word = LAYOUT.metadata.start + 0x10;
        assert_eq!(memory.store_word(slot_word, 0xDEAD_BEEF), Err(HalError::AccessDenied));

        let mut frame = ExceptionFrame {
            pc: TASK_CODE,
            ..ExceptionFrame::default()
        };
        assert_eq!(monitor.handle(&mut frame, &memory), FaultDisposition::Recovered { skipped: 4 });
        assert_eq!(frame.pc, TASK_CODE + 4);
        assert_eq!(memory.peek(slot_word, 4), [0, 0, 0, 0]);
        assert!(!memory.memmanage_status().data_access_violation);

        let snapshot = monitor.diagnostics();
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.last_address, slot_word);
        assert_eq!(snapshot.last_pc, TASK_CODE);
    }

    #[test]
    fn test_fault_outside_guarded_regions_forwarded() {
        boot!(mpu, memory, applicator, task, manager);
        let elsewhere = 0x2002_0000;
        memory.map(elsewhere, 0x100);
        let monitor = FaultMonitor::new(&LAYOUT);

        memory.set_access_level(AccessLevel::Unprivileged);
        assert_eq!(memory.store_word(elsewhere, 1), Err(HalError::AccessDenied));

        let mut frame = ExceptionFrame::default();
        assert_eq!(monitor.handle(&mut frame, &memory), FaultDisposition::Forward);
        assert_eq!(monitor.diagnostics().count, 0);
        assert!(memory.memmanage_status().data_access_violation);
    }

    #[test]
    fn test_manager_regions_writable_only_while_running() {
        boot!(mpu, memory, applicator, task, manager);
        let slot_word = LAYOUT.metadata.start;

        assert!(mpu.allows_write(slot_word, AccessLevel::Unprivileged));
        task.switch_out();
        assert!(!mpu.allows_write(slot_word, AccessLevel::Unprivileged));
        assert!(!mpu.allows_write(LAYOUT.code.start, AccessLevel::Unprivileged));
        assert!(!mpu.allows_write(LAYOUT.context.start, AccessLevel::Unprivileged));
        assert!(!mpu.allows_write(LAYOUT.firmware.start, AccessLevel::Unprivileged));
    }
}
