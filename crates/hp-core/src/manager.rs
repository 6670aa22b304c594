// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Patch manager
//!
//! Runs in the privileged manager task and owns the whole patch pipeline:
//!
//! ```text
//! receive:   size check -> quarantine copy -> validate -> stage -> erase
//! schedule:  read original bytes -> build payload -> slot Scheduled -> applicator Active
//! await:     yield / sleep until the guard has installed the payload -> slot Active
//! ```
//!
//! `submit` chains all three. The installation itself never happens here;
//! it happens in the privilege guard on the manager task's next switch-in,
//! which is why awaiting starts with plain yields.
//!
//! The slot table, code arena and quarantine are borrowed for the manager's
//! lifetime. On target they are statics placed in the guarded metadata and
//! code regions by the linker script.

use hp_common::config::ManagerConfig;
use hp_common::constants::{
    CODE_ARENA_SIZE, HP_APPLICATOR_DATA_LENGTH, HP_SLOT_COUNT, YIELD_ATTEMPTS_BEFORE_SLEEP,
};
use hp_common::log::{Component, LogBuffer};
use hp_common::time::Millis;
use hp_common::{log_error, log_info, log_warn};
use hp_common::{Error, Result};
use hp_hal::{PatchableMemory, TaskControl};

use crate::applicator::{ApplicatorContext, ApplicatorEntry, ApplyOutcome};
use crate::code::CodeAllocator;
use crate::header::{PatchHeader, PatchType};
use crate::quarantine::Quarantine;
use crate::slot::{PatchId, SlotStatus, SlotTable};
use crate::trampoline::encode_branch_trampoline;

/// Cortex-M only executes Thumb code
const THUMB_TARGET: bool = true;

/// Guarded storage the manager works on
pub struct PatchStorage<'a, const N: usize = HP_SLOT_COUNT, const A: usize = CODE_ARENA_SIZE> {
    /// Slot table
    pub slots: &'a mut SlotTable<N>,
    /// Code arena
    pub code: &'a mut CodeAllocator<A>,
    /// Incoming patch buffer
    pub quarantine: &'a mut Quarantine,
}

/// Manager counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Buffers passed to `receive`
    pub received: u32,
    /// Buffers rejected during receive
    pub rejected: u32,
    /// Patches that reached `Active`
    pub applied: u32,
    /// Patches reverted
    pub reverted: u32,
    /// Schedule attempts refused because an install was in flight
    pub scheduling_conflicts: u32,
    /// Completion checks performed while waiting
    pub await_iterations: u32,
    /// Time spent sleeping while waiting
    pub waited: Millis,
}

/// Live-patch manager
pub struct PatchManager<'a, T, M, const N: usize = HP_SLOT_COUNT, const A: usize = CODE_ARENA_SIZE>
where
    M: ?Sized,
{
    config: ManagerConfig,
    slots: &'a mut SlotTable<N>,
    code: &'a mut CodeAllocator<A>,
    quarantine: &'a mut Quarantine,
    applicator: &'a ApplicatorContext,
    memory: &'a M,
    task: &'a T,
    log: LogBuffer,
    stats: ManagerStats,
}

impl<'a, T, M, const N: usize, const A: usize> PatchManager<'a, T, M, N, A>
where
    T: TaskControl,
    M: PatchableMemory + ?Sized,
{
    /// Create a manager over `storage`
    ///
    /// `applicator` and `memory` must be the same instances handed to the
    /// privilege guard.
    pub fn new(
        config: ManagerConfig,
        storage: PatchStorage<'a, N, A>,
        applicator: &'a ApplicatorContext,
        memory: &'a M,
        task: &'a T,
    ) -> Self {
        let mut log = LogBuffer::new();
        log.set_min_level(config.log_level);

        Self {
            config,
            slots: storage.slots,
            code: storage.code,
            quarantine: storage.quarantine,
            applicator,
            memory,
            task,
            log,
            stats: ManagerStats::default(),
        }
    }

    /// Reset all patch state
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if the layout is inconsistent or the
    /// code region cannot hold the arena.
    pub fn init(&mut self) -> Result<()> {
        let layout = self.config.layout;
        layout.validate()?;
        if (layout.code.size() as usize) < A {
            return Err(Error::InvalidConfiguration);
        }

        self.slots.init();
        self.code.init(layout.code.start);
        self.quarantine.erase();
        self.applicator.init();

        log_info!(
            self.log,
            self.task.ticks(),
            Component::Manager,
            "ready: {} slots, {} code bytes",
            N,
            self.code.free_bytes()
        );
        Ok(())
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    /// Copy, validate and stage a flat `header || code` buffer
    ///
    /// The quarantine is wiped before returning, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Any malformed-input error, or [`Error::NoFreeSlots`] /
    /// [`Error::NoFreeCode`] when capacity is exhausted.
    pub fn receive(&mut self, data: &[u8]) -> Result<PatchId> {
        self.stats.received = self.stats.received.wrapping_add(1);

        let staged = self.quarantine_and_stage(data);
        self.quarantine.erase();

        let now = self.task.ticks();
        match staged {
            Ok(id) => {
                log_info!(self.log, now, Component::Manager, "patch {} staged", id);
                Ok(id)
            }
            Err(e) => {
                self.stats.rejected = self.stats.rejected.wrapping_add(1);
                log_warn!(self.log, now, Component::Manager, "patch rejected: {}", e);
                Err(e)
            }
        }
    }

    /// Build the install payload for a pending patch and hand it to the
    /// applicator
    ///
    /// On failure the slot stays `Pending`.
    ///
    /// # Errors
    ///
    /// [`Error::ApplicationPending`] while another install is in flight,
    /// [`Error::SlotNotFound`], [`Error::InvalidSlotState`] if the slot is
    /// not pending, [`Error::DataSizeMismatch`] for a replacement larger
    /// than the payload.
    pub fn schedule(&mut self, id: PatchId) -> Result<()> {
        let scheduled = self.stage_install(id);

        let now = self.task.ticks();
        match scheduled {
            Ok(()) => log_info!(self.log, now, Component::Manager, "patch {} scheduled", id),
            Err(Error::ApplicationPending) => {
                self.stats.scheduling_conflicts = self.stats.scheduling_conflicts.wrapping_add(1);
                log_warn!(self.log, now, Component::Manager, "patch {} deferred: install in flight", id);
            }
            Err(e) => log_warn!(self.log, now, Component::Manager, "patch {} not scheduled: {}", id, e),
        }
        scheduled
    }

    /// Schedule the lowest-indexed pending patch
    ///
    /// # Errors
    ///
    /// [`Error::NoPendingHotpatch`] if nothing is pending, otherwise as
    /// [`Self::schedule`].
    pub fn schedule_next_pending(&mut self) -> Result<PatchId> {
        let id = self.slots.next_pending()?;
        self.schedule(id)?;
        Ok(id)
    }

    /// Wait until a scheduled patch is installed, then mark it active
    ///
    /// A faulted install releases the slot.
    ///
    /// # Errors
    ///
    /// [`Error::SlotNotFound`], [`Error::InvalidSlotState`] if the slot is
    /// not scheduled, or [`Error::ApplyFailed`].
    pub fn await_completion(&mut self, id: PatchId) -> Result<()> {
        let index = self.slots.index_of(id)?;
        if self.status_at(index)? != SlotStatus::Scheduled {
            return Err(Error::InvalidSlotState);
        }

        self.wait_for_applicator();

        let now = self.task.ticks();
        if self.applicator.outcome() == ApplyOutcome::Applied {
            self.slots.set_status_at(index, SlotStatus::Active)?;
            self.stats.applied = self.stats.applied.wrapping_add(1);
            log_info!(self.log, now, Component::Applicator, "patch {} active", id);
            Ok(())
        } else {
            log_error!(self.log, now, Component::Applicator, "patch {} install faulted", id);
            self.slots.free_slot(index, self.code)?;
            Err(Error::ApplyFailed)
        }
    }

    /// Receive, schedule and install a patch in one call
    ///
    /// A patch that is staged but cannot be scheduled is released again.
    ///
    /// # Errors
    ///
    /// Any error from the three stages.
    pub fn submit(&mut self, data: &[u8]) -> Result<PatchId> {
        let id = self.receive(data)?;

        if let Err(e) = self.schedule(id) {
            self.release(id);
            return Err(e);
        }

        self.await_completion(id)?;
        Ok(id)
    }

    /// Restore the bytes an active patch replaced and free its slot
    ///
    /// # Errors
    ///
    /// [`Error::SlotNotFound`], [`Error::InvalidSlotState`] if the patch is
    /// not active, [`Error::ApplicationPending`], or [`Error::ApplyFailed`]
    /// if the restore faulted (the patch then stays active).
    pub fn revert(&mut self, id: PatchId) -> Result<()> {
        let index = self.slots.index_of(id)?;
        let slot = self.slots.get(index).ok_or(Error::InvalidSlotIndex)?;
        if slot.status() != SlotStatus::Active {
            return Err(Error::InvalidSlotState);
        }
        let target_address = slot.target_address().ok_or(Error::InvalidSlotState)?;
        let restore = *slot.original_bytes();

        let mut installed = [0u8; HP_APPLICATOR_DATA_LENGTH];
        self.memory.read(target_address, &mut installed)?;
        let entry = ApplicatorEntry {
            target_address,
            data: restore,
            original: installed,
        };

        let applicator = self.applicator;
        if let Err(e) = self.task.critical_section(|| applicator.stage(&entry)) {
            self.stats.scheduling_conflicts = self.stats.scheduling_conflicts.wrapping_add(1);
            return Err(e);
        }
        self.wait_for_applicator();

        let now = self.task.ticks();
        if self.applicator.outcome() != ApplyOutcome::Applied {
            log_error!(self.log, now, Component::Applicator, "patch {} restore faulted", id);
            return Err(Error::ApplyFailed);
        }

        self.slots.free_slot(index, self.code)?;
        self.stats.reverted = self.stats.reverted.wrapping_add(1);
        log_info!(self.log, now, Component::Manager, "patch {} reverted", id);
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Slot table
    #[must_use]
    pub fn slots(&self) -> &SlotTable<N> {
        self.slots
    }

    /// Code arena
    #[must_use]
    pub fn code(&self) -> &CodeAllocator<A> {
        self.code
    }

    /// Quarantine buffer
    #[must_use]
    pub fn quarantine(&self) -> &Quarantine {
        self.quarantine
    }

    /// Event log
    #[must_use]
    pub const fn log(&self) -> &LogBuffer {
        &self.log
    }

    /// Counters
    #[must_use]
    pub const fn stats(&self) -> ManagerStats {
        self.stats
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Number of inactive slots
    #[must_use]
    pub fn free_slot_count(&self) -> usize {
        self.slots.free_count()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn quarantine_and_stage(&mut self, data: &[u8]) -> Result<PatchId> {
        self.quarantine.admit(data)?;

        let (header, code) = PatchHeader::parse(self.quarantine.contents())?;

        let firmware = self.config.layout.firmware;
        if header.target_address % 2 != 0
            || !firmware.contains_span(header.target_address, HP_APPLICATOR_DATA_LENGTH as u32)
        {
            return Err(Error::InvalidTargetAddress);
        }

        self.slots.add_hotpatch(header, code, self.code)
    }

    fn stage_install(&mut self, id: PatchId) -> Result<()> {
        if self.applicator.is_scheduled() {
            return Err(Error::ApplicationPending);
        }

        let index = self.slots.index_of(id)?;
        let slot = self.slots.get(index).ok_or(Error::InvalidSlotIndex)?;
        if slot.status() != SlotStatus::Pending {
            return Err(Error::InvalidSlotState);
        }
        let header = *slot.header().ok_or(Error::InvalidSlotState)?;

        let mut original = [0u8; HP_APPLICATOR_DATA_LENGTH];
        self.memory.read(header.target_address, &mut original)?;

        let data = match header.patch_type {
            PatchType::Redirect => {
                encode_branch_trampoline(header.target_address, header.code_address, THUMB_TARGET)
            }
            PatchType::Replacement => {
                let len = header.code_size as usize;
                if len > HP_APPLICATOR_DATA_LENGTH {
                    return Err(Error::DataSizeMismatch);
                }
                let code = self.code.block(header.code_address)?;
                let mut data = original;
                data[..len].copy_from_slice(&code[..len]);
                data
            }
        };
        self.slots.set_original_bytes(index, original)?;

        let entry = ApplicatorEntry {
            target_address: header.target_address,
            data,
            original,
        };
        let slots = &mut *self.slots;
        let applicator = self.applicator;
        self.task.critical_section(|| -> Result<()> {
            slots.set_status_at(index, SlotStatus::Scheduled)?;
            let staged = applicator.stage(&entry);
            if staged.is_err() {
                slots.set_status_at(index, SlotStatus::Pending)?;
            }
            staged
        })
    }

    fn wait_for_applicator(&mut self) {
        let mut attempts: u32 = 0;
        while self.applicator.is_scheduled() {
            if attempts < YIELD_ATTEMPTS_BEFORE_SLEEP {
                self.task.yield_now();
            } else {
                self.task.delay_ms(self.config.poll_interval_ms);
                self.stats.waited += Millis::new(self.config.poll_interval_ms);
            }
            attempts = attempts.saturating_add(1);
            self.stats.await_iterations = self.stats.await_iterations.wrapping_add(1);
        }
    }

    fn status_at(&self, index: usize) -> Result<SlotStatus> {
        self.slots
            .get(index)
            .map(|s| s.status())
            .ok_or(Error::InvalidSlotIndex)
    }

    fn release(&mut self, id: PatchId) {
        let released = self
            .slots
            .index_of(id)
            .and_then(|index| self.slots.free_slot(index, self.code));
        if let Err(e) = released {
            log_error!(self.log, self.task.ticks(), Component::Slots, "patch {} not released: {}", id, e);
        }
    }
}
