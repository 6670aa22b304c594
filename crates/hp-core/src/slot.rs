// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Patch slot table
//!
//! Fixed table of patch slots living in the guarded metadata region. Each
//! slot moves through:
//!
//! ```text
//! Inactive -> Pending -> Scheduled -> Active -> Blocked -> Inactive
//!               |            |
//!               +------------+--------------------> Blocked -> Inactive
//! ```
//!
//! `Blocked` is only observable while a slot is being torn down.

use core::num::NonZeroU32;

use hp_common::constants::{HP_APPLICATOR_DATA_LENGTH, HP_FIRST_IDENTIFIER, HP_SLOT_COUNT};
use hp_common::{Error, Result};

use crate::code::CodeAllocator;
use crate::header::PatchHeader;

/// Patch identifier; never zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PatchId(NonZeroU32);

impl PatchId {
    /// Create from a raw value, rejecting zero
    #[must_use]
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Raw identifier value
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0.get()
    }
}

impl core::fmt::Display for PatchId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Slot lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SlotStatus {
    /// Free for reuse
    #[default]
    Inactive = 0,
    /// Validated and staged, not yet scheduled
    Pending = 1,
    /// Handed to the applicator, installation outstanding
    Scheduled = 2,
    /// Installed at its target
    Active = 3,
    /// Being torn down
    Blocked = 4,
}

impl SlotStatus {
    /// Check if the slot holds a live patch
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !matches!(self, Self::Inactive)
    }
}

/// One slot of the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchSlot {
    status: SlotStatus,
    identifier: Option<PatchId>,
    header: Option<PatchHeader>,
    original: [u8; HP_APPLICATOR_DATA_LENGTH],
}

impl PatchSlot {
    const EMPTY: Self = Self {
        status: SlotStatus::Inactive,
        identifier: None,
        header: None,
        original: [0; HP_APPLICATOR_DATA_LENGTH],
    };

    /// Current state
    #[must_use]
    pub const fn status(&self) -> SlotStatus {
        self.status
    }

    /// Identifier, if the slot is in use
    #[must_use]
    pub const fn identifier(&self) -> Option<PatchId> {
        self.identifier
    }

    /// Staged header, if the slot is in use
    #[must_use]
    pub const fn header(&self) -> Option<&PatchHeader> {
        self.header.as_ref()
    }

    /// Target address, if the slot is in use
    #[must_use]
    pub fn target_address(&self) -> Option<u32> {
        self.header.map(|h| h.target_address)
    }

    /// Target bytes captured before installation
    #[must_use]
    pub const fn original_bytes(&self) -> &[u8; HP_APPLICATOR_DATA_LENGTH] {
        &self.original
    }
}

/// Table of patch slots
pub struct SlotTable<const N: usize = HP_SLOT_COUNT> {
    slots: [PatchSlot; N],
    next_identifier: u32,
}

impl<const N: usize> SlotTable<N> {
    /// Create a table with every slot inactive
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [PatchSlot::EMPTY; N],
            next_identifier: HP_FIRST_IDENTIFIER,
        }
    }

    /// Reset every slot to inactive and restart identifiers
    pub fn init(&mut self) {
        self.slots = [PatchSlot::EMPTY; N];
        self.next_identifier = HP_FIRST_IDENTIFIER;
    }

    /// Stage a validated patch: reserve code, copy it in and claim a slot
    ///
    /// Checks run in order: free slot, code space, duplicate target. If the
    /// duplicate check fails the code block is released again.
    ///
    /// # Errors
    ///
    /// [`Error::NoFreeSlots`], [`Error::NoFreeCode`] or
    /// [`Error::DuplicateTarget`].
    pub fn add_hotpatch<const A: usize>(
        &mut self,
        header: PatchHeader,
        code: &[u8],
        allocator: &mut CodeAllocator<A>,
    ) -> Result<PatchId> {
        if self.free_count() == 0 {
            return Err(Error::NoFreeSlots);
        }

        let code_address = allocator.allocate(header.code_size).ok_or(Error::NoFreeCode)?;

        if self.is_duplicate(header.target_address) {
            allocator.free(code_address)?;
            return Err(Error::DuplicateTarget);
        }

        if let Err(e) = allocator.write(code_address, code) {
            allocator.free(code_address)?;
            return Err(e);
        }

        let staged = PatchHeader { code_address, ..header };
        match self.allocate_slot(staged) {
            Ok(index) => self.slots[index].identifier.ok_or(Error::InvalidIdentifier),
            Err(e) => {
                allocator.free(code_address)?;
                Err(e)
            }
        }
    }

    /// Claim the first inactive slot for `header`, marking it pending
    ///
    /// # Errors
    ///
    /// [`Error::NoFreeSlots`] when the table is full.
    pub fn allocate_slot(&mut self, header: PatchHeader) -> Result<usize> {
        let index = self
            .slots
            .iter()
            .position(|s| s.status == SlotStatus::Inactive)
            .ok_or(Error::NoFreeSlots)?;
        let identifier = self.assign_identifier()?;

        self.slots[index] = PatchSlot {
            status: SlotStatus::Pending,
            identifier: Some(identifier),
            header: Some(header),
            original: [0; HP_APPLICATOR_DATA_LENGTH],
        };
        Ok(index)
    }

    /// Tear down a slot and return its code block to `allocator`
    ///
    /// The slot passes through `Blocked` and ends `Inactive` even if the
    /// code block turns out to be invalid.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSlotIndex`], [`Error::InvalidSlotState`] for an
    /// already inactive slot, or the allocator's error.
    pub fn free_slot<const A: usize>(&mut self, index: usize, allocator: &mut CodeAllocator<A>) -> Result<()> {
        let slot = self.slots.get_mut(index).ok_or(Error::InvalidSlotIndex)?;
        if slot.status == SlotStatus::Inactive {
            return Err(Error::InvalidSlotState);
        }

        slot.status = SlotStatus::Blocked;
        let header = slot.header.take();
        slot.identifier = None;
        slot.original = [0; HP_APPLICATOR_DATA_LENGTH];

        let released = match header {
            Some(h) if h.code_address != 0 => allocator.free(h.code_address),
            _ => Ok(()),
        };

        slot.status = SlotStatus::Inactive;
        released
    }

    /// Check if a live slot already targets `target_address`
    #[must_use]
    pub fn is_duplicate(&self, target_address: u32) -> bool {
        self.slots
            .iter()
            .any(|s| s.status.is_live() && s.target_address() == Some(target_address))
    }

    /// Slot carrying `id`
    ///
    /// # Errors
    ///
    /// [`Error::SlotNotFound`] if no live slot has that identifier.
    pub fn find_by_identifier(&self, id: PatchId) -> Result<&PatchSlot> {
        self.index_of(id).map(|i| &self.slots[i])
    }

    /// Index of the slot carrying `id`
    ///
    /// # Errors
    ///
    /// [`Error::SlotNotFound`] if no live slot has that identifier.
    pub fn index_of(&self, id: PatchId) -> Result<usize> {
        self.slots
            .iter()
            .position(|s| s.status.is_live() && s.identifier == Some(id))
            .ok_or(Error::SlotNotFound)
    }

    /// Live slot targeting `target_address`
    ///
    /// # Errors
    ///
    /// [`Error::SlotNotFound`] if none does.
    pub fn find_by_target(&self, target_address: u32) -> Result<&PatchSlot> {
        self.slots
            .iter()
            .find(|s| s.status.is_live() && s.target_address() == Some(target_address))
            .ok_or(Error::SlotNotFound)
    }

    /// Oldest-indexed slot waiting to be scheduled
    ///
    /// # Errors
    ///
    /// [`Error::NoPendingHotpatch`] if none is pending.
    pub fn next_pending(&self) -> Result<PatchId> {
        self.slots
            .iter()
            .find(|s| s.status == SlotStatus::Pending)
            .and_then(|s| s.identifier)
            .ok_or(Error::NoPendingHotpatch)
    }

    /// Set the state of the slot holding patch `id`
    ///
    /// # Errors
    ///
    /// [`Error::SlotNotFound`] if no live slot carries `id`.
    pub fn update_status(&mut self, id: PatchId, status: SlotStatus) -> Result<()> {
        let index = self.index_of(id)?;
        self.set_status_at(index, status)
    }

    /// Set the state of the slot at `index`
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSlotIndex`] if `index` is out of range.
    pub fn set_status_at(&mut self, index: usize, status: SlotStatus) -> Result<()> {
        let slot = self.slots.get_mut(index).ok_or(Error::InvalidSlotIndex)?;
        slot.status = status;
        Ok(())
    }

    /// Record the target bytes a slot overwrites
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSlotIndex`] if `index` is out of range.
    pub fn set_original_bytes(&mut self, index: usize, bytes: [u8; HP_APPLICATOR_DATA_LENGTH]) -> Result<()> {
        let slot = self.slots.get_mut(index).ok_or(Error::InvalidSlotIndex)?;
        slot.original = bytes;
        Ok(())
    }

    /// Number of inactive slots
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.slots.iter().filter(|s| s.status == SlotStatus::Inactive).count()
    }

    /// Slot at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&PatchSlot> {
        self.slots.get(index)
    }

    /// All slots in index order
    pub fn iter(&self) -> impl Iterator<Item = &PatchSlot> {
        self.slots.iter()
    }

    /// Hand out the next identifier, skipping zero and any still in use
    fn assign_identifier(&mut self) -> Result<PatchId> {
        for _ in 0..=N {
            let candidate = PatchId::new(self.next_identifier);
            self.next_identifier = self.next_identifier.wrapping_add(1);

            if let Some(id) = candidate {
                if !self.slots.iter().any(|s| s.identifier == Some(id)) {
                    return Ok(id);
                }
            }
        }
        Err(Error::InvalidIdentifier)
    }
}

impl<const N: usize> Default for SlotTable<N> {
    fn default() -> Self {
        Self::new()
    }
}
