// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Applicator context
//!
//! The single hand-off point between the manager task and the privilege
//! guard. The manager stages one entry (target plus eight bytes) and marks
//! the context active; the guard performs the installation on the manager's
//! next switch-in while the firmware region is briefly writable, then marks
//! the context inactive again.
//!
//! All fields are atomics so the context can sit in a `static` placed in the
//! guarded context region. The status word is written last with release
//! ordering and read with acquire ordering, so the guard never observes a
//! half-written entry.

use core::sync::atomic::{AtomicU32, Ordering};

use hp_common::constants::HP_APPLICATOR_DATA_LENGTH;
use hp_common::{Error, Result};
use hp_hal::{HalError, HalResult, PatchableMemory};

const STATUS_INACTIVE: u32 = 0;
const STATUS_ACTIVE: u32 = 1;

/// Result of the most recent installation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ApplyOutcome {
    /// No installation since the last reset
    None = 0,
    /// All four stores landed
    Applied = 1,
    /// At least one store was refused
    Faulted = 2,
}

impl ApplyOutcome {
    const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Applied,
            2 => Self::Faulted,
            _ => Self::None,
        }
    }
}

/// One pending installation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicatorEntry {
    /// Halfword-aligned address of the first byte to overwrite
    pub target_address: u32,
    /// Bytes to write, in memory order
    pub data: [u8; HP_APPLICATOR_DATA_LENGTH],
    /// Bytes currently at the target, put back if the install does not land
    pub original: [u8; HP_APPLICATOR_DATA_LENGTH],
}

/// Applicator context shared between the manager and the guard
pub struct ApplicatorContext {
    status: AtomicU32,
    target: AtomicU32,
    data: [AtomicU32; 2],
    original: [AtomicU32; 2],
    outcome: AtomicU32,
    generation: AtomicU32,
}

impl ApplicatorContext {
    /// Create an inactive context
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: AtomicU32::new(STATUS_INACTIVE),
            target: AtomicU32::new(0),
            data: [AtomicU32::new(0), AtomicU32::new(0)],
            original: [AtomicU32::new(0), AtomicU32::new(0)],
            outcome: AtomicU32::new(ApplyOutcome::None as u32),
            generation: AtomicU32::new(0),
        }
    }

    /// Boot-time initialization
    pub fn init(&self) {
        self.reset_context();
        self.generation.store(0, Ordering::Relaxed);
    }

    /// Drop any staged entry and mark the context inactive
    pub fn reset_context(&self) {
        self.status.store(STATUS_INACTIVE, Ordering::Release);
        self.target.store(0, Ordering::Relaxed);
        self.data[0].store(0, Ordering::Relaxed);
        self.data[1].store(0, Ordering::Relaxed);
        self.original[0].store(0, Ordering::Relaxed);
        self.original[1].store(0, Ordering::Relaxed);
        self.outcome.store(ApplyOutcome::None as u32, Ordering::Relaxed);
    }

    /// Stage an installation and mark the context active
    ///
    /// # Errors
    ///
    /// [`Error::ApplicationPending`] if an installation is already outstanding.
    pub fn stage(&self, entry: &ApplicatorEntry) -> Result<()> {
        if self.is_scheduled() {
            return Err(Error::ApplicationPending);
        }

        let [d0, d1, d2, d3, d4, d5, d6, d7] = entry.data;
        self.target.store(entry.target_address, Ordering::Relaxed);
        self.data[0].store(u32::from_le_bytes([d0, d1, d2, d3]), Ordering::Relaxed);
        self.data[1].store(u32::from_le_bytes([d4, d5, d6, d7]), Ordering::Relaxed);
        let [o0, o1, o2, o3, o4, o5, o6, o7] = entry.original;
        self.original[0].store(u32::from_le_bytes([o0, o1, o2, o3]), Ordering::Relaxed);
        self.original[1].store(u32::from_le_bytes([o4, o5, o6, o7]), Ordering::Relaxed);
        self.outcome.store(ApplyOutcome::None as u32, Ordering::Relaxed);
        self.status.store(STATUS_ACTIVE, Ordering::Release);
        Ok(())
    }

    /// Check if an installation is outstanding
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.status.load(Ordering::Acquire) == STATUS_ACTIVE
    }

    /// Currently staged entry, if any
    #[must_use]
    pub fn entry(&self) -> Option<ApplicatorEntry> {
        if !self.is_scheduled() {
            return None;
        }
        Some(ApplicatorEntry {
            target_address: self.target.load(Ordering::Relaxed),
            data: Self::load_bytes(&self.data),
            original: Self::load_bytes(&self.original),
        })
    }

    /// Install the staged entry with four halfword stores
    ///
    /// Runs from the context-switch path with the firmware region writable.
    /// Does nothing if no entry is staged. The eight bytes are read back
    /// afterwards: a store the hardware refused, or one whose fault was
    /// absorbed and skipped, leaves the target different from the payload.
    /// In that case the original bytes are written back and the outcome is
    /// `Faulted`. Either way the context ends inactive with the completion
    /// generation bumped.
    pub fn apply<M: PatchableMemory + ?Sized>(&self, memory: &M) {
        if !self.is_scheduled() {
            return;
        }

        let target = self.target.load(Ordering::Relaxed);
        let lo = self.data[0].load(Ordering::Relaxed);
        let hi = self.data[1].load(Ordering::Relaxed);

        let landed = Self::store_words(memory, target, lo, hi)
            .and_then(|()| Self::verify(memory, target, lo, hi));

        let outcome = if landed.is_ok() {
            ApplyOutcome::Applied
        } else {
            // Best effort: a region refusing every store leaves nothing to undo
            let _ = Self::store_words(
                memory,
                target,
                self.original[0].load(Ordering::Relaxed),
                self.original[1].load(Ordering::Relaxed),
            );
            ApplyOutcome::Faulted
        };
        self.outcome.store(outcome as u32, Ordering::Relaxed);
        self.generation
            .store(self.generation.load(Ordering::Relaxed).wrapping_add(1), Ordering::Relaxed);
        self.status.store(STATUS_INACTIVE, Ordering::Release);
    }

    /// Result of the most recent installation
    #[must_use]
    pub fn outcome(&self) -> ApplyOutcome {
        ApplyOutcome::from_raw(self.outcome.load(Ordering::Acquire))
    }

    /// Number of installations performed since boot
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }
}

impl ApplicatorContext {
    #[allow(clippy::cast_possible_truncation)]
    fn store_words<M: PatchableMemory + ?Sized>(memory: &M, target: u32, lo: u32, hi: u32) -> HalResult<()> {
        memory.store_halfword(target, lo as u16)?;
        memory.store_halfword(target + 2, (lo >> 16) as u16)?;
        memory.store_halfword(target + 4, hi as u16)?;
        memory.store_halfword(target + 6, (hi >> 16) as u16)
    }

    fn verify<M: PatchableMemory + ?Sized>(memory: &M, target: u32, lo: u32, hi: u32) -> HalResult<()> {
        let mut back = [0u8; HP_APPLICATOR_DATA_LENGTH];
        memory.read(target, &mut back)?;
        let [b0, b1, b2, b3, b4, b5, b6, b7] = back;
        if u32::from_le_bytes([b0, b1, b2, b3]) == lo && u32::from_le_bytes([b4, b5, b6, b7]) == hi {
            Ok(())
        } else {
            Err(HalError::AccessDenied)
        }
    }

    fn load_bytes(words: &[AtomicU32; 2]) -> [u8; HP_APPLICATOR_DATA_LENGTH] {
        let lo = words[0].load(Ordering::Relaxed).to_le_bytes();
        let hi = words[1].load(Ordering::Relaxed).to_le_bytes();
        [lo[0], lo[1], lo[2], lo[3], hi[0], hi[1], hi[2], hi[3]]
    }
}

impl Default for ApplicatorContext {
    fn default() -> Self {
        Self::new()
    }
}
