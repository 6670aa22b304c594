// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Quarantine buffer
//!
//! Incoming patches are copied here before anything looks at them, so the
//! sender cannot change a buffer between validation and staging. The buffer
//! sits in the guarded metadata region and is wiped after every patch.

use hp_common::constants::HP_QUARANTINE_SIZE;
use hp_common::{Error, Result};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Fixed staging buffer for one incoming patch
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Quarantine {
    buffer: [u8; HP_QUARANTINE_SIZE],
    len: usize,
}

impl Quarantine {
    /// Create an empty quarantine
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: [0; HP_QUARANTINE_SIZE],
            len: 0,
        }
    }

    /// Buffer capacity in bytes
    #[must_use]
    pub const fn capacity(&self) -> usize {
        HP_QUARANTINE_SIZE
    }

    /// Copy `data` in, replacing any previous contents
    ///
    /// The length is checked before a single byte is copied.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDataPointer`] for an empty buffer, [`Error::InvalidSize`]
    /// if `data` exceeds the capacity.
    pub fn admit(&mut self, data: &[u8]) -> Result<&[u8]> {
        if data.is_empty() {
            return Err(Error::InvalidDataPointer);
        }
        if data.len() > HP_QUARANTINE_SIZE {
            return Err(Error::InvalidSize);
        }

        self.erase();
        self.buffer[..data.len()].copy_from_slice(data);
        self.len = data.len();
        Ok(&self.buffer[..data.len()])
    }

    /// Currently held bytes
    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    /// Wipe the buffer
    pub fn erase(&mut self) {
        self.zeroize();
    }

    /// Check if the buffer holds nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for Quarantine {
    fn default() -> Self {
        Self::new()
    }
}
