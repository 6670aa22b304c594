// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Patch wire format
//!
//! A patch arrives as one flat little-endian buffer:
//!
//! ```text
//! +0   type        u32   0 = replacement, 1 = redirect
//! +4   target      u32   address of the instruction to patch
//! +8   code_size   u32   number of code bytes that follow
//! +12  code_ptr    u32   ignored on input, filled in once code is staged
//! +16  code        [u8; code_size]
//! ```

use hp_common::constants::{HP_HEADER_SIZE, HP_MAX_CODE_SIZE};
use hp_common::{Error, Result};

/// How the patch is installed at its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PatchType {
    /// Code bytes overwrite the target directly
    Replacement = 0,
    /// Target is overwritten with a branch into the staged code
    Redirect = 1,
}

impl TryFrom<u32> for PatchType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Replacement),
            1 => Ok(Self::Redirect),
            _ => Err(Error::InvalidType),
        }
    }
}

/// Header fields exactly as read from the wire, before validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    /// Type field
    pub kind: u32,
    /// Target address
    pub target_address: u32,
    /// Declared code size
    pub code_size: u32,
    /// Code pointer field
    pub code_address: u32,
}

impl RawHeader {
    /// Read the header fields from the front of `data`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSize`] if `data` is shorter than a header.
    pub fn read(data: &[u8]) -> Result<Self> {
        let bytes: &[u8; HP_HEADER_SIZE] = data
            .get(..HP_HEADER_SIZE)
            .and_then(|h| h.try_into().ok())
            .ok_or(Error::InvalidSize)?;

        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Ok(Self {
            kind: word(0),
            target_address: word(4),
            code_size: word(8),
            code_address: word(12),
        })
    }
}

/// Validated patch header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchHeader {
    /// Installation mode
    pub patch_type: PatchType,
    /// Address of the instruction to patch
    pub target_address: u32,
    /// Code size in bytes
    pub code_size: u32,
    /// Address of the staged code, zero until staged
    pub code_address: u32,
}

impl PatchHeader {
    /// Parse and check a flat `header || code` buffer
    ///
    /// Checks run in wire order: header present, code size within
    /// `1..=HP_MAX_CODE_SIZE`, buffer length matching the declared size, and
    /// a known type. The target address is not checked here; its valid range
    /// depends on the memory layout. `code_address` is always zero in the
    /// result.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSize`], [`Error::InvalidCodeSize`],
    /// [`Error::CodeSizeMismatch`] or [`Error::InvalidType`].
    pub fn parse(data: &[u8]) -> Result<(Self, &[u8])> {
        let raw = RawHeader::read(data)?;

        let code_size = raw.code_size as usize;
        if code_size == 0 || code_size > HP_MAX_CODE_SIZE {
            return Err(Error::InvalidCodeSize);
        }
        if data.len() != HP_HEADER_SIZE + code_size {
            return Err(Error::CodeSizeMismatch);
        }
        let patch_type = PatchType::try_from(raw.kind)?;

        let header = Self {
            patch_type,
            target_address: raw.target_address,
            code_size: raw.code_size,
            code_address: 0,
        };
        Ok((header, &data[HP_HEADER_SIZE..]))
    }

    /// Serialize to wire format
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HP_HEADER_SIZE] {
        let mut out = [0u8; HP_HEADER_SIZE];
        out[0..4].copy_from_slice(&(self.patch_type as u32).to_le_bytes());
        out[4..8].copy_from_slice(&self.target_address.to_le_bytes());
        out[8..12].copy_from_slice(&self.code_size.to_le_bytes());
        out[12..16].copy_from_slice(&self.code_address.to_le_bytes());
        out
    }
}

/// Builder for flat `header || code` buffers, used by host tooling
pub struct PatchImage;

impl PatchImage {
    /// Write a patch for `target_address` carrying `code` into `out`
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSize`] if `out` is too small.
    pub fn encode(patch_type: PatchType, target_address: u32, code: &[u8], out: &mut [u8]) -> Result<usize> {
        let total = HP_HEADER_SIZE + code.len();
        let dest = out.get_mut(..total).ok_or(Error::InvalidSize)?;
        let code_size = u32::try_from(code.len()).map_err(|_| Error::InvalidSize)?;

        let header = PatchHeader {
            patch_type,
            target_address,
            code_size,
            code_address: 0,
        };
        dest[..HP_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        dest[HP_HEADER_SIZE..].copy_from_slice(code);
        Ok(total)
    }
}
