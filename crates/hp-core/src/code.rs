// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Patch code arena
//!
//! A first-fit allocator over a fixed byte arena that lives in the guarded
//! code region. Every block, free or allocated, is preceded by an 8-byte
//! header slot in the arena. Allocated blocks keep their size and a magic
//! word there; free blocks are tracked in an address-ordered index so the
//! arena itself holds nothing but zeroes between allocations.
//!
//! Invariants:
//! - free blocks never overlap and never touch: adjacent free blocks are
//!   merged on release
//! - `free_bytes + allocated_bytes + header overhead == SIZE` at all times
//! - released payloads are zeroized before the block rejoins the free list

use heapless::Vec;
use hp_common::constants::{
    CODE_ALIGNMENT, CODE_ARENA_SIZE, CODE_MIN_SPLIT_SIZE, CODE_NODE_HEADER_SIZE, MAX_CODE_BLOCKS,
};
use hp_common::{Error, Result};
use zeroize::Zeroize;

/// Marks the header of an allocated block
const ALLOCATED_MAGIC: u32 = 0x4850_434B;

/// Free block in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    /// Arena offset of the block header
    pub offset: usize,
    /// Usable payload bytes after the header
    pub size: usize,
}

impl FreeBlock {
    /// Arena offset one past the end of the payload
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + CODE_NODE_HEADER_SIZE + self.size
    }
}

/// First-fit code allocator
#[repr(C, align(8))]
pub struct CodeAllocator<const SIZE: usize = CODE_ARENA_SIZE> {
    arena: [u8; SIZE],
    free: Vec<FreeBlock, MAX_CODE_BLOCKS>,
    base_address: u32,
    live: usize,
    allocated_bytes: usize,
}

impl<const SIZE: usize> CodeAllocator<SIZE> {
    /// Live allocations allowed; keeps the free index within capacity
    const MAX_LIVE: usize = MAX_CODE_BLOCKS - 1;

    /// Create an uninitialized allocator; call [`init`](Self::init) before use
    #[must_use]
    pub const fn new() -> Self {
        Self {
            arena: [0; SIZE],
            free: Vec::new(),
            base_address: 0,
            live: 0,
            allocated_bytes: 0,
        }
    }

    /// Reset the arena to a single free block
    ///
    /// `base_address` is the address the arena occupies in the code region.
    /// On target this is the arena's own address; on the host any value
    /// inside the configured code region.
    pub fn init(&mut self, base_address: u32) {
        self.arena.zeroize();
        self.free.clear();
        self.base_address = base_address;
        self.live = 0;
        self.allocated_bytes = 0;

        if SIZE > CODE_NODE_HEADER_SIZE {
            // Cannot fail: the index was just cleared
            let _ = self.free.push(FreeBlock {
                offset: 0,
                size: SIZE - CODE_NODE_HEADER_SIZE,
            });
        }
    }

    /// Allocate `size` bytes, returning the block address
    ///
    /// Requests are rounded up to the arena alignment. The first free block
    /// large enough is used; it is split when the remainder can hold a
    /// header plus a minimal payload, otherwise handed out whole.
    #[must_use]
    pub fn allocate(&mut self, size: u32) -> Option<u32> {
        let size = usize::try_from(size).ok()?;
        if size == 0 || size > SIZE || self.live >= Self::MAX_LIVE {
            return None;
        }
        let size = align_up(size);

        let index = self.free.iter().position(|b| b.size >= size)?;
        let block = self.free[index];

        let granted = if block.size >= size + CODE_NODE_HEADER_SIZE + CODE_MIN_SPLIT_SIZE {
            self.free[index] = FreeBlock {
                offset: block.offset + CODE_NODE_HEADER_SIZE + size,
                size: block.size - size - CODE_NODE_HEADER_SIZE,
            };
            size
        } else {
            self.free.remove(index);
            block.size
        };

        self.write_header(block.offset, granted);
        self.live += 1;
        self.allocated_bytes += granted;

        self.address_of(block.offset)
    }

    /// Release a block previously returned by [`allocate`](Self::allocate)
    ///
    /// The payload is zeroized and the block merged with any neighboring
    /// free blocks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCodePointer`] if `address` is not a live block.
    pub fn free(&mut self, address: u32) -> Result<()> {
        let offset = self.header_offset(address)?;
        let size = self.block_size(offset).ok_or(Error::InvalidCodePointer)?;

        self.arena[offset..offset + CODE_NODE_HEADER_SIZE + size].zeroize();
        self.live -= 1;
        self.allocated_bytes -= size;

        let released = FreeBlock { offset, size };
        let pos = self.free.partition_point(|b| b.offset < offset);
        let joins_prev = pos > 0 && self.free[pos - 1].end() == offset;
        let joins_next = pos < self.free.len() && released.end() == self.free[pos].offset;

        match (joins_prev, joins_next) {
            (true, true) => {
                let next = self.free.remove(pos);
                self.free[pos - 1].size += CODE_NODE_HEADER_SIZE + size + CODE_NODE_HEADER_SIZE + next.size;
            }
            (true, false) => {
                self.free[pos - 1].size += CODE_NODE_HEADER_SIZE + size;
            }
            (false, true) => {
                let next = self.free[pos];
                self.free[pos] = FreeBlock {
                    offset,
                    size: size + CODE_NODE_HEADER_SIZE + next.size,
                };
            }
            (false, false) => {
                // Non-adjacent free blocks never outnumber live blocks plus one,
                // and MAX_LIVE keeps that within capacity
                self.free.insert(pos, released).map_err(|_| Error::InvalidCodePointer)?;
            }
        }

        Ok(())
    }

    /// Copy `code` into the block at `address`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCodePointer`] if `address` is not a live
    /// block, or [`Error::InvalidCodeSize`] if `code` does not fit.
    pub fn write(&mut self, address: u32, code: &[u8]) -> Result<()> {
        let offset = self.header_offset(address)?;
        let size = self.block_size(offset).ok_or(Error::InvalidCodePointer)?;
        if code.len() > size {
            return Err(Error::InvalidCodeSize);
        }

        let start = offset + CODE_NODE_HEADER_SIZE;
        self.arena[start..start + code.len()].copy_from_slice(code);
        Ok(())
    }

    /// Payload of the block at `address`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCodePointer`] if `address` is not a live block.
    pub fn block(&self, address: u32) -> Result<&[u8]> {
        let offset = self.header_offset(address)?;
        let size = self.block_size(offset).ok_or(Error::InvalidCodePointer)?;
        let start = offset + CODE_NODE_HEADER_SIZE;
        Ok(&self.arena[start..start + size])
    }

    /// Check if `address` lies in the arena
    #[must_use]
    pub fn contains(&self, address: u32) -> bool {
        address
            .checked_sub(self.base_address)
            .and_then(|d| usize::try_from(d).ok())
            .is_some_and(|d| d < SIZE)
    }

    /// Address of the arena
    #[must_use]
    pub const fn base_address(&self) -> u32 {
        self.base_address
    }

    /// Free payload bytes
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.free.iter().map(|b| b.size).sum()
    }

    /// Largest single allocation currently possible
    #[must_use]
    pub fn largest_free_block(&self) -> usize {
        self.free.iter().map(|b| b.size).max().unwrap_or(0)
    }

    /// Payload bytes held by live allocations
    #[must_use]
    pub const fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    /// Number of live allocations
    #[must_use]
    pub const fn live_allocations(&self) -> usize {
        self.live
    }

    /// Free blocks, ordered by address
    #[must_use]
    pub fn free_blocks(&self) -> &[FreeBlock] {
        &self.free
    }

    /// Bytes spent on block headers
    #[must_use]
    pub fn overhead(&self) -> usize {
        (self.free.len() + self.live) * CODE_NODE_HEADER_SIZE
    }

    fn header_offset(&self, address: u32) -> Result<usize> {
        let payload = address
            .checked_sub(self.base_address)
            .and_then(|d| usize::try_from(d).ok())
            .ok_or(Error::InvalidCodePointer)?;

        if payload < CODE_NODE_HEADER_SIZE || payload >= SIZE || payload % CODE_ALIGNMENT != 0 {
            return Err(Error::InvalidCodePointer);
        }
        Ok(payload - CODE_NODE_HEADER_SIZE)
    }

    fn block_size(&self, offset: usize) -> Option<usize> {
        let size = self.read_word(offset)?;
        let magic = self.read_word(offset + 4)?;
        let size = usize::try_from(size).ok()?;

        (magic == ALLOCATED_MAGIC && offset + CODE_NODE_HEADER_SIZE + size <= SIZE).then_some(size)
    }

    fn read_word(&self, offset: usize) -> Option<u32> {
        let bytes = self.arena.get(offset..offset + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn write_header(&mut self, offset: usize, size: usize) {
        // Block sizes are bounded by SIZE, which fits the arena's u32 address space
        #[allow(clippy::cast_possible_truncation)]
        let size = size as u32;
        self.arena[offset..offset + 4].copy_from_slice(&size.to_le_bytes());
        self.arena[offset + 4..offset + 8].copy_from_slice(&ALLOCATED_MAGIC.to_le_bytes());
    }

    fn address_of(&self, offset: usize) -> Option<u32> {
        let payload = u32::try_from(offset + CODE_NODE_HEADER_SIZE).ok()?;
        self.base_address.checked_add(payload)
    }
}

impl<const SIZE: usize> Default for CodeAllocator<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

const fn align_up(size: usize) -> usize {
    (size + CODE_ALIGNMENT - 1) & !(CODE_ALIGNMENT - 1)
}
