// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Branch trampoline encoding
//!
//! A redirect patch overwrites eight bytes at the target with a PC-relative
//! load of a literal address into the program counter, followed by the
//! literal itself.
//!
//! Thumb-2 (`ldr.w pc, [pc, #imm]`):
//!
//! ```text
//! halfword 0   0xF8DF                    LDR.W Rt=PC, [PC, #imm12]
//! halfword 1   0xF000 | imm12            Rt = 15, imm12 = 0 or 2
//! word 1       destination | 1           literal, Thumb bit set
//! ```
//!
//! The literal lives at `site + 4`. Thumb reads PC as `Align(site + 4, 4)`,
//! so a site that is only halfword aligned needs `imm12 = 2`; bit 1 of the
//! site address supplies exactly that offset when shifted into the second
//! halfword.
//!
//! ARM (`ldr pc, [pc, #-4]`):
//!
//! ```text
//! word 0       0xE51FF004
//! word 1       destination
//! ```

use hp_common::constants::HP_APPLICATOR_DATA_LENGTH;

/// Thumb-2 `ldr.w pc, [pc, #0]`, both halfwords, little-endian word order
const THUMB_LDR_PC_LITERAL: u32 = 0xF000_F8DF;

/// ARM `ldr pc, [pc, #-4]`
const ARM_LDR_PC_LITERAL: u32 = 0xE51F_F004;

/// Encode an eight-byte absolute branch from `site_address` to `destination`
///
/// Pure function; the bytes are in memory order, ready to stage into the
/// applicator.
#[must_use]
pub const fn encode_branch_trampoline(
    site_address: u32,
    destination: u32,
    is_thumb: bool,
) -> [u8; HP_APPLICATOR_DATA_LENGTH] {
    let (insn, literal) = if is_thumb {
        (THUMB_LDR_PC_LITERAL | ((site_address & 0b10) << 16), destination | 1)
    } else {
        (ARM_LDR_PC_LITERAL, destination)
    };

    let i = insn.to_le_bytes();
    let l = literal.to_le_bytes();
    [i[0], i[1], i[2], i[3], l[0], l[1], l[2], l[3]]
}
