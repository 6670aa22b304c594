// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Host simulation of the hotpatch hardware
//!
//! Test doubles for every HAL trait. The simulated protection unit keeps
//! programmed and effective region state apart, so code that forgets to
//! synchronize after reprogramming sees the old rights, just like silicon.
//! Simulated memory checks every store against the effective regions and
//! latches a MemManage-style status on denial instead of performing it.

mod memory;
mod mpu;
mod task;

pub use memory::SimMemory;
pub use mpu::{ProgrammedRegion, SimMpu, SIM_REGION_COUNT};
pub use task::SimTaskControl;
