// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Architecture-specific code
//!
//! Hardware backends for the capability traits in `hp-hal`:
//! - Memory protection (MPU region programming and barriers)
//! - Direct patch stores into code memory
//! - MemManage fault status and the trap entry
//!
//! Supported architectures:
//! - ARM Cortex-M, ARMv7-M MPU (feature: `cortex-m`)
//!
//! Register encodings build on every host so they can be unit tested; the
//! instructions and register accesses themselves only exist on
//! `target_arch = "arm"`.

// ============================================================================
// ARM Cortex-M Architecture
// ============================================================================

#[cfg(feature = "cortex-m")]
pub mod cortex_m;

#[cfg(feature = "cortex-m")]
pub use cortex_m::mpu::RegionEncoding;

#[cfg(all(feature = "cortex-m", target_arch = "arm"))]
pub use cortex_m::exceptions::{install_fault_monitor, set_forward_handler, ScbFaultSource};
#[cfg(all(feature = "cortex-m", target_arch = "arm"))]
pub use cortex_m::memory::DirectMemory;
#[cfg(all(feature = "cortex-m", target_arch = "arm"))]
pub use cortex_m::mpu::CortexMpu;
