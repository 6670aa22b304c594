// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Hotpatch Core
//!
//! MPU-guarded live patching for Cortex-M firmware:
//!
//! - **Manager**: Receives, validates, stages and schedules patches
//! - **Slots**: Fixed table tracking every patch through its lifecycle
//! - **Code**: First-fit arena holding patch code
//! - **Applicator**: Single-entry hand-off that installs eight bytes at a time
//! - **Guard**: Context-switch hook opening the protected regions only for the manager
//! - **Fault**: Absorbs stray writes into the protected regions
//! - **Arch**: Hardware backends (Cortex-M MPU, fault entry)
//!
//! # Usage
//!
//! ```rust,ignore
//! use hp_core::{ApplicatorContext, FaultMonitor, PatchManager, PatchStorage, PrivilegeGuard};
//!
//! static APPLICATOR: ApplicatorContext = ApplicatorContext::new();
//! static MONITOR: FaultMonitor = FaultMonitor::new(&MemoryLayout::NRF52840);
//!
//! // Scheduler hook, called on every context switch
//! let mut guard = PrivilegeGuard::new(mpu, &layout, &APPLICATOR, &memory);
//! guard.install_baseline()?;
//! install_fault_monitor(&MONITOR);
//!
//! // Manager task
//! let mut manager = PatchManager::new(config, storage, &APPLICATOR, &memory, &task);
//! manager.init()?;
//! let id = manager.submit(&frame)?;
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod applicator;
pub mod arch;
pub mod code;
pub mod fault;
pub mod guard;
pub mod header;
pub mod manager;
pub mod quarantine;
pub mod slot;
pub mod trampoline;

// Re-export commonly used types
pub use applicator::{ApplicatorContext, ApplicatorEntry, ApplyOutcome};
pub use code::CodeAllocator;
pub use fault::{ExceptionFrame, FaultDisposition, FaultMonitor, FaultSnapshot};
pub use guard::{GuardStats, PrivilegeGuard};
pub use header::{PatchHeader, PatchImage, PatchType};
pub use manager::{ManagerStats, PatchManager, PatchStorage};
pub use quarantine::Quarantine;
pub use slot::{PatchId, PatchSlot, SlotStatus, SlotTable};
pub use trampoline::encode_branch_trampoline;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
