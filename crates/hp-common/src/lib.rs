// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Hotpatch Common Library
//!
//! Error definitions, build-time constants, memory-layout configuration and
//! the event log shared by the hotpatch HAL and core crates.
//!
//! # Features
//!
//! - `std`: Enable standard library support (disabled by default for embedded)
//! - `defmt`: Enable defmt formatting of errors for embedded debugging
//!
//! No heap allocations are performed; all buffers are fixed-size arrays or
//! heapless collections.

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[cfg(feature = "std")]
extern crate std;

pub mod errors;
pub mod config;
pub mod log;
pub mod constants;
pub mod time;

// Re-export commonly used items
pub use errors::{Error, ErrorKind, Result};
pub use config::{AddressRange, ManagerConfig, MemoryLayout};
pub use log::{Component, LogBuffer, LogLevel};
