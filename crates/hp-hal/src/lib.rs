// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Hardware Abstraction Layer for the hotpatch engine
//!
//! # Architecture
//!
//! 1. **Traits**: capability interfaces the core is written against (`traits` module)
//! 2. **Errors**: HAL error codes convertible into the engine error type
//! 3. **Simulation**: host test doubles (`sim` module, `sim` feature)
//!
//! The Cortex-M implementations of these traits live with the core crate,
//! next to the exception entry code they share registers with.

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[cfg(feature = "std")]
extern crate std;

pub mod traits;
pub mod error;

#[cfg(feature = "sim")]
pub mod sim;

// Re-export main traits
pub use traits::*;
pub use error::{HalError, HalResult};
