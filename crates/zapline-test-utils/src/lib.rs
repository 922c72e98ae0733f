// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Zapline integration tests.
//!
//! Provides in-memory stand-ins for the driver and persistence ports so the
//! supervisor and gateway can be exercised without a sidecar or database.
//!
//! # Components
//!
//! - [`MockDriver`] - Scripted driver with event injection and send capture
//! - [`MockDriverFactory`] - Factory that records a handle per created driver
//! - [`MemoryCredentialStore`] - `HashMap`-backed credential store
//! - [`RecordingConnectionRepository`] - Connection repository that keeps every write

pub mod memory_store;
pub mod mock_driver;

pub use memory_store::{MemoryCredentialStore, RecordingConnectionRepository};
pub use mock_driver::{MockDriver, MockDriverFactory, MockDriverHandle};
