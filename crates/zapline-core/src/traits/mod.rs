// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait definitions at the seams of the supervisor.
//!
//! Drivers and storage ports use `#[async_trait]` so they can be held as
//! trait objects by the supervisor.

pub mod driver;
pub mod storage;

pub use driver::{Driver, DriverEvent, DriverEventStream, DriverFactory, DriverStatus};
pub use storage::{ConnectionRepository, CredentialStore};
