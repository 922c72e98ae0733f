// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session lifecycle for the Zapline WhatsApp supervisor.
//!
//! - [`session`]: the per-connection state machine fed by a driver stream
//! - [`supervisor`]: the single-owner table with guarded reconnect timers
//! - [`backoff`]: capped exponential reconnect delays
//! - [`shutdown`]: signal handling for graceful release on exit

pub mod backoff;
pub mod session;
pub mod shutdown;
pub mod supervisor;

pub use backoff::Backoff;
pub use session::{Session, SessionHandle, SessionNotice, SessionSnapshot};
pub use shutdown::install_signal_handler;
pub use supervisor::{
    CreateRequest, Supervisor, SupervisorDeps, SupervisorSettings, SupervisorStats,
};
