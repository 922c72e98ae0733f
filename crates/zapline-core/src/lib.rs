// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Zapline WhatsApp session supervisor.
//!
//! This crate provides the driver interface, the persistence ports, the
//! canonical event model, and the error taxonomy shared by every other
//! crate in the workspace.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::{ErrorCode, ZaplineError};
pub use types::{
    CanonicalEvent, CloseReason, ConnectionId, ConnectionRecord, ConnectionStatus,
    CredentialRecord, DriverKind, EventKind, InboundMessage, OutboundMessage, SendAck, TenantId,
};

pub use traits::{
    ConnectionRepository, CredentialStore, Driver, DriverEvent, DriverEventStream, DriverFactory,
    DriverStatus,
};
