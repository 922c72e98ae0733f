// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WhatsApp drivers for the Zapline session supervisor.
//!
//! Both engines run as sidecar processes and are reached over the same
//! WebSocket bridge ([`bridge::BridgeDriver`]). They differ only in the
//! native event names and payloads they emit, which each [`dialect::Dialect`]
//! translates into [`zapline_core::DriverEvent`]s.

pub mod baileys;
pub mod bridge;
pub mod dialect;
pub mod registry;
pub mod webjs;

pub use baileys::{BaileysDialect, BaileysDriver};
pub use bridge::BridgeDriver;
pub use dialect::Dialect;
pub use registry::DriverRegistry;
pub use webjs::{WebJsDialect, WebJsDriver};
