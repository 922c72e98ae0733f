// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command gateway for the Zapline session supervisor.
//!
//! Exposes the supervisor over an axum server: a WebSocket at `/ws` that
//! streams canonical events and accepts commands, and a small JSON HTTP API
//! for the same operations. Bearer token auth guards everything except
//! `/health` and `/metrics`.

pub mod auth;
pub mod commands;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod ws;

pub use auth::AuthConfig;
pub use protocol::{ClientCommand, CommandFrame, ServerFrame};
pub use server::{GatewayState, HealthState, ServerConfig, build_router, serve, start_server};
