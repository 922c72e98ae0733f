// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Zapline session supervisor.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// The primary error type used across driver, storage, and supervisor operations.
#[derive(Debug, Error)]
pub enum ZaplineError {
    /// A live session already exists for the connection id.
    #[error("connection already exists: {connection_id}")]
    AlreadyExists { connection_id: String },

    /// No live session exists for the connection id.
    #[error("connection not found: {connection_id}")]
    NotFound { connection_id: String },

    /// The session (or its underlying link) is not in the connected state.
    #[error("connection not connected: {connection_id}")]
    NotConnected { connection_id: String },

    /// The engine rejected a send at protocol level.
    #[error("send failed: {message}")]
    SendFailed {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Credentials were rejected by the remote service.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Configuration errors (unknown driver kind, malformed credentials, bad endpoint).
    #[error("configuration error: {0}")]
    Config(String),

    /// A command or request payload did not have the expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ZaplineError {
    /// Returns the stable wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::NotConnected { .. } => ErrorCode::NotConnected,
            Self::SendFailed { .. } => ErrorCode::SendFailed,
            Self::AuthFailure(_) => ErrorCode::AuthFailure,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::InvalidPayload(_) => ErrorCode::InvalidPayload,
            Self::Storage { .. } => ErrorCode::StorageError,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Shorthand for a [`ZaplineError::SendFailed`] without a source.
    pub fn send_failed(message: impl Into<String>) -> Self {
        Self::SendFailed {
            message: message.into(),
            source: None,
        }
    }
}

/// Stable string codes that clients branch on instead of matching prose.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    AlreadyExists,
    NotFound,
    NotConnected,
    SendFailed,
    AuthFailure,
    Timeout,
    ConfigError,
    InvalidPayload,
    StorageError,
    /// A subscriber's queue overflowed and events were discarded.
    EventsDropped,
    Internal,
}
