// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by drivers, sessions, the broadcaster, and the gateway.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ErrorCode;

/// Stable, externally assigned identifier of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of the tenant that owns a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Supported WhatsApp client engines.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum DriverKind {
    #[serde(rename = "baileys")]
    #[strum(serialize = "baileys")]
    Baileys,
    #[serde(rename = "webjs", alias = "web.js")]
    #[strum(to_string = "webjs", serialize = "web.js")]
    WebJs,
}

/// Canonical lifecycle status of a connection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionStatus {
    Initializing,
    /// A QR code was issued and is waiting to be scanned.
    #[serde(rename = "qr_ready")]
    #[strum(to_string = "qr_ready")]
    AwaitingScan,
    Authenticating,
    Connected,
    Reconnecting,
    Disconnected,
}

/// Why a driver link closed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CloseReason {
    /// The phone unlinked this device or an explicit logout happened.
    LoggedOut,
    /// The remote service rejected the stored credentials.
    AuthFailure,
    ConnectionLost,
    Timeout,
    /// Another client opened the same session.
    ConnectionReplaced,
    RestartRequired,
    Other(String),
}

impl CloseReason {
    /// Definitive reasons must never be retried.
    pub fn is_definitive(&self) -> bool {
        matches!(self, Self::LoggedOut | Self::AuthFailure)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::LoggedOut => "logged-out",
            Self::AuthFailure => "auth-failure",
            Self::ConnectionLost => "connection-lost",
            Self::Timeout => "timeout",
            Self::ConnectionReplaced => "connection-replaced",
            Self::RestartRequired => "restart-required",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for CloseReason {
    fn from(s: String) -> Self {
        match s.as_str() {
            "logged-out" => Self::LoggedOut,
            "auth-failure" => Self::AuthFailure,
            "connection-lost" => Self::ConnectionLost,
            "timeout" => Self::Timeout,
            "connection-replaced" => Self::ConnectionReplaced,
            "restart-required" => Self::RestartRequired,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for CloseReason {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<CloseReason> for String {
    fn from(reason: CloseReason) -> Self {
        reason.as_str().to_string()
    }
}

/// A message received on a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Engine-assigned message id.
    pub id: String,
    /// Sender jid.
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub from_me: bool,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
}

/// A message successfully handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub id: String,
    pub to: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgement returned by a driver for an accepted send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendAck {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Durable pairing material for one connection and driver kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub connection_id: ConnectionId,
    pub driver: DriverKind,
    /// Opaque, driver-specific JSON text.
    pub blob: String,
    pub updated_at: DateTime<Utc>,
}

/// Durable view of a connection as written through to the relational store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub driver: DriverKind,
    pub tenant_id: Option<TenantId>,
    pub display_name: Option<String>,
    pub status: ConnectionStatus,
    pub phone_number: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// The normalized event every driver callback is translated into.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEvent {
    pub connection_id: ConnectionId,
    pub tenant_id: Option<TenantId>,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl CanonicalEvent {
    pub fn new(connection_id: ConnectionId, tenant_id: Option<TenantId>, kind: EventKind) -> Self {
        Self {
            connection_id,
            tenant_id,
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Kind-specific payload of a [`CanonicalEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    QrIssued {
        qr: String,
    },
    StatusChanged {
        status: ConnectionStatus,
        phone_number: Option<String>,
        reason: Option<CloseReason>,
    },
    MessageReceived {
        message: InboundMessage,
    },
    MessageSent {
        message: OutboundMessage,
    },
    Failure {
        code: ErrorCode,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn driver_kind_accepts_both_webjs_spellings() {
        assert_eq!(DriverKind::from_str("webjs").unwrap(), DriverKind::WebJs);
        assert_eq!(DriverKind::from_str("web.js").unwrap(), DriverKind::WebJs);
        assert_eq!(DriverKind::WebJs.to_string(), "webjs");
        let parsed: DriverKind = serde_json::from_str("\"web.js\"").unwrap();
        assert_eq!(parsed, DriverKind::WebJs);
        assert!(DriverKind::from_str("telegram").is_err());
    }

    #[test]
    fn awaiting_scan_uses_qr_ready_on_the_wire() {
        assert_eq!(ConnectionStatus::AwaitingScan.to_string(), "qr_ready");
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::AwaitingScan).unwrap(),
            "\"qr_ready\""
        );
        assert_eq!(
            ConnectionStatus::from_str("reconnecting").unwrap(),
            ConnectionStatus::Reconnecting
        );
    }

    #[test]
    fn only_logout_and_auth_failure_are_definitive() {
        assert!(CloseReason::LoggedOut.is_definitive());
        assert!(CloseReason::AuthFailure.is_definitive());
        for reason in [
            CloseReason::ConnectionLost,
            CloseReason::Timeout,
            CloseReason::ConnectionReplaced,
            CloseReason::RestartRequired,
            CloseReason::Other("navigation".into()),
        ] {
            assert!(!reason.is_definitive(), "{reason} must be transient");
        }
    }

    #[test]
    fn close_reason_wire_strings() {
        assert_eq!(CloseReason::from("logged-out"), CloseReason::LoggedOut);
        assert_eq!(
            CloseReason::from("something-else"),
            CloseReason::Other("something-else".into())
        );
        let json = serde_json::to_string(&CloseReason::ConnectionLost).unwrap();
        assert_eq!(json, "\"connection-lost\"");
    }

    #[test]
    fn inbound_message_serializes_camel_case() {
        let msg = InboundMessage {
            id: "ABC".into(),
            from: "5511999999999@s.whatsapp.net".into(),
            to: None,
            from_me: false,
            body: "hi".into(),
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            push_name: Some("Ana".into()),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["fromMe"], false);
        assert_eq!(value["pushName"], "Ana");
        assert!(value.get("to").is_none());
    }
}
