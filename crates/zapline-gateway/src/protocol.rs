// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire frames exchanged with WebSocket clients.
//!
//! Client -> Server (JSON):
//! ```json
//! {"type": "create_connection", "requestId": "r1", "connectionId": "c1", "driver": "baileys"}
//! {"type": "send_message", "connectionId": "c1", "to": "5511999999999", "message": "hi"}
//! ```
//!
//! Server -> Client (JSON):
//! ```json
//! {"type": "qr_code", "connectionId": "c1", "qr": "2@..."}
//! {"type": "connection_status", "connectionId": "c1", "status": "connected", "phoneNumber": "5511..."}
//! {"type": "ack", "requestId": "r1", "command": "create_connection", "connectionId": "c1"}
//! {"type": "error", "requestId": "r1", "connectionId": "c1", "code": "already_exists", "message": "..."}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use zapline_core::{
    CanonicalEvent, CloseReason, ConnectionStatus, ErrorCode, EventKind, InboundMessage,
    OutboundMessage, ZaplineError,
};
use zapline_supervisor::SessionSnapshot;

/// One client command with its optional correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandFrame {
    #[serde(default, rename = "requestId")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub command: ClientCommand,
}

/// Commands a client may issue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    #[serde(rename_all = "camelCase")]
    CreateConnection {
        connection_id: String,
        #[serde(default)]
        driver: Option<String>,
        #[serde(default)]
        tenant_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    DisconnectConnection { connection_id: String },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        connection_id: String,
        to: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    GetConnectionStatus { connection_id: String },
}

impl ClientCommand {
    /// Wire name of the command, echoed in acks.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateConnection { .. } => "create_connection",
            Self::DisconnectConnection { .. } => "disconnect_connection",
            Self::SendMessage { .. } => "send_message",
            Self::GetConnectionStatus { .. } => "get_connection_status",
        }
    }

    pub fn connection_id(&self) -> &str {
        match self {
            Self::CreateConnection { connection_id, .. }
            | Self::DisconnectConnection { connection_id }
            | Self::SendMessage { connection_id, .. }
            | Self::GetConnectionStatus { connection_id } => connection_id,
        }
    }
}

/// Frames sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    QrCode { connection_id: String, qr: String },
    #[serde(rename_all = "camelCase")]
    ConnectionStatus {
        connection_id: String,
        status: ConnectionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        phone_number: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<CloseReason>,
    },
    #[serde(rename_all = "camelCase")]
    NewMessage {
        connection_id: String,
        message: InboundMessage,
    },
    #[serde(rename_all = "camelCase")]
    MessageSent {
        connection_id: String,
        message: OutboundMessage,
    },
    #[serde(rename_all = "camelCase")]
    Ack {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        command: String,
        connection_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        connection_id: Option<String>,
        code: ErrorCode,
        message: String,
    },
}

impl ServerFrame {
    pub fn from_event(event: &CanonicalEvent) -> Self {
        let connection_id = event.connection_id.to_string();
        match &event.kind {
            EventKind::QrIssued { qr } => Self::QrCode {
                connection_id,
                qr: qr.clone(),
            },
            EventKind::StatusChanged {
                status,
                phone_number,
                reason,
            } => Self::ConnectionStatus {
                connection_id,
                status: *status,
                phone_number: phone_number.clone(),
                reason: reason.clone(),
            },
            EventKind::MessageReceived { message } => Self::NewMessage {
                connection_id,
                message: message.clone(),
            },
            EventKind::MessageSent { message } => Self::MessageSent {
                connection_id,
                message: message.clone(),
            },
            EventKind::Failure { code, message } => Self::Error {
                request_id: None,
                connection_id: (!connection_id.is_empty()).then_some(connection_id),
                code: *code,
                message: message.clone(),
            },
        }
    }

    /// Current state of a session as replayed to a newly connected client.
    pub fn replay(snapshot: &SessionSnapshot) -> Vec<Self> {
        let connection_id = snapshot.connection_id.to_string();
        let mut frames = vec![Self::ConnectionStatus {
            connection_id: connection_id.clone(),
            status: snapshot.status,
            phone_number: snapshot.phone_number.clone(),
            reason: None,
        }];
        if snapshot.status == ConnectionStatus::AwaitingScan {
            if let Some(qr) = &snapshot.qr {
                frames.push(Self::QrCode {
                    connection_id,
                    qr: qr.clone(),
                });
            }
        }
        frames
    }

    pub fn ack(
        request_id: Option<String>,
        command: &ClientCommand,
        data: Option<Value>,
    ) -> Self {
        Self::Ack {
            request_id,
            command: command.name().to_string(),
            connection_id: command.connection_id().to_string(),
            data,
        }
    }

    pub fn error(
        request_id: Option<String>,
        connection_id: Option<String>,
        err: &ZaplineError,
    ) -> Self {
        Self::Error {
            request_id,
            connection_id,
            code: err.code(),
            message: err.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        // Every field serializes infallibly.
        serde_json::to_string(self).unwrap_or_default()
    }
}
