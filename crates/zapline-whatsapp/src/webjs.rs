// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! whatsapp-web.js dialect.
//!
//! The sidecar forwards the client's `qr`, `authenticated`, `auth_failure`,
//! `ready`, `disconnected`, `message` and `remote_session_saved` events.

use serde_json::Value;
use tracing::{debug, warn};
use zapline_core::{CloseReason, DriverEvent, DriverKind, DriverStatus, InboundMessage};

use crate::bridge::BridgeDriver;
use crate::dialect::{credential_blob, parse_timestamp, phone_from_jid, Dialect};

/// Driver for the whatsapp-web.js engine.
pub type WebJsDriver = BridgeDriver<WebJsDialect>;

#[derive(Debug, Default, Clone, Copy)]
pub struct WebJsDialect;

impl Dialect for WebJsDialect {
    const KIND: DriverKind = DriverKind::WebJs;

    fn jid_suffix(&self) -> &'static str {
        "@c.us"
    }

    fn translate(&self, event: &str, data: &Value) -> Vec<DriverEvent> {
        match event {
            "qr" => data
                .get("qr")
                .or(Some(data))
                .and_then(Value::as_str)
                .map(|qr| DriverEvent::Qr(qr.to_string()))
                .into_iter()
                .collect(),
            "authenticated" => {
                let mut events = vec![DriverEvent::StatusChanged(DriverStatus::Authenticating)];
                if let Some(blob) = data.get("session").and_then(credential_blob) {
                    events.push(DriverEvent::CredentialsRotated(blob));
                }
                events
            }
            "remote_session_saved" => data
                .get("session")
                .and_then(credential_blob)
                .map(DriverEvent::CredentialsRotated)
                .into_iter()
                .collect(),
            "ready" => {
                let wid = data
                    .get("wid")
                    .or_else(|| data.pointer("/info/wid"))
                    .unwrap_or(&Value::Null);
                let jid = wid
                    .get("_serialized")
                    .and_then(Value::as_str)
                    .or_else(|| wid.as_str())
                    .map(str::to_string);
                let phone_number = wid
                    .get("user")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| jid.as_deref().map(phone_from_jid))
                    .filter(|phone| !phone.is_empty());
                let Some(phone_number) = phone_number else {
                    warn!("webjs reported ready without an account identity");
                    return Vec::new();
                };
                let jid = jid.unwrap_or_else(|| format!("{phone_number}@c.us"));
                vec![DriverEvent::StatusChanged(DriverStatus::Connected {
                    phone_number,
                    jid,
                })]
            }
            "auth_failure" => vec![DriverEvent::StatusChanged(DriverStatus::Disconnected(
                CloseReason::AuthFailure,
            ))],
            "disconnected" => {
                let reason = data
                    .get("reason")
                    .or(Some(data))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                vec![DriverEvent::StatusChanged(DriverStatus::Disconnected(
                    close_reason(reason),
                ))]
            }
            "message" => inbound_message(data).into_iter().collect(),
            other => {
                debug!(event = other, "ignoring webjs event");
                Vec::new()
            }
        }
    }
}

/// Map a whatsapp-web.js `WAState` disconnect reason.
pub fn close_reason(reason: &str) -> CloseReason {
    match reason {
        "LOGOUT" | "UNPAIRED" | "UNPAIRED_IDLE" => CloseReason::LoggedOut,
        "CONFLICT" => CloseReason::ConnectionReplaced,
        "TIMEOUT" => CloseReason::Timeout,
        "" | "NAVIGATION" | "CONNECTION_LOST" => CloseReason::ConnectionLost,
        other => CloseReason::Other(other.to_lowercase()),
    }
}

fn inbound_message(data: &Value) -> Option<DriverEvent> {
    let id = data
        .pointer("/id/_serialized")
        .or_else(|| data.get("id"))
        .and_then(Value::as_str)?;
    let from = data.get("from").and_then(Value::as_str)?;
    let body = data.get("body").and_then(Value::as_str).unwrap_or_default();

    Some(DriverEvent::MessageReceived(InboundMessage {
        id: id.to_string(),
        from: from.to_string(),
        to: data.get("to").and_then(Value::as_str).map(str::to_string),
        from_me: data.get("fromMe").and_then(Value::as_bool).unwrap_or(false),
        body: body.to_string(),
        timestamp: parse_timestamp(data.get("timestamp")),
        push_name: data
            .get("notifyName")
            .and_then(Value::as_str)
            .map(str::to_string),
    }))
}
