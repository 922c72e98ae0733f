// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Baileys dialect.
//!
//! The sidecar forwards the socket's `connection.update`, `creds.update`
//! and `messages.upsert` events verbatim.

use serde_json::Value;
use tracing::{debug, warn};
use zapline_core::{
    CloseReason, DriverEvent, DriverKind, DriverStatus, InboundMessage,
};

use crate::bridge::BridgeDriver;
use crate::dialect::{credential_blob, parse_timestamp, phone_from_jid, Dialect};

/// Driver for the Baileys engine.
pub type BaileysDriver = BridgeDriver<BaileysDialect>;

#[derive(Debug, Default, Clone, Copy)]
pub struct BaileysDialect;

impl Dialect for BaileysDialect {
    const KIND: DriverKind = DriverKind::Baileys;

    fn jid_suffix(&self) -> &'static str {
        "@s.whatsapp.net"
    }

    fn translate(&self, event: &str, data: &Value) -> Vec<DriverEvent> {
        match event {
            "connection.update" => connection_update(data),
            "creds.update" => {
                let creds = data.get("creds").unwrap_or(data);
                credential_blob(creds)
                    .map(DriverEvent::CredentialsRotated)
                    .into_iter()
                    .collect()
            }
            "messages.upsert" => messages_upsert(data),
            other => {
                debug!(event = other, "ignoring baileys event");
                Vec::new()
            }
        }
    }
}

fn connection_update(data: &Value) -> Vec<DriverEvent> {
    let mut events = Vec::new();

    if let Some(qr) = data.get("qr").and_then(Value::as_str) {
        events.push(DriverEvent::Qr(qr.to_string()));
    }
    if data.get("isNewLogin").and_then(Value::as_bool) == Some(true) {
        events.push(DriverEvent::StatusChanged(DriverStatus::Authenticating));
    }

    match data.get("connection").and_then(Value::as_str) {
        Some("open") => {
            let phone_number = data
                .pointer("/me/id")
                .and_then(Value::as_str)
                .map(phone_from_jid)
                .filter(|phone| !phone.is_empty());
            // Stay put until an update names the account.
            match phone_number {
                Some(phone_number) => {
                    let jid = format!("{phone_number}@s.whatsapp.net");
                    events.push(DriverEvent::StatusChanged(DriverStatus::Connected {
                        phone_number,
                        jid,
                    }));
                }
                None => warn!("baileys reported open without an account identity"),
            }
        }
        Some("close") => {
            let status = data
                .pointer("/lastDisconnect/statusCode")
                .or_else(|| data.pointer("/lastDisconnect/error/output/statusCode"))
                .and_then(Value::as_u64);
            events.push(DriverEvent::StatusChanged(DriverStatus::Disconnected(
                close_reason(status),
            )));
        }
        _ => {}
    }

    events
}

/// Map a Baileys `DisconnectReason` status code.
pub fn close_reason(status: Option<u64>) -> CloseReason {
    match status {
        Some(401) => CloseReason::LoggedOut,
        // forbidden / bad session: the stored credentials are unusable
        Some(403) | Some(500) => CloseReason::AuthFailure,
        Some(408) => CloseReason::Timeout,
        Some(428) => CloseReason::ConnectionLost,
        Some(440) => CloseReason::ConnectionReplaced,
        Some(515) => CloseReason::RestartRequired,
        Some(code) => CloseReason::Other(format!("status-{code}")),
        None => CloseReason::ConnectionLost,
    }
}

fn messages_upsert(data: &Value) -> Vec<DriverEvent> {
    let Some(messages) = data.get("messages").and_then(Value::as_array) else {
        return Vec::new();
    };
    messages.iter().filter_map(inbound_message).collect()
}

fn inbound_message(msg: &Value) -> Option<DriverEvent> {
    let body = msg
        .pointer("/message/conversation")
        .or_else(|| msg.pointer("/message/extendedTextMessage/text"))
        .and_then(Value::as_str)?;
    let from = msg.pointer("/key/remoteJid").and_then(Value::as_str)?;
    let id = msg.pointer("/key/id").and_then(Value::as_str)?;

    Some(DriverEvent::MessageReceived(InboundMessage {
        id: id.to_string(),
        from: from.to_string(),
        to: None,
        from_me: msg
            .pointer("/key/fromMe")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        body: body.to_string(),
        timestamp: parse_timestamp(msg.get("messageTimestamp")),
        push_name: msg
            .get("pushName")
            .and_then(Value::as_str)
            .map(str::to_string),
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn translate(event: &str, data: Value) -> Vec<DriverEvent> {
        BaileysDialect.translate(event, &data)
    }

    #[test]
    fn qr_update() {
        let events = translate("connection.update", json!({"qr": "2@abc,def"}));
        assert_eq!(events, vec![DriverEvent::Qr("2@abc,def".into())]);
    }

    #[test]
    fn open_reports_phone_without_device_suffix() {
        let events = translate(
            "connection.update",
            json!({"connection": "open", "me": {"id": "5511999999999:7@s.whatsapp.net"}}),
        );
        assert_eq!(
            events,
            vec![DriverEvent::StatusChanged(DriverStatus::Connected {
                phone_number: "5511999999999".into(),
                jid: "5511999999999@s.whatsapp.net".into(),
            })]
        );
    }

    #[test]
    fn open_without_identity_is_held_back() {
        assert!(translate("connection.update", json!({"connection": "open"})).is_empty());
        assert!(
            translate(
                "connection.update",
                json!({"connection": "open", "me": {"id": ""}}),
            )
            .is_empty()
        );
    }

    #[test]
    fn new_login_then_connecting_is_authenticating() {
        let events = translate(
            "connection.update",
            json!({"connection": "connecting", "isNewLogin": true}),
        );
        assert_eq!(
            events,
            vec![DriverEvent::StatusChanged(DriverStatus::Authenticating)]
        );
    }

    #[test]
    fn close_codes_map_to_reasons() {
        let logged_out = translate(
            "connection.update",
            json!({"connection": "close", "lastDisconnect": {"error": {"output": {"statusCode": 401}}}}),
        );
        assert_eq!(
            logged_out,
            vec![DriverEvent::StatusChanged(DriverStatus::Disconnected(
                CloseReason::LoggedOut
            ))]
        );

        assert_eq!(close_reason(Some(515)), CloseReason::RestartRequired);
        assert_eq!(close_reason(Some(440)), CloseReason::ConnectionReplaced);
        assert_eq!(close_reason(Some(500)), CloseReason::AuthFailure);
        assert_eq!(close_reason(None), CloseReason::ConnectionLost);
        assert!(!close_reason(Some(503)).is_definitive());
    }

    #[test]
    fn creds_update_carries_the_creds_object() {
        let events = translate("creds.update", json!({"creds": {"me": {"id": "x"}}}));
        assert_eq!(
            events,
            vec![DriverEvent::CredentialsRotated(r#"{"me":{"id":"x"}}"#.into())]
        );
    }

    #[test]
    fn upsert_yields_one_event_per_text_message() {
        let events = translate(
            "messages.upsert",
            json!({
                "type": "notify",
                "messages": [
                    {
                        "key": {"remoteJid": "5511888@s.whatsapp.net", "fromMe": false, "id": "A1"},
                        "message": {"conversation": "oi"},
                        "messageTimestamp": 1_700_000_000,
                        "pushName": "Ana"
                    },
                    {
                        "key": {"remoteJid": "5511888@s.whatsapp.net", "fromMe": true, "id": "A2"},
                        "message": {"extendedTextMessage": {"text": "hello"}}
                    },
                    {
                        "key": {"remoteJid": "5511888@s.whatsapp.net", "id": "A3"},
                        "message": {"imageMessage": {}}
                    }
                ]
            }),
        );
        assert_eq!(events.len(), 2);
        match &events[0] {
            DriverEvent::MessageReceived(m) => {
                assert_eq!(m.id, "A1");
                assert_eq!(m.body, "oi");
                assert!(!m.from_me);
                assert_eq!(m.push_name.as_deref(), Some("Ana"));
                assert_eq!(m.timestamp.timestamp(), 1_700_000_000);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &events[1] {
            DriverEvent::MessageReceived(m) => assert!(m.from_me),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn targets_become_user_jids() {
        assert_eq!(
            BaileysDialect.normalize_target("+55 (11) 99999-9999"),
            "5511999999999@s.whatsapp.net"
        );
        assert_eq!(
            BaileysDialect.normalize_target("12036304@g.us"),
            "12036304@g.us"
        );
    }
}
