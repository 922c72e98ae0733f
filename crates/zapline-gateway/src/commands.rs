// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Executes client commands against the supervisor.
//!
//! Shared by the WebSocket loop and the HTTP handlers so both surfaces
//! produce identical results.

use std::str::FromStr;

use serde_json::{Value, json};

use zapline_core::{ConnectionId, DriverKind, TenantId, ZaplineError};
use zapline_supervisor::{CreateRequest, Supervisor};

use crate::protocol::ClientCommand;

/// Parse a wire driver name. Unknown names are configuration errors.
pub fn parse_driver(name: Option<&str>) -> Result<Option<DriverKind>, ZaplineError> {
    name.map(|n| {
        DriverKind::from_str(n).map_err(|_| ZaplineError::Config(format!("unknown driver kind: {n}")))
    })
    .transpose()
}

/// Build a create request from the wire fields.
pub fn create_request(
    connection_id: &str,
    driver: Option<&str>,
    tenant_id: Option<&str>,
    name: Option<&str>,
) -> Result<CreateRequest, ZaplineError> {
    let mut request = CreateRequest::new(connection_id);
    if let Some(kind) = parse_driver(driver)? {
        request = request.with_driver(kind);
    }
    if let Some(tenant) = tenant_id.filter(|t| !t.is_empty()) {
        request = request.with_tenant(TenantId::from(tenant));
    }
    request.display_name = name.map(str::to_string);
    Ok(request)
}

/// Run one command. Returns the optional `data` payload of the ack.
pub async fn execute(
    supervisor: &Supervisor,
    command: &ClientCommand,
) -> Result<Option<Value>, ZaplineError> {
    match command {
        ClientCommand::CreateConnection {
            connection_id,
            driver,
            tenant_id,
            name,
        } => {
            let request = create_request(
                connection_id,
                driver.as_deref(),
                tenant_id.as_deref(),
                name.as_deref(),
            )?;
            let session = supervisor.create_connection(request).await?;
            Ok(Some(to_value(&session.current_state())))
        }
        ClientCommand::DisconnectConnection { connection_id } => {
            supervisor
                .disconnect_connection(&ConnectionId::from(connection_id.as_str()))
                .await?;
            Ok(None)
        }
        ClientCommand::SendMessage {
            connection_id,
            to,
            message,
        } => {
            let ack = supervisor
                .send_message(&ConnectionId::from(connection_id.as_str()), to, message)
                .await?;
            Ok(Some(json!({
                "messageId": ack.message_id,
                "timestamp": ack.timestamp,
            })))
        }
        ClientCommand::GetConnectionStatus { connection_id } => {
            let id = ConnectionId::from(connection_id.as_str());
            let session = supervisor
                .get_session(&id)
                .ok_or_else(|| ZaplineError::NotFound {
                    connection_id: connection_id.clone(),
                })?;
            Ok(Some(to_value(&session.current_state())))
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
