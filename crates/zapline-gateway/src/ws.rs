// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket handler: event stream plus command channel.
//!
//! `GET /ws?token=..&connectionId=..&tenantId=..`
//!
//! The client is subscribed to the event bus before anything else, then the
//! current state of every matching session is replayed, then live events
//! follow. Commands read from the socket are answered to this client only.
//! See [`crate::protocol`] for the frame shapes.

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::atomic::Ordering;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use zapline_bus::SubscriptionFilter;
use zapline_core::{ConnectionId, TenantId, ZaplineError};
use zapline_supervisor::SessionSnapshot;

use crate::commands;
use crate::protocol::{CommandFrame, ServerFrame};
use crate::server::GatewayState;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl WsParams {
    /// Connection scope wins over tenant scope; neither means everything.
    pub fn filter(&self) -> SubscriptionFilter {
        if let Some(id) = self.connection_id.as_deref().filter(|s| !s.is_empty()) {
            SubscriptionFilter::Connection(ConnectionId::from(id))
        } else if let Some(tenant) = self.tenant_id.as_deref().filter(|s| !s.is_empty()) {
            SubscriptionFilter::Tenant(TenantId::from(tenant))
        } else {
            SubscriptionFilter::All
        }
    }
}

fn admits(filter: &SubscriptionFilter, snapshot: &SessionSnapshot) -> bool {
    match filter {
        SubscriptionFilter::All => true,
        SubscriptionFilter::Connection(id) => snapshot.connection_id == *id,
        SubscriptionFilter::Tenant(tenant) => snapshot.tenant_id.as_ref() == Some(tenant),
    }
}

/// WebSocket upgrade handler. Rejects with 401 before upgrading on a bad token.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<GatewayState>,
) -> Response {
    if !state.auth.accepts_token(params.token.as_deref()) {
        tracing::debug!("rejected websocket upgrade with bad token");
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let filter = params.filter();
    ws.on_upgrade(move |socket| handle_socket(socket, state, filter))
}

/// Handle an individual WebSocket connection.
///
/// Spawns two tasks:
/// 1. Sender task: writes queued frames to the socket
/// 2. Forwarder task: turns bus events into frames
///
/// and reads commands on the current task. Each command runs on its own task,
/// so a slow send or logout never holds up the commands behind it; replies
/// carry the `requestId` and may arrive out of order.
async fn handle_socket(socket: WebSocket, state: GatewayState, filter: SubscriptionFilter) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let ws_id = uuid::Uuid::new_v4().to_string();

    let subscription = state.supervisor.bus().subscribe(filter.clone());
    let cancel = subscription.cancel_handle();

    let (tx, mut rx) = mpsc::channel::<String>(64);
    state.ws_clients.fetch_add(1, Ordering::AcqRel);
    tracing::debug!(ws_id = %ws_id, filter = ?filter, "websocket client connected");

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    for session in state.supervisor.sessions() {
        let snapshot = session.current_state();
        if !admits(&filter, &snapshot) {
            continue;
        }
        for frame in ServerFrame::replay(&snapshot) {
            if tx.send(frame.to_json()).await.is_err() {
                break;
            }
        }
    }

    let events_tx = tx.clone();
    let forwarder_task = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let frame = ServerFrame::from_event(&event);
            if events_tx.send(frame.to_json()).await.is_err() {
                break;
            }
        }
    });

    let mut in_flight = JoinSet::new();
    loop {
        let msg = tokio::select! {
            msg = ws_receiver.next() => msg,
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => continue,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                let state = state.clone();
                let replies = tx.clone();
                in_flight.spawn(async move {
                    let reply = handle_text(&state, &text).await;
                    let _ = replies.send(reply.to_json()).await;
                });
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(_)) => {} // Binary and pings are not part of the protocol.
        }
    }

    // Cleanup.
    in_flight.abort_all();
    cancel.cancel();
    state.ws_clients.fetch_sub(1, Ordering::AcqRel);
    forwarder_task.abort();
    sender_task.abort();
    tracing::debug!(ws_id = %ws_id, "websocket client disconnected");
}

/// Parse and run one command frame, producing the reply for the requester.
async fn handle_text(state: &GatewayState, text: &str) -> ServerFrame {
    let frame: CommandFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(error = %e, "invalid websocket frame");
            let request_id = serde_json::from_str::<Value>(text).ok().and_then(|v| {
                v.get("requestId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
            return ServerFrame::error(
                request_id,
                None,
                &ZaplineError::InvalidPayload(e.to_string()),
            );
        }
    };

    match commands::execute(&state.supervisor, &frame.command).await {
        Ok(data) => ServerFrame::ack(frame.request_id, &frame.command, data),
        Err(e) => {
            tracing::debug!(
                command = frame.command.name(),
                connection_id = frame.command.connection_id(),
                error = %e,
                "websocket command failed"
            );
            ServerFrame::error(
                frame.request_id,
                Some(frame.command.connection_id().to_string()),
                &e,
            )
        }
    }
}
