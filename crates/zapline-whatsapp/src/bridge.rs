// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket bridge to an engine sidecar.
//!
//! Each session holds one socket to `{endpoint}/sessions/{connection_id}`.
//!
//! Driver -> sidecar (JSON):
//! ```json
//! {"op": "start", "credentials": {...} | null}
//! {"op": "send", "requestId": "...", "to": "5511...@s.whatsapp.net", "text": "hi"}
//! {"op": "logout"}
//! ```
//!
//! Sidecar -> driver (JSON):
//! ```json
//! {"event": "<native event name>", "data": {...}}
//! {"event": "send.result", "data": {"requestId": "...", "ok": true, "id": "...", "timestamp": 1700000000}}
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use zapline_config::model::DriverEndpointConfig;
use zapline_core::{
    CloseReason, ConnectionId, Driver, DriverEvent, DriverEventStream, DriverKind, DriverStatus,
    SendAck, ZaplineError,
};

use crate::dialect::Dialect;

const EVENT_BUFFER: usize = 64;
const COMMAND_BUFFER: usize = 32;
const SEND_RESULT_EVENT: &str = "send.result";

/// Frames written to the sidecar.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum OutboundFrame<'a> {
    Start {
        credentials: Option<Value>,
    },
    Send {
        #[serde(rename = "requestId")]
        request_id: &'a str,
        to: &'a str,
        text: &'a str,
    },
    Logout,
}

impl OutboundFrame<'_> {
    fn to_text(&self) -> Result<String, ZaplineError> {
        serde_json::to_string(self)
            .map_err(|e| ZaplineError::Internal(format!("failed to encode bridge frame: {e}")))
    }
}

/// Frames read from the sidecar.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResult {
    request_id: String,
    ok: bool,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

type PendingSends = Arc<DashMap<String, oneshot::Sender<SendResult>>>;

enum Command {
    Frame(String),
    Logout(String),
}

/// One live socket and the task pumping it.
struct Link {
    commands: mpsc::Sender<Command>,
    pending: PendingSends,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// A [`Driver`] speaking the bridge protocol in the given engine dialect.
pub struct BridgeDriver<D: Dialect> {
    connection_id: ConnectionId,
    url: String,
    send_timeout: Duration,
    dialect: Arc<D>,
    link: Mutex<Option<Link>>,
}

impl<D: Dialect + Default> BridgeDriver<D> {
    /// Fails with [`ZaplineError::Config`] when the endpoint is not a ws:// or wss:// URL.
    pub fn new(
        connection_id: ConnectionId,
        config: &DriverEndpointConfig,
    ) -> Result<Self, ZaplineError> {
        Self::with_dialect(connection_id, config, D::default())
    }
}

impl<D: Dialect> BridgeDriver<D> {
    pub fn with_dialect(
        connection_id: ConnectionId,
        config: &DriverEndpointConfig,
        dialect: D,
    ) -> Result<Self, ZaplineError> {
        let base = config.endpoint.trim().trim_end_matches('/');
        if !(base.starts_with("ws://") || base.starts_with("wss://")) {
            return Err(ZaplineError::Config(format!(
                "{} endpoint `{base}` must be a ws:// or wss:// URL",
                D::KIND
            )));
        }
        let url = format!("{base}/sessions/{connection_id}");
        Ok(Self {
            connection_id,
            url,
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            dialect: Arc::new(dialect),
            link: Mutex::new(None),
        })
    }

    /// The per-session sidecar URL.
    pub fn session_url(&self) -> &str {
        &self.url
    }

    fn lock_link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_link(&self) -> Option<Link> {
        self.lock_link().take()
    }

    fn not_connected(&self) -> ZaplineError {
        ZaplineError::NotConnected {
            connection_id: self.connection_id.to_string(),
        }
    }
}

impl<D: Dialect> Drop for BridgeDriver<D> {
    fn drop(&mut self) {
        if let Some(link) = self.take_link() {
            link.cancel.cancel();
        }
    }
}

#[async_trait]
impl<D: Dialect> Driver for BridgeDriver<D> {
    fn kind(&self) -> DriverKind {
        D::KIND
    }

    async fn open(&self, credentials: Option<String>) -> Result<DriverEventStream, ZaplineError> {
        let credentials = credentials
            .map(|blob| {
                serde_json::from_str::<Value>(&blob).map_err(|e| {
                    ZaplineError::Config(format!(
                        "malformed stored credentials for {}: {e}",
                        self.connection_id
                    ))
                })
            })
            .transpose()?;
        let start = OutboundFrame::Start { credentials }.to_text()?;

        if let Some(previous) = self.take_link() {
            previous.cancel.cancel();
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let pending: PendingSends = Arc::new(DashMap::new());
        let connected = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_link(LinkTask {
            connection_id: self.connection_id.clone(),
            url: self.url.clone(),
            start,
            dialect: Arc::clone(&self.dialect),
            events: events_tx,
            commands: commands_rx,
            pending: Arc::clone(&pending),
            connected: Arc::clone(&connected),
            cancel: cancel.clone(),
        }));

        *self.lock_link() = Some(Link {
            commands: commands_tx,
            pending,
            connected,
            cancel,
            task,
        });

        debug!(connection_id = %self.connection_id, driver = %D::KIND, "bridge link opening");
        let stream =
            futures::stream::unfold(events_rx, |mut rx| async move { rx.recv().await.map(|ev| (ev, rx)) });
        Ok(Box::pin(stream))
    }

    async fn send(&self, target: &str, content: &str) -> Result<SendAck, ZaplineError> {
        let (commands, pending) = {
            let guard = self.lock_link();
            match guard.as_ref() {
                Some(link) if link.connected.load(Ordering::Acquire) => {
                    (link.commands.clone(), Arc::clone(&link.pending))
                }
                _ => return Err(self.not_connected()),
            }
        };

        let request_id = uuid::Uuid::new_v4().to_string();
        let to = self.dialect.normalize_target(target);
        let frame = OutboundFrame::Send {
            request_id: &request_id,
            to: &to,
            text: content,
        }
        .to_text()?;

        let (tx, rx) = oneshot::channel();
        pending.insert(request_id.clone(), tx);
        if commands.send(Command::Frame(frame)).await.is_err() {
            pending.remove(&request_id);
            return Err(self.not_connected());
        }

        match tokio::time::timeout(self.send_timeout, rx).await {
            Err(_) => {
                pending.remove(&request_id);
                Err(ZaplineError::send_failed(format!(
                    "no acknowledgement within {:?}",
                    self.send_timeout
                )))
            }
            Ok(Err(_)) => Err(ZaplineError::send_failed(
                "link closed before acknowledgement",
            )),
            Ok(Ok(result)) if result.ok => Ok(SendAck {
                message_id: result.id.unwrap_or(request_id),
                timestamp: result
                    .timestamp
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
                    .unwrap_or_else(Utc::now),
            }),
            Ok(Ok(result)) => Err(ZaplineError::send_failed(
                result
                    .error
                    .unwrap_or_else(|| "rejected by engine".to_string()),
            )),
        }
    }

    async fn close(&self) -> Result<(), ZaplineError> {
        let Some(mut link) = self.take_link() else {
            return Ok(());
        };
        let logout = OutboundFrame::Logout.to_text()?;
        if link.commands.send(Command::Logout(logout)).await.is_ok()
            && tokio::time::timeout(self.send_timeout, &mut link.task)
                .await
                .is_err()
        {
            warn!(connection_id = %self.connection_id, "sidecar did not finish logout in time");
        }
        link.cancel.cancel();
        info!(connection_id = %self.connection_id, driver = %D::KIND, "bridge link logged out");
        Ok(())
    }

    async fn release(&self) -> Result<(), ZaplineError> {
        if let Some(link) = self.take_link() {
            link.cancel.cancel();
            debug!(connection_id = %self.connection_id, "bridge link released");
        }
        Ok(())
    }
}

struct LinkTask<D> {
    connection_id: ConnectionId,
    url: String,
    start: String,
    dialect: Arc<D>,
    events: mpsc::Sender<DriverEvent>,
    commands: mpsc::Receiver<Command>,
    pending: PendingSends,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

enum LinkEnd {
    /// Released or logged out locally; nothing more is reported.
    Local,
    /// A terminal event was already forwarded.
    Terminal,
    /// The socket failed without a terminal event.
    Lost,
}

async fn run_link<D: Dialect>(task: LinkTask<D>) {
    let LinkTask {
        connection_id,
        url,
        start,
        dialect,
        events,
        mut commands,
        pending,
        connected,
        cancel,
    } = task;

    let connected_ws = tokio::select! {
        _ = cancel.cancelled() => return,
        result = connect_async(url.as_str()) => result,
    };
    let ws = match connected_ws {
        Ok((ws, _)) => ws,
        Err(e) => {
            warn!(%connection_id, url = %url, error = %e, "engine sidecar unreachable");
            report_lost(&events).await;
            return;
        }
    };
    let (mut write, mut read) = ws.split();

    let end = if let Err(e) = write.send(Message::Text(start.into())).await {
        warn!(%connection_id, error = %e, "failed to start engine session");
        LinkEnd::Lost
    } else {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break LinkEnd::Local,
                command = commands.recv() => match command {
                    Some(Command::Frame(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            warn!(%connection_id, error = %e, "bridge write failed");
                            break LinkEnd::Lost;
                        }
                    }
                    Some(Command::Logout(text)) => {
                        let _ = write.send(Message::Text(text.into())).await;
                        break LinkEnd::Local;
                    }
                    None => break LinkEnd::Local,
                },
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let forwarded = forward_frame(
                            &connection_id,
                            dialect.as_ref(),
                            text.as_str(),
                            &events,
                            &pending,
                            &connected,
                            &cancel,
                        )
                        .await;
                        if let Some(end) = forwarded {
                            break end;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break LinkEnd::Lost,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(%connection_id, error = %e, "bridge read failed");
                        break LinkEnd::Lost;
                    }
                },
            }
        }
    };

    connected.store(false, Ordering::Release);
    // Dropping the senders fails every in-flight send.
    pending.clear();
    let _ = write.send(Message::Close(None)).await;

    if matches!(end, LinkEnd::Lost) && !cancel.is_cancelled() {
        report_lost(&events).await;
    }
    debug!(%connection_id, "bridge link task finished");
}

/// Handle one sidecar frame. Returns `Some` when the link must stop.
async fn forward_frame<D: Dialect>(
    connection_id: &ConnectionId,
    dialect: &D,
    text: &str,
    events: &mpsc::Sender<DriverEvent>,
    pending: &PendingSends,
    connected: &AtomicBool,
    cancel: &CancellationToken,
) -> Option<LinkEnd> {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(%connection_id, error = %e, "ignoring malformed bridge frame");
            return None;
        }
    };

    if frame.event == SEND_RESULT_EVENT {
        match serde_json::from_value::<SendResult>(frame.data) {
            Ok(result) => {
                if let Some((_, waiter)) = pending.remove(&result.request_id) {
                    let _ = waiter.send(result);
                }
            }
            Err(e) => warn!(%connection_id, error = %e, "malformed send result"),
        }
        return None;
    }

    for event in dialect.translate(&frame.event, &frame.data) {
        match &event {
            DriverEvent::StatusChanged(DriverStatus::Connected { .. }) => {
                connected.store(true, Ordering::Release);
            }
            DriverEvent::StatusChanged(DriverStatus::Disconnected(_)) => {
                connected.store(false, Ordering::Release);
            }
            _ => {}
        }
        let terminal = event.is_terminal();
        let delivered = tokio::select! {
            _ = cancel.cancelled() => false,
            sent = events.send(event) => sent.is_ok(),
        };
        if !delivered {
            return Some(LinkEnd::Local);
        }
        if terminal {
            return Some(LinkEnd::Terminal);
        }
    }
    None
}

async fn report_lost(events: &mpsc::Sender<DriverEvent>) {
    let _ = events
        .send(DriverEvent::StatusChanged(DriverStatus::Disconnected(
            CloseReason::ConnectionLost,
        )))
        .await;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::baileys::BaileysDriver;
    use crate::webjs::WebJsDriver;

    fn endpoint(url: &str) -> DriverEndpointConfig {
        DriverEndpointConfig {
            endpoint: url.to_string(),
            send_timeout_secs: 1,
        }
    }

    #[test]
    fn session_url_appends_connection_id() {
        let driver =
            BaileysDriver::new(ConnectionId::from("c1"), &endpoint("ws://127.0.0.1:7001/")).unwrap();
        assert_eq!(driver.session_url(), "ws://127.0.0.1:7001/sessions/c1");
        assert_eq!(driver.kind(), DriverKind::Baileys);
    }

    #[test]
    fn non_websocket_endpoint_is_a_config_error() {
        let err = WebJsDriver::new(ConnectionId::from("c1"), &endpoint("http://localhost:7002"))
            .err()
            .unwrap();
        assert!(matches!(err, ZaplineError::Config(_)));
    }

    #[tokio::test]
    async fn malformed_credentials_fail_open_synchronously() {
        let driver =
            BaileysDriver::new(ConnectionId::from("c1"), &endpoint("ws://127.0.0.1:1")).unwrap();
        let err = driver.open(Some("{not json".into())).await.err().unwrap();
        assert!(matches!(err, ZaplineError::Config(_)));
    }

    #[tokio::test]
    async fn send_before_open_is_not_connected() {
        let driver =
            BaileysDriver::new(ConnectionId::from("c1"), &endpoint("ws://127.0.0.1:1")).unwrap();
        let err = driver.send("5511", "hi").await.unwrap_err();
        assert!(matches!(err, ZaplineError::NotConnected { .. }));
        // close and release on a never-opened driver are no-op successes
        driver.close().await.unwrap();
        driver.release().await.unwrap();
    }

    #[test]
    fn frames_encode_as_documented() {
        let start = OutboundFrame::Start {
            credentials: Some(json!({"k": 1})),
        };
        assert_eq!(
            serde_json::to_value(&start).unwrap(),
            json!({"op": "start", "credentials": {"k": 1}})
        );
        let send = OutboundFrame::Send {
            request_id: "r1",
            to: "5511@s.whatsapp.net",
            text: "hi",
        };
        assert_eq!(
            serde_json::to_value(&send).unwrap(),
            json!({"op": "send", "requestId": "r1", "to": "5511@s.whatsapp.net", "text": "hi"})
        );
        assert_eq!(
            OutboundFrame::Logout.to_text().unwrap(),
            r#"{"op":"logout"}"#
        );
    }
}
