// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-connection state machine driven by a driver's event stream.
//!
//! States: Initializing -> AwaitingScan -> Authenticating -> Connected ->
//! Reconnecting | Disconnected. One pump task per open link processes
//! driver events strictly in emission order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use zapline_bus::EventBus;
use zapline_core::{
    CanonicalEvent, CloseReason, ConnectionId, ConnectionRecord, ConnectionRepository,
    ConnectionStatus, CredentialStore, Driver, DriverEvent, DriverEventStream, DriverKind,
    DriverStatus, ErrorCode, EventKind, InboundMessage, OutboundMessage, SendAck, TenantId,
    ZaplineError,
};

/// Shared handle to a live session.
pub type SessionHandle = Arc<Session>;

/// Requests a session makes of its supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// A transient close happened; reopen after backoff for `attempt`.
    Reconnect {
        connection_id: ConnectionId,
        epoch: u64,
        attempt: u32,
    },
    /// A definitive close happened; drop the table entry.
    Ended {
        connection_id: ConnectionId,
        epoch: u64,
    },
}

/// Collaborators every session shares.
#[derive(Clone)]
pub struct SessionContext {
    pub credentials: Arc<dyn CredentialStore>,
    pub repository: Arc<dyn ConnectionRepository>,
    pub bus: EventBus,
    pub notices: mpsc::UnboundedSender<SessionNotice>,
}

/// Identity of one table entry.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub connection_id: ConnectionId,
    pub tenant_id: Option<TenantId>,
    pub display_name: Option<String>,
    pub epoch: u64,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub connection_id: ConnectionId,
    pub driver: DriverKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub status: ConnectionStatus,
    /// Only present while connected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Most recent QR while awaiting a scan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    pub reconnect_attempt: u32,
    pub last_activity: DateTime<Utc>,
    #[serde(skip)]
    pub epoch: u64,
}

struct SessionState {
    status: ConnectionStatus,
    qr: Option<String>,
    phone_number: Option<String>,
    own_jid: Option<String>,
    attempt: u32,
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
}

impl SessionState {
    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_at = Utc::now();
    }
}

struct Pump {
    cancel: CancellationToken,
}

enum StatusWrite {
    Record(ConnectionRecord),
    Status(ConnectionStatus, Option<String>),
    /// Acknowledged once every earlier write has been applied.
    Flush(oneshot::Sender<()>),
}

/// One managed WhatsApp identity. Only the session issues driver commands.
pub struct Session {
    identity: SessionIdentity,
    driver: Arc<dyn Driver>,
    ctx: SessionContext,
    state: Mutex<SessionState>,
    pump: Mutex<Option<Pump>>,
    /// Set once a definitive close or explicit disconnect has run.
    terminated: AtomicBool,
    writes: mpsc::UnboundedSender<StatusWrite>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(identity: SessionIdentity, driver: Arc<dyn Driver>, ctx: SessionContext) -> Self {
        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_through(
            identity.connection_id.clone(),
            Arc::clone(&ctx.repository),
            rx,
        ));

        Self {
            identity,
            driver,
            ctx,
            state: Mutex::new(SessionState {
                status: ConnectionStatus::Initializing,
                qr: None,
                phone_number: None,
                own_jid: None,
                attempt: 0,
                last_activity: Instant::now(),
                last_activity_at: Utc::now(),
            }),
            pump: Mutex::new(None),
            terminated: AtomicBool::new(false),
            writes,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.identity.connection_id
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.identity.tenant_id.as_ref()
    }

    pub fn epoch(&self) -> u64 {
        self.identity.epoch
    }

    pub fn driver_kind(&self) -> DriverKind {
        self.driver.kind()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.lock_state().status
    }

    /// Time since the last processed event.
    pub fn idle_for(&self) -> Duration {
        self.lock_state().last_activity.elapsed()
    }

    pub fn current_state(&self) -> SessionSnapshot {
        let state = self.lock_state();
        SessionSnapshot {
            connection_id: self.identity.connection_id.clone(),
            driver: self.driver.kind(),
            tenant_id: self.identity.tenant_id.clone(),
            display_name: self.identity.display_name.clone(),
            status: state.status,
            phone_number: state.phone_number.clone(),
            qr: state.qr.clone(),
            reconnect_attempt: state.attempt,
            last_activity: state.last_activity_at,
            epoch: self.identity.epoch,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_pump(&self) -> MutexGuard<'_, Option<Pump>> {
        self.pump.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write the connection row and announce `Initializing`.
    pub(crate) fn announce_created(&self) {
        let record = ConnectionRecord {
            id: self.identity.connection_id.clone(),
            driver: self.driver.kind(),
            tenant_id: self.identity.tenant_id.clone(),
            display_name: self.identity.display_name.clone(),
            status: ConnectionStatus::Initializing,
            phone_number: None,
            updated_at: Utc::now(),
        };
        let _ = self.writes.send(StatusWrite::Record(record));
        self.publish(EventKind::StatusChanged {
            status: ConnectionStatus::Initializing,
            phone_number: None,
            reason: None,
        });
    }

    /// Open (or reopen) the driver link with the stored credentials and
    /// start processing its stream.
    pub async fn open(self: &Arc<Self>) -> Result<(), ZaplineError> {
        let id = &self.identity.connection_id;
        let kind = self.driver.kind();
        let credentials = self
            .ctx
            .credentials
            .load(id, kind)
            .await?
            .map(|record| record.blob);
        let mut resumed = credentials.is_some();

        let stream = match self.driver.open(credentials).await {
            // Unreadable credentials would fail every open; pair from scratch if the
            // engine itself is usable.
            Err(ZaplineError::Config(reason)) if resumed => match self.driver.open(None).await {
                Ok(stream) => {
                    self.discard_credentials(&reason).await;
                    resumed = false;
                    stream
                }
                Err(_) => return Err(ZaplineError::Config(reason)),
            },
            other => other?,
        };
        self.start_pump(stream);
        info!(connection_id = %id, driver = %kind, resumed, "session link opened");
        Ok(())
    }

    fn start_pump(self: &Arc<Self>, stream: DriverEventStream) {
        let cancel = CancellationToken::new();
        if let Some(previous) = self.lock_pump().replace(Pump {
            cancel: cancel.clone(),
        }) {
            previous.cancel.cancel();
        }
        let session = Arc::clone(self);
        tokio::spawn(async move { session.pump(stream, cancel).await });
    }

    fn stop_pump(&self) {
        if let Some(pump) = self.lock_pump().take() {
            pump.cancel.cancel();
        }
    }

    async fn pump(self: Arc<Self>, mut stream: DriverEventStream, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                next = stream.next() => next,
            };
            match next {
                Some(event) => {
                    let terminal = event.is_terminal();
                    self.handle_event(event).await;
                    if terminal {
                        return;
                    }
                }
                None => {
                    if !cancel.is_cancelled() && !self.terminated.load(Ordering::Acquire) {
                        debug!(
                            connection_id = %self.identity.connection_id,
                            "driver stream ended without a close reason"
                        );
                        self.handle_closed(CloseReason::ConnectionLost).await;
                    }
                    return;
                }
            }
        }
    }

    async fn handle_event(&self, event: DriverEvent) {
        self.lock_state().touch();
        match event {
            DriverEvent::Qr(qr) => {
                {
                    let mut state = self.lock_state();
                    state.qr = Some(qr.clone());
                }
                self.set_status(ConnectionStatus::AwaitingScan, None);
                self.publish(EventKind::QrIssued { qr });
            }
            DriverEvent::StatusChanged(DriverStatus::Authenticating) => {
                self.set_status(ConnectionStatus::Authenticating, None);
                self.publish(EventKind::StatusChanged {
                    status: ConnectionStatus::Authenticating,
                    phone_number: None,
                    reason: None,
                });
            }
            DriverEvent::StatusChanged(DriverStatus::Connected { phone_number, jid }) => {
                {
                    let mut state = self.lock_state();
                    state.qr = None;
                    state.own_jid = Some(jid);
                    state.attempt = 0;
                }
                self.set_status(ConnectionStatus::Connected, Some(phone_number.clone()));
                info!(
                    connection_id = %self.identity.connection_id,
                    phone_number = %phone_number,
                    "session connected"
                );
                self.publish(EventKind::StatusChanged {
                    status: ConnectionStatus::Connected,
                    phone_number: Some(phone_number),
                    reason: None,
                });
            }
            DriverEvent::StatusChanged(DriverStatus::Disconnected(reason)) => {
                self.handle_closed(reason).await;
            }
            DriverEvent::CredentialsRotated(blob) => {
                if let Err(e) = self
                    .ctx
                    .credentials
                    .upsert(&self.identity.connection_id, self.driver.kind(), &blob)
                    .await
                {
                    warn!(
                        connection_id = %self.identity.connection_id,
                        error = %e,
                        "failed to persist rotated credentials"
                    );
                }
            }
            DriverEvent::MessageReceived(message) => {
                if self.is_echo(&message) {
                    debug!(
                        connection_id = %self.identity.connection_id,
                        message_id = %message.id,
                        "ignoring self-originated message"
                    );
                    return;
                }
                self.publish(EventKind::MessageReceived { message });
            }
        }
    }

    /// React to a close reported by the driver (or inferred from a stream end).
    pub(crate) async fn handle_closed(&self, reason: CloseReason) {
        if self.terminated.load(Ordering::Acquire) {
            return;
        }
        let id = &self.identity.connection_id;

        if reason.is_definitive() {
            info!(connection_id = %id, reason = %reason, "session closed definitively");
            self.lock_state().qr = None;
            self.set_status(ConnectionStatus::Disconnected, None);
            self.publish(EventKind::StatusChanged {
                status: ConnectionStatus::Disconnected,
                phone_number: None,
                reason: Some(reason),
            });
            self.forget_credentials().await;
            let _ = self.ctx.notices.send(SessionNotice::Ended {
                connection_id: id.clone(),
                epoch: self.identity.epoch,
            });
            return;
        }

        let attempt = {
            let mut state = self.lock_state();
            let attempt = state.attempt;
            state.attempt = state.attempt.saturating_add(1);
            state.qr = None;
            attempt
        };
        info!(connection_id = %id, reason = %reason, attempt, "session closed, will reconnect");
        self.set_status(ConnectionStatus::Reconnecting, None);
        self.publish(EventKind::StatusChanged {
            status: ConnectionStatus::Reconnecting,
            phone_number: None,
            reason: Some(reason),
        });
        let _ = self.ctx.notices.send(SessionNotice::Reconnect {
            connection_id: id.clone(),
            epoch: self.identity.epoch,
            attempt,
        });
    }

    /// Send one text message. Requires the Connected state.
    pub async fn send_message(&self, target: &str, content: &str) -> Result<SendAck, ZaplineError> {
        if self.status() != ConnectionStatus::Connected {
            return Err(ZaplineError::NotConnected {
                connection_id: self.identity.connection_id.to_string(),
            });
        }

        match self.driver.send(target, content).await {
            Ok(ack) => {
                self.lock_state().touch();
                #[cfg(feature = "prometheus")]
                zapline_prometheus::record_message_sent(self.driver.kind());
                self.publish(EventKind::MessageSent {
                    message: OutboundMessage {
                        id: ack.message_id.clone(),
                        to: target.to_string(),
                        body: content.to_string(),
                        timestamp: ack.timestamp,
                    },
                });
                Ok(ack)
            }
            Err(e) => {
                if e.code() == ErrorCode::SendFailed {
                    warn!(
                        connection_id = %self.identity.connection_id,
                        error = %e,
                        "send rejected by driver"
                    );
                    self.publish(EventKind::Failure {
                        code: ErrorCode::SendFailed,
                        message: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    /// Definitive teardown: log out, delete credentials, mark disconnected.
    pub async fn disconnect(&self) -> Result<(), ZaplineError> {
        if self.terminated.load(Ordering::Acquire) {
            return Ok(());
        }
        self.stop_pump();
        if let Err(e) = self.driver.close().await {
            warn!(
                connection_id = %self.identity.connection_id,
                error = %e,
                "driver logout failed"
            );
        }
        self.forget_credentials().await;
        self.finish(Some(CloseReason::LoggedOut));
        self.flush_writes().await;
        info!(connection_id = %self.identity.connection_id, "session disconnected");
        Ok(())
    }

    /// Non-definitive teardown: drop the link but keep the pairing.
    pub async fn release(&self) -> Result<(), ZaplineError> {
        self.stop_pump();
        let released = self.driver.release().await;
        if released.is_ok() && !self.terminated.load(Ordering::Acquire) {
            self.finish(None);
        }
        self.flush_writes().await;
        released?;
        debug!(connection_id = %self.identity.connection_id, "session released");
        Ok(())
    }

    /// Wait until every status write queued so far has reached the repository.
    pub async fn flush_writes(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writes.send(StatusWrite::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn finish(&self, reason: Option<CloseReason>) {
        {
            let mut state = self.lock_state();
            state.qr = None;
        }
        self.set_status(ConnectionStatus::Disconnected, None);
        self.publish(EventKind::StatusChanged {
            status: ConnectionStatus::Disconnected,
            phone_number: None,
            reason,
        });
    }

    async fn discard_credentials(&self, reason: &str) {
        let id = &self.identity.connection_id;
        warn!(connection_id = %id, reason, "stored credentials unusable, pairing again");
        if let Err(e) = self.ctx.credentials.delete(id, self.driver.kind()).await {
            warn!(connection_id = %id, error = %e, "failed to delete unusable credentials");
        }
    }

    /// Deletes stored credentials at most once per session.
    async fn forget_credentials(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let id = &self.identity.connection_id;
        match self.ctx.credentials.delete(id, self.driver.kind()).await {
            Ok(removed) => debug!(connection_id = %id, removed, "credentials deleted"),
            Err(e) => warn!(connection_id = %id, error = %e, "failed to delete credentials"),
        }
    }

    fn set_status(&self, status: ConnectionStatus, phone_number: Option<String>) {
        {
            let mut state = self.lock_state();
            if state.status == status && state.phone_number == phone_number {
                return;
            }
            state.status = status;
            state.phone_number = phone_number.clone();
        }
        #[cfg(feature = "prometheus")]
        zapline_prometheus::record_status_change(status);
        let _ = self.writes.send(StatusWrite::Status(status, phone_number));
    }

    fn publish(&self, kind: EventKind) {
        self.ctx.bus.publish(CanonicalEvent::new(
            self.identity.connection_id.clone(),
            self.identity.tenant_id.clone(),
            kind,
        ));
    }

    fn is_echo(&self, message: &InboundMessage) -> bool {
        if message.from_me {
            return true;
        }
        let state = self.lock_state();
        if state.own_jid.as_deref() == Some(message.from.as_str()) {
            return true;
        }
        let sender = message.from.split(['@', ':']).next().unwrap_or_default();
        state
            .phone_number
            .as_deref()
            .is_some_and(|phone| !phone.is_empty() && phone == sender)
    }
}

/// Writes status changes to the repository in order, logging failures.
async fn write_through(
    connection_id: ConnectionId,
    repository: Arc<dyn ConnectionRepository>,
    mut rx: mpsc::UnboundedReceiver<StatusWrite>,
) {
    while let Some(write) = rx.recv().await {
        let result = match write {
            StatusWrite::Record(record) => repository.upsert_connection(&record).await,
            StatusWrite::Status(status, phone) => {
                repository
                    .record_status(&connection_id, status, phone.as_deref())
                    .await
            }
            StatusWrite::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };
        if let Err(e) = result {
            warn!(connection_id = %connection_id, error = %e, "status write-through failed");
        }
    }
}
