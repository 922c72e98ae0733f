// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock driver for deterministic supervisor tests.
//!
//! `MockDriver` implements `Driver` with injectable events and captured
//! sends. Tests hold a [`MockDriverHandle`] to script the link.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Notify};

use zapline_core::{
    CloseReason, ConnectionId, Driver, DriverEvent, DriverEventStream, DriverFactory, DriverKind,
    DriverStatus, SendAck, ZaplineError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct MockState {
    /// Credentials passed to each `open`, in call order.
    opens: Mutex<Vec<Option<String>>>,
    link: Mutex<Option<mpsc::UnboundedSender<DriverEvent>>>,
    sent: Mutex<Vec<(String, String)>>,
    send_error: Mutex<Option<String>>,
    open_error: Mutex<Option<String>>,
    /// Credentials whose `open` fails with `Config`.
    rejected_credentials: Mutex<Option<String>>,
    close_delay: Mutex<Option<Duration>>,
    send_delay: Mutex<Option<Duration>>,
    closes: AtomicUsize,
    releases: AtomicUsize,
    opened: Notify,
}

/// A scripted driver.
pub struct MockDriver {
    kind: DriverKind,
    state: Arc<MockState>,
}

impl MockDriver {
    /// Create a driver and the handle that controls it.
    pub fn new(kind: DriverKind) -> (Self, MockDriverHandle) {
        let state = Arc::new(MockState::default());
        let handle = MockDriverHandle {
            state: Arc::clone(&state),
        };
        (Self { kind, state }, handle)
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn kind(&self) -> DriverKind {
        self.kind
    }

    async fn open(&self, credentials: Option<String>) -> Result<DriverEventStream, ZaplineError> {
        if let Some(message) = lock(&self.state.open_error).clone() {
            return Err(ZaplineError::Config(message));
        }
        if credentials.is_some() && *lock(&self.state.rejected_credentials) == credentials {
            lock(&self.state.opens).push(credentials);
            return Err(ZaplineError::Config("malformed stored credentials".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.state.link) = Some(tx);
        lock(&self.state.opens).push(credentials);
        self.state.opened.notify_waiters();

        let stream =
            futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|ev| (ev, rx)) });
        Ok(Box::pin(stream))
    }

    async fn send(&self, target: &str, content: &str) -> Result<SendAck, ZaplineError> {
        let delay = *lock(&self.state.send_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = lock(&self.state.send_error).clone() {
            return Err(ZaplineError::send_failed(message));
        }
        lock(&self.state.sent).push((target.to_string(), content.to_string()));
        Ok(SendAck {
            message_id: format!("mock-msg-{}", uuid::Uuid::new_v4()),
            timestamp: Utc::now(),
        })
    }

    async fn close(&self) -> Result<(), ZaplineError> {
        let delay = *lock(&self.state.close_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.link).take();
        Ok(())
    }

    async fn release(&self) -> Result<(), ZaplineError> {
        self.state.releases.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.link).take();
        Ok(())
    }
}

/// Test-side control of a [`MockDriver`].
#[derive(Clone)]
pub struct MockDriverHandle {
    state: Arc<MockState>,
}

impl MockDriverHandle {
    /// Push an event onto the current link. Returns false when no link is open.
    pub fn emit(&self, event: DriverEvent) -> bool {
        lock(&self.state.link)
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    pub fn emit_qr(&self, qr: &str) -> bool {
        self.emit(DriverEvent::Qr(qr.to_string()))
    }

    /// Report a connected link for `phone_number` with a `@s.whatsapp.net` jid.
    pub fn emit_connected(&self, phone_number: &str) -> bool {
        self.emit(DriverEvent::StatusChanged(DriverStatus::Connected {
            phone_number: phone_number.to_string(),
            jid: format!("{phone_number}@s.whatsapp.net"),
        }))
    }

    pub fn emit_disconnected(&self, reason: CloseReason) -> bool {
        self.emit(DriverEvent::StatusChanged(DriverStatus::Disconnected(reason)))
    }

    /// End the current stream without a terminal event.
    pub fn hang_up(&self) {
        lock(&self.state.link).take();
    }

    /// Make every subsequent send fail with `SendFailed(message)`.
    pub fn fail_sends(&self, message: &str) {
        *lock(&self.state.send_error) = Some(message.to_string());
    }

    /// Make every subsequent open fail with `Config(message)`.
    pub fn fail_opens(&self, message: &str) {
        *lock(&self.state.open_error) = Some(message.to_string());
    }

    /// Make `open` fail with `Config` whenever it is handed exactly `blob`.
    pub fn reject_credentials(&self, blob: &str) {
        *lock(&self.state.rejected_credentials) = Some(blob.to_string());
    }

    /// Make every subsequent send wait `delay` before the engine answers.
    pub fn delay_sends(&self, delay: Duration) {
        *lock(&self.state.send_delay) = Some(delay);
    }

    /// Make every subsequent `close` take `delay` before it completes.
    pub fn delay_closes(&self, delay: Duration) {
        *lock(&self.state.close_delay) = Some(delay);
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state.opens).len()
    }

    /// Credentials passed to every `open` so far.
    pub fn opened_with(&self) -> Vec<Option<String>> {
        lock(&self.state.opens).clone()
    }

    /// Wait until `open` has been called at least `count` times.
    pub async fn wait_for_open(&self, count: usize) {
        loop {
            let notified = self.state.opened.notified();
            if self.open_count() >= count {
                return;
            }
            notified.await;
        }
    }

    pub fn is_linked(&self) -> bool {
        lock(&self.state.link).is_some()
    }

    /// `(target, content)` of every accepted send.
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        lock(&self.state.sent).clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }
}

/// A [`DriverFactory`] producing [`MockDriver`]s.
///
/// Keeps the handle of the most recent driver created for each connection.
#[derive(Default)]
pub struct MockDriverFactory {
    handles: Mutex<HashMap<ConnectionId, MockDriverHandle>>,
    created: AtomicUsize,
    rejected: Mutex<Option<DriverKind>>,
    rejected_credentials: Mutex<Option<String>>,
    open_error: Mutex<Option<String>>,
    notify: Notify,
}

impl MockDriverFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create` fail with `Config` for `kind`.
    pub fn reject_kind(&self, kind: DriverKind) {
        *lock(&self.rejected) = Some(kind);
    }

    /// Every driver created from now on refuses to open with `blob`.
    pub fn reject_credentials(&self, blob: &str) {
        *lock(&self.rejected_credentials) = Some(blob.to_string());
    }

    /// Every driver created from now on fails `open` with `Config(message)`.
    pub fn fail_opens(&self, message: &str) {
        *lock(&self.open_error) = Some(message.to_string());
    }

    pub fn handle(&self, id: &str) -> Option<MockDriverHandle> {
        lock(&self.handles).get(&ConnectionId::from(id)).cloned()
    }

    /// Wait for a driver for `id` to exist and be opened at least once.
    pub async fn wait_for_driver(&self, id: &str) -> MockDriverHandle {
        let handle = loop {
            let notified = self.notify.notified();
            if let Some(handle) = self.handle(id) {
                break handle;
            }
            notified.await;
        };
        handle.wait_for_open(1).await;
        handle
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl DriverFactory for MockDriverFactory {
    fn create(
        &self,
        kind: DriverKind,
        connection_id: &ConnectionId,
    ) -> Result<Arc<dyn Driver>, ZaplineError> {
        if *lock(&self.rejected) == Some(kind) {
            return Err(ZaplineError::Config(format!("driver {kind} is not available")));
        }
        let (driver, handle) = MockDriver::new(kind);
        if let Some(blob) = lock(&self.rejected_credentials).as_deref() {
            handle.reject_credentials(blob);
        }
        if let Some(message) = lock(&self.open_error).as_deref() {
            handle.fail_opens(message);
        }
        lock(&self.handles).insert(connection_id.clone(), handle);
        self.created.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
        Ok(Arc::new(driver))
    }
}
