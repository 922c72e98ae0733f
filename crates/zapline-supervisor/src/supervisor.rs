// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-owner session table.
//!
//! One actor task owns `HashMap<ConnectionId, Entry>`; every structural
//! change is a message to it. Readers go through an `ArcSwap` snapshot that
//! the actor republishes after each mutation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use zapline_bus::EventBus;
use zapline_config::model::SupervisorConfig;
use zapline_core::{
    CloseReason, ConnectionId, ConnectionRepository, ConnectionStatus, CredentialStore,
    DriverFactory, DriverKind, SendAck, TenantId, ZaplineError,
};

use crate::backoff::Backoff;
use crate::session::{Session, SessionContext, SessionHandle, SessionIdentity, SessionNotice};

const COMMAND_BUFFER: usize = 64;

/// Parameters of `create_connection`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub connection_id: ConnectionId,
    /// Falls back to `supervisor.default_driver`.
    pub driver: Option<DriverKind>,
    pub tenant_id: Option<TenantId>,
    pub display_name: Option<String>,
}

impl CreateRequest {
    pub fn new(connection_id: impl Into<ConnectionId>) -> Self {
        Self {
            connection_id: connection_id.into(),
            driver: None,
            tenant_id: None,
            display_name: None,
        }
    }

    pub fn with_driver(mut self, driver: DriverKind) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }
}

/// Runtime policy derived from [`SupervisorConfig`].
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub backoff: Backoff,
    pub close_timeout: Duration,
    /// `None` disables idle reaping.
    pub idle_timeout: Option<Duration>,
    pub idle_sweep: Duration,
    pub default_driver: DriverKind,
}

impl SupervisorSettings {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            backoff: Backoff::from_config(config),
            close_timeout: Duration::from_secs(config.close_timeout_secs),
            idle_timeout: (config.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(config.idle_timeout_secs)),
            idle_sweep: Duration::from_secs(config.idle_sweep_secs.max(1)),
            default_driver: config.default_driver,
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

/// Ports and hubs the supervisor wires into every session.
#[derive(Clone)]
pub struct SupervisorDeps {
    pub factory: Arc<dyn DriverFactory>,
    pub credentials: Arc<dyn CredentialStore>,
    pub repository: Arc<dyn ConnectionRepository>,
    pub bus: EventBus,
}

/// Totals over the live table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_driver: BTreeMap<String, usize>,
    pub subscribers: usize,
}

type Table = HashMap<ConnectionId, SessionHandle>;

enum Command {
    Create {
        request: CreateRequest,
        reply: oneshot::Sender<Result<SessionHandle, ZaplineError>>,
    },
    Disconnect {
        connection_id: ConnectionId,
        reply: oneshot::Sender<Result<(), ZaplineError>>,
    },
    Notice(SessionNotice),
    ReconnectDue {
        connection_id: ConnectionId,
        epoch: u64,
    },
    /// A closing entry finished its teardown.
    TeardownDone {
        connection_id: ConnectionId,
        epoch: u64,
        reply: Option<oneshot::Sender<Result<(), ZaplineError>>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, Copy)]
enum Teardown {
    /// Log out and delete credentials.
    Disconnect,
    /// Drop the link, keep the pairing.
    Release,
}

impl Teardown {
    fn as_str(self) -> &'static str {
        match self {
            Self::Disconnect => "disconnect",
            Self::Release => "release",
        }
    }
}

/// Cloneable handle to the supervisor actor.
#[derive(Clone)]
pub struct Supervisor {
    commands: mpsc::Sender<Command>,
    snapshot: Arc<ArcSwap<Table>>,
    credentials: Arc<dyn CredentialStore>,
    repository: Arc<dyn ConnectionRepository>,
    bus: EventBus,
}

impl Supervisor {
    /// Start the actor on the current runtime.
    pub fn spawn(deps: SupervisorDeps, settings: SupervisorSettings) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let snapshot = Arc::new(ArcSwap::from_pointee(Table::new()));

        let actor = Actor {
            factory: deps.factory,
            ctx: SessionContext {
                credentials: Arc::clone(&deps.credentials),
                repository: Arc::clone(&deps.repository),
                bus: deps.bus.clone(),
                notices: notices_tx,
            },
            settings,
            table: HashMap::new(),
            snapshot: Arc::clone(&snapshot),
            next_epoch: 1,
            self_commands: commands_tx.downgrade(),
            timers: CancellationToken::new(),
        };
        tokio::spawn(actor.run(commands_rx, notices_rx));

        Self {
            commands: commands_tx,
            snapshot,
            credentials: deps.credentials,
            repository: deps.repository,
            bus: deps.bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, ZaplineError>>) -> Command,
    ) -> Result<T, ZaplineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    /// Create and open a session. `AlreadyExists` if one is live for the id.
    pub async fn create_connection(
        &self,
        request: CreateRequest,
    ) -> Result<SessionHandle, ZaplineError> {
        self.request(|reply| Command::Create { request, reply }).await
    }

    /// Log out and remove a session. `NotFound` if none is live.
    ///
    /// Returns once the session has finished closing and left the table.
    pub async fn disconnect_connection(&self, id: &ConnectionId) -> Result<(), ZaplineError> {
        let connection_id = id.clone();
        self.request(|reply| Command::Disconnect {
            connection_id,
            reply,
        })
        .await
    }

    /// Arm a reopen for `id` after the backoff delay of `attempt`.
    ///
    /// Ignored when the table entry for `id` no longer carries `epoch`.
    pub async fn schedule_reconnect(
        &self,
        id: &ConnectionId,
        epoch: u64,
        attempt: u32,
    ) -> Result<(), ZaplineError> {
        self.commands
            .send(Command::Notice(SessionNotice::Reconnect {
                connection_id: id.clone(),
                epoch,
                attempt,
            }))
            .await
            .map_err(|_| stopped())
    }

    pub fn get_session(&self, id: &ConnectionId) -> Option<SessionHandle> {
        self.snapshot.load().get(id).cloned()
    }

    /// Every live session, ordered by connection id.
    pub fn sessions(&self) -> Vec<SessionHandle> {
        let mut sessions: Vec<_> = self.snapshot.load().values().cloned().collect();
        sessions.sort_by(|a, b| a.connection_id().cmp(b.connection_id()));
        sessions
    }

    pub fn active_count(&self) -> usize {
        self.snapshot.load().len()
    }

    /// Send through the live session for `id`.
    pub async fn send_message(
        &self,
        id: &ConnectionId,
        target: &str,
        content: &str,
    ) -> Result<SendAck, ZaplineError> {
        let session = self.get_session(id).ok_or_else(|| ZaplineError::NotFound {
            connection_id: id.to_string(),
        })?;
        session.send_message(target, content).await
    }

    pub fn stats(&self) -> SupervisorStats {
        let table = self.snapshot.load();
        let mut stats = SupervisorStats {
            total: table.len(),
            subscribers: self.bus.subscriber_count(),
            ..Default::default()
        };
        for session in table.values() {
            *stats
                .by_status
                .entry(session.status().to_string())
                .or_default() += 1;
            *stats
                .by_driver
                .entry(session.driver_kind().to_string())
                .or_default() += 1;
        }
        stats
    }

    /// Reopen every connection that has stored credentials.
    ///
    /// Tenant and display name come from the persisted connection row.
    /// Returns how many sessions were created.
    pub async fn resume_stored(&self) -> Result<usize, ZaplineError> {
        let records = self.credentials.list().await?;
        let mut resumed = 0;
        for record in records {
            let mut request =
                CreateRequest::new(record.connection_id.clone()).with_driver(record.driver);
            match self.repository.get_connection(&record.connection_id).await {
                Ok(Some(row)) => {
                    request.tenant_id = row.tenant_id;
                    request.display_name = row.display_name;
                }
                Ok(None) => {}
                Err(e) => warn!(
                    connection_id = %record.connection_id,
                    error = %e,
                    "connection row unavailable, resuming without tenant"
                ),
            }
            match self.create_connection(request).await {
                Ok(_) => resumed += 1,
                Err(ZaplineError::AlreadyExists { .. }) => {}
                Err(e) => warn!(
                    connection_id = %record.connection_id,
                    error = %e,
                    "failed to resume stored connection"
                ),
            }
        }
        info!(resumed, "resumed stored connections");
        Ok(resumed)
    }

    /// Cancel timers, release every session (keeping credentials), stop the actor.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

fn stopped() -> ZaplineError {
    ZaplineError::Internal("session supervisor has stopped".to_string())
}

struct Entry {
    session: SessionHandle,
    timer: Option<CancellationToken>,
    /// Teardown in flight. The id stays taken until it completes.
    closing: bool,
}

impl Entry {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

struct Actor {
    factory: Arc<dyn DriverFactory>,
    ctx: SessionContext,
    settings: SupervisorSettings,
    table: HashMap<ConnectionId, Entry>,
    snapshot: Arc<ArcSwap<Table>>,
    next_epoch: u64,
    /// Weak so the actor stops once every handle is gone.
    self_commands: mpsc::WeakSender<Command>,
    /// Parent of every reconnect timer.
    timers: CancellationToken,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut notices: mpsc::UnboundedReceiver<SessionNotice>,
    ) {
        let mut sweep = self.settings.idle_timeout.map(|_| {
            let mut interval = tokio::time::interval(self.settings.idle_sweep);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.reset();
            interval
        });
        debug!("session supervisor started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.release_all().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        self.release_all().await;
                        break;
                    }
                },
                Some(notice) = notices.recv() => self.handle_notice(notice),
                _ = next_sweep(&mut sweep) => self.sweep_idle(),
            }
        }
        debug!("session supervisor stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Create { request, reply } => {
                let _ = reply.send(self.create(request).await);
            }
            Command::Disconnect {
                connection_id,
                reply,
            } => self.disconnect(connection_id, reply),
            Command::Notice(notice) => self.handle_notice(notice),
            Command::ReconnectDue {
                connection_id,
                epoch,
            } => self.reconnect_due(connection_id, epoch).await,
            Command::TeardownDone {
                connection_id,
                epoch,
                reply,
            } => self.teardown_done(connection_id, epoch, reply),
            Command::Shutdown { .. } => {}
        }
    }

    fn handle_notice(&mut self, notice: SessionNotice) {
        match notice {
            SessionNotice::Reconnect {
                connection_id,
                epoch,
                attempt,
            } => self.schedule_reconnect(connection_id, epoch, attempt),
            SessionNotice::Ended {
                connection_id,
                epoch,
            } => self.session_ended(connection_id, epoch),
        }
    }

    async fn create(&mut self, request: CreateRequest) -> Result<SessionHandle, ZaplineError> {
        let id = request.connection_id;
        if id.as_str().trim().is_empty() {
            return Err(ZaplineError::InvalidPayload(
                "connectionId must not be empty".to_string(),
            ));
        }
        if self.table.contains_key(&id) {
            return Err(ZaplineError::AlreadyExists {
                connection_id: id.to_string(),
            });
        }

        let kind = request.driver.unwrap_or(self.settings.default_driver);
        let driver = self.factory.create(kind, &id)?;
        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let session = Arc::new(Session::new(
            SessionIdentity {
                connection_id: id.clone(),
                tenant_id: request.tenant_id,
                display_name: request.display_name,
                epoch,
            },
            driver,
            self.ctx.clone(),
        ));
        session.announce_created();

        if let Err(e) = session.open().await {
            warn!(connection_id = %id, driver = %kind, error = %e, "failed to open session");
            if let Err(release_err) = session.release().await {
                debug!(connection_id = %id, error = %release_err, "release after failed open");
            }
            return Err(e);
        }

        self.table.insert(
            id.clone(),
            Entry {
                session: Arc::clone(&session),
                timer: None,
                closing: false,
            },
        );
        self.publish_snapshot();
        info!(connection_id = %id, driver = %kind, epoch, "session created");
        Ok(session)
    }

    fn disconnect(
        &mut self,
        id: ConnectionId,
        reply: oneshot::Sender<Result<(), ZaplineError>>,
    ) {
        let live = self.table.get(&id).is_some_and(|entry| !entry.closing);
        if !live {
            let _ = reply.send(Err(ZaplineError::NotFound {
                connection_id: id.to_string(),
            }));
            return;
        }
        self.begin_teardown(&id, Teardown::Disconnect, Some(reply));
        self.publish_snapshot();
    }

    /// Mark the entry closing and run its teardown off the actor.
    ///
    /// The entry leaves the table on `TeardownDone`, so the id cannot be
    /// recreated while the old session may still touch credentials or status.
    fn begin_teardown(
        &mut self,
        id: &ConnectionId,
        teardown: Teardown,
        reply: Option<oneshot::Sender<Result<(), ZaplineError>>>,
    ) {
        let Some(entry) = self.table.get_mut(id) else {
            return;
        };
        if entry.closing {
            return;
        }
        entry.closing = true;
        entry.cancel_timer();
        let session = Arc::clone(&entry.session);

        let id = id.clone();
        let close_timeout = self.settings.close_timeout;
        let commands = self.self_commands.clone();
        tokio::spawn(async move {
            let result = match teardown {
                Teardown::Disconnect => {
                    tokio::time::timeout(close_timeout, session.disconnect()).await
                }
                Teardown::Release => tokio::time::timeout(close_timeout, session.release()).await,
            };
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    connection_id = %id,
                    action = teardown.as_str(),
                    error = %e,
                    "session teardown failed"
                ),
                Err(_) => warn!(
                    connection_id = %id,
                    action = teardown.as_str(),
                    timeout_secs = close_timeout.as_secs(),
                    "session teardown timed out"
                ),
            }

            let done = Command::TeardownDone {
                connection_id: id,
                epoch: session.epoch(),
                reply,
            };
            let undelivered = match commands.upgrade() {
                Some(commands) => commands.send(done).await.err().map(|e| e.0),
                None => Some(done),
            };
            // The actor is gone; nothing is left to remove the entry from.
            if let Some(Command::TeardownDone {
                reply: Some(reply), ..
            }) = undelivered
            {
                let _ = reply.send(Ok(()));
            }
        });
    }

    fn teardown_done(
        &mut self,
        id: ConnectionId,
        epoch: u64,
        reply: Option<oneshot::Sender<Result<(), ZaplineError>>>,
    ) {
        let matches = self
            .table
            .get(&id)
            .is_some_and(|entry| entry.closing && entry.session.epoch() == epoch);
        if matches {
            self.table.remove(&id);
            info!(connection_id = %id, epoch, "session removed");
        }
        if let Some(reply) = reply {
            let _ = reply.send(Ok(()));
        }
    }

    fn schedule_reconnect(&mut self, id: ConnectionId, epoch: u64, attempt: u32) {
        let Some(entry) = self.table.get_mut(&id).filter(|entry| !entry.closing) else {
            debug!(connection_id = %id, "reconnect for removed session ignored");
            return;
        };
        if entry.session.epoch() != epoch {
            debug!(connection_id = %id, epoch, "reconnect for stale epoch ignored");
            return;
        }

        let delay = self.settings.backoff.delay(attempt);
        entry.cancel_timer();
        let timer = self.timers.child_token();
        entry.timer = Some(timer.clone());

        #[cfg(feature = "prometheus")]
        zapline_prometheus::record_reconnect_scheduled(entry.session.driver_kind());
        info!(
            connection_id = %id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );

        let commands = self.self_commands.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(commands) = commands.upgrade() {
                        let _ = commands
                            .send(Command::ReconnectDue { connection_id: id, epoch })
                            .await;
                    }
                }
            }
        });
    }

    async fn reconnect_due(&mut self, id: ConnectionId, epoch: u64) {
        let Some(entry) = self.table.get_mut(&id).filter(|entry| !entry.closing) else {
            return;
        };
        if entry.session.epoch() != epoch
            || entry.session.status() != ConnectionStatus::Reconnecting
        {
            debug!(connection_id = %id, epoch, "stale reconnect timer ignored");
            return;
        }
        entry.timer = None;
        let session = Arc::clone(&entry.session);

        if let Err(e) = session.open().await {
            warn!(connection_id = %id, error = %e, "reopen failed");
            session
                .handle_closed(CloseReason::Other(format!("reopen failed: {e}")))
                .await;
        }
    }

    fn session_ended(&mut self, id: ConnectionId, epoch: u64) {
        let matches = self
            .table
            .get(&id)
            .is_some_and(|entry| !entry.closing && entry.session.epoch() == epoch);
        if !matches {
            return;
        }
        info!(connection_id = %id, "removing session after definitive close");
        self.begin_teardown(&id, Teardown::Release, None);
        self.publish_snapshot();
    }

    fn sweep_idle(&mut self) {
        let Some(idle_timeout) = self.settings.idle_timeout else {
            return;
        };
        let idle: Vec<ConnectionId> = self
            .table
            .iter()
            .filter(|(_, entry)| {
                !entry.closing
                    && entry.session.status() != ConnectionStatus::Connected
                    && entry.session.idle_for() >= idle_timeout
            })
            .map(|(id, _)| id.clone())
            .collect();
        if idle.is_empty() {
            return;
        }

        for id in idle {
            info!(connection_id = %id, "releasing idle session");
            self.begin_teardown(&id, Teardown::Release, None);
        }
        self.publish_snapshot();
    }

    async fn release_all(&mut self) {
        self.timers.cancel();
        // Closing entries finish their own teardown.
        let entries: Vec<Entry> = self
            .table
            .drain()
            .map(|(_, entry)| entry)
            .filter(|entry| !entry.closing)
            .collect();
        self.publish_snapshot();
        if entries.is_empty() {
            return;
        }

        info!(count = entries.len(), "releasing sessions");
        let close_timeout = self.settings.close_timeout;
        let releases = entries.into_iter().map(|entry| async move {
            let id = entry.session.connection_id().clone();
            match tokio::time::timeout(close_timeout, entry.session.release()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(connection_id = %id, error = %e, "release failed"),
                Err(_) => warn!(connection_id = %id, "release timed out"),
            }
        });
        futures::future::join_all(releases).await;
    }

    fn publish_snapshot(&self) {
        let table: Table = self
            .table
            .iter()
            .filter(|(_, entry)| !entry.closing)
            .map(|(id, entry)| (id.clone(), Arc::clone(&entry.session)))
            .collect();
        #[cfg(feature = "prometheus")]
        zapline_prometheus::set_active_sessions(table.len());
        self.snapshot.store(Arc::new(table));
    }
}

async fn next_sweep(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
