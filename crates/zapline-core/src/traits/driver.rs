// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Driver interface every WhatsApp engine adapter implements.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::ZaplineError;
use crate::types::{CloseReason, ConnectionId, DriverKind, InboundMessage, SendAck};

/// Stream of events emitted by an opened driver.
pub type DriverEventStream = Pin<Box<dyn Stream<Item = DriverEvent> + Send>>;

/// Link state reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverStatus {
    /// The QR was scanned or stored credentials are being verified.
    Authenticating,
    Connected {
        phone_number: String,
        /// Full own jid, used to recognise self-originated echoes.
        jid: String,
    },
    /// Terminal: nothing follows on the stream.
    Disconnected(CloseReason),
}

/// One item of a [`DriverEventStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    Qr(String),
    StatusChanged(DriverStatus),
    MessageReceived(InboundMessage),
    /// New credential material to persist, opaque to everything but the driver.
    CredentialsRotated(String),
}

impl DriverEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StatusChanged(DriverStatus::Disconnected(_)))
    }
}

/// Uniform contract over an underlying WhatsApp client engine.
///
/// `open` may be called again on the same driver after a transient close;
/// each call replaces the previous link.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// The engine this driver speaks to.
    fn kind(&self) -> DriverKind;

    /// Begins establishing a link and returns immediately with its event stream.
    ///
    /// Fails synchronously only with [`ZaplineError::Config`]; connectivity
    /// problems arrive as a terminal `Disconnected` item.
    async fn open(&self, credentials: Option<String>) -> Result<DriverEventStream, ZaplineError>;

    /// Sends one text message to `target`.
    async fn send(&self, target: &str, content: &str) -> Result<SendAck, ZaplineError>;

    /// Logs out and releases the link. Idempotent.
    async fn close(&self) -> Result<(), ZaplineError>;

    /// Drops the link without logging out, keeping the pairing valid. Idempotent.
    async fn release(&self) -> Result<(), ZaplineError>;
}

/// Builds drivers for a given engine kind.
pub trait DriverFactory: Send + Sync + 'static {
    fn create(
        &self,
        kind: DriverKind,
        connection_id: &ConnectionId,
    ) -> Result<Arc<dyn Driver>, ZaplineError>;
}
