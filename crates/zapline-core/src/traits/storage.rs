// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence ports used by sessions.

use async_trait::async_trait;

use crate::error::ZaplineError;
use crate::types::{ConnectionId, ConnectionRecord, ConnectionStatus, CredentialRecord, DriverKind};

/// Durable credential storage keyed by `(connection_id, driver_kind)`.
#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    async fn load(
        &self,
        id: &ConnectionId,
        driver: DriverKind,
    ) -> Result<Option<CredentialRecord>, ZaplineError>;

    /// Idempotent insert-or-replace.
    async fn upsert(
        &self,
        id: &ConnectionId,
        driver: DriverKind,
        blob: &str,
    ) -> Result<(), ZaplineError>;

    /// Returns whether a record was actually removed.
    async fn delete(&self, id: &ConnectionId, driver: DriverKind) -> Result<bool, ZaplineError>;

    async fn list(&self) -> Result<Vec<CredentialRecord>, ZaplineError>;
}

/// Write-through port for the durable connection status and phone number.
#[async_trait]
pub trait ConnectionRepository: Send + Sync + 'static {
    /// Creates or refreshes the connection row on create.
    async fn upsert_connection(&self, record: &ConnectionRecord) -> Result<(), ZaplineError>;

    async fn record_status(
        &self,
        id: &ConnectionId,
        status: ConnectionStatus,
        phone_number: Option<&str>,
    ) -> Result<(), ZaplineError>;

    async fn get_connection(
        &self,
        id: &ConnectionId,
    ) -> Result<Option<ConnectionRecord>, ZaplineError>;

    /// Marks every non-disconnected row disconnected, returning how many changed.
    async fn mark_stale(&self) -> Result<usize, ZaplineError>;
}
