// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the credential store and connection repository.

use async_trait::async_trait;
use tracing::debug;

use zapline_config::model::StorageConfig;
use zapline_core::{
    ConnectionId, ConnectionRecord, ConnectionRepository, ConnectionStatus, CredentialRecord,
    CredentialStore, DriverKind, ZaplineError,
};

use crate::database::Database;
use crate::queries;

/// SQLite-backed storage shared by every session.
///
/// Cloning is cheap; all clones funnel through the same writer thread.
#[derive(Clone)]
pub struct SqliteStorage {
    db: Database,
}

impl SqliteStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open the database described by `config`.
    pub async fn open(config: &StorageConfig) -> Result<Self, ZaplineError> {
        let db = Database::open(&config.database_path, config.wal_mode).await?;
        debug!(path = %config.database_path, "SQLite storage initialized");
        Ok(Self::new(db))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Every persisted connection row.
    pub async fn list_connections(&self) -> Result<Vec<ConnectionRecord>, ZaplineError> {
        queries::connections::list_connections(&self.db).await
    }

    /// Checkpoint and close.
    pub async fn close(self) -> Result<(), ZaplineError> {
        self.db.close().await
    }
}

#[async_trait]
impl CredentialStore for SqliteStorage {
    async fn load(
        &self,
        id: &ConnectionId,
        driver: DriverKind,
    ) -> Result<Option<CredentialRecord>, ZaplineError> {
        queries::credentials::get_credentials(&self.db, id, driver).await
    }

    async fn upsert(
        &self,
        id: &ConnectionId,
        driver: DriverKind,
        blob: &str,
    ) -> Result<(), ZaplineError> {
        queries::credentials::upsert_credentials(&self.db, id, driver, blob).await
    }

    async fn delete(&self, id: &ConnectionId, driver: DriverKind) -> Result<bool, ZaplineError> {
        queries::credentials::delete_credentials(&self.db, id, driver).await
    }

    async fn list(&self) -> Result<Vec<CredentialRecord>, ZaplineError> {
        queries::credentials::list_credentials(&self.db).await
    }
}

#[async_trait]
impl ConnectionRepository for SqliteStorage {
    async fn upsert_connection(&self, record: &ConnectionRecord) -> Result<(), ZaplineError> {
        queries::connections::upsert_connection(&self.db, record).await
    }

    async fn record_status(
        &self,
        id: &ConnectionId,
        status: ConnectionStatus,
        phone_number: Option<&str>,
    ) -> Result<(), ZaplineError> {
        queries::connections::update_status(&self.db, id, status, phone_number).await
    }

    async fn get_connection(
        &self,
        id: &ConnectionId,
    ) -> Result<Option<ConnectionRecord>, ZaplineError> {
        queries::connections::get_connection(&self.db, id).await
    }

    async fn mark_stale(&self) -> Result<usize, ZaplineError> {
        queries::connections::mark_stale_connections(&self.db).await
    }
}
