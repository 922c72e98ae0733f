// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory persistence ports.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use zapline_core::{
    ConnectionId, ConnectionRecord, ConnectionRepository, ConnectionStatus, CredentialRecord,
    CredentialStore, DriverKind, ZaplineError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// `CredentialStore` backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryCredentialStore {
    records: Mutex<HashMap<(ConnectionId, DriverKind), CredentialRecord>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly.
    pub fn insert(&self, id: &str, driver: DriverKind, blob: &str) {
        let id = ConnectionId::from(id);
        lock(&self.records).insert(
            (id.clone(), driver),
            CredentialRecord {
                connection_id: id,
                driver,
                blob: blob.to_string(),
                updated_at: Utc::now(),
            },
        );
    }

    pub fn blob(&self, id: &str, driver: DriverKind) -> Option<String> {
        lock(&self.records)
            .get(&(ConnectionId::from(id), driver))
            .map(|r| r.blob.clone())
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(
        &self,
        id: &ConnectionId,
        driver: DriverKind,
    ) -> Result<Option<CredentialRecord>, ZaplineError> {
        Ok(lock(&self.records).get(&(id.clone(), driver)).cloned())
    }

    async fn upsert(
        &self,
        id: &ConnectionId,
        driver: DriverKind,
        blob: &str,
    ) -> Result<(), ZaplineError> {
        self.insert(id.as_str(), driver, blob);
        Ok(())
    }

    async fn delete(&self, id: &ConnectionId, driver: DriverKind) -> Result<bool, ZaplineError> {
        Ok(lock(&self.records).remove(&(id.clone(), driver)).is_some())
    }

    async fn list(&self) -> Result<Vec<CredentialRecord>, ZaplineError> {
        let mut records: Vec<_> = lock(&self.records).values().cloned().collect();
        records.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        Ok(records)
    }
}

/// `ConnectionRepository` that keeps the latest row per connection and
/// every status write in order.
#[derive(Default)]
pub struct RecordingConnectionRepository {
    rows: Mutex<HashMap<ConnectionId, ConnectionRecord>>,
    history: Mutex<Vec<(ConnectionId, ConnectionStatus)>>,
}

impl RecordingConnectionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses written for `id`, oldest first.
    pub fn statuses(&self, id: &str) -> Vec<ConnectionStatus> {
        let id = ConnectionId::from(id);
        lock(&self.history)
            .iter()
            .filter(|(conn, _)| *conn == id)
            .map(|(_, status)| *status)
            .collect()
    }

    pub fn row(&self, id: &str) -> Option<ConnectionRecord> {
        lock(&self.rows).get(&ConnectionId::from(id)).cloned()
    }
}

#[async_trait]
impl ConnectionRepository for RecordingConnectionRepository {
    async fn upsert_connection(&self, record: &ConnectionRecord) -> Result<(), ZaplineError> {
        lock(&self.history).push((record.id.clone(), record.status));
        lock(&self.rows).insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn record_status(
        &self,
        id: &ConnectionId,
        status: ConnectionStatus,
        phone_number: Option<&str>,
    ) -> Result<(), ZaplineError> {
        lock(&self.history).push((id.clone(), status));
        if let Some(row) = lock(&self.rows).get_mut(id) {
            row.status = status;
            if let Some(phone) = phone_number {
                row.phone_number = Some(phone.to_string());
            }
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_connection(
        &self,
        id: &ConnectionId,
    ) -> Result<Option<ConnectionRecord>, ZaplineError> {
        Ok(lock(&self.rows).get(id).cloned())
    }

    async fn mark_stale(&self) -> Result<usize, ZaplineError> {
        let mut changed = 0;
        for row in lock(&self.rows).values_mut() {
            if row.status != ConnectionStatus::Disconnected {
                row.status = ConnectionStatus::Disconnected;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
