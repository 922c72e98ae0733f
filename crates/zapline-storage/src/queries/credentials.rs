// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Credential record operations.

use rusqlite::params;
use zapline_core::{ConnectionId, CredentialRecord, DriverKind, ZaplineError};

use super::{now_text, parse_enum, parse_time};
use crate::database::Database;

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<CredentialRecord, rusqlite::Error> {
    Ok(CredentialRecord {
        connection_id: ConnectionId(row.get(0)?),
        driver: parse_enum(1, row.get(1)?)?,
        blob: row.get(2)?,
        updated_at: parse_time(3, row.get(3)?)?,
    })
}

/// Insert or replace the record for `(connection_id, driver)`.
pub async fn upsert_credentials(
    db: &Database,
    id: &ConnectionId,
    driver: DriverKind,
    blob: &str,
) -> Result<(), ZaplineError> {
    let id = id.0.clone();
    let driver = driver.to_string();
    let blob = blob.to_string();
    let now = now_text();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO credentials (connection_id, driver_kind, blob, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(connection_id, driver_kind)
                 DO UPDATE SET blob = excluded.blob, updated_at = excluded.updated_at",
                params![id, driver, blob, now],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn get_credentials(
    db: &Database,
    id: &ConnectionId,
    driver: DriverKind,
) -> Result<Option<CredentialRecord>, ZaplineError> {
    let id = id.0.clone();
    let driver = driver.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<CredentialRecord>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT connection_id, driver_kind, blob, updated_at
                 FROM credentials WHERE connection_id = ?1 AND driver_kind = ?2",
            )?;
            match stmt.query_row(params![id, driver], row_to_record) {
                Ok(record) => Ok(Some(record)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Delete the record, returning whether one existed.
pub async fn delete_credentials(
    db: &Database,
    id: &ConnectionId,
    driver: DriverKind,
) -> Result<bool, ZaplineError> {
    let id = id.0.clone();
    let driver = driver.to_string();
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let deleted = conn.execute(
                "DELETE FROM credentials WHERE connection_id = ?1 AND driver_kind = ?2",
                params![id, driver],
            )?;
            Ok(deleted > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// All stored records, oldest connection id first.
pub async fn list_credentials(db: &Database) -> Result<Vec<CredentialRecord>, ZaplineError> {
    db.connection()
        .call(|conn| -> Result<Vec<CredentialRecord>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT connection_id, driver_kind, blob, updated_at
                 FROM credentials ORDER BY connection_id, driver_kind",
            )?;
            let rows = stmt.query_map([], row_to_record)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}
