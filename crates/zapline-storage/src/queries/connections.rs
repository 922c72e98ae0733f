// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection status write-through operations.

use rusqlite::params;
use zapline_core::{ConnectionId, ConnectionRecord, ConnectionStatus, TenantId, ZaplineError};

use super::{now_text, parse_enum, parse_time};
use crate::database::Database;

const SELECT_COLUMNS: &str =
    "SELECT id, driver_kind, tenant_id, display_name, status, phone_number, updated_at FROM connections";

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<ConnectionRecord, rusqlite::Error> {
    Ok(ConnectionRecord {
        id: ConnectionId(row.get(0)?),
        driver: parse_enum(1, row.get(1)?)?,
        tenant_id: row.get::<_, Option<String>>(2)?.map(TenantId),
        display_name: row.get(3)?,
        status: parse_enum(4, row.get(4)?)?,
        phone_number: row.get(5)?,
        updated_at: parse_time(6, row.get(6)?)?,
    })
}

/// Create the row, or refresh driver/tenant/name/status of an existing one.
pub async fn upsert_connection(db: &Database, record: &ConnectionRecord) -> Result<(), ZaplineError> {
    let record = record.clone();
    let now = now_text();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO connections (id, driver_kind, tenant_id, display_name, status, phone_number, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    driver_kind = excluded.driver_kind,
                    tenant_id = COALESCE(excluded.tenant_id, connections.tenant_id),
                    display_name = COALESCE(excluded.display_name, connections.display_name),
                    status = excluded.status,
                    phone_number = excluded.phone_number,
                    updated_at = excluded.updated_at",
                params![
                    record.id.0,
                    record.driver.to_string(),
                    record.tenant_id.map(|t| t.0),
                    record.display_name,
                    record.status.to_string(),
                    record.phone_number,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Update status and phone number. Unknown ids are ignored.
pub async fn update_status(
    db: &Database,
    id: &ConnectionId,
    status: ConnectionStatus,
    phone_number: Option<&str>,
) -> Result<(), ZaplineError> {
    let id = id.0.clone();
    let status = status.to_string();
    let phone_number = phone_number.map(str::to_string);
    let now = now_text();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "UPDATE connections SET status = ?1, phone_number = ?2, updated_at = ?3 WHERE id = ?4",
                params![status, phone_number, now, id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn get_connection(
    db: &Database,
    id: &ConnectionId,
) -> Result<Option<ConnectionRecord>, ZaplineError> {
    let id = id.0.clone();
    db.connection()
        .call(move |conn| -> Result<Option<ConnectionRecord>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            match stmt.query_row(params![id], row_to_record) {
                Ok(record) => Ok(Some(record)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn list_connections(db: &Database) -> Result<Vec<ConnectionRecord>, ZaplineError> {
    db.connection()
        .call(|conn| -> Result<Vec<ConnectionRecord>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))?;
            let rows = stmt.query_map([], row_to_record)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Rows left in a live status by a previous process are marked disconnected.
pub async fn mark_stale_connections(db: &Database) -> Result<usize, ZaplineError> {
    let now = now_text();
    db.connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "UPDATE connections SET status = 'disconnected', phone_number = NULL, updated_at = ?1
                 WHERE status != 'disconnected'",
                params![now],
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use zapline_core::DriverKind;

    use super::*;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap(), true).await.unwrap();
        (db, dir)
    }

    fn make_record(id: &str) -> ConnectionRecord {
        ConnectionRecord {
            id: ConnectionId::from(id),
            driver: DriverKind::Baileys,
            tenant_id: Some(TenantId::from("tenant-1")),
            display_name: Some("Support line".into()),
            status: ConnectionStatus::Initializing,
            phone_number: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn status_updates_are_written_through() {
        let (db, _dir) = setup_db().await;
        upsert_connection(&db, &make_record("c1")).await.unwrap();

        update_status(
            &db,
            &ConnectionId::from("c1"),
            ConnectionStatus::Connected,
            Some("5511999999999"),
        )
        .await
        .unwrap();

        let record = get_connection(&db, &ConnectionId::from("c1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, ConnectionStatus::Connected);
        assert_eq!(record.phone_number.as_deref(), Some("5511999999999"));
        assert_eq!(record.tenant_id, Some(TenantId::from("tenant-1")));
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn recreate_keeps_tenant_and_name() {
        let (db, _dir) = setup_db().await;
        upsert_connection(&db, &make_record("c1")).await.unwrap();

        let mut again = make_record("c1");
        again.tenant_id = None;
        again.display_name = None;
        again.driver = DriverKind::WebJs;
        upsert_connection(&db, &again).await.unwrap();

        let record = get_connection(&db, &ConnectionId::from("c1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.driver, DriverKind::WebJs);
        assert_eq!(record.display_name.as_deref(), Some("Support line"));
        assert_eq!(list_connections(&db).await.unwrap().len(), 1);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn mark_stale_only_touches_live_rows() {
        let (db, _dir) = setup_db().await;
        for id in ["a", "b", "c"] {
            upsert_connection(&db, &make_record(id)).await.unwrap();
        }
        update_status(&db, &ConnectionId::from("a"), ConnectionStatus::Connected, Some("1"))
            .await
            .unwrap();
        update_status(&db, &ConnectionId::from("b"), ConnectionStatus::Disconnected, None)
            .await
            .unwrap();

        // "a" (connected) and "c" (initializing) are stale.
        assert_eq!(mark_stale_connections(&db).await.unwrap(), 2);
        let a = get_connection(&db, &ConnectionId::from("a")).await.unwrap().unwrap();
        assert_eq!(a.status, ConnectionStatus::Disconnected);
        assert!(a.phone_number.is_none());
        db.close().await.unwrap();
    }
}
