//! Append-only audit trail.
//!
//! Writes happen through [`append_change`] inside whatever transaction is
//! mutating the tracked entity; this repository only reads. Rows are never
//! updated or deleted except when a whole project is purged.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, Row, params};
use time::OffsetDateTime;

use super::domain::{AuditEntity, StatusChange, TrackedField};
use super::error::StoreResult;
use super::repository::AuditRepository;
use super::{format_ts, parse_ts, run_blocking};

/// Write one audit row. Called inside the mutating transaction so the row
/// commits or rolls back together with the change it records.
pub(crate) fn append_change(
    conn: &Connection,
    entity: AuditEntity,
    entity_id: &str,
    field: TrackedField,
    old_value: Option<&str>,
    new_value: Option<&str>,
    actor: &str,
    reason: Option<&str>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO status_history
            (entity, entity_public_id, field, old_value, new_value, actor, reason, changed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entity.as_str(),
            entity_id,
            field.as_str(),
            old_value,
            new_value,
            actor,
            reason,
            format_ts(OffsetDateTime::now_utc()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn change_from_row(row: &Row<'_>) -> rusqlite::Result<StatusChange> {
    let entity: String = row.get("entity")?;
    let field: String = row.get("field")?;
    let changed_at: String = row.get("changed_at")?;
    Ok(StatusChange {
        id: row.get("id")?,
        entity: AuditEntity::from_str(&entity).map_err(|_| rusqlite::Error::InvalidQuery)?,
        entity_id: row.get("entity_public_id")?,
        field: TrackedField::from_str(&field).map_err(|_| rusqlite::Error::InvalidQuery)?,
        old_value: row.get("old_value")?,
        new_value: row.get("new_value")?,
        actor: row.get("actor")?,
        reason: row.get("reason")?,
        changed_at: parse_ts(&changed_at)?,
    })
}

#[derive(Clone)]
pub struct SqliteAuditRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    async fn history_for(
        &self,
        entity: AuditEntity,
        entity_id: &str,
    ) -> StoreResult<Vec<StatusChange>> {
        let entity_id = entity_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, entity, entity_public_id, field, old_value, new_value,
                        actor, reason, changed_at
                 FROM status_history
                 WHERE entity = ?1 AND entity_public_id = ?2
                 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![entity.as_str(), entity_id], change_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn recent(&self, limit: u32) -> StoreResult<Vec<StatusChange>> {
        run_blocking(&self.conn, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, entity, entity_public_id, field, old_value, new_value,
                        actor, reason, changed_at
                 FROM status_history
                 ORDER BY id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], change_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}
