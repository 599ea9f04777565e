//! Backlog repository.
//!
//! Backlog items are numbered per project like orders. Linking an item to
//! the order it was promoted into flips it to in_order and records the
//! order's public id; relinking to the same order is a no-op.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params};
use time::OffsetDateTime;
use uuid::Uuid;

use super::domain::{BacklogItem, BacklogStatus, NewBacklogItem, Priority};
use super::error::{StoreError, StoreResult};
use super::patch::{BacklogPatch, Patch};
use super::repository::BacklogRepository;
use super::{format_ts, lookup_order_id, lookup_project_id, parse_ts, run_blocking};

const SELECT_BACKLOG: &str =
    "SELECT b.id, b.public_id, p.public_id AS project_public_id, b.number, b.title,
            b.description, b.status, b.priority, o.public_id AS order_public_id,
            b.created_at, b.updated_at
     FROM backlogs b
     JOIN projects p ON p.id = b.project_id
     LEFT JOIN orders o ON o.id = b.order_id";

pub(crate) fn backlog_from_row(row: &Row<'_>) -> rusqlite::Result<BacklogItem> {
    let status: String = row.get("status")?;
    let priority: String = row.get("priority")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(BacklogItem {
        id: row.get("id")?,
        public_id: row.get("public_id")?,
        project_id: row.get("project_public_id")?,
        number: row.get("number")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: BacklogStatus::from_str(&status).map_err(|_| rusqlite::Error::InvalidQuery)?,
        priority: Priority::from_str(&priority).map_err(|_| rusqlite::Error::InvalidQuery)?,
        order_id: row.get("order_public_id")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub(crate) fn get_backlog_by_rowid(conn: &Connection, id: i64) -> StoreResult<BacklogItem> {
    let item = conn.query_row(
        &format!("{SELECT_BACKLOG} WHERE b.id = ?1"),
        params![id],
        backlog_from_row,
    )?;
    Ok(item)
}

fn get_backlog(conn: &Connection, public_id: &str) -> StoreResult<BacklogItem> {
    conn.query_row(
        &format!("{SELECT_BACKLOG} WHERE b.public_id = ?1"),
        params![public_id],
        backlog_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::BacklogNotFound(public_id.to_string()))
}

/// Insert a backlog row for callers already inside a transaction holding the
/// project rowid. Shared with cross-project dispatch.
pub(crate) fn insert_backlog_item(
    conn: &Connection,
    project_rowid: i64,
    input: &NewBacklogItem,
) -> StoreResult<BacklogItem> {
    let number: i64 = conn.query_row(
        "SELECT COALESCE(MAX(number), 0) + 1 FROM backlogs WHERE project_id = ?1",
        params![project_rowid],
        |row| row.get(0),
    )?;
    let now = format_ts(OffsetDateTime::now_utc());
    conn.execute(
        "INSERT INTO backlogs
            (public_id, project_id, number, title, description, status, priority,
             created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            Uuid::now_v7().to_string(),
            project_rowid,
            number,
            input.title,
            input.description,
            BacklogStatus::Todo.as_str(),
            input.priority.as_str(),
            now,
        ],
    )?;
    get_backlog_by_rowid(conn, conn.last_insert_rowid())
}

#[derive(Clone)]
pub struct SqliteBacklogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBacklogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl BacklogRepository for SqliteBacklogRepository {
    async fn create(&self, project_id: &str, input: NewBacklogItem) -> StoreResult<BacklogItem> {
        let project_public = project_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let project_id = lookup_project_id(&tx, &project_public)?
                .ok_or_else(|| StoreError::ProjectNotFound(project_public.clone()))?;
            let item = insert_backlog_item(&tx, project_id, &input)?;
            tx.commit()?;
            Ok(item)
        })
        .await
    }

    async fn get(&self, backlog_id: &str) -> StoreResult<BacklogItem> {
        let public_id = backlog_id.to_string();
        run_blocking(&self.conn, move |conn| get_backlog(conn, &public_id)).await
    }

    async fn list(&self, project_id: &str) -> StoreResult<Vec<BacklogItem>> {
        let project_public = project_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let project_id = lookup_project_id(conn, &project_public)?
                .ok_or_else(|| StoreError::ProjectNotFound(project_public.clone()))?;
            let mut stmt = conn.prepare(&format!(
                "{SELECT_BACKLOG} WHERE b.project_id = ?1
                 ORDER BY CASE b.priority WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END,
                          b.number ASC"
            ))?;
            let rows = stmt
                .query_map(params![project_id], backlog_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn update(&self, backlog_id: &str, patch: BacklogPatch) -> StoreResult<BacklogItem> {
        let public_id = backlog_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let current = get_backlog(&tx, &public_id)?;
            if patch.is_empty() {
                tx.commit()?;
                return Ok(current);
            }

            let mut sets: Vec<String> = Vec::new();
            let mut values: Vec<Box<dyn ToSql>> = Vec::new();

            if let Some(title) = patch.title
                && title != current.title
            {
                values.push(Box::new(title));
                sets.push(format!("title = ?{}", values.len()));
            }
            if let Some(priority) = patch.priority
                && priority != current.priority
            {
                values.push(Box::new(priority.as_str()));
                sets.push(format!("priority = ?{}", values.len()));
            }
            if let Some(status) = patch.status
                && status != current.status
            {
                values.push(Box::new(status.as_str()));
                sets.push(format!("status = ?{}", values.len()));
            }
            match patch.description {
                Patch::Keep => {}
                Patch::Clear if current.description.is_some() => {
                    sets.push("description = NULL".to_string());
                }
                Patch::Clear => {}
                Patch::Set(v) if Some(&v) != current.description.as_ref() => {
                    values.push(Box::new(v));
                    sets.push(format!("description = ?{}", values.len()));
                }
                Patch::Set(_) => {}
            }

            if sets.is_empty() {
                tx.commit()?;
                return Ok(current);
            }

            values.push(Box::new(format_ts(OffsetDateTime::now_utc())));
            sets.push(format!("updated_at = ?{}", values.len()));
            values.push(Box::new(current.id));
            let sql = format!(
                "UPDATE backlogs SET {} WHERE id = ?{}",
                sets.join(", "),
                values.len()
            );
            let param_refs: Vec<&dyn ToSql> = values.iter().map(AsRef::as_ref).collect();
            tx.execute(&sql, &param_refs[..])?;

            let updated = get_backlog_by_rowid(&tx, current.id)?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    async fn delete(&self, backlog_id: &str) -> StoreResult<()> {
        let public_id = backlog_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let affected = conn.execute(
                "DELETE FROM backlogs WHERE public_id = ?1",
                params![public_id],
            )?;
            if affected == 0 {
                return Err(StoreError::BacklogNotFound(public_id.clone()));
            }
            Ok(())
        })
        .await
    }

    async fn link_to_order(&self, backlog_id: &str, order_id: &str) -> StoreResult<BacklogItem> {
        let backlog_public = backlog_id.to_string();
        let order_public = order_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let current = get_backlog(&tx, &backlog_public)?;
            if current.order_id.as_deref() == Some(order_public.as_str()) {
                tx.commit()?;
                return Ok(current);
            }
            let order_rowid = lookup_order_id(&tx, &order_public)?
                .ok_or_else(|| StoreError::OrderNotFound(order_public.clone()))?;
            tx.execute(
                "UPDATE backlogs SET order_id = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    order_rowid,
                    BacklogStatus::InOrder.as_str(),
                    format_ts(OffsetDateTime::now_utc()),
                    current.id,
                ],
            )?;
            let updated = get_backlog_by_rowid(&tx, current.id)?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }
}
