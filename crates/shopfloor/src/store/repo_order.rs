//! Order repository.
//!
//! Orders are numbered sequentially within their project; the number is
//! allocated fresh inside the creating transaction. Changes to tracked
//! fields (status, title, priority, description) land in the audit trail
//! in the same transaction.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params};
use time::OffsetDateTime;
use uuid::Uuid;

use super::domain::{AuditEntity, NewOrder, Order, OrderStatus, Priority, TrackedField};
use super::error::{StoreError, StoreResult};
use super::patch::{OrderPatch, Patch};
use super::repo_audit::append_change;
use super::repository::OrderRepository;
use super::{format_ts, lookup_project_id, parse_ts, run_blocking};

const SELECT_ORDER: &str =
    "SELECT o.id, o.public_id, p.public_id AS project_public_id, o.number, o.title,
            o.description, o.status, o.priority, o.created_at, o.updated_at
     FROM orders o
     JOIN projects p ON p.id = o.project_id";

/// Priority rank expression for the ordered list queries.
const PRIORITY_RANK: &str = "CASE o.priority WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END";

pub(crate) fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    let status: String = row.get("status")?;
    let priority: String = row.get("priority")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(Order {
        id: row.get("id")?,
        public_id: row.get("public_id")?,
        project_id: row.get("project_public_id")?,
        number: row.get("number")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: OrderStatus::from_str(&status).map_err(|_| rusqlite::Error::InvalidQuery)?,
        priority: Priority::from_str(&priority).map_err(|_| rusqlite::Error::InvalidQuery)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub(crate) fn get_order_by_rowid(conn: &Connection, id: i64) -> StoreResult<Order> {
    let order = conn.query_row(
        &format!("{SELECT_ORDER} WHERE o.id = ?1"),
        params![id],
        order_from_row,
    )?;
    Ok(order)
}

pub(crate) fn get_order(conn: &Connection, public_id: &str) -> StoreResult<Order> {
    conn.query_row(
        &format!("{SELECT_ORDER} WHERE o.public_id = ?1"),
        params![public_id],
        order_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::OrderNotFound(public_id.to_string()))
}

/// Status write shared with the progress aggregator's completion commit.
pub(crate) fn write_order_status(
    conn: &Connection,
    order: &Order,
    to: OrderStatus,
    actor: &str,
    reason: Option<&str>,
) -> StoreResult<Order> {
    conn.execute(
        "UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![to.as_str(), format_ts(OffsetDateTime::now_utc()), order.id],
    )?;
    append_change(
        conn,
        AuditEntity::Order,
        &order.public_id,
        TrackedField::Status,
        Some(order.status.as_str()),
        Some(to.as_str()),
        actor,
        reason,
    )?;
    get_order_by_rowid(conn, order.id)
}

fn next_order_number(conn: &Connection, project_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(number), 0) + 1 FROM orders WHERE project_id = ?1",
        params![project_id],
        |row| row.get(0),
    )
}

#[derive(Clone)]
pub struct SqliteOrderRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteOrderRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn create(&self, project_id: &str, input: NewOrder) -> StoreResult<Order> {
        let project_public = project_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let project_id = lookup_project_id(&tx, &project_public)?
                .ok_or_else(|| StoreError::ProjectNotFound(project_public.clone()))?;
            let number = next_order_number(&tx, project_id)?;
            let now = format_ts(OffsetDateTime::now_utc());
            tx.execute(
                "INSERT INTO orders
                    (public_id, project_id, number, title, description, status, priority,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    Uuid::now_v7().to_string(),
                    project_id,
                    number,
                    input.title,
                    input.description,
                    OrderStatus::Planning.as_str(),
                    input.priority.as_str(),
                    now,
                ],
            )?;
            let id = tx.last_insert_rowid();
            let order = get_order_by_rowid(&tx, id)?;
            tx.commit()?;
            Ok(order)
        })
        .await
    }

    async fn get(&self, order_id: &str) -> StoreResult<Order> {
        let public_id = order_id.to_string();
        run_blocking(&self.conn, move |conn| get_order(conn, &public_id)).await
    }

    async fn list(&self, project_id: &str) -> StoreResult<Vec<Order>> {
        let project_public = project_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let project_id = lookup_project_id(conn, &project_public)?
                .ok_or_else(|| StoreError::ProjectNotFound(project_public.clone()))?;
            let mut stmt = conn.prepare(&format!(
                "{SELECT_ORDER} WHERE o.project_id = ?1 ORDER BY {PRIORITY_RANK}, o.number ASC"
            ))?;
            let rows = stmt
                .query_map(params![project_id], order_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn next_number(&self, project_id: &str) -> StoreResult<i64> {
        let project_public = project_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let project_id = lookup_project_id(conn, &project_public)?
                .ok_or_else(|| StoreError::ProjectNotFound(project_public.clone()))?;
            Ok(next_order_number(conn, project_id)?)
        })
        .await
    }

    async fn update(&self, order_id: &str, patch: OrderPatch, actor: &str) -> StoreResult<Order> {
        let public_id = order_id.to_string();
        let actor = actor.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let current = get_order(&tx, &public_id)?;
            if patch.is_empty() {
                tx.commit()?;
                return Ok(current);
            }

            let mut sets: Vec<String> = Vec::new();
            let mut values: Vec<Box<dyn ToSql>> = Vec::new();
            let mut audits: Vec<(TrackedField, Option<String>, Option<String>)> = Vec::new();

            if let Some(title) = patch.title
                && title != current.title
            {
                audits.push((
                    TrackedField::Title,
                    Some(current.title.clone()),
                    Some(title.clone()),
                ));
                values.push(Box::new(title));
                sets.push(format!("title = ?{}", values.len()));
            }
            if let Some(priority) = patch.priority
                && priority != current.priority
            {
                audits.push((
                    TrackedField::Priority,
                    Some(current.priority.as_str().to_string()),
                    Some(priority.as_str().to_string()),
                ));
                values.push(Box::new(priority.as_str()));
                sets.push(format!("priority = ?{}", values.len()));
            }
            match patch.description {
                Patch::Keep => {}
                Patch::Clear if current.description.is_some() => {
                    audits.push((TrackedField::Description, current.description.clone(), None));
                    sets.push("description = NULL".to_string());
                }
                Patch::Clear => {}
                Patch::Set(v) if Some(&v) != current.description.as_ref() => {
                    audits.push((
                        TrackedField::Description,
                        current.description.clone(),
                        Some(v.clone()),
                    ));
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
                "UPDATE orders SET {} WHERE id = ?{}",
                sets.join(", "),
                values.len()
            );
            let param_refs: Vec<&dyn ToSql> = values.iter().map(AsRef::as_ref).collect();
            tx.execute(&sql, &param_refs[..])?;

            for (field, old_value, new_value) in audits {
                append_change(
                    &tx,
                    AuditEntity::Order,
                    &current.public_id,
                    field,
                    old_value.as_deref(),
                    new_value.as_deref(),
                    &actor,
                    None,
                )?;
            }

            let updated = get_order_by_rowid(&tx, current.id)?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    async fn set_status(
        &self,
        order_id: &str,
        to: OrderStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> StoreResult<Order> {
        let public_id = order_id.to_string();
        let actor = actor.to_string();
        let reason = reason.map(str::to_string);
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let current = get_order(&tx, &public_id)?;
            let updated = write_order_status(&tx, &current, to, &actor, reason.as_deref())?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }
}

/// Order list for callers already holding the project rowid.
pub(crate) fn list_orders_for_project(
    conn: &Connection,
    project_id: i64,
) -> StoreResult<Vec<Order>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_ORDER} WHERE o.project_id = ?1 ORDER BY {PRIORITY_RANK}, o.number ASC"
    ))?;
    let rows = stmt
        .query_map(params![project_id], order_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
