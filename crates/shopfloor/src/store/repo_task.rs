//! Task repository.
//!
//! Dependencies live in the `task_dependencies` join table and surface on
//! the task as a sorted list of sibling public ids. Status writes stamp
//! started_at on the first move into progress and completed_at on
//! completion, and every tracked-field change lands one audit row in the
//! same transaction.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params};
use time::OffsetDateTime;
use uuid::Uuid;

use super::domain::{AuditEntity, NewTask, Priority, Task, TaskStatus, TrackedField};
use super::error::{StoreError, StoreResult};
use super::patch::{Patch, TaskPatch};
use super::repo_audit::append_change;
use super::repository::TaskRepository;
use super::{format_ts, lookup_order_id, parse_ts, parse_ts_opt, run_blocking};

const SELECT_TASK: &str = "SELECT t.id, t.public_id, o.public_id AS order_public_id,
            p.public_id AS project_public_id, t.number, t.title, t.description,
            t.status, t.priority, t.assignee, t.recommended_model,
            (SELECT GROUP_CONCAT(d.public_id)
               FROM task_dependencies td
               JOIN tasks d ON d.id = td.depends_on_id
              WHERE td.task_id = t.id) AS depends_on,
            t.reject_count, t.started_at, t.completed_at, t.created_at, t.updated_at
     FROM tasks t
     JOIN orders o ON o.id = t.order_id
     JOIN projects p ON p.id = o.project_id";

pub(crate) fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get("status")?;
    let priority: String = row.get("priority")?;
    let depends_on: Option<String> = row.get("depends_on")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let mut depends_on: Vec<String> = depends_on
        .map(|s| s.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    depends_on.sort();

    Ok(Task {
        id: row.get("id")?,
        public_id: row.get("public_id")?,
        order_id: row.get("order_public_id")?,
        project_id: row.get("project_public_id")?,
        number: row.get("number")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: TaskStatus::from_str(&status).map_err(|_| rusqlite::Error::InvalidQuery)?,
        priority: Priority::from_str(&priority).map_err(|_| rusqlite::Error::InvalidQuery)?,
        assignee: row.get("assignee")?,
        recommended_model: row.get("recommended_model")?,
        depends_on,
        reject_count: row.get("reject_count")?,
        started_at: parse_ts_opt(started_at)?,
        completed_at: parse_ts_opt(completed_at)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub(crate) fn get_task_by_rowid(conn: &Connection, id: i64) -> StoreResult<Task> {
    let task = conn.query_row(
        &format!("{SELECT_TASK} WHERE t.id = ?1"),
        params![id],
        task_from_row,
    )?;
    Ok(task)
}

pub(crate) fn get_task(conn: &Connection, public_id: &str) -> StoreResult<Task> {
    conn.query_row(
        &format!("{SELECT_TASK} WHERE t.public_id = ?1"),
        params![public_id],
        task_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::TaskNotFound(public_id.to_string()))
}

pub(crate) fn list_tasks_for_order(conn: &Connection, order_id: i64) -> StoreResult<Vec<Task>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_TASK} WHERE t.order_id = ?1 ORDER BY t.number ASC"
    ))?;
    let rows = stmt
        .query_map(params![order_id], task_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Status write shared with the review repository's transactions.
pub(crate) fn write_task_status(
    conn: &Connection,
    task: &Task,
    to: TaskStatus,
    actor: &str,
    reason: Option<&str>,
) -> StoreResult<Task> {
    let now = format_ts(OffsetDateTime::now_utc());
    match to {
        TaskStatus::InProgress if task.started_at.is_none() => {
            conn.execute(
                "UPDATE tasks SET status = ?1, started_at = ?2, updated_at = ?2 WHERE id = ?3",
                params![to.as_str(), now, task.id],
            )?;
        }
        TaskStatus::Completed => {
            conn.execute(
                "UPDATE tasks SET status = ?1, completed_at = ?2, updated_at = ?2 WHERE id = ?3",
                params![to.as_str(), now, task.id],
            )?;
        }
        _ => {
            conn.execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![to.as_str(), now, task.id],
            )?;
        }
    }
    append_change(
        conn,
        AuditEntity::Task,
        &task.public_id,
        TrackedField::Status,
        Some(task.status.as_str()),
        Some(to.as_str()),
        actor,
        reason,
    )?;
    get_task_by_rowid(conn, task.id)
}

fn next_task_number(conn: &Connection, order_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(number), 0) + 1 FROM tasks WHERE order_id = ?1",
        params![order_id],
        |row| row.get(0),
    )
}

fn insert_dependencies(
    conn: &Connection,
    task_rowid: i64,
    order_rowid: i64,
    deps: &[String],
) -> StoreResult<()> {
    for dep in deps {
        let dep_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM tasks WHERE public_id = ?1 AND order_id = ?2",
                params![dep, order_rowid],
                |row| row.get(0),
            )
            .optional()?;
        let dep_id = dep_id.ok_or_else(|| StoreError::TaskNotFound(dep.clone()))?;
        conn.execute(
            "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_id) VALUES (?1, ?2)",
            params![task_rowid, dep_id],
        )?;
    }
    Ok(())
}

fn deps_as_value(deps: &[String]) -> Option<String> {
    if deps.is_empty() {
        None
    } else {
        Some(deps.join(","))
    }
}

#[derive(Clone)]
pub struct SqliteTaskRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, order_id: &str, input: NewTask) -> StoreResult<Task> {
        let order_public = order_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let order_id = lookup_order_id(&tx, &order_public)?
                .ok_or_else(|| StoreError::OrderNotFound(order_public.clone()))?;
            let number = next_task_number(&tx, order_id)?;
            let now = format_ts(OffsetDateTime::now_utc());
            tx.execute(
                "INSERT INTO tasks
                    (public_id, order_id, number, title, description, status, priority,
                     assignee, recommended_model, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    Uuid::now_v7().to_string(),
                    order_id,
                    number,
                    input.title,
                    input.description,
                    TaskStatus::Queued.as_str(),
                    input.priority.as_str(),
                    input.assignee,
                    input.recommended_model,
                    now,
                ],
            )?;
            let id = tx.last_insert_rowid();
            insert_dependencies(&tx, id, order_id, &input.depends_on)?;
            let task = get_task_by_rowid(&tx, id)?;
            tx.commit()?;
            Ok(task)
        })
        .await
    }

    async fn get(&self, task_id: &str) -> StoreResult<Task> {
        let public_id = task_id.to_string();
        run_blocking(&self.conn, move |conn| get_task(conn, &public_id)).await
    }

    async fn list(&self, order_id: &str) -> StoreResult<Vec<Task>> {
        let order_public = order_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let order_id = lookup_order_id(conn, &order_public)?
                .ok_or_else(|| StoreError::OrderNotFound(order_public.clone()))?;
            list_tasks_for_order(conn, order_id)
        })
        .await
    }

    async fn update(&self, task_id: &str, patch: TaskPatch, actor: &str) -> StoreResult<Task> {
        let public_id = task_id.to_string();
        let actor = actor.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let current = get_task(&tx, &public_id)?;
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
            match patch.assignee {
                Patch::Keep => {}
                Patch::Clear if current.assignee.is_some() => {
                    audits.push((TrackedField::Assignee, current.assignee.clone(), None));
                    sets.push("assignee = NULL".to_string());
                }
                Patch::Clear => {}
                Patch::Set(v) if Some(&v) != current.assignee.as_ref() => {
                    audits.push((
                        TrackedField::Assignee,
                        current.assignee.clone(),
                        Some(v.clone()),
                    ));
                    values.push(Box::new(v));
                    sets.push(format!("assignee = ?{}", values.len()));
                }
                Patch::Set(_) => {}
            }
            match patch.recommended_model {
                Patch::Keep => {}
                Patch::Clear if current.recommended_model.is_some() => {
                    audits.push((
                        TrackedField::RecommendedModel,
                        current.recommended_model.clone(),
                        None,
                    ));
                    sets.push("recommended_model = NULL".to_string());
                }
                Patch::Clear => {}
                Patch::Set(v) if Some(&v) != current.recommended_model.as_ref() => {
                    audits.push((
                        TrackedField::RecommendedModel,
                        current.recommended_model.clone(),
                        Some(v.clone()),
                    ));
                    values.push(Box::new(v));
                    sets.push(format!("recommended_model = ?{}", values.len()));
                }
                Patch::Set(_) => {}
            }

            let mut deps_changed = false;
            if let Some(new_deps) = patch.depends_on {
                let mut new_deps = new_deps;
                new_deps.sort();
                new_deps.dedup();
                if new_deps != current.depends_on {
                    let order_rowid = lookup_order_id(&tx, &current.order_id)?
                        .ok_or_else(|| StoreError::OrderNotFound(current.order_id.clone()))?;
                    tx.execute(
                        "DELETE FROM task_dependencies WHERE task_id = ?1",
                        params![current.id],
                    )?;
                    insert_dependencies(&tx, current.id, order_rowid, &new_deps)?;
                    audits.push((
                        TrackedField::Dependencies,
                        deps_as_value(&current.depends_on),
                        deps_as_value(&new_deps),
                    ));
                    deps_changed = true;
                }
            }

            if sets.is_empty() && !deps_changed {
                tx.commit()?;
                return Ok(current);
            }

            values.push(Box::new(format_ts(OffsetDateTime::now_utc())));
            sets.push(format!("updated_at = ?{}", values.len()));
            values.push(Box::new(current.id));
            let sql = format!(
                "UPDATE tasks SET {} WHERE id = ?{}",
                sets.join(", "),
                values.len()
            );
            let param_refs: Vec<&dyn ToSql> = values.iter().map(AsRef::as_ref).collect();
            tx.execute(&sql, &param_refs[..])?;

            for (field, old_value, new_value) in audits {
                append_change(
                    &tx,
                    AuditEntity::Task,
                    &current.public_id,
                    field,
                    old_value.as_deref(),
                    new_value.as_deref(),
                    &actor,
                    None,
                )?;
            }

            let updated = get_task_by_rowid(&tx, current.id)?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    async fn set_status(
        &self,
        task_id: &str,
        to: TaskStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> StoreResult<Task> {
        let public_id = task_id.to_string();
        let actor = actor.to_string();
        let reason = reason.map(str::to_string);
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let current = get_task(&tx, &public_id)?;
            let updated = write_task_status(&tx, &current, to, &actor, reason.as_deref())?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    async fn increment_reject_count(&self, task_id: &str) -> StoreResult<Task> {
        let public_id = task_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let current = get_task(&tx, &public_id)?;
            tx.execute(
                "UPDATE tasks SET reject_count = reject_count + 1, updated_at = ?1 WHERE id = ?2",
                params![format_ts(OffsetDateTime::now_utc()), current.id],
            )?;
            let updated = get_task_by_rowid(&tx, current.id)?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }
}
