//! Project repository.
//!
//! Projects are the only entities whose public id is caller-supplied rather
//! than generated. Partial updates diff against the current row and write
//! only real changes; project fields are not audited (only tasks and orders
//! carry an audit trail).

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params};
use time::OffsetDateTime;

use super::domain::{DeletedCounts, NewProject, Project, ProjectStatus};
use super::error::{StoreError, StoreResult};
use super::patch::{Patch, ProjectPatch};
use super::repository::ProjectRepository;
use super::{format_ts, lookup_project_id, parse_ts, run_blocking};

const SELECT_PROJECT: &str = "SELECT p.id, p.public_id, p.name, p.path, p.status,
            p.description, p.purpose, p.tech_stack,
            s.public_id AS supervisor_public_id,
            p.created_at, p.updated_at
     FROM projects p
     LEFT JOIN supervisors s ON s.id = p.supervisor_id";

pub(crate) fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(Project {
        id: row.get("id")?,
        public_id: row.get("public_id")?,
        name: row.get("name")?,
        path: row.get("path")?,
        status: ProjectStatus::from_str(&status).map_err(|_| rusqlite::Error::InvalidQuery)?,
        description: row.get("description")?,
        purpose: row.get("purpose")?,
        tech_stack: row.get("tech_stack")?,
        supervisor_id: row.get("supervisor_public_id")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub(crate) fn get_project_by_rowid(conn: &Connection, id: i64) -> StoreResult<Project> {
    let project = conn.query_row(
        &format!("{SELECT_PROJECT} WHERE p.id = ?1"),
        params![id],
        project_from_row,
    )?;
    Ok(project)
}

fn get_project(conn: &Connection, public_id: &str) -> StoreResult<Project> {
    conn.query_row(
        &format!("{SELECT_PROJECT} WHERE p.public_id = ?1"),
        params![public_id],
        project_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::ProjectNotFound(public_id.to_string()))
}

#[derive(Clone)]
pub struct SqliteProjectRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteProjectRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ProjectRepository for SqliteProjectRepository {
    async fn create(&self, input: NewProject) -> StoreResult<Project> {
        run_blocking(&self.conn, move |conn| {
            let now = format_ts(OffsetDateTime::now_utc());
            let name = input.name.clone().unwrap_or_else(|| input.id.clone());
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO projects
                    (public_id, name, path, status, description, purpose, tech_stack,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    input.id,
                    name,
                    input.path,
                    ProjectStatus::Initial.as_str(),
                    input.description,
                    input.purpose,
                    input.tech_stack,
                    now,
                ],
            )?;
            let id = tx.last_insert_rowid();
            let project = get_project_by_rowid(&tx, id)?;
            tx.commit()?;
            Ok(project)
        })
        .await
    }

    async fn get(&self, project_id: &str) -> StoreResult<Project> {
        let public_id = project_id.to_string();
        run_blocking(&self.conn, move |conn| get_project(conn, &public_id)).await
    }

    async fn list(&self) -> StoreResult<Vec<Project>> {
        run_blocking(&self.conn, |conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_PROJECT} ORDER BY p.name ASC"))?;
            let rows = stmt
                .query_map([], project_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn update(&self, project_id: &str, patch: ProjectPatch) -> StoreResult<Project> {
        let public_id = project_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let current = get_project(&tx, &public_id)?;
            if patch.is_empty() {
                tx.commit()?;
                return Ok(current);
            }

            let current_supervisor: Option<i64> = tx.query_row(
                "SELECT supervisor_id FROM projects WHERE id = ?1",
                params![current.id],
                |row| row.get(0),
            )?;

            let mut sets: Vec<String> = Vec::new();
            let mut values: Vec<Box<dyn ToSql>> = Vec::new();

            if let Some(name) = patch.name
                && name != current.name
            {
                values.push(Box::new(name));
                sets.push(format!("name = ?{}", values.len()));
            }
            if let Some(status) = patch.status
                && status != current.status
            {
                values.push(Box::new(status.as_str()));
                sets.push(format!("status = ?{}", values.len()));
            }
            match patch.path {
                Patch::Keep => {}
                Patch::Clear if current.path.is_some() => sets.push("path = NULL".to_string()),
                Patch::Clear => {}
                Patch::Set(v) if Some(&v) != current.path.as_ref() => {
                    values.push(Box::new(v));
                    sets.push(format!("path = ?{}", values.len()));
                }
                Patch::Set(_) => {}
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
            match patch.purpose {
                Patch::Keep => {}
                Patch::Clear if current.purpose.is_some() => {
                    sets.push("purpose = NULL".to_string());
                }
                Patch::Clear => {}
                Patch::Set(v) if Some(&v) != current.purpose.as_ref() => {
                    values.push(Box::new(v));
                    sets.push(format!("purpose = ?{}", values.len()));
                }
                Patch::Set(_) => {}
            }
            match patch.tech_stack {
                Patch::Keep => {}
                Patch::Clear if current.tech_stack.is_some() => {
                    sets.push("tech_stack = NULL".to_string());
                }
                Patch::Clear => {}
                Patch::Set(v) if Some(&v) != current.tech_stack.as_ref() => {
                    values.push(Box::new(v));
                    sets.push(format!("tech_stack = ?{}", values.len()));
                }
                Patch::Set(_) => {}
            }
            match patch.supervisor_id {
                Patch::Keep => {}
                Patch::Clear if current_supervisor.is_some() => {
                    sets.push("supervisor_id = NULL".to_string());
                }
                Patch::Clear => {}
                Patch::Set(sup_public) => {
                    let sup_id: Option<i64> = tx
                        .query_row(
                            "SELECT id FROM supervisors WHERE public_id = ?1",
                            params![sup_public],
                            |row| row.get(0),
                        )
                        .optional()?;
                    let sup_id =
                        sup_id.ok_or_else(|| StoreError::SupervisorNotFound(sup_public))?;
                    if Some(sup_id) != current_supervisor {
                        values.push(Box::new(sup_id));
                        sets.push(format!("supervisor_id = ?{}", values.len()));
                    }
                }
            }

            if sets.is_empty() {
                tx.commit()?;
                return Ok(current);
            }

            values.push(Box::new(format_ts(OffsetDateTime::now_utc())));
            sets.push(format!("updated_at = ?{}", values.len()));
            values.push(Box::new(current.id));
            let sql = format!(
                "UPDATE projects SET {} WHERE id = ?{}",
                sets.join(", "),
                values.len()
            );
            let param_refs: Vec<&dyn ToSql> = values.iter().map(AsRef::as_ref).collect();
            tx.execute(&sql, &param_refs[..])?;

            let updated = get_project_by_rowid(&tx, current.id)?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    async fn delete(&self, project_id: &str) -> StoreResult<DeletedCounts> {
        let public_id = project_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let id = lookup_project_id(&tx, &public_id)?
                .ok_or_else(|| StoreError::ProjectNotFound(public_id.clone()))?;

            let orders: i64 = tx.query_row(
                "SELECT COUNT(*) FROM orders WHERE project_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            let tasks: i64 = tx.query_row(
                "SELECT COUNT(*) FROM tasks
                 WHERE order_id IN (SELECT id FROM orders WHERE project_id = ?1)",
                params![id],
                |row| row.get(0),
            )?;
            let backlogs: i64 = tx.query_row(
                "SELECT COUNT(*) FROM backlogs WHERE project_id = ?1",
                params![id],
                |row| row.get(0),
            )?;

            // History of the deleted entities goes with them; rows for other
            // projects stay untouched.
            tx.execute(
                "DELETE FROM status_history
                 WHERE (entity = 'order' AND entity_public_id IN
                        (SELECT public_id FROM orders WHERE project_id = ?1))
                    OR (entity = 'task' AND entity_public_id IN
                        (SELECT public_id FROM tasks WHERE order_id IN
                            (SELECT id FROM orders WHERE project_id = ?1)))",
                params![id],
            )?;
            tx.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
            tx.commit()?;

            Ok(DeletedCounts {
                orders,
                tasks,
                backlogs,
            })
        })
        .await
    }
}
