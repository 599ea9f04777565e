//! Supervisor repository.
//!
//! Supervisors group projects and keep their own backlog of items that can
//! be dispatched into one supervised project. Dispatch copies the item into
//! the target project's backlog and pins the link; dispatching the same
//! item to the same project again returns the existing link.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use time::OffsetDateTime;
use uuid::Uuid;

use super::domain::{
    BacklogStatus, CrossProjectItem, DispatchOutcome, NewBacklogItem, NewCrossProjectItem,
    Priority, Supervisor,
};
use super::error::{StoreError, StoreResult};
use super::repo_backlog::{get_backlog_by_rowid, insert_backlog_item};
use super::repository::SupervisorRepository;
use super::{format_ts, lookup_project_id, parse_ts, run_blocking};

const SELECT_SUPERVISOR: &str = "SELECT id, public_id, name, created_at FROM supervisors";

const SELECT_ITEM: &str =
    "SELECT x.id, x.public_id, x.supervisor_id, x.number, x.title, x.description,
            x.status, x.priority,
            p.public_id AS dispatched_project_public_id,
            b.public_id AS dispatched_backlog_public_id,
            x.created_at, x.updated_at
     FROM cross_project_backlog x
     LEFT JOIN projects p ON p.id = x.dispatched_project_id
     LEFT JOIN backlogs b ON b.id = x.dispatched_backlog_id";

fn supervisor_from_row(row: &Row<'_>) -> rusqlite::Result<Supervisor> {
    let created_at: String = row.get("created_at")?;
    Ok(Supervisor {
        id: row.get("id")?,
        public_id: row.get("public_id")?,
        name: row.get("name")?,
        created_at: parse_ts(&created_at)?,
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<CrossProjectItem> {
    let status: String = row.get("status")?;
    let priority: String = row.get("priority")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(CrossProjectItem {
        id: row.get("id")?,
        public_id: row.get("public_id")?,
        supervisor_id: row.get("supervisor_id")?,
        number: row.get("number")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: BacklogStatus::from_str(&status).map_err(|_| rusqlite::Error::InvalidQuery)?,
        priority: Priority::from_str(&priority).map_err(|_| rusqlite::Error::InvalidQuery)?,
        dispatched_project_id: row.get("dispatched_project_public_id")?,
        dispatched_backlog_id: row.get("dispatched_backlog_public_id")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn get_supervisor(conn: &Connection, public_id: &str) -> StoreResult<Supervisor> {
    conn.query_row(
        &format!("{SELECT_SUPERVISOR} WHERE public_id = ?1"),
        params![public_id],
        supervisor_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::SupervisorNotFound(public_id.to_string()))
}

fn get_item(conn: &Connection, public_id: &str) -> StoreResult<CrossProjectItem> {
    conn.query_row(
        &format!("{SELECT_ITEM} WHERE x.public_id = ?1"),
        params![public_id],
        item_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::CrossProjectItemNotFound(public_id.to_string()))
}

fn get_item_by_rowid(conn: &Connection, id: i64) -> StoreResult<CrossProjectItem> {
    let item = conn.query_row(
        &format!("{SELECT_ITEM} WHERE x.id = ?1"),
        params![id],
        item_from_row,
    )?;
    Ok(item)
}

#[derive(Clone)]
pub struct SqliteSupervisorRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSupervisorRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SupervisorRepository for SqliteSupervisorRepository {
    async fn create(&self, name: &str) -> StoreResult<Supervisor> {
        let name = name.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO supervisors (public_id, name, created_at) VALUES (?1, ?2, ?3)",
                params![
                    Uuid::now_v7().to_string(),
                    name,
                    format_ts(OffsetDateTime::now_utc()),
                ],
            )?;
            let supervisor = tx.query_row(
                &format!("{SELECT_SUPERVISOR} WHERE id = ?1"),
                params![tx.last_insert_rowid()],
                supervisor_from_row,
            )?;
            tx.commit()?;
            Ok(supervisor)
        })
        .await
    }

    async fn get(&self, supervisor_id: &str) -> StoreResult<Supervisor> {
        let public_id = supervisor_id.to_string();
        run_blocking(&self.conn, move |conn| get_supervisor(conn, &public_id)).await
    }

    async fn list(&self) -> StoreResult<Vec<Supervisor>> {
        run_blocking(&self.conn, |conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_SUPERVISOR} ORDER BY name ASC"))?;
            let rows = stmt
                .query_map([], supervisor_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn add_item(
        &self,
        supervisor_id: &str,
        input: NewCrossProjectItem,
    ) -> StoreResult<CrossProjectItem> {
        let supervisor_public = supervisor_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let supervisor = get_supervisor(&tx, &supervisor_public)?;
            let number: i64 = tx.query_row(
                "SELECT COALESCE(MAX(number), 0) + 1 FROM cross_project_backlog
                 WHERE supervisor_id = ?1",
                params![supervisor.id],
                |row| row.get(0),
            )?;
            let now = format_ts(OffsetDateTime::now_utc());
            tx.execute(
                "INSERT INTO cross_project_backlog
                    (public_id, supervisor_id, number, title, description, status, priority,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    Uuid::now_v7().to_string(),
                    supervisor.id,
                    number,
                    input.title,
                    input.description,
                    BacklogStatus::Todo.as_str(),
                    input.priority.as_str(),
                    now,
                ],
            )?;
            let item = get_item_by_rowid(&tx, tx.last_insert_rowid())?;
            tx.commit()?;
            Ok(item)
        })
        .await
    }

    async fn get_item(&self, item_id: &str) -> StoreResult<CrossProjectItem> {
        let public_id = item_id.to_string();
        run_blocking(&self.conn, move |conn| get_item(conn, &public_id)).await
    }

    async fn list_items(&self, supervisor_id: &str) -> StoreResult<Vec<CrossProjectItem>> {
        let supervisor_public = supervisor_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let supervisor = get_supervisor(conn, &supervisor_public)?;
            let mut stmt = conn.prepare(&format!(
                "{SELECT_ITEM} WHERE x.supervisor_id = ?1
                 ORDER BY CASE x.priority WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END,
                          x.number ASC"
            ))?;
            let rows = stmt
                .query_map(params![supervisor.id], item_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn dispatch_item(
        &self,
        item_id: &str,
        project_id: &str,
    ) -> StoreResult<DispatchOutcome> {
        let item_public = item_id.to_string();
        let project_public = project_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let item = get_item(&tx, &item_public)?;

            if let Some(dispatched) = item.dispatched_project_id.as_deref() {
                if dispatched != project_public {
                    return Err(StoreError::Other(format!(
                        "item {item_public} already dispatched to project {dispatched}"
                    )));
                }
                // Same target: reuse the existing backlog row if it is still
                // there, otherwise recreate it below.
                let backlog_rowid: Option<i64> = tx.query_row(
                    "SELECT dispatched_backlog_id FROM cross_project_backlog WHERE id = ?1",
                    params![item.id],
                    |row| row.get(0),
                )?;
                if let Some(rowid) = backlog_rowid {
                    let backlog = get_backlog_by_rowid(&tx, rowid)?;
                    tx.commit()?;
                    return Ok(DispatchOutcome { item, backlog });
                }
            }

            let project_rowid = lookup_project_id(&tx, &project_public)?
                .ok_or_else(|| StoreError::ProjectNotFound(project_public.clone()))?;
            let backlog = insert_backlog_item(
                &tx,
                project_rowid,
                &NewBacklogItem {
                    title: item.title.clone(),
                    description: item.description.clone(),
                    priority: item.priority,
                },
            )?;
            tx.execute(
                "UPDATE cross_project_backlog
                 SET dispatched_project_id = ?1, dispatched_backlog_id = ?2,
                     status = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    project_rowid,
                    backlog.id,
                    BacklogStatus::InOrder.as_str(),
                    format_ts(OffsetDateTime::now_utc()),
                    item.id,
                ],
            )?;
            let item = get_item_by_rowid(&tx, item.id)?;
            tx.commit()?;
            Ok(DispatchOutcome { item, backlog })
        })
        .await
    }
}
