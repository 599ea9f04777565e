//! SQLite-backed persistence for the workflow engine.
//!
//! One connection guarded by a mutex serves the whole process. Repository
//! methods are async at the surface and hop onto the blocking pool for the
//! actual SQLite work, so callers never hold the lock across an await.

pub mod domain;
pub mod error;
pub mod migrations;
pub mod patch;
pub mod repository;
pub mod schema;

mod repo_audit;
mod repo_backlog;
mod repo_order;
mod repo_project;
mod repo_review;
mod repo_supervisor;
mod repo_task;

#[cfg(test)]
mod repo_tests;

pub use error::{StoreError, StoreResult};
pub(crate) use repo_order::{get_order, list_orders_for_project, write_order_status};
pub use repo_audit::SqliteAuditRepository;
pub use repo_backlog::SqliteBacklogRepository;
pub use repo_order::SqliteOrderRepository;
pub use repo_project::SqliteProjectRepository;
pub use repo_review::SqliteReviewRepository;
pub use repo_supervisor::SqliteSupervisorRepository;
pub use repo_task::SqliteTaskRepository;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use migrations::MigrationReport;

/// Run a closure against the shared connection on the blocking pool.
pub(crate) async fn run_blocking<F, R>(conn: &Arc<Mutex<Connection>>, f: F) -> StoreResult<R>
where
    F: FnOnce(&mut Connection) -> StoreResult<R> + Send + 'static,
    R: Send + 'static,
{
    let conn = Arc::clone(conn);
    tokio::task::spawn_blocking(move || {
        let mut guard = conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))?;
        f(&mut guard)
    })
    .await
    .map_err(|e| StoreError::Database(format!("blocking task failed: {e}")))?
}

/// RFC 3339 text for storage. UTC timestamps always format cleanly; the
/// fallback only exists to keep this function total.
pub(crate) fn format_ts(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339)
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

/// Parse a stored timestamp inside a row mapper.
pub(crate) fn parse_ts(s: &str) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339).map_err(|_| rusqlite::Error::InvalidQuery)
}

pub(crate) fn parse_ts_opt(s: Option<String>) -> rusqlite::Result<Option<OffsetDateTime>> {
    s.as_deref().map(parse_ts).transpose()
}

/// Resolve a project public id to its rowid.
pub(crate) fn lookup_project_id(
    conn: &Connection,
    public_id: &str,
) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM projects WHERE public_id = ?1",
        params![public_id],
        |row| row.get(0),
    )
    .optional()
}

/// Resolve an order public id to its rowid.
pub(crate) fn lookup_order_id(conn: &Connection, public_id: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM orders WHERE public_id = ?1",
        params![public_id],
        |row| row.get(0),
    )
    .optional()
}

/// Resolve a task public id to its rowid.
pub(crate) fn lookup_task_id(conn: &Connection, public_id: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM tasks WHERE public_id = ?1",
        params![public_id],
        |row| row.get(0),
    )
    .optional()
}

/// Handle to the open database plus one repository per entity family.
/// Cloning is cheap, every clone shares the same connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    pub projects: SqliteProjectRepository,
    pub orders: SqliteOrderRepository,
    pub tasks: SqliteTaskRepository,
    pub backlogs: SqliteBacklogRepository,
    pub reviews: SqliteReviewRepository,
    pub audit: SqliteAuditRepository,
    pub supervisors: SqliteSupervisorRepository,
}

impl Store {
    /// Open a database file. With `create_if_missing` false, a missing file
    /// is reported as [`StoreError::Unavailable`] instead of being created.
    pub fn open(
        path: &Path,
        busy_timeout: Duration,
        create_if_missing: bool,
    ) -> StoreResult<Self> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        let conn =
            Connection::open_with_flags(path, flags).map_err(|e| StoreError::Unavailable {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        // journal_mode returns the resulting mode as a row.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;

        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database. Used by tests and ephemeral runs.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        let conn = Arc::new(Mutex::new(conn));
        Self {
            projects: SqliteProjectRepository::new(Arc::clone(&conn)),
            orders: SqliteOrderRepository::new(Arc::clone(&conn)),
            tasks: SqliteTaskRepository::new(Arc::clone(&conn)),
            backlogs: SqliteBacklogRepository::new(Arc::clone(&conn)),
            reviews: SqliteReviewRepository::new(Arc::clone(&conn)),
            audit: SqliteAuditRepository::new(Arc::clone(&conn)),
            supervisors: SqliteSupervisorRepository::new(Arc::clone(&conn)),
            conn,
        }
    }

    /// Bring the schema up to the target version.
    pub async fn migrate(&self) -> StoreResult<MigrationReport> {
        run_blocking(&self.conn, migrations::run_migrations).await
    }

    /// Recorded schema version.
    pub async fn version(&self) -> StoreResult<i64> {
        run_blocking(&self.conn, |conn| migrations::current_version(conn)).await
    }

    /// Shared connection handle for components that query directly.
    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }
}
