//! Stepwise schema migrations.
//!
//! Versions are applied in ascending order, each inside its own transaction,
//! and recorded in `schema_versions`. A database is usable only when its
//! recorded version matches [`TARGET_VERSION`]; partially applied batches
//! roll back and surface as a fatal error.

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use super::error::{StoreError, StoreResult};
use super::format_ts;
use super::schema::{SCHEMA_V1, SCHEMA_V2, SCHEMA_V3};

/// One schema version and the DDL that produces it from its predecessor.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub sql: &'static str,
}

/// All known migrations, ascending. Append only.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: SCHEMA_V1,
    },
    Migration {
        version: 2,
        sql: SCHEMA_V2,
    },
    Migration {
        version: 3,
        sql: SCHEMA_V3,
    },
];

/// Schema version this build reads and writes.
pub const TARGET_VERSION: i64 = 3;

/// Outcome of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Versions applied by this run, ascending. Empty when already current.
    pub applied: Vec<i64>,
    /// Schema version after the run.
    pub version: i64,
}

/// Highest applied schema version, or 0 for a virgin database.
pub fn current_version(conn: &Connection) -> StoreResult<i64> {
    let has_table: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'schema_versions'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if has_table.is_none() {
        return Ok(0);
    }
    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_versions",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// True when no migration remains to apply.
pub fn is_up_to_date(conn: &Connection) -> StoreResult<bool> {
    Ok(current_version(conn)? >= TARGET_VERSION)
}

/// Apply every migration newer than the recorded version.
pub fn run_migrations(conn: &mut Connection) -> StoreResult<MigrationReport> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_versions (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        )",
    )?;

    let start = current_version(conn)?;
    let mut version = start;
    let mut applied = Vec::new();

    // MIGRATIONS is ascending, so gating on the starting version visits
    // exactly the pending ones.
    for migration in MIGRATIONS.iter().filter(|m| m.version > start) {
        let failed = |err: rusqlite::Error| StoreError::Migration {
            version: migration.version,
            message: err.to_string(),
        };

        let tx = conn.transaction().map_err(failed)?;
        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.execute(
            "INSERT INTO schema_versions (version, applied_at) VALUES (?1, ?2)",
            params![migration.version, format_ts(time::OffsetDateTime::now_utc())],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;

        log::info!("applied schema migration v{}", migration.version);
        applied.push(migration.version);
        version = migration.version;
    }

    Ok(MigrationReport { applied, version })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn virgin_database_reports_version_zero() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(current_version(&conn).unwrap(), 0);
        assert!(!is_up_to_date(&conn).unwrap());
    }

    #[test]
    fn fresh_database_migrates_to_target() {
        let mut conn = Connection::open_in_memory().unwrap();
        let report = run_migrations(&mut conn).unwrap();
        assert_eq!(report.version, TARGET_VERSION);
        assert_eq!(report.applied, vec![1, 2, 3]);
        assert!(is_up_to_date(&conn).unwrap());

        // Spot-check columns contributed by later versions.
        assert!(table_columns(&conn, "projects").contains(&"supervisor_id".to_string()));
        assert!(table_columns(&conn, "tasks").contains(&"recommended_model".to_string()));
    }

    #[test]
    fn rerun_applies_nothing() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        let second = run_migrations(&mut conn).unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.version, TARGET_VERSION);
    }

    #[test]
    fn each_version_is_recorded_once() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_versions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn version_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.db");
        {
            let mut conn = Connection::open(&path).unwrap();
            run_migrations(&mut conn).unwrap();
        }
        let conn = Connection::open(&path).unwrap();
        assert_eq!(current_version(&conn).unwrap(), TARGET_VERSION);
    }

    #[test]
    fn migrations_are_strictly_ascending() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
        assert_eq!(MIGRATIONS.last().map(|m| m.version), Some(TARGET_VERSION));
    }
}
