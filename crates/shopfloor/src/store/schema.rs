//! Database schema for the workflow store.
//!
//! Each constant is the DDL for one schema version and is applied exactly
//! once by the migration runner. Shipped versions are frozen: new columns
//! and tables go into a new version, never into an old constant.
//!
//! Conventions: every entity table has an INTEGER PRIMARY KEY rowid for
//! joins plus a `public_id` TEXT column for external references. Timestamps
//! are RFC 3339 TEXT. Status and priority columns store the snake_case
//! string form of the domain enums.

/// Version 1: the core project / order / task model.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Projects
-- ============================================================
CREATE TABLE IF NOT EXISTS projects (
    id              INTEGER PRIMARY KEY,
    public_id       TEXT UNIQUE NOT NULL,
    name            TEXT NOT NULL,
    path            TEXT,
    status          TEXT NOT NULL DEFAULT 'initial',
    description     TEXT,
    purpose         TEXT,
    tech_stack      TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

-- ============================================================
-- Orders
-- ============================================================
CREATE TABLE IF NOT EXISTS orders (
    id              INTEGER PRIMARY KEY,
    public_id       TEXT UNIQUE NOT NULL,
    project_id      INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    number          INTEGER NOT NULL,
    title           TEXT NOT NULL,
    description     TEXT,
    status          TEXT NOT NULL DEFAULT 'planning',
    priority        TEXT NOT NULL DEFAULT 'medium',
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    UNIQUE (project_id, number)
);

CREATE INDEX IF NOT EXISTS idx_orders_project ON orders(project_id);

-- ============================================================
-- Tasks
-- ============================================================
CREATE TABLE IF NOT EXISTS tasks (
    id              INTEGER PRIMARY KEY,
    public_id       TEXT UNIQUE NOT NULL,
    order_id        INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
    number          INTEGER NOT NULL,
    title           TEXT NOT NULL,
    description     TEXT,
    status          TEXT NOT NULL DEFAULT 'queued',
    priority        TEXT NOT NULL DEFAULT 'medium',
    assignee        TEXT,
    reject_count    INTEGER NOT NULL DEFAULT 0,
    started_at      TEXT,
    completed_at    TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    UNIQUE (order_id, number)
);

CREATE INDEX IF NOT EXISTS idx_tasks_order ON tasks(order_id);

-- Active tasks are the hot query path for progress and dispatch.
CREATE INDEX IF NOT EXISTS idx_tasks_active ON tasks(order_id)
    WHERE status IN ('queued', 'blocked', 'in_progress', 'rework');

-- ============================================================
-- Task dependencies (within one order)
-- ============================================================
CREATE TABLE IF NOT EXISTS task_dependencies (
    task_id         INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    depends_on_id   INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    PRIMARY KEY (task_id, depends_on_id)
);

CREATE INDEX IF NOT EXISTS idx_task_dependencies_target ON task_dependencies(depends_on_id);

-- ============================================================
-- Backlog
-- ============================================================
CREATE TABLE IF NOT EXISTS backlogs (
    id              INTEGER PRIMARY KEY,
    public_id       TEXT UNIQUE NOT NULL,
    project_id      INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    number          INTEGER NOT NULL,
    title           TEXT NOT NULL,
    description     TEXT,
    status          TEXT NOT NULL DEFAULT 'todo',
    priority        TEXT NOT NULL DEFAULT 'medium',
    order_id        INTEGER REFERENCES orders(id) ON DELETE SET NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    UNIQUE (project_id, number)
);

CREATE INDEX IF NOT EXISTS idx_backlogs_project ON backlogs(project_id);

-- ============================================================
-- Reviews and escalations
-- ============================================================
CREATE TABLE IF NOT EXISTS reviews (
    id              INTEGER PRIMARY KEY,
    public_id       TEXT UNIQUE NOT NULL,
    task_id         INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    status          TEXT NOT NULL DEFAULT 'pending',
    reviewer        TEXT,
    comment         TEXT,
    submitted_at    TEXT NOT NULL,
    reviewed_at     TEXT
);

CREATE INDEX IF NOT EXISTS idx_reviews_task ON reviews(task_id);

CREATE TABLE IF NOT EXISTS escalations (
    id              INTEGER PRIMARY KEY,
    public_id       TEXT UNIQUE NOT NULL,
    task_id         INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    review_id       INTEGER REFERENCES reviews(id) ON DELETE SET NULL,
    reason          TEXT NOT NULL,
    resolution      TEXT,
    created_at      TEXT NOT NULL,
    resolved_at     TEXT
);

CREATE INDEX IF NOT EXISTS idx_escalations_open ON escalations(task_id)
    WHERE resolved_at IS NULL;

-- ============================================================
-- Audit trail
-- ============================================================
-- entity_public_id is deliberately not a foreign key: history is append-only
-- and must survive deletion of the row it describes.
CREATE TABLE IF NOT EXISTS status_history (
    id                  INTEGER PRIMARY KEY,
    entity              TEXT NOT NULL,
    entity_public_id    TEXT NOT NULL,
    field               TEXT NOT NULL,
    old_value           TEXT,
    new_value           TEXT,
    actor               TEXT NOT NULL,
    reason              TEXT,
    changed_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_status_history_entity
    ON status_history(entity, entity_public_id);
"#;

/// Version 2: supervisors and the cross-project backlog.
pub const SCHEMA_V2: &str = r#"
-- ============================================================
-- Supervisors
-- ============================================================
CREATE TABLE IF NOT EXISTS supervisors (
    id              INTEGER PRIMARY KEY,
    public_id       TEXT UNIQUE NOT NULL,
    name            TEXT UNIQUE NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cross_project_backlog (
    id                      INTEGER PRIMARY KEY,
    public_id               TEXT UNIQUE NOT NULL,
    supervisor_id           INTEGER NOT NULL REFERENCES supervisors(id) ON DELETE CASCADE,
    number                  INTEGER NOT NULL,
    title                   TEXT NOT NULL,
    description             TEXT,
    status                  TEXT NOT NULL DEFAULT 'todo',
    priority                TEXT NOT NULL DEFAULT 'medium',
    dispatched_project_id   INTEGER REFERENCES projects(id) ON DELETE SET NULL,
    dispatched_backlog_id   INTEGER REFERENCES backlogs(id) ON DELETE SET NULL,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL,
    UNIQUE (supervisor_id, number)
);

CREATE INDEX IF NOT EXISTS idx_cross_project_backlog_supervisor
    ON cross_project_backlog(supervisor_id);

ALTER TABLE projects ADD COLUMN supervisor_id INTEGER REFERENCES supervisors(id) ON DELETE SET NULL;

CREATE INDEX IF NOT EXISTS idx_projects_supervisor ON projects(supervisor_id);
"#;

/// Version 3: per-task model recommendation and status query indexes.
pub const SCHEMA_V3: &str = r#"
ALTER TABLE tasks ADD COLUMN recommended_model TEXT;

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
CREATE INDEX IF NOT EXISTS idx_status_history_changed ON status_history(changed_at);
"#;
