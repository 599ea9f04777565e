//! Read-only fallback over the legacy JSON state file.
//!
//! The predecessor of the database kept one nested JSON document per
//! machine: projects containing orders containing tasks, plus a flat
//! backlog per project. When the database cannot be opened and a legacy
//! file is configured, reads are served from this snapshot. The engine
//! never writes the file; mutations in this mode fail upstream.
//!
//! Public ids are synthesized from position (`<project>/order-<n>`,
//! `<project>/order-<n>/task-<m>`) so repeated loads hand out stable ids.
//! Fields the legacy format never tracked (reviews, escalations, reject
//! counts) come back empty or zero.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::{EngineError, EngineResult};
use crate::store::domain::{
    BacklogItem, BacklogStatus, Order, OrderStatus, Priority, Project, ProjectStatus, Task,
    TaskStatus,
};
use crate::store::error::{StoreError, StoreResult};

#[derive(Debug, Deserialize)]
struct LegacyState {
    #[serde(default)]
    projects: Vec<LegacyProject>,
}

#[derive(Debug, Deserialize)]
struct LegacyProject {
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    orders: Vec<LegacyOrder>,
    #[serde(default)]
    backlog: Vec<LegacyBacklogItem>,
}

#[derive(Debug, Deserialize)]
struct LegacyOrder {
    number: i64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    tasks: Vec<LegacyTask>,
}

#[derive(Debug, Deserialize)]
struct LegacyTask {
    number: i64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    assignee: Option<String>,
    /// Task numbers within the same order.
    #[serde(default)]
    depends_on: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct LegacyBacklogItem {
    number: i64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
}

/// Old files carry free-form status strings; anything unrecognized falls
/// back to the enum default rather than failing the whole load.
fn parse_or_default<T: FromStr + Default>(value: Option<&str>) -> T {
    value
        .and_then(|s| T::from_str(s).ok())
        .unwrap_or_default()
}

fn parse_ts_or_epoch(value: Option<&str>) -> OffsetDateTime {
    value
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

fn order_public_id(project: &str, number: i64) -> String {
    format!("{project}/order-{number}")
}

fn task_public_id(project: &str, order_number: i64, number: i64) -> String {
    format!("{project}/order-{order_number}/task-{number}")
}

/// Immutable view over one parsed legacy state file.
#[derive(Debug)]
pub struct LegacySnapshot {
    projects: Vec<Project>,
    orders: HashMap<String, Vec<Order>>,
    tasks: HashMap<String, Vec<Task>>,
    backlogs: HashMap<String, Vec<BacklogItem>>,
}

impl LegacySnapshot {
    /// Parse a legacy state file into domain rows.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Store(StoreError::Unavailable {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        })?;
        let state: LegacyState = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Store(StoreError::Serialization(e.to_string())))?;

        let mut projects = Vec::with_capacity(state.projects.len());
        let mut orders: HashMap<String, Vec<Order>> = HashMap::new();
        let mut tasks: HashMap<String, Vec<Task>> = HashMap::new();
        let mut backlogs: HashMap<String, Vec<BacklogItem>> = HashMap::new();

        for project in state.projects {
            let project_id = project.name.clone();
            let created_at = parse_ts_or_epoch(project.created_at.as_deref());
            let updated_at = parse_ts_or_epoch(project.updated_at.as_deref());
            projects.push(Project {
                id: 0,
                public_id: project_id.clone(),
                name: project.name.clone(),
                path: project.path,
                status: parse_or_default::<ProjectStatus>(project.status.as_deref()),
                description: project.description,
                purpose: None,
                tech_stack: None,
                supervisor_id: None,
                created_at,
                updated_at,
            });

            let mut project_orders = Vec::with_capacity(project.orders.len());
            for order in project.orders {
                let public_id = order_public_id(&project_id, order.number);
                let order_created = parse_ts_or_epoch(order.created_at.as_deref());
                let order_updated = parse_ts_or_epoch(order.updated_at.as_deref());

                let order_tasks = order
                    .tasks
                    .iter()
                    .map(|task| Task {
                        id: 0,
                        public_id: task_public_id(&project_id, order.number, task.number),
                        order_id: public_id.clone(),
                        project_id: project_id.clone(),
                        number: task.number,
                        title: task.title.clone(),
                        description: task.description.clone(),
                        status: parse_or_default::<TaskStatus>(task.status.as_deref()),
                        priority: parse_or_default::<Priority>(task.priority.as_deref()),
                        assignee: task.assignee.clone(),
                        recommended_model: None,
                        depends_on: task
                            .depends_on
                            .iter()
                            .map(|dep| task_public_id(&project_id, order.number, *dep))
                            .collect(),
                        reject_count: 0,
                        started_at: None,
                        completed_at: None,
                        created_at: order_created,
                        updated_at: order_updated,
                    })
                    .collect::<Vec<_>>();
                tasks.insert(public_id.clone(), order_tasks);

                project_orders.push(Order {
                    id: 0,
                    public_id,
                    project_id: project_id.clone(),
                    number: order.number,
                    title: order.title,
                    description: order.description,
                    status: parse_or_default::<OrderStatus>(order.status.as_deref()),
                    priority: parse_or_default::<Priority>(order.priority.as_deref()),
                    created_at: order_created,
                    updated_at: order_updated,
                });
            }
            project_orders
                .sort_by_key(|o| (o.priority.rank(), o.number));
            orders.insert(project_id.clone(), project_orders);

            let mut project_backlog = project
                .backlog
                .into_iter()
                .map(|item| BacklogItem {
                    id: 0,
                    public_id: format!("{project_id}/backlog-{}", item.number),
                    project_id: project_id.clone(),
                    order_id: None,
                    number: item.number,
                    title: item.title,
                    description: item.description,
                    status: parse_or_default::<BacklogStatus>(item.status.as_deref()),
                    priority: parse_or_default::<Priority>(item.priority.as_deref()),
                    created_at,
                    updated_at,
                })
                .collect::<Vec<_>>();
            project_backlog.sort_by_key(|b| (b.priority.rank(), b.number));
            backlogs.insert(project_id, project_backlog);
        }

        Ok(Self {
            projects,
            orders,
            tasks,
            backlogs,
        })
    }

    pub fn projects(&self) -> Vec<Project> {
        self.projects.clone()
    }

    pub fn project(&self, project_id: &str) -> StoreResult<Project> {
        self.projects
            .iter()
            .find(|p| p.public_id == project_id)
            .cloned()
            .ok_or_else(|| StoreError::ProjectNotFound(project_id.to_string()))
    }

    /// Orders of a project, priority rank then number.
    pub fn orders(&self, project_id: &str) -> StoreResult<Vec<Order>> {
        self.orders
            .get(project_id)
            .cloned()
            .ok_or_else(|| StoreError::ProjectNotFound(project_id.to_string()))
    }

    pub fn order(&self, order_id: &str) -> StoreResult<Order> {
        self.orders
            .values()
            .flatten()
            .find(|o| o.public_id == order_id)
            .cloned()
            .ok_or_else(|| StoreError::OrderNotFound(order_id.to_string()))
    }

    /// Tasks of an order, in number order.
    pub fn tasks(&self, order_id: &str) -> StoreResult<Vec<Task>> {
        self.tasks
            .get(order_id)
            .cloned()
            .ok_or_else(|| StoreError::OrderNotFound(order_id.to_string()))
    }

    pub fn backlog(&self, project_id: &str) -> StoreResult<Vec<BacklogItem>> {
        self.backlogs
            .get(project_id)
            .cloned()
            .ok_or_else(|| StoreError::ProjectNotFound(project_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::resolve_for_tasks;
    use crate::progress::count_buckets;
    use std::io::Write;

    const STATE: &str = r#"{
        "projects": [
            {
                "name": "alpha",
                "path": "/work/alpha",
                "status": "in_progress",
                "orders": [
                    {
                        "number": 2,
                        "title": "second",
                        "status": "planning",
                        "priority": "low",
                        "tasks": []
                    },
                    {
                        "number": 1,
                        "title": "first",
                        "status": "in_progress",
                        "priority": "high",
                        "tasks": [
                            { "number": 1, "title": "base", "status": "completed" },
                            { "number": 2, "title": "next", "status": "queued", "depends_on": [1] }
                        ]
                    }
                ],
                "backlog": [
                    { "number": 1, "title": "someday", "priority": "medium" }
                ]
            }
        ]
    }"#;

    fn write_state(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_projects_orders_and_tasks() {
        let file = write_state(STATE);
        let snapshot = LegacySnapshot::load(file.path()).unwrap();

        let projects = snapshot.projects();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].public_id, "alpha");
        assert_eq!(projects[0].status, ProjectStatus::InProgress);

        let orders = snapshot.orders("alpha").unwrap();
        assert_eq!(orders.len(), 2);
        // High priority sorts first despite the larger file position.
        assert_eq!(orders[0].number, 1);
        assert_eq!(orders[0].priority, Priority::High);

        let tasks = snapshot.tasks("alpha/order-1").unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].public_id, "alpha/order-1/task-1");
        assert_eq!(tasks[1].depends_on, vec!["alpha/order-1/task-1"]);

        let backlog = snapshot.backlog("alpha").unwrap();
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].status, BacklogStatus::Todo);
    }

    #[test]
    fn snapshot_rows_feed_the_pure_rollups() {
        let file = write_state(STATE);
        let snapshot = LegacySnapshot::load(file.path()).unwrap();
        let tasks = snapshot.tasks("alpha/order-1").unwrap();

        let buckets = count_buckets(&tasks.iter().map(|t| t.status).collect::<Vec<_>>());
        assert_eq!(buckets.completed, 1);
        assert_eq!(buckets.queued, 1);
        assert_eq!(buckets.percentage(), 50);

        let statuses = resolve_for_tasks(&tasks);
        assert!(!statuses[0].is_blocked);
        assert!(!statuses[1].is_blocked);
    }

    #[test]
    fn unknown_statuses_fall_back_to_defaults() {
        let file = write_state(
            r#"{ "projects": [ { "name": "p", "status": "weird",
                 "orders": [ { "number": 1, "title": "o", "status": "bogus",
                   "tasks": [ { "number": 1, "title": "t", "status": "???" } ] } ] } ] }"#,
        );
        let snapshot = LegacySnapshot::load(file.path()).unwrap();
        assert_eq!(snapshot.projects()[0].status, ProjectStatus::Initial);
        let order = snapshot.order("p/order-1").unwrap();
        assert_eq!(order.status, OrderStatus::Planning);
        assert_eq!(
            snapshot.tasks("p/order-1").unwrap()[0].status,
            TaskStatus::Queued
        );
    }

    #[test]
    fn missing_file_reports_unavailable() {
        let err = LegacySnapshot::load(Path::new("/nonexistent/state.json")).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Store(StoreError::Unavailable { .. })
        ));
    }

    #[test]
    fn malformed_json_reports_serialization() {
        let file = write_state("{ not json");
        let err = LegacySnapshot::load(file.path()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Store(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn lookups_on_unknown_ids_are_typed() {
        let file = write_state(STATE);
        let snapshot = LegacySnapshot::load(file.path()).unwrap();
        assert!(matches!(
            snapshot.project("ghost"),
            Err(StoreError::ProjectNotFound(_))
        ));
        assert!(matches!(
            snapshot.tasks("ghost/order-9"),
            Err(StoreError::OrderNotFound(_))
        ));
    }
}
