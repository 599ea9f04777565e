//! Task dependency resolution.
//!
//! A task is blocked while any of its prerequisites is unsatisfied. The
//! completion-equivalence policy is pinned in one place,
//! [`TaskStatus::satisfies_dependency`]: completed and skipped prerequisites
//! satisfy, everything else (including done-but-unreviewed) does not.
//! Results are pure functions of stored state, so recomputing is always
//! safe.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::store::domain::{Task, TaskStatus};
use crate::store::error::{StoreError, StoreResult};
use crate::store::{lookup_order_id, run_blocking};
use crate::workflow::ValidationError;

/// Blocking state of one task's dependency set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyStatus {
    /// Public id of the dependent task.
    pub task_id: String,
    pub completed_count: usize,
    pub total_count: usize,
    /// completed / total, 0 for an empty dependency set.
    pub completion_rate: f64,
    pub is_blocked: bool,
}

pub fn status_from_counts(task_id: &str, completed: usize, total: usize) -> DependencyStatus {
    DependencyStatus {
        task_id: task_id.to_string(),
        completed_count: completed,
        total_count: total,
        completion_rate: if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64
        },
        is_blocked: total > 0 && completed < total,
    }
}

/// Resolve every task of an order against its siblings, in task order.
pub fn resolve_for_tasks(tasks: &[Task]) -> Vec<DependencyStatus> {
    let by_id: HashMap<&str, TaskStatus> = tasks
        .iter()
        .map(|t| (t.public_id.as_str(), t.status))
        .collect();
    tasks
        .iter()
        .map(|task| {
            let total = task.depends_on.len();
            let completed = task
                .depends_on
                .iter()
                .filter(|dep| {
                    by_id
                        .get(dep.as_str())
                        .is_some_and(|s| s.satisfies_dependency())
                })
                .count();
            status_from_counts(&task.public_id, completed, total)
        })
        .collect()
}

/// Check a dependency list against the task's siblings: every id must name
/// a task in the same order, self-references are forbidden, and for an
/// existing task the new edges must not close a cycle.
pub fn validate_dependencies(
    task_id: Option<&str>,
    deps: &[String],
    siblings: &[Task],
) -> Result<(), ValidationError> {
    let known: HashSet<&str> = siblings.iter().map(|t| t.public_id.as_str()).collect();
    for dep in deps {
        if Some(dep.as_str()) == task_id {
            return Err(ValidationError::SelfDependency {
                task_id: dep.clone(),
            });
        }
        if !known.contains(dep.as_str()) {
            return Err(ValidationError::UnknownDependency {
                dependency_id: dep.clone(),
            });
        }
    }

    // A task being created has no dependents yet, so no cycle is possible.
    let Some(task_id) = task_id else {
        return Ok(());
    };

    let edges: HashMap<&str, &[String]> = siblings
        .iter()
        .map(|t| {
            let out: &[String] = if t.public_id == task_id {
                deps
            } else {
                &t.depends_on
            };
            (t.public_id.as_str(), out)
        })
        .collect();

    let mut queue: VecDeque<&str> = deps.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    while let Some(node) = queue.pop_front() {
        if node == task_id {
            return Err(ValidationError::DependencyCycle {
                task_id: task_id.to_string(),
            });
        }
        if !seen.insert(node) {
            continue;
        }
        if let Some(next) = edges.get(node) {
            queue.extend(next.iter().map(String::as_str));
        }
    }
    Ok(())
}

// The IN list mirrors TaskStatus::satisfies_dependency.
const ORDER_DEPENDENCY_SQL: &str = "SELECT t.public_id AS task_public_id,
            COUNT(td.depends_on_id) AS total,
            COALESCE(SUM(CASE WHEN d.status IN ('completed', 'skipped')
                              THEN 1 ELSE 0 END), 0) AS completed
     FROM tasks t
     LEFT JOIN task_dependencies td ON td.task_id = t.id
     LEFT JOIN tasks d ON d.id = td.depends_on_id
     WHERE t.order_id = ?1
     GROUP BY t.id
     ORDER BY t.number ASC";

// COUNT and SUM land as i64; the status type carries usize.
fn status_row(row: &Row<'_>) -> rusqlite::Result<DependencyStatus> {
    let task_id: String = row.get("task_public_id")?;
    let total: i64 = row.get("total")?;
    let completed: i64 = row.get("completed")?;
    Ok(status_from_counts(
        &task_id,
        usize::try_from(completed).map_err(|_| rusqlite::Error::InvalidQuery)?,
        usize::try_from(total).map_err(|_| rusqlite::Error::InvalidQuery)?,
    ))
}

/// Reads dependency state straight from the store, without loading full
/// task rows.
#[derive(Clone)]
pub struct DependencyResolver {
    conn: Arc<Mutex<Connection>>,
}

impl DependencyResolver {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Dependency status for every task of an order, in task order.
    pub async fn for_order(&self, order_id: &str) -> StoreResult<Vec<DependencyStatus>> {
        let order_public = order_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let order_id = lookup_order_id(conn, &order_public)?
                .ok_or_else(|| StoreError::OrderNotFound(order_public.clone()))?;
            let mut stmt = conn.prepare(ORDER_DEPENDENCY_SQL)?;
            let rows = stmt
                .query_map(params![order_id], status_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Dependency status for one task.
    pub async fn for_task(&self, task_id: &str) -> StoreResult<DependencyStatus> {
        let task_public = task_id.to_string();
        run_blocking(&self.conn, move |conn| {
            conn.query_row(
                "SELECT t.public_id AS task_public_id,
                        COUNT(td.depends_on_id) AS total,
                        COALESCE(SUM(CASE WHEN d.status IN ('completed', 'skipped')
                                          THEN 1 ELSE 0 END), 0) AS completed
                 FROM tasks t
                 LEFT JOIN task_dependencies td ON td.task_id = t.id
                 LEFT JOIN tasks d ON d.id = td.depends_on_id
                 WHERE t.public_id = ?1
                 GROUP BY t.id",
                params![task_public],
                status_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::TaskNotFound(task_public.clone()))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::store::domain::{NewOrder, NewProject, NewTask};
    use crate::store::repository::{OrderRepository, ProjectRepository, TaskRepository};
    use time::OffsetDateTime;

    fn task(id: &str, status: TaskStatus, deps: &[&str]) -> Task {
        let now = OffsetDateTime::now_utc();
        Task {
            id: 0,
            public_id: id.to_string(),
            order_id: "ord-1".to_string(),
            project_id: "proj-1".to_string(),
            number: 1,
            title: id.to_string(),
            description: None,
            status,
            priority: Default::default(),
            assignee: None,
            recommended_model: None,
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            reject_count: 0,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn empty_dependency_set_is_never_blocked() {
        let status = status_from_counts("t", 0, 0);
        assert!(!status.is_blocked);
        assert_eq!(status.completion_rate, 0.0);
    }

    #[test]
    fn partially_satisfied_dependencies_block() {
        let tasks = vec![
            task("a", TaskStatus::Completed, &[]),
            task("b", TaskStatus::InProgress, &[]),
            task("c", TaskStatus::Queued, &["a", "b"]),
        ];
        let statuses = resolve_for_tasks(&tasks);
        let c = statuses.iter().find(|s| s.task_id == "c").unwrap();
        assert_eq!(c.completed_count, 1);
        assert_eq!(c.total_count, 2);
        assert!(c.is_blocked);
        assert_eq!(c.completion_rate, 0.5);
    }

    #[test]
    fn skipped_prerequisites_satisfy() {
        let tasks = vec![
            task("a", TaskStatus::Skipped, &[]),
            task("b", TaskStatus::Completed, &[]),
            task("c", TaskStatus::Queued, &["a", "b"]),
        ];
        let statuses = resolve_for_tasks(&tasks);
        let c = statuses.iter().find(|s| s.task_id == "c").unwrap();
        assert_eq!(c.completed_count, 2);
        assert!(!c.is_blocked);
    }

    #[test]
    fn done_without_review_does_not_satisfy() {
        let tasks = vec![
            task("a", TaskStatus::Done, &[]),
            task("b", TaskStatus::Queued, &["a"]),
        ];
        let statuses = resolve_for_tasks(&tasks);
        assert!(statuses[1].is_blocked);
    }

    #[test]
    fn validation_rejects_unknown_and_self_references() {
        let siblings = vec![task("a", TaskStatus::Queued, &[])];
        assert!(validate_dependencies(None, &["a".to_string()], &siblings).is_ok());
        assert_eq!(
            validate_dependencies(None, &["ghost".to_string()], &siblings),
            Err(ValidationError::UnknownDependency {
                dependency_id: "ghost".to_string(),
            })
        );
        assert_eq!(
            validate_dependencies(Some("a"), &["a".to_string()], &siblings),
            Err(ValidationError::SelfDependency {
                task_id: "a".to_string(),
            })
        );
    }

    #[test]
    fn validation_rejects_cycles() {
        // b already depends on a; pointing a at b closes the loop.
        let siblings = vec![
            task("a", TaskStatus::Queued, &[]),
            task("b", TaskStatus::Queued, &["a"]),
            task("c", TaskStatus::Queued, &["b"]),
        ];
        assert_eq!(
            validate_dependencies(Some("a"), &["b".to_string()], &siblings),
            Err(ValidationError::DependencyCycle {
                task_id: "a".to_string(),
            })
        );
        assert_eq!(
            validate_dependencies(Some("a"), &["c".to_string()], &siblings),
            Err(ValidationError::DependencyCycle {
                task_id: "a".to_string(),
            })
        );
        // A diamond is fine.
        assert!(validate_dependencies(Some("c"), &["a".to_string()], &siblings).is_ok());
    }

    async fn seeded_order(store: &Store) -> (String, String, String) {
        store
            .projects
            .create(NewProject {
                id: "alpha".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let order = store
            .orders
            .create(
                "alpha",
                NewOrder {
                    title: "one".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let a = store
            .tasks
            .create(
                &order.public_id,
                NewTask {
                    title: "a".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let b = store
            .tasks
            .create(
                &order.public_id,
                NewTask {
                    title: "b".to_string(),
                    depends_on: vec![a.public_id.clone()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        (order.public_id, a.public_id, b.public_id)
    }

    #[tokio::test]
    async fn resolver_matches_stored_state() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().await.unwrap();
        let (order_id, a, b) = seeded_order(&store).await;
        let resolver = DependencyResolver::new(store.connection());

        let statuses = resolver.for_order(&order_id).await.unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(!statuses[0].is_blocked);
        assert!(statuses[1].is_blocked);

        store
            .tasks
            .set_status(&a, TaskStatus::InProgress, "runner", None)
            .await
            .unwrap();
        store
            .tasks
            .set_status(&a, TaskStatus::Done, "runner", None)
            .await
            .unwrap();
        store
            .tasks
            .set_status(&a, TaskStatus::Completed, "runner", None)
            .await
            .unwrap();

        let status = resolver.for_task(&b).await.unwrap();
        assert_eq!(status.completed_count, 1);
        assert!(!status.is_blocked);
        assert_eq!(status.completion_rate, 1.0);
    }

    #[tokio::test]
    async fn resolver_reports_missing_entities() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().await.unwrap();
        let resolver = DependencyResolver::new(store.connection());
        assert!(matches!(
            resolver.for_order("ghost").await,
            Err(StoreError::OrderNotFound(_))
        ));
        assert!(matches!(
            resolver.for_task("ghost").await,
            Err(StoreError::TaskNotFound(_))
        ));
    }
}
