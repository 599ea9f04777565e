//! Progress rollups for orders and projects.
//!
//! Buckets partition the task status space, so bucket sums always equal the
//! task total. `completed` counts only the completed status; done-but-
//! unreviewed work sits in `review_pending` and retired work (cancelled,
//! skipped) stays in `total`, keeping an order from reading as complete
//! unless every task actually completed.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::store::domain::{Order, OrderStatus, TaskStatus};
use crate::store::error::{StoreError, StoreResult};
use crate::store::{get_order, list_orders_for_project, lookup_project_id, run_blocking, write_order_status};

/// Task counts of one order, partitioned by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBuckets {
    pub queued: usize,
    pub blocked: usize,
    pub in_progress: usize,
    /// Done or in review.
    pub review_pending: usize,
    /// Rework or rejected.
    pub rework: usize,
    pub completed: usize,
    /// Cancelled or skipped.
    pub retired: usize,
    pub total: usize,
}

impl TaskBuckets {
    /// Rounded completion percentage, 0 for an empty order.
    pub fn percentage(&self) -> u8 {
        if self.total == 0 {
            0
        } else {
            (self.completed as f64 / self.total as f64 * 100.0).round() as u8
        }
    }

    /// True only when the order has tasks and every one of them completed.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }

    pub(crate) fn add(&mut self, other: TaskBuckets) {
        self.queued += other.queued;
        self.blocked += other.blocked;
        self.in_progress += other.in_progress;
        self.review_pending += other.review_pending;
        self.rework += other.rework;
        self.completed += other.completed;
        self.retired += other.retired;
        self.total += other.total;
    }
}

/// Count task statuses into buckets.
pub fn count_buckets(statuses: &[TaskStatus]) -> TaskBuckets {
    let mut buckets = TaskBuckets::default();
    for status in statuses {
        match status {
            TaskStatus::Queued => buckets.queued += 1,
            TaskStatus::Blocked => buckets.blocked += 1,
            TaskStatus::InProgress => buckets.in_progress += 1,
            TaskStatus::Done | TaskStatus::InReview => buckets.review_pending += 1,
            TaskStatus::Rework | TaskStatus::Rejected => buckets.rework += 1,
            TaskStatus::Completed => buckets.completed += 1,
            TaskStatus::Cancelled | TaskStatus::Skipped => buckets.retired += 1,
        }
        buckets.total += 1;
    }
    buckets
}

/// Progress snapshot of one order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderProgress {
    pub order_id: String,
    pub title: String,
    pub status: OrderStatus,
    pub buckets: TaskBuckets,
    pub percentage: u8,
    pub is_complete: bool,
}

impl OrderProgress {
    pub(crate) fn new(order: &Order, buckets: TaskBuckets) -> Self {
        Self {
            order_id: order.public_id.clone(),
            title: order.title.clone(),
            status: order.status,
            percentage: buckets.percentage(),
            is_complete: buckets.is_complete(),
            buckets,
        }
    }
}

/// Progress snapshot of a project: element-wise bucket sums plus the
/// per-order breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectProgress {
    pub project_id: String,
    pub totals: TaskBuckets,
    pub percentage: u8,
    pub orders: Vec<OrderProgress>,
}

fn task_statuses(conn: &Connection, order_rowid: i64) -> StoreResult<Vec<TaskStatus>> {
    let mut stmt = conn.prepare("SELECT status FROM tasks WHERE order_id = ?1")?;
    let rows = stmt
        .query_map(params![order_rowid], |row| {
            let status: String = row.get(0)?;
            TaskStatus::from_str(&status).map_err(|_| rusqlite::Error::InvalidQuery)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Rolls task counts up into order and project progress, and commits order
/// completion when every task has completed.
#[derive(Clone)]
pub struct ProgressAggregator {
    conn: Arc<Mutex<Connection>>,
}

impl ProgressAggregator {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub async fn order_progress(&self, order_id: &str) -> StoreResult<OrderProgress> {
        let public = order_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let order = get_order(conn, &public)?;
            let buckets = count_buckets(&task_statuses(conn, order.id)?);
            Ok(OrderProgress::new(&order, buckets))
        })
        .await
    }

    pub async fn project_progress(&self, project_id: &str) -> StoreResult<ProjectProgress> {
        let public = project_id.to_string();
        run_blocking(&self.conn, move |conn| {
            let project_rowid = lookup_project_id(conn, &public)?
                .ok_or_else(|| StoreError::ProjectNotFound(public.clone()))?;
            let mut totals = TaskBuckets::default();
            let mut orders = Vec::new();
            for order in list_orders_for_project(conn, project_rowid)? {
                let buckets = count_buckets(&task_statuses(conn, order.id)?);
                totals.add(buckets);
                orders.push(OrderProgress::new(&order, buckets));
            }
            Ok(ProjectProgress {
                project_id: public,
                totals,
                percentage: totals.percentage(),
                orders,
            })
        })
        .await
    }

    /// Commit order completion if every task has completed: recount inside
    /// one transaction, write COMPLETED, return the updated order. Returns
    /// `None` without writing when the order is not complete. Repeated calls
    /// converge: an already completed order is returned as-is, without a
    /// second status write or audit row.
    pub async fn check_and_update_order_completion(
        &self,
        order_id: &str,
        actor: &str,
    ) -> StoreResult<Option<Order>> {
        let public = order_id.to_string();
        let actor = actor.to_string();
        run_blocking(&self.conn, move |conn| {
            let tx = conn.transaction()?;
            let order = get_order(&tx, &public)?;
            let buckets = count_buckets(&task_statuses(&tx, order.id)?);
            if !buckets.is_complete() {
                return Ok(None);
            }
            let updated = if order.status == OrderStatus::Completed {
                order
            } else {
                write_order_status(
                    &tx,
                    &order,
                    OrderStatus::Completed,
                    &actor,
                    Some("all tasks completed"),
                )?
            };
            tx.commit()?;
            Ok(Some(updated))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::store::domain::{AuditEntity, NewOrder, NewProject, NewTask};
    use crate::store::repository::{
        AuditRepository, OrderRepository, ProjectRepository, TaskRepository,
    };

    #[test]
    fn buckets_partition_a_mixed_order() {
        let statuses = [
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Done,
            TaskStatus::InProgress,
            TaskStatus::Queued,
            TaskStatus::Blocked,
        ];
        let buckets = count_buckets(&statuses);
        assert_eq!(buckets.completed, 2);
        assert_eq!(buckets.review_pending, 1);
        assert_eq!(buckets.in_progress, 1);
        assert_eq!(buckets.queued, 1);
        assert_eq!(buckets.blocked, 1);
        assert_eq!(buckets.total, 6);
        assert_eq!(buckets.percentage(), 33);
        assert!(!buckets.is_complete());
    }

    #[test]
    fn every_status_lands_in_exactly_one_bucket() {
        let statuses = [
            TaskStatus::Queued,
            TaskStatus::Blocked,
            TaskStatus::InProgress,
            TaskStatus::Done,
            TaskStatus::InReview,
            TaskStatus::Rework,
            TaskStatus::Completed,
            TaskStatus::Cancelled,
            TaskStatus::Rejected,
            TaskStatus::Skipped,
        ];
        let b = count_buckets(&statuses);
        let sum = b.queued
            + b.blocked
            + b.in_progress
            + b.review_pending
            + b.rework
            + b.completed
            + b.retired;
        assert_eq!(sum, b.total);
        assert_eq!(b.total, statuses.len());
    }

    #[test]
    fn percentage_rounds_and_handles_empty_orders() {
        assert_eq!(count_buckets(&[]).percentage(), 0);
        assert!(!count_buckets(&[]).is_complete());

        let two_thirds = count_buckets(&[
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Queued,
        ]);
        assert_eq!(two_thirds.percentage(), 67);

        let five_sixths = count_buckets(&[
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Queued,
        ]);
        assert_eq!(five_sixths.percentage(), 83);
    }

    #[test]
    fn retired_tasks_keep_an_order_incomplete() {
        let buckets = count_buckets(&[TaskStatus::Completed, TaskStatus::Skipped]);
        assert_eq!(buckets.completed, 1);
        assert_eq!(buckets.retired, 1);
        assert!(!buckets.is_complete());
        assert_eq!(buckets.percentage(), 50);
    }

    async fn seed(store: &Store, task_count: usize) -> (String, Vec<String>) {
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
        let mut tasks = Vec::new();
        for i in 0..task_count {
            let task = store
                .tasks
                .create(
                    &order.public_id,
                    NewTask {
                        title: format!("task {i}"),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            tasks.push(task.public_id);
        }
        (order.public_id, tasks)
    }

    #[tokio::test]
    async fn completion_commits_once_and_stays_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().await.unwrap();
        let (order_id, tasks) = seed(&store, 2).await;
        let aggregator = ProgressAggregator::new(store.connection());

        assert!(
            aggregator
                .check_and_update_order_completion(&order_id, "engine")
                .await
                .unwrap()
                .is_none()
        );

        for task in &tasks {
            store
                .tasks
                .set_status(task, TaskStatus::Completed, "runner", None)
                .await
                .unwrap();
        }

        let updated = aggregator
            .check_and_update_order_completion(&order_id, "engine")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Completed);

        let order_audit = store
            .audit
            .history_for(AuditEntity::Order, &order_id)
            .await
            .unwrap();
        let status_rows = order_audit.len();

        // Second run still reports the order but writes nothing new.
        let again = aggregator
            .check_and_update_order_completion(&order_id, "engine")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.status, OrderStatus::Completed);
        let order_audit = store
            .audit
            .history_for(AuditEntity::Order, &order_id)
            .await
            .unwrap();
        assert_eq!(order_audit.len(), status_rows);
    }

    #[tokio::test]
    async fn incomplete_order_is_left_untouched() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().await.unwrap();
        let (order_id, tasks) = seed(&store, 2).await;
        let aggregator = ProgressAggregator::new(store.connection());

        store
            .tasks
            .set_status(&tasks[0], TaskStatus::Completed, "runner", None)
            .await
            .unwrap();

        assert!(
            aggregator
                .check_and_update_order_completion(&order_id, "engine")
                .await
                .unwrap()
                .is_none()
        );
        let progress = aggregator.order_progress(&order_id).await.unwrap();
        assert_eq!(progress.percentage, 50);
        assert!(!progress.is_complete);
        assert_ne!(progress.status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn project_progress_sums_orders() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().await.unwrap();
        store
            .projects
            .create(NewProject {
                id: "alpha".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        for title in ["one", "two"] {
            let order = store
                .orders
                .create(
                    "alpha",
                    NewOrder {
                        title: title.to_string(),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            let task = store
                .tasks
                .create(
                    &order.public_id,
                    NewTask {
                        title: format!("{title} work"),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            if title == "one" {
                store
                    .tasks
                    .set_status(&task.public_id, TaskStatus::Completed, "runner", None)
                    .await
                    .unwrap();
            }
        }

        let aggregator = ProgressAggregator::new(store.connection());
        let progress = aggregator.project_progress("alpha").await.unwrap();
        assert_eq!(progress.orders.len(), 2);
        assert_eq!(progress.totals.total, 2);
        assert_eq!(progress.totals.completed, 1);
        assert_eq!(progress.percentage, 50);

        assert!(matches!(
            aggregator.project_progress("ghost").await,
            Err(StoreError::ProjectNotFound(_))
        ));
    }
}
