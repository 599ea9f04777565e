//! Change events emitted by the engine.
//!
//! Every committed mutation becomes one [`ChangeEvent`] carrying the fresh
//! row, published after the transaction commits. Subscribers therefore see
//! events only for state a re-query would already return.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dependency::DependencyStatus;
use crate::error::EngineError;
use crate::store::domain::{
    BacklogItem, DeletedCounts, Escalation, Order, OrderStatus, Project, Review, Task, TaskStatus,
};

/// Where a change signal originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    /// A repository command issued through the engine surface.
    Repository,
    /// An out-of-band report from the external automation runner.
    Runner,
    /// A manual or monitor-driven recomputation.
    Refresh,
}

/// One change notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Monotonic sequence number, unique per hub.
    pub seq: u64,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    pub source: ChangeSource,
    /// Public id of the project the change belongs to.
    pub project_id: String,
    /// Public id of the order, for changes scoped below project level.
    pub order_id: Option<String>,
    pub kind: ChangeKind,
}

/// What changed, with the committed row embedded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeKind {
    ProjectCreated { project: Project },
    ProjectUpdated { project: Project },
    ProjectDeleted { project_id: String, counts: DeletedCounts },
    OrderCreated { order: Order },
    OrderUpdated { order: Order },
    OrderStatusChanged { order: Order, from: OrderStatus },
    OrderCompleted { order: Order },
    TaskCreated { task: Task },
    TaskUpdated { task: Task },
    TaskStatusChanged { task: Task, from: TaskStatus },
    TaskCrashReported { task: Task },
    BacklogCreated { item: BacklogItem },
    BacklogUpdated { item: BacklogItem },
    BacklogDeleted { backlog_id: String },
    BacklogLinked { item: BacklogItem, order_id: String },
    ReviewSubmitted { review: Review, task_id: String },
    ReviewResolved { review: Review, task_id: String },
    EscalationRaised { escalation: Escalation, task_id: String },
    EscalationResolved { escalation: Escalation, task_id: String },
    DependencyChanged { dependency: DependencyStatus },
}

impl ChangeKind {
    /// Public id of the entity this event is primarily about.
    pub fn target_id(&self) -> &str {
        match self {
            ChangeKind::ProjectCreated { project } | ChangeKind::ProjectUpdated { project } => {
                &project.public_id
            }
            ChangeKind::ProjectDeleted { project_id, .. } => project_id,
            ChangeKind::OrderCreated { order }
            | ChangeKind::OrderUpdated { order }
            | ChangeKind::OrderStatusChanged { order, .. }
            | ChangeKind::OrderCompleted { order } => &order.public_id,
            ChangeKind::TaskCreated { task }
            | ChangeKind::TaskUpdated { task }
            | ChangeKind::TaskStatusChanged { task, .. }
            | ChangeKind::TaskCrashReported { task } => &task.public_id,
            ChangeKind::BacklogCreated { item }
            | ChangeKind::BacklogUpdated { item }
            | ChangeKind::BacklogLinked { item, .. } => &item.public_id,
            ChangeKind::BacklogDeleted { backlog_id } => backlog_id,
            ChangeKind::ReviewSubmitted { review, .. }
            | ChangeKind::ReviewResolved { review, .. } => &review.public_id,
            ChangeKind::EscalationRaised { escalation, .. }
            | ChangeKind::EscalationResolved { escalation, .. } => &escalation.public_id,
            ChangeKind::DependencyChanged { dependency } => &dependency.task_id,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ChangeKind::ProjectCreated { .. } => "project_created",
            ChangeKind::ProjectUpdated { .. } => "project_updated",
            ChangeKind::ProjectDeleted { .. } => "project_deleted",
            ChangeKind::OrderCreated { .. } => "order_created",
            ChangeKind::OrderUpdated { .. } => "order_updated",
            ChangeKind::OrderStatusChanged { .. } => "order_status_changed",
            ChangeKind::OrderCompleted { .. } => "order_completed",
            ChangeKind::TaskCreated { .. } => "task_created",
            ChangeKind::TaskUpdated { .. } => "task_updated",
            ChangeKind::TaskStatusChanged { .. } => "task_status_changed",
            ChangeKind::TaskCrashReported { .. } => "task_crash_reported",
            ChangeKind::BacklogCreated { .. } => "backlog_created",
            ChangeKind::BacklogUpdated { .. } => "backlog_updated",
            ChangeKind::BacklogDeleted { .. } => "backlog_deleted",
            ChangeKind::BacklogLinked { .. } => "backlog_linked",
            ChangeKind::ReviewSubmitted { .. } => "review_submitted",
            ChangeKind::ReviewResolved { .. } => "review_resolved",
            ChangeKind::EscalationRaised { .. } => "escalation_raised",
            ChangeKind::EscalationResolved { .. } => "escalation_resolved",
            ChangeKind::DependencyChanged { .. } => "dependency_changed",
        }
    }
}

/// Callback interface for push subscribers. Failures are logged and
/// isolated; one observer cannot stall another or the writer.
#[async_trait]
pub trait ChangeObserver: Send + Sync {
    async fn on_change(&self, event: &ChangeEvent) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tagged_kind() {
        let event = ChangeEvent {
            seq: 7,
            timestamp: 1_700_000_000,
            source: ChangeSource::Runner,
            project_id: "alpha".to_string(),
            order_id: Some("o-1".to_string()),
            kind: ChangeKind::BacklogDeleted {
                backlog_id: "b-1".to_string(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["source"], "runner");
        assert_eq!(json["kind"]["type"], "backlog_deleted");
        assert_eq!(json["kind"]["backlog_id"], "b-1");
    }

    #[test]
    fn target_id_points_at_the_changed_entity() {
        let kind = ChangeKind::BacklogDeleted {
            backlog_id: "b-1".to_string(),
        };
        assert_eq!(kind.target_id(), "b-1");
        assert_eq!(kind.name(), "backlog_deleted");
    }
}
