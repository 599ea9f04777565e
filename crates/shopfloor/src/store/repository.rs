//! Repository traits over the workflow store.
//!
//! All methods address entities by public id. Implementations run each
//! mutation in one transaction: the returned records always reflect the
//! committed state, and audit rows for tracked fields are written in the
//! same transaction as the change they describe.

use async_trait::async_trait;

use super::domain::{
    AuditEntity, BacklogItem, CrossProjectItem, DeletedCounts, DispatchOutcome, Escalation,
    EscalationResolution, LatestReview, NewBacklogItem, NewCrossProjectItem, NewOrder, NewProject,
    NewTask, Order, OrderStatus, Project, Review, ReviewOutcome, ReviewResolution, StatusChange,
    Supervisor, Task, TaskStatus,
};
use super::error::StoreResult;
use super::patch::{BacklogPatch, OrderPatch, ProjectPatch, TaskPatch};

/// Projects: registration, lookup, partial update, cascading delete.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Register a project under its caller-supplied public id.
    async fn create(&self, input: NewProject) -> StoreResult<Project>;

    async fn get(&self, project_id: &str) -> StoreResult<Project>;

    /// All projects, by name.
    async fn list(&self) -> StoreResult<Vec<Project>>;

    /// Apply a partial update. An empty or no-op patch returns the current
    /// row without writing.
    async fn update(&self, project_id: &str, patch: ProjectPatch) -> StoreResult<Project>;

    /// Delete the project and everything under it, returning what was
    /// removed. Audit rows for the removed entities are purged too.
    async fn delete(&self, project_id: &str) -> StoreResult<DeletedCounts>;
}

/// Orders within a project.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Create an order with the next free number in the project.
    async fn create(&self, project_id: &str, input: NewOrder) -> StoreResult<Order>;

    async fn get(&self, order_id: &str) -> StoreResult<Order>;

    /// Orders of a project, by priority then number.
    async fn list(&self, project_id: &str) -> StoreResult<Vec<Order>>;

    /// Number the next created order would receive.
    async fn next_number(&self, project_id: &str) -> StoreResult<i64>;

    /// Apply a partial update, auditing each tracked field that changed.
    async fn update(&self, order_id: &str, patch: OrderPatch, actor: &str) -> StoreResult<Order>;

    /// Move the order to `to`, recording the change in the audit trail.
    /// Transition legality is the caller's concern.
    async fn set_status(
        &self,
        order_id: &str,
        to: OrderStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> StoreResult<Order>;
}

/// Tasks within an order.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Create a task with the next free number in the order. Dependencies
    /// must name tasks of the same order and are validated by the caller.
    async fn create(&self, order_id: &str, input: NewTask) -> StoreResult<Task>;

    async fn get(&self, task_id: &str) -> StoreResult<Task>;

    /// Tasks of an order, by number.
    async fn list(&self, order_id: &str) -> StoreResult<Vec<Task>>;

    /// Apply a partial update, auditing each tracked field that changed.
    async fn update(&self, task_id: &str, patch: TaskPatch, actor: &str) -> StoreResult<Task>;

    /// Move the task to `to`, recording the change in the audit trail and
    /// stamping started_at / completed_at when the state calls for it.
    /// Transition legality is the caller's concern.
    async fn set_status(
        &self,
        task_id: &str,
        to: TaskStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> StoreResult<Task>;

    /// Bump the rejection counter, returning the fresh task.
    async fn increment_reject_count(&self, task_id: &str) -> StoreResult<Task>;
}

/// Project backlog items.
#[async_trait]
pub trait BacklogRepository: Send + Sync {
    async fn create(&self, project_id: &str, input: NewBacklogItem) -> StoreResult<BacklogItem>;

    async fn get(&self, backlog_id: &str) -> StoreResult<BacklogItem>;

    /// Backlog of a project, by priority then number.
    async fn list(&self, project_id: &str) -> StoreResult<Vec<BacklogItem>>;

    async fn update(&self, backlog_id: &str, patch: BacklogPatch) -> StoreResult<BacklogItem>;

    async fn delete(&self, backlog_id: &str) -> StoreResult<()>;

    /// Mark the item as promoted into `order_id`.
    async fn link_to_order(&self, backlog_id: &str, order_id: &str) -> StoreResult<BacklogItem>;
}

/// Reviews and the escalations they spawn.
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    /// Open a pending review for a task and move the task into review.
    async fn submit(
        &self,
        task_id: &str,
        reviewer: Option<String>,
        actor: &str,
    ) -> StoreResult<(Review, Task)>;

    /// Claim a pending review for active reviewing.
    async fn start(&self, review_id: &str, reviewer: &str) -> StoreResult<Review>;

    /// Settle a review. Approval completes the task, rejection sends it to
    /// rework and bumps its counter, escalation opens an escalation record.
    async fn resolve(
        &self,
        review_id: &str,
        outcome: ReviewOutcome,
        comment: Option<String>,
        actor: &str,
    ) -> StoreResult<ReviewResolution>;

    async fn get(&self, review_id: &str) -> StoreResult<Review>;

    /// Review rounds for a task, oldest first.
    async fn list_for_task(&self, task_id: &str) -> StoreResult<Vec<Review>>;

    /// Latest review round per task of an order.
    async fn latest_for_order(&self, order_id: &str) -> StoreResult<Vec<LatestReview>>;

    /// Close an escalation. Resolving the last open escalation of a task
    /// that is still in review moves the task back into progress; resolving
    /// an already settled escalation changes nothing.
    async fn resolve_escalation(
        &self,
        escalation_id: &str,
        resolution: &str,
        actor: &str,
    ) -> StoreResult<EscalationResolution>;

    async fn escalations_for_task(&self, task_id: &str) -> StoreResult<Vec<Escalation>>;

    /// Unresolved escalations across an order's tasks.
    async fn open_escalations_for_order(&self, order_id: &str) -> StoreResult<Vec<Escalation>>;
}

/// Read access to the append-only audit trail.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Recorded changes for one entity, oldest first.
    async fn history_for(
        &self,
        entity: AuditEntity,
        entity_id: &str,
    ) -> StoreResult<Vec<StatusChange>>;

    /// Most recent changes across all entities, newest first.
    async fn recent(&self, limit: u32) -> StoreResult<Vec<StatusChange>>;
}

/// Supervisors and their cross-project backlog.
#[async_trait]
pub trait SupervisorRepository: Send + Sync {
    async fn create(&self, name: &str) -> StoreResult<Supervisor>;

    async fn get(&self, supervisor_id: &str) -> StoreResult<Supervisor>;

    /// All supervisors, by name.
    async fn list(&self) -> StoreResult<Vec<Supervisor>>;

    async fn add_item(
        &self,
        supervisor_id: &str,
        input: NewCrossProjectItem,
    ) -> StoreResult<CrossProjectItem>;

    async fn get_item(&self, item_id: &str) -> StoreResult<CrossProjectItem>;

    /// Items of a supervisor, by priority then number.
    async fn list_items(&self, supervisor_id: &str) -> StoreResult<Vec<CrossProjectItem>>;

    /// Copy an item into a project backlog and mark it dispatched.
    /// Dispatching the same item to the same project again is a no-op;
    /// the caller rejects dispatches to a different project.
    async fn dispatch_item(&self, item_id: &str, project_id: &str)
    -> StoreResult<DispatchOutcome>;
}
