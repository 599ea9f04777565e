//! Workflow rules: legal status transitions, rework bounds, release
//! readiness.
//!
//! Everything here is a pure function over already-loaded rows. The service
//! layer validates with these before any write, so an illegal request never
//! reaches the store. The one deliberate bypass is order auto-completion in
//! the progress aggregator, which commits COMPLETED directly once every
//! task is done regardless of the order's current stage.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::domain::{
    Escalation, LatestReview, Order, OrderStatus, ReviewStatus, Task, TaskStatus,
};

/// A request that the workflow rules refuse before any write happens
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Task cannot move from {from} to {to}")]
    InvalidTaskTransition { from: TaskStatus, to: TaskStatus },

    #[error("Order cannot move from {from} to {to}")]
    InvalidOrderTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order {order_id} is {status}, retry is only valid from planning_failed")]
    RetryNotAllowed {
        order_id: String,
        status: OrderStatus,
    },

    #[error("Task {task_id} is {status}, reviews can only be submitted for done tasks")]
    ReviewNotAllowed { task_id: String, status: TaskStatus },

    #[error("Order {order_id} still has {remaining} unfinished tasks")]
    IncompleteTasks { order_id: String, remaining: usize },

    #[error("Task {task_id} cannot depend on itself")]
    SelfDependency { task_id: String },

    #[error("Dependency {dependency_id} does not name a task in the same order")]
    UnknownDependency { dependency_id: String },

    #[error("Dependencies of task {task_id} form a cycle")]
    DependencyCycle { task_id: String },

    #[error("Project {project_id} still has {active} active orders; use force to delete anyway")]
    ProjectHasActiveOrders { project_id: String, active: usize },

    #[error("Project {0} already exists")]
    DuplicateProject(String),

    #[error("Item {item_id} is already dispatched to project {project_id}")]
    AlreadyDispatched { item_id: String, project_id: String },

    #[error("{entity_id} does not belong to project {project_id}")]
    ProjectMismatch {
        entity_id: String,
        project_id: String,
    },

    #[error("Malformed identifier: {0:?}")]
    MalformedId(String),
}

/// Identifiers are caller-supplied for projects, so at least rule out the
/// obviously broken ones before they end up as keys.
pub fn validate_id(id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() || id.len() > 255 || id.contains(char::is_whitespace) {
        return Err(ValidationError::MalformedId(id.to_string()));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────
// Transition tables
// ─────────────────────────────────────────────────────────────────────────

/// True when a task may move from `from` to `to`. Terminal states have no
/// exits; blocked is an overlay the dependency resolver maintains, so tasks
/// move in and out of it freely while not yet running or finished.
pub fn task_transition_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Queued, InProgress | Blocked | Cancelled | Skipped)
            | (Blocked, Queued | InProgress | Cancelled | Skipped)
            | (InProgress, Done | Blocked | Rework | Cancelled | Skipped)
            | (Done, InReview | Completed | Rework)
            | (InReview, Completed | Rework | Rejected | InProgress)
            | (Rework, InProgress | Cancelled | Skipped | Rejected)
    )
}

/// True when an order may move from `from` to `to`. The only exit from
/// planning_failed is the explicit retry back to planning.
pub fn order_transition_allowed(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Planning, InProgress | PlanningFailed | OnHold | Cancelled)
            | (PlanningFailed, Planning | Cancelled)
            | (InProgress, Review | OnHold | Cancelled)
            | (Review, Completed | Rework | Cancelled)
            | (Rework, InProgress | Cancelled)
            | (OnHold, InProgress | Cancelled)
    )
}

/// Legal targets from a task state, for rendering transition menus.
pub fn allowed_task_transitions(from: TaskStatus) -> &'static [TaskStatus] {
    use TaskStatus::*;
    match from {
        Queued => &[InProgress, Blocked, Cancelled, Skipped],
        Blocked => &[Queued, InProgress, Cancelled, Skipped],
        InProgress => &[Done, Blocked, Rework, Cancelled, Skipped],
        Done => &[InReview, Completed, Rework],
        InReview => &[Completed, Rework, Rejected, InProgress],
        Rework => &[InProgress, Cancelled, Skipped, Rejected],
        Completed | Cancelled | Rejected | Skipped => &[],
    }
}

/// Legal targets from an order state.
pub fn allowed_order_transitions(from: OrderStatus) -> &'static [OrderStatus] {
    use OrderStatus::*;
    match from {
        Planning => &[InProgress, PlanningFailed, OnHold, Cancelled],
        PlanningFailed => &[Planning, Cancelled],
        InProgress => &[Review, OnHold, Cancelled],
        Review => &[Completed, Rework, Cancelled],
        Rework => &[InProgress, Cancelled],
        OnHold => &[InProgress, Cancelled],
        Completed | Cancelled => &[],
    }
}

pub fn validate_task_transition(task: &Task, to: TaskStatus) -> Result<(), ValidationError> {
    if task.status == to || !task_transition_allowed(task.status, to) {
        return Err(ValidationError::InvalidTaskTransition {
            from: task.status,
            to,
        });
    }
    Ok(())
}

pub fn validate_order_transition(order: &Order, to: OrderStatus) -> Result<(), ValidationError> {
    if order.status == to || !order_transition_allowed(order.status, to) {
        return Err(ValidationError::InvalidOrderTransition {
            from: order.status,
            to,
        });
    }
    Ok(())
}

/// Retry is a recovery command, not a transition request: it is only
/// meaningful on an order whose planning failed.
pub fn validate_retry(order: &Order) -> Result<(), ValidationError> {
    if order.status != OrderStatus::PlanningFailed {
        return Err(ValidationError::RetryNotAllowed {
            order_id: order.public_id.clone(),
            status: order.status,
        });
    }
    Ok(())
}

pub fn validate_review_submission(task: &Task) -> Result<(), ValidationError> {
    if task.status != TaskStatus::Done {
        return Err(ValidationError::ReviewNotAllowed {
            task_id: task.public_id.clone(),
            status: task.status,
        });
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────
// Rework bounds and release readiness
// ─────────────────────────────────────────────────────────────────────────

/// A task past the rework threshold is reported, never auto-retried.
pub fn requires_manual_intervention(task: &Task, max_rework: u32) -> bool {
    task.reject_count >= i64::from(max_rework) && task.status != TaskStatus::Completed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Ready,
    Warning,
    Blocked,
}

/// Computed release verdict for an order. Never stored.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseReadiness {
    pub order_id: String,
    pub state: ReadinessState,
    pub reasons: Vec<String>,
    /// Public ids of tasks not yet completed.
    pub unfinished_tasks: Vec<String>,
    /// Public ids of tasks whose latest review round is not approved.
    pub pending_reviews: Vec<String>,
    pub unresolved_escalations: usize,
    /// Public ids of tasks at or past the rework threshold.
    pub rework_exhausted: Vec<String>,
}

/// Assess whether an order is releasable: every task completed, every
/// latest review approved, no open escalations, nobody past the rework
/// threshold. A clean slate with prior rejections downgrades to a warning.
pub fn assess_release_readiness(
    order_id: &str,
    tasks: &[Task],
    latest_reviews: &[LatestReview],
    open_escalations: &[Escalation],
    max_rework: u32,
) -> ReleaseReadiness {
    let unfinished_tasks: Vec<String> = tasks
        .iter()
        .filter(|t| t.status != TaskStatus::Completed)
        .map(|t| t.public_id.clone())
        .collect();

    let pending_reviews: Vec<String> = latest_reviews
        .iter()
        .filter(|lr| lr.review.status != ReviewStatus::Approved)
        .map(|lr| lr.task_id.clone())
        .collect();

    let rework_exhausted: Vec<String> = tasks
        .iter()
        .filter(|t| requires_manual_intervention(t, max_rework))
        .map(|t| t.public_id.clone())
        .collect();

    let mut reasons = Vec::new();
    if tasks.is_empty() {
        reasons.push("order has no tasks".to_string());
    }
    if !unfinished_tasks.is_empty() {
        reasons.push(format!("{} tasks not completed", unfinished_tasks.len()));
    }
    if !pending_reviews.is_empty() {
        reasons.push(format!(
            "{} tasks without approved review",
            pending_reviews.len()
        ));
    }
    if !open_escalations.is_empty() {
        reasons.push(format!("{} unresolved escalations", open_escalations.len()));
    }
    if !rework_exhausted.is_empty() {
        reasons.push(format!(
            "{} tasks exhausted rework (limit {max_rework})",
            rework_exhausted.len()
        ));
    }

    let state = if !reasons.is_empty() {
        ReadinessState::Blocked
    } else if tasks.iter().any(|t| t.reject_count > 0) {
        let reworked = tasks.iter().filter(|t| t.reject_count > 0).count();
        reasons.push(format!("{reworked} tasks needed rework before approval"));
        ReadinessState::Warning
    } else {
        ReadinessState::Ready
    };

    ReleaseReadiness {
        order_id: order_id.to_string(),
        state,
        reasons,
        unfinished_tasks,
        pending_reviews,
        unresolved_escalations: open_escalations.len(),
        rework_exhausted,
    }
}
