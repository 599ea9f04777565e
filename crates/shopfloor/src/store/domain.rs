//! Domain types for the workflow store.
//!
//! Status enums carry their display metadata (label, color, sort rank) here
//! so list rendering and logging never re-derive it at call sites. The string
//! form of every enum doubles as its storage encoding.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

// ─────────────────────────────────────────────────────────────────────────
// Status metadata
// ─────────────────────────────────────────────────────────────────────────

/// Display palette shared by all status enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusColor {
    Grey,
    Blue,
    Green,
    Yellow,
    Orange,
    Red,
    Purple,
}

impl StatusColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusColor::Grey => "grey",
            StatusColor::Blue => "blue",
            StatusColor::Green => "green",
            StatusColor::Yellow => "yellow",
            StatusColor::Orange => "orange",
            StatusColor::Red => "red",
            StatusColor::Purple => "purple",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Priority
// ─────────────────────────────────────────────────────────────────────────

/// Priority of an order, task or backlog item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Numeric rank used for ordering: high sorts first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(format!("Unknown priority: {s}")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Project status
// ─────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a project. Advisory only: projects have no transition
/// rules, the state summarizes what its orders are doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Initial,
    Planning,
    InProgress,
    Review,
    Completed,
    OnHold,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Initial => "initial",
            ProjectStatus::Planning => "planning",
            ProjectStatus::InProgress => "in_progress",
            ProjectStatus::Review => "review",
            ProjectStatus::Completed => "completed",
            ProjectStatus::OnHold => "on_hold",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProjectStatus::Initial => "Initial",
            ProjectStatus::Planning => "Planning",
            ProjectStatus::InProgress => "In Progress",
            ProjectStatus::Review => "Review",
            ProjectStatus::Completed => "Completed",
            ProjectStatus::OnHold => "On Hold",
        }
    }

    pub fn color(&self) -> StatusColor {
        match self {
            ProjectStatus::Initial | ProjectStatus::Planning | ProjectStatus::OnHold => {
                StatusColor::Grey
            }
            ProjectStatus::InProgress => StatusColor::Blue,
            ProjectStatus::Review => StatusColor::Yellow,
            ProjectStatus::Completed => StatusColor::Green,
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(ProjectStatus::Initial),
            "planning" => Ok(ProjectStatus::Planning),
            "in_progress" => Ok(ProjectStatus::InProgress),
            "review" => Ok(ProjectStatus::Review),
            "completed" => Ok(ProjectStatus::Completed),
            "on_hold" => Ok(ProjectStatus::OnHold),
            _ => Err(format!("Unknown project status: {s}")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Order status
// ─────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a work order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Planning,
    PlanningFailed,
    InProgress,
    Review,
    Rework,
    OnHold,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Planning => "planning",
            OrderStatus::PlanningFailed => "planning_failed",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Review => "review",
            OrderStatus::Rework => "rework",
            OrderStatus::OnHold => "on_hold",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::Planning => "Planning",
            OrderStatus::PlanningFailed => "Planning Failed",
            OrderStatus::InProgress => "In Progress",
            OrderStatus::Review => "Review",
            OrderStatus::Rework => "Rework",
            OrderStatus::OnHold => "On Hold",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn color(&self) -> StatusColor {
        match self {
            OrderStatus::Planning | OrderStatus::OnHold | OrderStatus::Cancelled => {
                StatusColor::Grey
            }
            OrderStatus::PlanningFailed => StatusColor::Red,
            OrderStatus::InProgress => StatusColor::Blue,
            OrderStatus::Review => StatusColor::Yellow,
            OrderStatus::Rework => StatusColor::Orange,
            OrderStatus::Completed => StatusColor::Green,
        }
    }

    /// Rank used when listing orders by how much attention they need.
    pub fn sort_rank(&self) -> u8 {
        match self {
            OrderStatus::PlanningFailed => 0,
            OrderStatus::Rework => 1,
            OrderStatus::Review => 2,
            OrderStatus::InProgress => 3,
            OrderStatus::Planning => 4,
            OrderStatus::OnHold => 5,
            OrderStatus::Completed => 6,
            OrderStatus::Cancelled => 7,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(OrderStatus::Planning),
            "planning_failed" => Ok(OrderStatus::PlanningFailed),
            "in_progress" => Ok(OrderStatus::InProgress),
            "review" => Ok(OrderStatus::Review),
            "rework" => Ok(OrderStatus::Rework),
            "on_hold" => Ok(OrderStatus::OnHold),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            _ => Err(format!("Unknown order status: {s}")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Task status
// ─────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a task within an order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Queued,
    Blocked,
    InProgress,
    Done,
    InReview,
    Rework,
    Completed,
    Cancelled,
    Rejected,
    Skipped,
}

impl TaskStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Cancelled
                | TaskStatus::Rejected
                | TaskStatus::Skipped
        )
    }

    /// States in which a task counts toward satisfying its dependents.
    /// Skipped work cannot be waited on, so it satisfies too.
    pub fn satisfies_dependency(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Skipped)
    }

    /// States whose arrival should prompt a dependency recomputation for the
    /// surrounding order. Done is included so review pileups surface early.
    pub fn triggers_dependency_recompute(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Done | TaskStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Blocked => "blocked",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::InReview => "in_review",
            TaskStatus::Rework => "rework",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Skipped => "skipped",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "Queued",
            TaskStatus::Blocked => "Blocked",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Done => "Done",
            TaskStatus::InReview => "In Review",
            TaskStatus::Rework => "Rework",
            TaskStatus::Completed => "Completed",
            TaskStatus::Cancelled => "Cancelled",
            TaskStatus::Rejected => "Rejected",
            TaskStatus::Skipped => "Skipped",
        }
    }

    pub fn color(&self) -> StatusColor {
        match self {
            TaskStatus::Queued | TaskStatus::Cancelled | TaskStatus::Skipped => StatusColor::Grey,
            TaskStatus::Blocked | TaskStatus::Rejected => StatusColor::Red,
            TaskStatus::InProgress => StatusColor::Blue,
            TaskStatus::Done => StatusColor::Purple,
            TaskStatus::InReview => StatusColor::Yellow,
            TaskStatus::Rework => StatusColor::Orange,
            TaskStatus::Completed => StatusColor::Green,
        }
    }

    /// Rank used when listing tasks by how much attention they need.
    pub fn sort_rank(&self) -> u8 {
        match self {
            TaskStatus::Rework => 0,
            TaskStatus::InReview => 1,
            TaskStatus::InProgress => 2,
            TaskStatus::Blocked => 3,
            TaskStatus::Done => 4,
            TaskStatus::Queued => 5,
            TaskStatus::Completed => 6,
            TaskStatus::Rejected => 7,
            TaskStatus::Skipped => 8,
            TaskStatus::Cancelled => 9,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "blocked" => Ok(TaskStatus::Blocked),
            "in_progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            "in_review" => Ok(TaskStatus::InReview),
            "rework" => Ok(TaskStatus::Rework),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "rejected" => Ok(TaskStatus::Rejected),
            "skipped" => Ok(TaskStatus::Skipped),
            _ => Err(format!("Unknown task status: {s}")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Backlog status
// ─────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a backlog item. Note the single-l "canceled" spelling,
/// fixed by the stored data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacklogStatus {
    #[default]
    Todo,
    InOrder,
    Done,
    Canceled,
}

impl BacklogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BacklogStatus::Todo => "todo",
            BacklogStatus::InOrder => "in_order",
            BacklogStatus::Done => "done",
            BacklogStatus::Canceled => "canceled",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BacklogStatus::Todo => "To Do",
            BacklogStatus::InOrder => "In Order",
            BacklogStatus::Done => "Done",
            BacklogStatus::Canceled => "Canceled",
        }
    }

    pub fn color(&self) -> StatusColor {
        match self {
            BacklogStatus::Todo | BacklogStatus::Canceled => StatusColor::Grey,
            BacklogStatus::InOrder => StatusColor::Blue,
            BacklogStatus::Done => StatusColor::Green,
        }
    }
}

impl std::fmt::Display for BacklogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BacklogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(BacklogStatus::Todo),
            "in_order" => Ok(BacklogStatus::InOrder),
            "done" => Ok(BacklogStatus::Done),
            "canceled" => Ok(BacklogStatus::Canceled),
            _ => Err(format!("Unknown backlog status: {s}")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Review status
// ─────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a task review
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Pending,
    InReview,
    Approved,
    Rejected,
    Escalated,
}

impl ReviewStatus {
    /// Terminal outcomes of a review round.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            ReviewStatus::Approved | ReviewStatus::Rejected | ReviewStatus::Escalated
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::InReview => "in_review",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
            ReviewStatus::Escalated => "escalated",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "Pending",
            ReviewStatus::InReview => "In Review",
            ReviewStatus::Approved => "Approved",
            ReviewStatus::Rejected => "Rejected",
            ReviewStatus::Escalated => "Escalated",
        }
    }

    pub fn color(&self) -> StatusColor {
        match self {
            ReviewStatus::Pending => StatusColor::Yellow,
            ReviewStatus::InReview => StatusColor::Blue,
            ReviewStatus::Approved => StatusColor::Green,
            ReviewStatus::Rejected => StatusColor::Red,
            ReviewStatus::Escalated => StatusColor::Purple,
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReviewStatus::Pending),
            "in_review" => Ok(ReviewStatus::InReview),
            "approved" => Ok(ReviewStatus::Approved),
            "rejected" => Ok(ReviewStatus::Rejected),
            "escalated" => Ok(ReviewStatus::Escalated),
            _ => Err(format!("Unknown review status: {s}")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Audit vocabulary
// ─────────────────────────────────────────────────────────────────────────

/// Entity kinds whose field changes are recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntity {
    Task,
    Order,
}

impl AuditEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEntity::Task => "task",
            AuditEntity::Order => "order",
        }
    }
}

impl std::fmt::Display for AuditEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AuditEntity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(AuditEntity::Task),
            "order" => Ok(AuditEntity::Order),
            _ => Err(format!("Unknown audit entity: {s}")),
        }
    }
}

/// Fields whose changes are worth auditing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedField {
    Status,
    Assignee,
    Title,
    Priority,
    Dependencies,
    Description,
    RecommendedModel,
}

impl TrackedField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackedField::Status => "status",
            TrackedField::Assignee => "assignee",
            TrackedField::Title => "title",
            TrackedField::Priority => "priority",
            TrackedField::Dependencies => "dependencies",
            TrackedField::Description => "description",
            TrackedField::RecommendedModel => "recommended_model",
        }
    }
}

impl std::fmt::Display for TrackedField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TrackedField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(TrackedField::Status),
            "assignee" => Ok(TrackedField::Assignee),
            "title" => Ok(TrackedField::Title),
            "priority" => Ok(TrackedField::Priority),
            "dependencies" => Ok(TrackedField::Dependencies),
            "description" => Ok(TrackedField::Description),
            "recommended_model" => Ok(TrackedField::RecommendedModel),
            _ => Err(format!("Unknown tracked field: {s}")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Entities
// ─────────────────────────────────────────────────────────────────────────

/// A project groups orders and a backlog. Its public id is caller-supplied
/// and doubles as the human-facing name of the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    #[serde(skip)]
    pub id: i64,
    pub public_id: String,
    pub name: String,
    pub path: Option<String>,
    pub status: ProjectStatus,
    pub description: Option<String>,
    pub purpose: Option<String>,
    pub tech_stack: Option<String>,
    /// Public id of the owning supervisor, if any.
    pub supervisor_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A work order: a numbered batch of tasks inside a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    #[serde(skip)]
    pub id: i64,
    pub public_id: String,
    /// Public id of the owning project.
    pub project_id: String,
    /// Sequential number, unique within the project.
    pub number: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: OrderStatus,
    pub priority: Priority,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A task: the unit of execution inside an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(skip)]
    pub id: i64,
    pub public_id: String,
    /// Public id of the owning order.
    pub order_id: String,
    /// Public id of the project the order belongs to.
    pub project_id: String,
    /// Sequential number, unique within the order.
    pub number: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assignee: Option<String>,
    pub recommended_model: Option<String>,
    /// Public ids of tasks this one waits on, all in the same order.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// How many review rounds have rejected this task.
    pub reject_count: i64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A backlog item: future work not yet promoted into an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacklogItem {
    #[serde(skip)]
    pub id: i64,
    pub public_id: String,
    /// Public id of the owning project.
    pub project_id: String,
    /// Sequential number, unique within the project.
    pub number: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: BacklogStatus,
    pub priority: Priority,
    /// Public id of the order this item was promoted into, if any.
    pub order_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// One review round over a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    #[serde(skip)]
    pub id: i64,
    pub public_id: String,
    #[serde(skip)]
    pub task_id: i64,
    pub status: ReviewStatus,
    pub reviewer: Option<String>,
    pub comment: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub reviewed_at: Option<OffsetDateTime>,
}

/// An escalation raised from a review that could not be settled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    #[serde(skip)]
    pub id: i64,
    pub public_id: String,
    #[serde(skip)]
    pub task_id: i64,
    #[serde(skip)]
    pub review_id: Option<i64>,
    pub reason: String,
    pub resolution: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub resolved_at: Option<OffsetDateTime>,
}

impl Escalation {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// One recorded change to a tracked field. Entity ids are stored as public
/// ids so history survives row deletion and rowid reuse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    #[serde(skip)]
    pub id: i64,
    pub entity: AuditEntity,
    pub entity_id: String,
    pub field: TrackedField,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: String,
    pub reason: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub changed_at: OffsetDateTime,
}

/// A supervisor coordinates several projects and keeps its own backlog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supervisor {
    #[serde(skip)]
    pub id: i64,
    pub public_id: String,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A supervisor-level backlog item that can be dispatched into one of the
/// supervised projects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossProjectItem {
    #[serde(skip)]
    pub id: i64,
    pub public_id: String,
    #[serde(skip)]
    pub supervisor_id: i64,
    /// Sequential number, unique within the supervisor.
    pub number: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: BacklogStatus,
    pub priority: Priority,
    /// Public id of the project this item was dispatched to, if any.
    pub dispatched_project_id: Option<String>,
    /// Public id of the backlog row created by the dispatch, if any.
    pub dispatched_backlog_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Row counts removed by a cascading project delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedCounts {
    pub orders: i64,
    pub tasks: i64,
    pub backlogs: i64,
}

/// Verdict a reviewer hands down on a pending review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReviewOutcome {
    Approve,
    Reject,
    Escalate { reason: String },
}

/// Everything a review resolution touched
#[derive(Debug, Clone, Serialize)]
pub struct ReviewResolution {
    pub review: Review,
    pub task: Task,
    pub escalation: Option<Escalation>,
}

/// Everything an escalation resolution touched
#[derive(Debug, Clone, Serialize)]
pub struct EscalationResolution {
    pub escalation: Escalation,
    pub task: Task,
    /// True when settling the last open escalation moved the task back
    /// into progress.
    pub reopened: bool,
}

/// Latest review round for one task, used for release assessment
#[derive(Debug, Clone, Serialize)]
pub struct LatestReview {
    /// Public id of the reviewed task.
    pub task_id: String,
    pub review: Review,
}

/// Result of dispatching a cross-project item into a project backlog
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub item: CrossProjectItem,
    pub backlog: BacklogItem,
}

// ─────────────────────────────────────────────────────────────────────────
// Creation inputs
// ─────────────────────────────────────────────────────────────────────────

/// Input for registering a project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProject {
    /// Caller-supplied public id, also the default name.
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub tech_stack: Option<String>,
}

/// Input for creating an order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewOrder {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

/// Input for creating a task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub recommended_model: Option<String>,
    /// Public ids of tasks in the same order this one waits on.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Input for creating a backlog item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBacklogItem {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

/// Input for creating a cross-project backlog item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCrossProjectItem {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn priority_ranks_order_high_first() {
        assert!(Priority::High.rank() < Priority::Medium.rank());
        assert!(Priority::Medium.rank() < Priority::Low.rank());
    }

    #[test]
    fn task_status_round_trips_through_strings() {
        for status in [
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
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Ok(status));
        }
    }

    #[test]
    fn order_status_round_trips_through_strings() {
        for status in [
            OrderStatus::Planning,
            OrderStatus::PlanningFailed,
            OrderStatus::InProgress,
            OrderStatus::Review,
            OrderStatus::Rework,
            OrderStatus::OnHold,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::from_str(status.as_str()), Ok(status));
        }
    }

    #[test]
    fn backlog_canceled_uses_single_l() {
        assert_eq!(BacklogStatus::Canceled.as_str(), "canceled");
        assert_eq!(
            BacklogStatus::from_str("canceled"),
            Ok(BacklogStatus::Canceled)
        );
        assert!(BacklogStatus::from_str("cancelled").is_err());
    }

    #[test]
    fn terminal_task_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::Rejected.is_terminal());
        assert!(TaskStatus::Skipped.is_terminal());
        assert!(!TaskStatus::Done.is_terminal());
        assert!(!TaskStatus::InReview.is_terminal());
    }

    #[test]
    fn dependency_satisfaction_is_completed_or_skipped() {
        assert!(TaskStatus::Completed.satisfies_dependency());
        assert!(TaskStatus::Skipped.satisfies_dependency());
        assert!(!TaskStatus::Done.satisfies_dependency());
        assert!(!TaskStatus::Cancelled.satisfies_dependency());
        assert!(!TaskStatus::Rejected.satisfies_dependency());
    }

    #[test]
    fn recompute_triggers_include_done() {
        assert!(TaskStatus::Done.triggers_dependency_recompute());
        assert!(TaskStatus::Completed.triggers_dependency_recompute());
        assert!(TaskStatus::Skipped.triggers_dependency_recompute());
        assert!(!TaskStatus::InProgress.triggers_dependency_recompute());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&OrderStatus::PlanningFailed).unwrap();
        assert_eq!(json, "\"planning_failed\"");
        let back: OrderStatus = serde_json::from_str("\"planning_failed\"").unwrap();
        assert_eq!(back, OrderStatus::PlanningFailed);
    }

    #[test]
    fn status_metadata_is_total() {
        // Every state must render without panicking.
        for status in [
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
        ] {
            assert!(!status.label().is_empty());
            assert!(!status.color().as_str().is_empty());
        }
        assert_eq!(TaskStatus::Completed.color(), StatusColor::Green);
        assert_eq!(OrderStatus::PlanningFailed.color(), StatusColor::Red);
    }

    #[test]
    fn tracked_field_round_trips() {
        for field in [
            TrackedField::Status,
            TrackedField::Assignee,
            TrackedField::Title,
            TrackedField::Priority,
            TrackedField::Dependencies,
            TrackedField::Description,
            TrackedField::RecommendedModel,
        ] {
            assert_eq!(TrackedField::from_str(field.as_str()), Ok(field));
        }
    }
}
