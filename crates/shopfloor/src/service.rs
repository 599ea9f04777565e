//! Engine facade over store, workflow rules, progress, and notifications.
//!
//! One [`Engine`] per process, constructed by the composition root through
//! [`Engine::start`] and torn down with [`Engine::stop`]. Every mutation
//! validates against the workflow rules first, writes through a repository,
//! and publishes its change event only after the transaction committed. The
//! UI and the external runner both go through this surface; nothing else
//! writes to the store.
//!
//! When the database cannot be opened and a legacy state file is configured,
//! the engine starts in a read-only fallback: project, order, and task reads
//! are served from the parsed snapshot and every mutation fails with
//! [`EngineError::ReadOnly`]. The legacy file is never written.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::instrument;

use crate::config::EngineConfig;
use crate::dependency::{
    DependencyResolver, DependencyStatus, resolve_for_tasks, validate_dependencies,
};
use crate::error::{EngineError, EngineResult};
use crate::events::{ChangeEvent, ChangeKind, ChangeObserver, ChangeSource};
use crate::hub::{ChangeHub, Scope, ScopedReceiver, SubscriptionHandle};
use crate::legacy::LegacySnapshot;
use crate::monitor::DependencyMonitor;
use crate::progress::{
    OrderProgress, ProgressAggregator, ProjectProgress, TaskBuckets, count_buckets,
};
use crate::store::domain::{
    AuditEntity, BacklogItem, CrossProjectItem, DeletedCounts, DispatchOutcome, Escalation,
    EscalationResolution, NewBacklogItem, NewCrossProjectItem, NewOrder, NewProject, NewTask,
    Order, OrderStatus, Project, Review, ReviewOutcome, ReviewResolution, ReviewStatus,
    StatusChange, Supervisor, Task, TaskStatus,
};
use crate::store::patch::{BacklogPatch, OrderPatch, ProjectPatch, TaskPatch};
use crate::store::repository::{
    AuditRepository, BacklogRepository, OrderRepository, ProjectRepository, ReviewRepository,
    SupervisorRepository, TaskRepository,
};
use crate::store::{Store, StoreError};
use crate::workflow::{self, ReleaseReadiness, ValidationError};

/// Everything known about one project in a single response.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectState {
    pub project: Project,
    pub orders: Vec<Order>,
    pub progress: ProjectProgress,
    pub backlog: Vec<BacklogItem>,
}

/// One task with its dependency state and the transitions open to it.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    pub task: Task,
    pub dependencies: DependencyStatus,
    pub allowed_transitions: Vec<TaskStatus>,
}

/// Review trail of one task: every round, every escalation, and the audit
/// rows behind them.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReviewHistory {
    pub task_id: String,
    pub reviews: Vec<Review>,
    pub escalations: Vec<Escalation>,
    pub status_history: Vec<StatusChange>,
    pub reject_count: i64,
    pub max_rework: u32,
}

struct SqliteBacking {
    store: Store,
    aggregator: ProgressAggregator,
    resolver: DependencyResolver,
    monitor: DependencyMonitor,
}

enum Backing {
    Sqlite(SqliteBacking),
    Legacy {
        snapshot: LegacySnapshot,
        path: PathBuf,
    },
}

/// The workflow engine.
pub struct Engine {
    backing: Backing,
    hub: Arc<ChangeHub>,
    max_rework: u32,
    /// Crash reports already handled, keyed by (task public id, timestamp).
    seen_crashes: Mutex<HashSet<(String, i64)>>,
}

fn ensure_in_project(entity_id: &str, entity_project: &str, project_id: &str) -> EngineResult<()> {
    if entity_project != project_id {
        return Err(ValidationError::ProjectMismatch {
            entity_id: entity_id.to_string(),
            project_id: project_id.to_string(),
        }
        .into());
    }
    Ok(())
}

impl Engine {
    /// Open the store, run pending migrations, and wire up the hub. Falls
    /// back to the read-only legacy snapshot when the store is unavailable
    /// and a legacy source is configured; a failed migration is fatal.
    pub async fn start(config: EngineConfig) -> EngineResult<Self> {
        let hub = Arc::new(ChangeHub::new(config.hub.buffer));

        let store = if config.store.in_memory {
            Store::open_in_memory()?
        } else {
            let Some(path) = config.store.path.as_deref() else {
                return Err(EngineError::Configuration(
                    "store location not configured: set [store] path or in_memory".to_string(),
                ));
            };
            match Store::open(
                path,
                config.store.busy_timeout(),
                config.store.create_if_missing,
            ) {
                Ok(store) => store,
                Err(err @ StoreError::Unavailable { .. }) => {
                    let Some(legacy) = config.legacy.as_ref() else {
                        return Err(err.into());
                    };
                    log::warn!(
                        "{err}; serving read-only from legacy state at {}",
                        legacy.state_path.display()
                    );
                    let snapshot = LegacySnapshot::load(&legacy.state_path)?;
                    return Ok(Self {
                        backing: Backing::Legacy {
                            snapshot,
                            path: legacy.state_path.clone(),
                        },
                        hub,
                        max_rework: config.workflow.max_rework,
                        seen_crashes: Mutex::new(HashSet::new()),
                    });
                }
                Err(err) => return Err(err.into()),
            }
        };

        let report = store.migrate().await?;
        if !report.applied.is_empty() {
            log::info!(
                "applied {} schema migrations, store now at version {}",
                report.applied.len(),
                report.version
            );
        }

        let conn = store.connection();
        let resolver = DependencyResolver::new(Arc::clone(&conn));
        let backing = Backing::Sqlite(SqliteBacking {
            aggregator: ProgressAggregator::new(Arc::clone(&conn)),
            monitor: DependencyMonitor::new(Arc::clone(&hub), resolver.clone()),
            resolver,
            store,
        });

        Ok(Self {
            backing,
            hub,
            max_rework: config.workflow.max_rework,
            seen_crashes: Mutex::new(HashSet::new()),
        })
    }

    /// Stop all dependency watchers and abort pending observer deliveries.
    /// The engine serves no further events after this returns.
    pub async fn stop(&self) {
        if let Backing::Sqlite(db) = &self.backing {
            db.monitor.stop_all();
        }
        self.hub.shutdown().await;
    }

    /// True when reads come from the legacy snapshot and writes are refused.
    pub fn is_read_only(&self) -> bool {
        matches!(self.backing, Backing::Legacy { .. })
    }

    /// Rework threshold in effect for readiness and intervention checks.
    pub fn max_rework(&self) -> u32 {
        self.max_rework
    }

    fn sqlite(&self) -> EngineResult<&SqliteBacking> {
        match &self.backing {
            Backing::Sqlite(db) => Ok(db),
            Backing::Legacy { path, .. } => {
                Err(EngineError::ReadOnly(path.display().to_string()))
            }
        }
    }

    fn publish(
        &self,
        source: ChangeSource,
        project_id: &str,
        order_id: Option<&str>,
        kind: ChangeKind,
    ) {
        self.hub.publish(source, project_id, order_id, kind);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Projects
    // ─────────────────────────────────────────────────────────────────────

    pub async fn projects(&self) -> EngineResult<Vec<Project>> {
        match &self.backing {
            Backing::Sqlite(db) => Ok(db.store.projects.list().await?),
            Backing::Legacy { snapshot, .. } => Ok(snapshot.projects()),
        }
    }

    /// Project row, orders, progress rollup, and backlog in one call.
    pub async fn project_state(&self, project_id: &str) -> EngineResult<ProjectState> {
        match &self.backing {
            Backing::Sqlite(db) => Ok(ProjectState {
                project: db.store.projects.get(project_id).await?,
                orders: db.store.orders.list(project_id).await?,
                progress: db.aggregator.project_progress(project_id).await?,
                backlog: db.store.backlogs.list(project_id).await?,
            }),
            Backing::Legacy { snapshot, .. } => Ok(ProjectState {
                project: snapshot.project(project_id)?,
                orders: snapshot.orders(project_id)?,
                progress: snapshot_progress(snapshot, project_id)?,
                backlog: snapshot.backlog(project_id)?,
            }),
        }
    }

    #[instrument(name = "engine.create_project", skip(self, input), fields(project = %input.id))]
    pub async fn create_project(&self, input: NewProject) -> EngineResult<Project> {
        let db = self.sqlite()?;
        workflow::validate_id(&input.id)?;
        match db.store.projects.get(&input.id).await {
            Ok(_) => return Err(ValidationError::DuplicateProject(input.id).into()),
            Err(StoreError::ProjectNotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
        let project = db.store.projects.create(input).await?;
        self.publish(
            ChangeSource::Repository,
            &project.public_id,
            None,
            ChangeKind::ProjectCreated {
                project: project.clone(),
            },
        );
        Ok(project)
    }

    pub async fn update_project(
        &self,
        project_id: &str,
        patch: ProjectPatch,
    ) -> EngineResult<Project> {
        let db = self.sqlite()?;
        let project = db.store.projects.update(project_id, patch).await?;
        self.publish(
            ChangeSource::Repository,
            &project.public_id,
            None,
            ChangeKind::ProjectUpdated {
                project: project.clone(),
            },
        );
        Ok(project)
    }

    /// Delete a project and everything under it. Without `force`, a project
    /// that still has non-terminal orders is refused.
    #[instrument(name = "engine.delete_project", skip(self), fields(project = %project_id, force))]
    pub async fn delete_project(
        &self,
        project_id: &str,
        force: bool,
    ) -> EngineResult<DeletedCounts> {
        let db = self.sqlite()?;
        let orders = db.store.orders.list(project_id).await?;
        let active = orders.iter().filter(|o| !o.status.is_terminal()).count();
        if active > 0 && !force {
            return Err(ValidationError::ProjectHasActiveOrders {
                project_id: project_id.to_string(),
                active,
            }
            .into());
        }
        for order in &orders {
            db.monitor.stop(project_id, &order.public_id);
        }
        let counts = db.store.projects.delete(project_id).await?;
        self.publish(
            ChangeSource::Repository,
            project_id,
            None,
            ChangeKind::ProjectDeleted {
                project_id: project_id.to_string(),
                counts,
            },
        );
        Ok(counts)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Orders
    // ─────────────────────────────────────────────────────────────────────

    pub async fn orders(&self, project_id: &str) -> EngineResult<Vec<Order>> {
        match &self.backing {
            Backing::Sqlite(db) => Ok(db.store.orders.list(project_id).await?),
            Backing::Legacy { snapshot, .. } => Ok(snapshot.orders(project_id)?),
        }
    }

    #[instrument(name = "engine.create_order", skip(self, input), fields(project = %project_id))]
    pub async fn create_order(&self, project_id: &str, input: NewOrder) -> EngineResult<Order> {
        let db = self.sqlite()?;
        let order = db.store.orders.create(project_id, input).await?;
        self.publish(
            ChangeSource::Repository,
            &order.project_id,
            Some(&order.public_id),
            ChangeKind::OrderCreated {
                order: order.clone(),
            },
        );
        Ok(order)
    }

    pub async fn update_order(
        &self,
        order_id: &str,
        patch: OrderPatch,
        actor: &str,
    ) -> EngineResult<Order> {
        let db = self.sqlite()?;
        let order = db.store.orders.update(order_id, patch, actor).await?;
        self.publish(
            ChangeSource::Repository,
            &order.project_id,
            Some(&order.public_id),
            ChangeKind::OrderUpdated {
                order: order.clone(),
            },
        );
        Ok(order)
    }

    /// Move an order to a new status. Completion additionally requires
    /// every task of the order to have completed.
    #[instrument(
        name = "engine.transition_order",
        skip(self),
        fields(project = %project_id, order = %order_id, to = %to)
    )]
    pub async fn transition_order(
        &self,
        project_id: &str,
        order_id: &str,
        to: OrderStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> EngineResult<Order> {
        let db = self.sqlite()?;
        let order = db.store.orders.get(order_id).await?;
        ensure_in_project(order_id, &order.project_id, project_id)?;
        workflow::validate_order_transition(&order, to)?;
        if to == OrderStatus::Completed {
            let remaining = db
                .store
                .tasks
                .list(order_id)
                .await?
                .iter()
                .filter(|t| t.status != TaskStatus::Completed)
                .count();
            if remaining > 0 {
                return Err(ValidationError::IncompleteTasks {
                    order_id: order_id.to_string(),
                    remaining,
                }
                .into());
            }
        }
        let updated = db.store.orders.set_status(order_id, to, actor, reason).await?;
        self.publish(
            ChangeSource::Repository,
            &updated.project_id,
            Some(&updated.public_id),
            ChangeKind::OrderStatusChanged {
                order: updated.clone(),
                from: order.status,
            },
        );
        if to == OrderStatus::Completed {
            self.publish(
                ChangeSource::Repository,
                &updated.project_id,
                Some(&updated.public_id),
                ChangeKind::OrderCompleted {
                    order: updated.clone(),
                },
            );
        }
        Ok(updated)
    }

    /// Send an order whose planning failed back to planning.
    #[instrument(name = "engine.retry_order", skip(self), fields(project = %project_id, order = %order_id))]
    pub async fn retry_order(
        &self,
        project_id: &str,
        order_id: &str,
        actor: &str,
    ) -> EngineResult<Order> {
        let db = self.sqlite()?;
        let order = db.store.orders.get(order_id).await?;
        ensure_in_project(order_id, &order.project_id, project_id)?;
        workflow::validate_retry(&order)?;
        let updated = db
            .store
            .orders
            .set_status(order_id, OrderStatus::Planning, actor, Some("planning retry"))
            .await?;
        self.publish(
            ChangeSource::Repository,
            &updated.project_id,
            Some(&updated.public_id),
            ChangeKind::OrderStatusChanged {
                order: updated.clone(),
                from: order.status,
            },
        );
        Ok(updated)
    }

    pub async fn order_progress(&self, order_id: &str) -> EngineResult<OrderProgress> {
        match &self.backing {
            Backing::Sqlite(db) => Ok(db.aggregator.order_progress(order_id).await?),
            Backing::Legacy { snapshot, .. } => {
                let order = snapshot.order(order_id)?;
                let statuses: Vec<TaskStatus> = snapshot
                    .tasks(order_id)?
                    .iter()
                    .map(|t| t.status)
                    .collect();
                Ok(OrderProgress::new(&order, count_buckets(&statuses)))
            }
        }
    }

    /// Assess whether an order is releasable: tasks, latest reviews, and
    /// open escalations weighed against the rework threshold.
    pub async fn order_release_readiness(
        &self,
        project_id: &str,
        order_id: &str,
    ) -> EngineResult<ReleaseReadiness> {
        let db = self.sqlite()?;
        let order = db.store.orders.get(order_id).await?;
        ensure_in_project(order_id, &order.project_id, project_id)?;
        let tasks = db.store.tasks.list(order_id).await?;
        let latest_reviews = db.store.reviews.latest_for_order(order_id).await?;
        let open_escalations = db.store.reviews.open_escalations_for_order(order_id).await?;
        Ok(workflow::assess_release_readiness(
            order_id,
            &tasks,
            &latest_reviews,
            &open_escalations,
            self.max_rework,
        ))
    }

    /// Commit order completion when the last task of the order completed,
    /// publishing the completion event. Incomplete orders are untouched.
    async fn try_complete_order(&self, task: &Task, actor: &str) -> EngineResult<()> {
        let db = self.sqlite()?;
        if let Some(order) = db
            .aggregator
            .check_and_update_order_completion(&task.order_id, actor)
            .await?
        {
            log::debug!(
                "order {} completed after final task {}",
                order.public_id,
                task.public_id
            );
            let project_id = order.project_id.clone();
            let order_id = order.public_id.clone();
            self.publish(
                ChangeSource::Repository,
                &project_id,
                Some(&order_id),
                ChangeKind::OrderCompleted { order },
            );
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tasks
    // ─────────────────────────────────────────────────────────────────────

    pub async fn tasks(&self, order_id: &str) -> EngineResult<Vec<Task>> {
        match &self.backing {
            Backing::Sqlite(db) => Ok(db.store.tasks.list(order_id).await?),
            Backing::Legacy { snapshot, .. } => Ok(snapshot.tasks(order_id)?),
        }
    }

    /// One task with dependency state and its legal transitions.
    pub async fn task_detail(&self, project_id: &str, task_id: &str) -> EngineResult<TaskDetail> {
        match &self.backing {
            Backing::Sqlite(db) => {
                let task = db.store.tasks.get(task_id).await?;
                ensure_in_project(task_id, &task.project_id, project_id)?;
                let dependencies = db.resolver.for_task(task_id).await?;
                Ok(TaskDetail {
                    allowed_transitions: workflow::allowed_task_transitions(task.status).to_vec(),
                    dependencies,
                    task,
                })
            }
            Backing::Legacy { snapshot, .. } => {
                let (task, siblings) = legacy_task(snapshot, project_id, task_id)?;
                let dependencies = resolve_for_tasks(&siblings)
                    .into_iter()
                    .find(|s| s.task_id == task_id)
                    .unwrap_or_else(|| crate::dependency::status_from_counts(task_id, 0, 0));
                Ok(TaskDetail {
                    allowed_transitions: workflow::allowed_task_transitions(task.status).to_vec(),
                    dependencies,
                    task,
                })
            }
        }
    }

    /// Create a task in an order. Dependencies must name existing tasks of
    /// the same order and must not form a cycle or self-reference.
    #[instrument(name = "engine.create_task", skip(self, input), fields(order = %order_id))]
    pub async fn create_task(&self, order_id: &str, input: NewTask) -> EngineResult<Task> {
        let db = self.sqlite()?;
        let siblings = db.store.tasks.list(order_id).await?;
        validate_dependencies(None, &input.depends_on, &siblings)?;
        let task = db.store.tasks.create(order_id, input).await?;
        self.publish(
            ChangeSource::Repository,
            &task.project_id,
            Some(&task.order_id),
            ChangeKind::TaskCreated { task: task.clone() },
        );
        Ok(task)
    }

    pub async fn update_task(
        &self,
        task_id: &str,
        patch: TaskPatch,
        actor: &str,
    ) -> EngineResult<Task> {
        let db = self.sqlite()?;
        if let Some(deps) = &patch.depends_on {
            let current = db.store.tasks.get(task_id).await?;
            let siblings = db.store.tasks.list(&current.order_id).await?;
            validate_dependencies(Some(&current.public_id), deps, &siblings)?;
        }
        let task = db.store.tasks.update(task_id, patch, actor).await?;
        self.publish(
            ChangeSource::Repository,
            &task.project_id,
            Some(&task.order_id),
            ChangeKind::TaskUpdated { task: task.clone() },
        );
        Ok(task)
    }

    /// Move a task to a new status, auto-completing the order when this was
    /// the last task to complete.
    #[instrument(
        name = "engine.transition_task",
        skip(self),
        fields(project = %project_id, task = %task_id, to = %to)
    )]
    pub async fn transition_task(
        &self,
        project_id: &str,
        task_id: &str,
        to: TaskStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> EngineResult<Task> {
        let db = self.sqlite()?;
        let task = db.store.tasks.get(task_id).await?;
        ensure_in_project(task_id, &task.project_id, project_id)?;
        workflow::validate_task_transition(&task, to)?;
        let updated = db.store.tasks.set_status(task_id, to, actor, reason).await?;
        self.publish(
            ChangeSource::Repository,
            &updated.project_id,
            Some(&updated.order_id),
            ChangeKind::TaskStatusChanged {
                task: updated.clone(),
                from: task.status,
            },
        );
        self.forget_crashes(&updated);
        if to == TaskStatus::Completed {
            self.try_complete_order(&updated, actor).await?;
        }
        Ok(updated)
    }

    /// Dependency statuses within a project, optionally narrowed to one
    /// task or one order. Without a narrowing id, every order of the
    /// project is resolved.
    pub async fn dependency_status(
        &self,
        project_id: &str,
        task_id: Option<&str>,
        order_id: Option<&str>,
    ) -> EngineResult<Vec<DependencyStatus>> {
        match &self.backing {
            Backing::Sqlite(db) => {
                if let Some(task_id) = task_id {
                    let task = db.store.tasks.get(task_id).await?;
                    ensure_in_project(task_id, &task.project_id, project_id)?;
                    return Ok(vec![db.resolver.for_task(task_id).await?]);
                }
                if let Some(order_id) = order_id {
                    let order = db.store.orders.get(order_id).await?;
                    ensure_in_project(order_id, &order.project_id, project_id)?;
                    return Ok(db.resolver.for_order(order_id).await?);
                }
                let mut statuses = Vec::new();
                for order in db.store.orders.list(project_id).await? {
                    statuses.extend(db.resolver.for_order(&order.public_id).await?);
                }
                Ok(statuses)
            }
            Backing::Legacy { snapshot, .. } => {
                let orders = match order_id {
                    Some(order_id) => {
                        let order = snapshot.order(order_id)?;
                        ensure_in_project(order_id, &order.project_id, project_id)?;
                        vec![order]
                    }
                    None => snapshot.orders(project_id)?,
                };
                let mut statuses = Vec::new();
                for order in &orders {
                    statuses.extend(resolve_for_tasks(&snapshot.tasks(&order.public_id)?));
                }
                if let Some(task_id) = task_id {
                    statuses.retain(|s| s.task_id == task_id);
                    if statuses.is_empty() {
                        return Err(StoreError::TaskNotFound(task_id.to_string()).into());
                    }
                }
                Ok(statuses)
            }
        }
    }

    /// Out-of-band crash report from the runner. Duplicate reports for the
    /// same (task, timestamp) are suppressed, and a task no longer in
    /// progress is left alone, so replays never double-write. Returns the
    /// task when a transition was applied.
    #[instrument(
        name = "engine.report_task_crash",
        skip(self, message),
        fields(project = %project_id, task = %task_id, at = timestamp)
    )]
    pub async fn report_task_crash(
        &self,
        project_id: &str,
        task_id: &str,
        timestamp: i64,
        message: &str,
    ) -> EngineResult<Option<Task>> {
        let db = self.sqlite()?;
        let key = (task_id.to_string(), timestamp);
        if !self.seen_crashes.lock().insert(key.clone()) {
            log::debug!("duplicate crash report for task {task_id} at {timestamp}, suppressed");
            return Ok(None);
        }

        let applied: EngineResult<Option<Task>> = async {
            let task = db.store.tasks.get(task_id).await?;
            ensure_in_project(task_id, &task.project_id, project_id)?;
            if task.status != TaskStatus::InProgress {
                log::debug!(
                    "crash report for task {task_id} in state {}, no transition applied",
                    task.status
                );
                return Ok(None);
            }
            let updated = db
                .store
                .tasks
                .set_status(task_id, TaskStatus::Rework, "runner", Some(message))
                .await?;
            self.publish(
                ChangeSource::Runner,
                &updated.project_id,
                Some(&updated.order_id),
                ChangeKind::TaskCrashReported {
                    task: updated.clone(),
                },
            );
            Ok(Some(updated))
        }
        .await;

        // A failed report must not poison the dedup set: the runner may
        // retry the same crash with corrected addressing.
        if applied.is_err() {
            self.seen_crashes.lock().remove(&key);
        }
        applied
    }

    /// A terminal task takes no further crash reports, so its dedup
    /// entries can be dropped.
    fn forget_crashes(&self, task: &Task) {
        if task.status.is_terminal() {
            self.seen_crashes
                .lock()
                .retain(|(id, _)| id != &task.public_id);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Backlog
    // ─────────────────────────────────────────────────────────────────────

    pub async fn add_backlog(
        &self,
        project_id: &str,
        input: NewBacklogItem,
    ) -> EngineResult<BacklogItem> {
        let db = self.sqlite()?;
        let item = db.store.backlogs.create(project_id, input).await?;
        self.publish(
            ChangeSource::Repository,
            &item.project_id,
            None,
            ChangeKind::BacklogCreated { item: item.clone() },
        );
        Ok(item)
    }

    pub async fn update_backlog(
        &self,
        backlog_id: &str,
        patch: BacklogPatch,
    ) -> EngineResult<BacklogItem> {
        let db = self.sqlite()?;
        let item = db.store.backlogs.update(backlog_id, patch).await?;
        self.publish(
            ChangeSource::Repository,
            &item.project_id,
            None,
            ChangeKind::BacklogUpdated { item: item.clone() },
        );
        Ok(item)
    }

    pub async fn delete_backlog(&self, backlog_id: &str) -> EngineResult<()> {
        let db = self.sqlite()?;
        let item = db.store.backlogs.get(backlog_id).await?;
        db.store.backlogs.delete(backlog_id).await?;
        self.publish(
            ChangeSource::Repository,
            &item.project_id,
            None,
            ChangeKind::BacklogDeleted {
                backlog_id: backlog_id.to_string(),
            },
        );
        Ok(())
    }

    /// Mark a backlog item as promoted into an order of the same project.
    pub async fn link_backlog_to_order(
        &self,
        backlog_id: &str,
        order_id: &str,
    ) -> EngineResult<BacklogItem> {
        let db = self.sqlite()?;
        let item = db.store.backlogs.get(backlog_id).await?;
        let order = db.store.orders.get(order_id).await?;
        ensure_in_project(order_id, &order.project_id, &item.project_id)?;
        let item = db.store.backlogs.link_to_order(backlog_id, order_id).await?;
        self.publish(
            ChangeSource::Repository,
            &item.project_id,
            Some(&order.public_id),
            ChangeKind::BacklogLinked {
                item: item.clone(),
                order_id: order.public_id.clone(),
            },
        );
        Ok(item)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reviews and escalations
    // ─────────────────────────────────────────────────────────────────────

    /// Open a review round for a done task, moving it into review.
    #[instrument(name = "engine.submit_review", skip(self, reviewer), fields(task = %task_id))]
    pub async fn submit_review(
        &self,
        task_id: &str,
        reviewer: Option<String>,
        actor: &str,
    ) -> EngineResult<(Review, Task)> {
        let db = self.sqlite()?;
        let task = db.store.tasks.get(task_id).await?;
        workflow::validate_review_submission(&task)?;
        let (review, updated) = db.store.reviews.submit(task_id, reviewer, actor).await?;
        self.publish(
            ChangeSource::Repository,
            &updated.project_id,
            Some(&updated.order_id),
            ChangeKind::ReviewSubmitted {
                review: review.clone(),
                task_id: updated.public_id.clone(),
            },
        );
        self.publish(
            ChangeSource::Repository,
            &updated.project_id,
            Some(&updated.order_id),
            ChangeKind::TaskStatusChanged {
                task: updated.clone(),
                from: task.status,
            },
        );
        Ok((review, updated))
    }

    /// Settle a review round. Approval completes the task and may complete
    /// the order; rejection sends the task to rework and counts against the
    /// rework budget; escalation opens an escalation and leaves the task in
    /// review.
    #[instrument(name = "engine.resolve_review", skip(self, comment), fields(review = %review_id))]
    pub async fn resolve_review(
        &self,
        review_id: &str,
        outcome: ReviewOutcome,
        comment: Option<String>,
        actor: &str,
    ) -> EngineResult<ReviewResolution> {
        let db = self.sqlite()?;
        let resolution = db
            .store
            .reviews
            .resolve(review_id, outcome, comment, actor)
            .await?;
        let task = &resolution.task;
        self.publish(
            ChangeSource::Repository,
            &task.project_id,
            Some(&task.order_id),
            ChangeKind::ReviewResolved {
                review: resolution.review.clone(),
                task_id: task.public_id.clone(),
            },
        );
        match resolution.review.status {
            ReviewStatus::Approved | ReviewStatus::Rejected => {
                self.publish(
                    ChangeSource::Repository,
                    &task.project_id,
                    Some(&task.order_id),
                    ChangeKind::TaskStatusChanged {
                        task: task.clone(),
                        from: TaskStatus::InReview,
                    },
                );
                self.forget_crashes(task);
                if resolution.review.status == ReviewStatus::Approved {
                    self.try_complete_order(task, actor).await?;
                }
            }
            _ => {
                if let Some(escalation) = &resolution.escalation {
                    self.publish(
                        ChangeSource::Repository,
                        &task.project_id,
                        Some(&task.order_id),
                        ChangeKind::EscalationRaised {
                            escalation: escalation.clone(),
                            task_id: task.public_id.clone(),
                        },
                    );
                }
            }
        }
        Ok(resolution)
    }

    /// Close an escalation. Settling the last open one returns the task to
    /// progress.
    #[instrument(name = "engine.resolve_escalation", skip(self, resolution), fields(escalation = %escalation_id))]
    pub async fn resolve_escalation(
        &self,
        escalation_id: &str,
        resolution: &str,
        actor: &str,
    ) -> EngineResult<EscalationResolution> {
        let db = self.sqlite()?;
        let outcome = db
            .store
            .reviews
            .resolve_escalation(escalation_id, resolution, actor)
            .await?;
        let task = &outcome.task;
        self.publish(
            ChangeSource::Repository,
            &task.project_id,
            Some(&task.order_id),
            ChangeKind::EscalationResolved {
                escalation: outcome.escalation.clone(),
                task_id: task.public_id.clone(),
            },
        );
        if outcome.reopened {
            self.publish(
                ChangeSource::Repository,
                &task.project_id,
                Some(&task.order_id),
                ChangeKind::TaskStatusChanged {
                    task: task.clone(),
                    from: TaskStatus::InReview,
                },
            );
        }
        Ok(outcome)
    }

    /// Full review trail of one task.
    pub async fn task_review_history(
        &self,
        project_id: &str,
        task_id: &str,
    ) -> EngineResult<TaskReviewHistory> {
        let db = self.sqlite()?;
        let task = db.store.tasks.get(task_id).await?;
        ensure_in_project(task_id, &task.project_id, project_id)?;
        Ok(TaskReviewHistory {
            reviews: db.store.reviews.list_for_task(task_id).await?,
            escalations: db.store.reviews.escalations_for_task(task_id).await?,
            status_history: db
                .store
                .audit
                .history_for(AuditEntity::Task, task_id)
                .await?,
            reject_count: task.reject_count,
            task_id: task.public_id,
            max_rework: self.max_rework,
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Supervisors
    // ─────────────────────────────────────────────────────────────────────

    pub async fn create_supervisor(&self, name: &str) -> EngineResult<Supervisor> {
        Ok(self.sqlite()?.store.supervisors.create(name).await?)
    }

    pub async fn supervisors(&self) -> EngineResult<Vec<Supervisor>> {
        Ok(self.sqlite()?.store.supervisors.list().await?)
    }

    pub async fn add_cross_project_item(
        &self,
        supervisor_id: &str,
        input: NewCrossProjectItem,
    ) -> EngineResult<CrossProjectItem> {
        Ok(self
            .sqlite()?
            .store
            .supervisors
            .add_item(supervisor_id, input)
            .await?)
    }

    pub async fn cross_project_items(
        &self,
        supervisor_id: &str,
    ) -> EngineResult<Vec<CrossProjectItem>> {
        Ok(self.sqlite()?.store.supervisors.list_items(supervisor_id).await?)
    }

    /// Copy a cross-project item into a project backlog. Dispatching to the
    /// same project again is a no-op; a different project is refused.
    #[instrument(name = "engine.dispatch_item", skip(self), fields(item = %item_id, project = %project_id))]
    pub async fn dispatch_cross_project_item(
        &self,
        item_id: &str,
        project_id: &str,
    ) -> EngineResult<DispatchOutcome> {
        let db = self.sqlite()?;
        let item = db.store.supervisors.get_item(item_id).await?;
        if let Some(dispatched) = item.dispatched_project_id.as_deref()
            && dispatched != project_id
        {
            return Err(ValidationError::AlreadyDispatched {
                item_id: item_id.to_string(),
                project_id: dispatched.to_string(),
            }
            .into());
        }
        let previous_backlog = item.dispatched_backlog_id;
        let outcome = db.store.supervisors.dispatch_item(item_id, project_id).await?;
        if previous_backlog.as_deref() != Some(outcome.backlog.public_id.as_str()) {
            self.publish(
                ChangeSource::Repository,
                project_id,
                None,
                ChangeKind::BacklogCreated {
                    item: outcome.backlog.clone(),
                },
            );
        }
        Ok(outcome)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Monitoring and subscriptions
    // ─────────────────────────────────────────────────────────────────────

    /// Start the dependency watcher for an order. Idempotent: returns false
    /// when the watcher is already running.
    pub async fn start_dependency_monitoring(
        &self,
        project_id: &str,
        order_id: &str,
    ) -> EngineResult<bool> {
        let db = self.sqlite()?;
        let order = db.store.orders.get(order_id).await?;
        ensure_in_project(order_id, &order.project_id, project_id)?;
        Ok(db.monitor.start(project_id, order_id))
    }

    /// Stop the dependency watcher for an order. Idempotent: returns false
    /// when no watcher was running.
    pub fn stop_dependency_monitoring(
        &self,
        project_id: &str,
        order_id: &str,
    ) -> EngineResult<bool> {
        Ok(self.sqlite()?.monitor.stop(project_id, order_id))
    }

    pub fn monitoring_active(&self, project_id: &str, order_id: &str) -> bool {
        match &self.backing {
            Backing::Sqlite(db) => db.monitor.is_active(project_id, order_id),
            Backing::Legacy { .. } => false,
        }
    }

    /// Recompute and publish dependency statuses for an order immediately.
    pub async fn refresh_dependencies(
        &self,
        project_id: &str,
        order_id: &str,
    ) -> EngineResult<Vec<DependencyStatus>> {
        let db = self.sqlite()?;
        let order = db.store.orders.get(order_id).await?;
        ensure_in_project(order_id, &order.project_id, project_id)?;
        db.monitor.refresh(project_id, order_id).await
    }

    /// Pull-style subscription filtered to a scope.
    pub fn subscribe(&self, scope: Scope) -> ScopedReceiver {
        self.hub.subscribe_scoped(scope)
    }

    /// Pull-style subscription to every event.
    pub fn subscribe_all(&self) -> broadcast::Receiver<ChangeEvent> {
        self.hub.subscribe_all()
    }

    /// Push-style observer for a scope. Unsubscribe via the handle.
    pub fn add_observer(
        &self,
        scope: Scope,
        observer: Arc<dyn ChangeObserver>,
    ) -> SubscriptionHandle {
        self.hub.add_observer(scope, observer)
    }

    /// Recorded schema version of the backing store.
    pub async fn schema_version(&self) -> EngineResult<i64> {
        Ok(self.sqlite()?.store.version().await?)
    }
}

fn snapshot_progress(
    snapshot: &LegacySnapshot,
    project_id: &str,
) -> EngineResult<ProjectProgress> {
    let mut totals = TaskBuckets::default();
    let mut orders = Vec::new();
    for order in snapshot.orders(project_id)? {
        let statuses: Vec<TaskStatus> = snapshot
            .tasks(&order.public_id)?
            .iter()
            .map(|t| t.status)
            .collect();
        let buckets = count_buckets(&statuses);
        totals.add(buckets);
        orders.push(OrderProgress::new(&order, buckets));
    }
    Ok(ProjectProgress {
        project_id: project_id.to_string(),
        totals,
        percentage: totals.percentage(),
        orders,
    })
}

fn legacy_task(
    snapshot: &LegacySnapshot,
    project_id: &str,
    task_id: &str,
) -> EngineResult<(Task, Vec<Task>)> {
    for order in snapshot.orders(project_id)? {
        let tasks = snapshot.tasks(&order.public_id)?;
        if let Some(task) = tasks.iter().find(|t| t.public_id == task_id) {
            return Ok((task.clone(), tasks));
        }
    }
    Err(StoreError::TaskNotFound(task_id.to_string()).into())
}
