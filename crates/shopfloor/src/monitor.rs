//! Dependency monitoring.
//!
//! One watcher task per monitored (project, order) scope. The watcher reacts
//! to task status changes in its scope by recomputing the order's dependency
//! statuses and publishing one dependency event per task. Recomputed results
//! are pure functions of stored state, so a lagged or duplicated trigger
//! only re-emits the same answer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::dependency::{DependencyResolver, DependencyStatus};
use crate::error::EngineResult;
use crate::events::{ChangeKind, ChangeSource};
use crate::hub::{ChangeHub, Scope};

pub struct DependencyMonitor {
    hub: Arc<ChangeHub>,
    resolver: DependencyResolver,
    watchers: Mutex<HashMap<(String, String), JoinHandle<()>>>,
}

impl DependencyMonitor {
    pub fn new(hub: Arc<ChangeHub>, resolver: DependencyResolver) -> Self {
        Self {
            hub,
            resolver,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Start watching an order. Returns false without side effect when a
    /// watcher for this scope is already running.
    pub fn start(&self, project_id: &str, order_id: &str) -> bool {
        let key = (project_id.to_string(), order_id.to_string());
        let mut watchers = self.watchers.lock();
        if let Some(handle) = watchers.get(&key)
            && !handle.is_finished()
        {
            return false;
        }

        // Subscribe before spawning so no trigger between start() returning
        // and the task running is missed.
        let rx = self.hub.subscribe_scoped(Scope::order(project_id, order_id));
        let hub = Arc::clone(&self.hub);
        let resolver = self.resolver.clone();
        let project = project_id.to_string();
        let order = order_id.to_string();
        let handle = tokio::spawn(async move {
            watch(hub, resolver, project, order, rx).await;
        });
        watchers.insert(key, handle);
        true
    }

    /// Stop watching an order. No dependency events for this scope are
    /// produced by the monitor after this returns.
    pub fn stop(&self, project_id: &str, order_id: &str) -> bool {
        let key = (project_id.to_string(), order_id.to_string());
        match self.watchers.lock().remove(&key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        for (_, handle) in self.watchers.lock().drain() {
            handle.abort();
        }
    }

    pub fn is_active(&self, project_id: &str, order_id: &str) -> bool {
        let key = (project_id.to_string(), order_id.to_string());
        self.watchers
            .lock()
            .get(&key)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn active_count(&self) -> usize {
        self.watchers
            .lock()
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Recompute and publish dependency statuses for an order right now,
    /// without waiting for a status-change trigger.
    pub async fn refresh(
        &self,
        project_id: &str,
        order_id: &str,
    ) -> EngineResult<Vec<DependencyStatus>> {
        let statuses = self.resolver.for_order(order_id).await?;
        publish_statuses(&self.hub, project_id, order_id, &statuses);
        Ok(statuses)
    }
}

fn publish_statuses(
    hub: &ChangeHub,
    project_id: &str,
    order_id: &str,
    statuses: &[DependencyStatus],
) {
    for dependency in statuses {
        hub.publish(
            ChangeSource::Refresh,
            project_id,
            Some(order_id),
            ChangeKind::DependencyChanged {
                dependency: dependency.clone(),
            },
        );
    }
}

async fn watch(
    hub: Arc<ChangeHub>,
    resolver: DependencyResolver,
    project_id: String,
    order_id: String,
    mut rx: crate::hub::ScopedReceiver,
) {
    log::debug!("dependency watcher started: project={project_id}, order={order_id}");
    loop {
        match rx.recv().await {
            Ok(event) => {
                let recompute = match &event.kind {
                    ChangeKind::TaskStatusChanged { task, .. } => {
                        task.status.triggers_dependency_recompute()
                    }
                    ChangeKind::TaskCrashReported { task } => {
                        task.status.triggers_dependency_recompute()
                    }
                    _ => false,
                };
                if !recompute {
                    continue;
                }
                match resolver.for_order(&order_id).await {
                    Ok(statuses) => publish_statuses(&hub, &project_id, &order_id, &statuses),
                    Err(err) => log::error!(
                        "dependency recompute failed: project={project_id}, order={order_id}, error={err}"
                    ),
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                // Triggers were dropped; a full recompute covers whatever
                // they would have said.
                log::warn!(
                    "dependency watcher lagged: order={order_id}, skipped={skipped}, resynchronizing"
                );
                match resolver.for_order(&order_id).await {
                    Ok(statuses) => publish_statuses(&hub, &project_id, &order_id, &statuses),
                    Err(err) => log::error!(
                        "dependency resync failed: project={project_id}, order={order_id}, error={err}"
                    ),
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
    log::debug!("dependency watcher stopped: project={project_id}, order={order_id}");
}
