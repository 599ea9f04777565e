//! Change notification hub.
//!
//! Every committed mutation is published here once, fanned out to broadcast
//! subscribers and registered observers. Observer callbacks run on their own
//! tasks: a slow or failing observer is logged and skipped, it never stalls
//! the writer or other subscribers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::broadcast;
use tokio::task;
use tokio::task::JoinSet;

use crate::events::{ChangeEvent, ChangeKind, ChangeObserver, ChangeSource};

pub const DEFAULT_HUB_BUFFER: usize = 1024;

pub type SubscriptionToken = u64;

/// Delivery filter for one subscription: everything, one project, or one
/// order within a project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub project_id: Option<String>,
    pub order_id: Option<String>,
}

impl Scope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            order_id: None,
        }
    }

    pub fn order(project_id: impl Into<String>, order_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            order_id: Some(order_id.into()),
        }
    }

    /// An order-level scope only admits events carrying that order id.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if let Some(project_id) = &self.project_id
            && *project_id != event.project_id
        {
            return false;
        }
        if let Some(order_id) = &self.order_id
            && event.order_id.as_deref() != Some(order_id.as_str())
        {
            return false;
        }
        true
    }
}

type ObserverList = Vec<(SubscriptionToken, Scope, Arc<dyn ChangeObserver>)>;

/// Handle returned by observer registration. Unsubscribing is a method
/// call; after it returns, no further events reach the observer.
pub struct SubscriptionHandle {
    token: SubscriptionToken,
    observers: Arc<Mutex<ObserverList>>,
}

impl SubscriptionHandle {
    pub fn token(&self) -> SubscriptionToken {
        self.token
    }

    /// Returns true when the observer was still registered.
    pub fn unsubscribe(self) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(token, _, _)| *token != self.token);
        before != observers.len()
    }
}

pub struct ChangeHub {
    sender: broadcast::Sender<ChangeEvent>,
    observers: Arc<Mutex<ObserverList>>,
    sequence: AtomicU64,
    subscription_sequence: AtomicU64,
    observer_tasks: Arc<TokioMutex<JoinSet<()>>>,
}

impl ChangeHub {
    /// Create a hub with a bounded broadcast channel.
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        Self {
            sender,
            observers: Arc::new(Mutex::new(Vec::new())),
            sequence: AtomicU64::new(1),
            subscription_sequence: AtomicU64::new(1),
            observer_tasks: Arc::new(TokioMutex::new(JoinSet::new())),
        }
    }

    /// Subscribe to the raw stream, unfiltered.
    pub fn subscribe_all(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to events matching a scope.
    pub fn subscribe_scoped(&self, scope: Scope) -> ScopedReceiver {
        ScopedReceiver {
            scope,
            inner: self.sender.subscribe(),
        }
    }

    /// Register a push observer for a scope.
    pub fn add_observer(
        &self,
        scope: Scope,
        observer: Arc<dyn ChangeObserver>,
    ) -> SubscriptionHandle {
        let token = self.subscription_sequence.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((token, scope, observer));
        SubscriptionHandle {
            token,
            observers: Arc::clone(&self.observers),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Publish one change to all subscribers and matching observers.
    pub fn publish(
        &self,
        source: ChangeSource,
        project_id: &str,
        order_id: Option<&str>,
        kind: ChangeKind,
    ) {
        let event = ChangeEvent {
            seq: self.sequence.fetch_add(1, Ordering::Relaxed),
            timestamp: time::OffsetDateTime::now_utc().unix_timestamp(),
            source,
            project_id: project_id.to_string(),
            order_id: order_id.map(str::to_string),
            kind,
        };
        self.dispatch(event);
    }

    /// Shut down and abort all pending observer tasks.
    pub async fn shutdown(&self) {
        log::debug!("ChangeHub: shutting down, aborting observer tasks");
        let mut tasks = self.observer_tasks.lock().await;
        tasks.shutdown().await;
    }

    fn dispatch(&self, event: ChangeEvent) {
        let _ = self.sender.send(event.clone());

        let observers = {
            self.observers
                .lock()
                .iter()
                .filter(|(_, scope, _)| scope.matches(&event))
                .map(|(_, _, observer)| Arc::clone(observer))
                .collect::<Vec<_>>()
        };
        if observers.is_empty() {
            return;
        }

        // Observer tasks are tracked so shutdown can abort them.
        let tasks = self.observer_tasks.clone();
        task::spawn(async move {
            let mut tasks_guard = tasks.lock().await;
            for observer in observers {
                let event = event.clone();
                let observer_type = std::any::type_name_of_val(observer.as_ref()).to_string();
                tasks_guard.spawn(async move {
                    if let Err(err) = observer.on_change(&event).await {
                        log::error!(
                            "ChangeHub observer failure: observer={}, event={}, project={}, seq={}, error={}",
                            observer_type,
                            event.kind.name(),
                            event.project_id,
                            event.seq,
                            err
                        );
                    }
                });
            }
        });
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_BUFFER)
    }
}

/// Broadcast receiver that drops events outside its scope.
pub struct ScopedReceiver {
    scope: Scope,
    inner: broadcast::Receiver<ChangeEvent>,
}

impl ScopedReceiver {
    /// Next in-scope event. Lag and closure surface unchanged so callers
    /// can resynchronize.
    pub async fn recv(&mut self) -> Result<ChangeEvent, broadcast::error::RecvError> {
        loop {
            let event = self.inner.recv().await?;
            if self.scope.matches(&event) {
                return Ok(event);
            }
        }
    }
}
