//! Shopfloor is a workflow state engine for project, order, and task
//! tracking.
//!
//! # Overview
//! Projects contain numbered work orders, orders contain numbered tasks,
//! and tasks move through an explicit status machine with review rounds,
//! escalations, and bounded rework. Every mutation goes through the
//! [`Engine`] facade, which validates against the workflow rules, writes
//! through a SQLite-backed store, and publishes a change event after the
//! transaction commits. Subscribers pull events over broadcast channels or
//! register push observers, scoped to everything, one project, or one
//! order.
//!
//! # Architecture
//! - [`store`]: SQLite persistence, one repository per entity family
//! - [`workflow`]: pure transition tables, rework bounds, release readiness
//! - [`dependency`]: task dependency resolution and validation
//! - [`progress`]: order and project progress rollups
//! - [`hub`] / [`events`]: change notification fanout
//! - [`monitor`]: per-order dependency watchers
//! - [`service`]: the [`Engine`] facade tying everything together
//! - [`legacy`]: read-only fallback over the predecessor's JSON state

/// Engine configuration, loaded from TOML
pub mod config;

/// Task dependency resolution and validation
pub mod dependency;

/// Engine-level error type
pub mod error;

/// Change event vocabulary
pub mod events;

/// Change notification fanout
pub mod hub;

/// Read-only fallback over the legacy JSON state file
pub mod legacy;

/// Per-order dependency watchers
pub mod monitor;

/// Progress rollups for orders and projects
pub mod progress;

/// The engine facade
pub mod service;

/// SQLite-backed persistence
pub mod store;

/// Workflow rules: transitions, rework bounds, release readiness
pub mod workflow;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use events::{ChangeEvent, ChangeKind, ChangeObserver, ChangeSource};
pub use hub::{ChangeHub, Scope, ScopedReceiver, SubscriptionHandle};
pub use service::{Engine, ProjectState, TaskDetail, TaskReviewHistory};
pub use store::{Store, StoreError, StoreResult};
pub use workflow::{ReadinessState, ReleaseReadiness, ValidationError};
