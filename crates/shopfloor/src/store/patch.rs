//! Partial-update descriptors for mutable entities.
//!
//! Optional columns need three states in an update request: leave the value
//! alone, clear it to NULL, or set it to something new. `Option<T>` can only
//! express two of those, so [`Patch`] carries the distinction explicitly.
//! Required columns keep plain `Option<T>` (there is nothing to clear).

use crate::store::domain::{BacklogStatus, Priority, ProjectStatus};

/// Tri-state update field for nullable columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    /// Leave the stored value untouched.
    #[default]
    Keep,
    /// Clear the stored value to NULL.
    Clear,
    /// Replace the stored value.
    Set(T),
}

impl<T> Patch<T> {
    /// True when this field requests no change.
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }

    /// The requested value as an Option, where `Clear` maps to `None`.
    /// Only meaningful when `is_keep()` is false.
    pub fn as_option(&self) -> Option<&T> {
        match self {
            Patch::Set(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    /// `Some(v)` becomes `Set(v)`, `None` becomes `Clear`. Useful when a
    /// caller has already resolved the keep case away.
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Patch::Set(v),
            None => Patch::Clear,
        }
    }
}

/// Partial update for a project. Status changes ride along here because
/// project status is advisory and has no transition rules of its own.
#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub status: Option<ProjectStatus>,
    pub path: Patch<String>,
    pub description: Patch<String>,
    pub purpose: Patch<String>,
    pub tech_stack: Patch<String>,
    pub supervisor_id: Patch<String>,
}

impl ProjectPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.status.is_none()
            && self.path.is_keep()
            && self.description.is_keep()
            && self.purpose.is_keep()
            && self.tech_stack.is_keep()
            && self.supervisor_id.is_keep()
    }
}

/// Partial update for an order. Status is deliberately absent: order status
/// only moves through the transition operations.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub title: Option<String>,
    pub description: Patch<String>,
    pub priority: Option<Priority>,
}

impl OrderPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_keep() && self.priority.is_none()
    }
}

/// Partial update for a task. Status is deliberately absent, same as orders.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Patch<String>,
    pub priority: Option<Priority>,
    pub assignee: Patch<String>,
    pub recommended_model: Patch<String>,
    /// Full replacement of the dependency list, validated before it gets here.
    pub depends_on: Option<Vec<String>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_keep()
            && self.priority.is_none()
            && self.assignee.is_keep()
            && self.recommended_model.is_keep()
            && self.depends_on.is_none()
    }
}

/// Partial update for a backlog item. Backlog status has no transition table,
/// so it is patched directly.
#[derive(Debug, Clone, Default)]
pub struct BacklogPatch {
    pub title: Option<String>,
    pub description: Patch<String>,
    pub priority: Option<Priority>,
    pub status: Option<BacklogStatus>,
}

impl BacklogPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_keep()
            && self.priority.is_none()
            && self.status.is_none()
    }
}
