//! Optimistic mutation bookkeeping.

use std::time::{Duration, Instant};

use focus_core::ids::{MutationId, TaskId};
use focus_core::model::Task;
use serde_json::{Value, json};

/// Client-initiated change, applied locally before the server confirms it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationKind {
    /// Create a task owned by the local user.
    AddTask {
        /// Display title. Must not be blank.
        title: String,
    },
    /// Remove a task.
    DeleteTask {
        /// Target.
        task_id: TaskId,
    },
    /// Flip a task's completion flag.
    ToggleTask {
        /// Target.
        task_id: TaskId,
    },
    /// Set a task's completion flag explicitly.
    SetTaskCompleted {
        /// Target.
        task_id: TaskId,
        /// New value.
        completed: bool,
    },
}

impl MutationKind {
    /// Outbound event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::AddTask { .. } => "add_task",
            Self::DeleteTask { .. } => "delete_task",
            Self::ToggleTask { .. } | Self::SetTaskCompleted { .. } => "toggle_task",
        }
    }

    /// Task this mutation addresses, if it already exists.
    pub fn existing_target(&self) -> Option<&TaskId> {
        match self {
            Self::AddTask { .. } => None,
            Self::DeleteTask { task_id }
            | Self::ToggleTask { task_id }
            | Self::SetTaskCompleted { task_id, .. } => Some(task_id),
        }
    }
}

/// Lifecycle of one optimistic mutation. Only `Pending` can move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationStatus {
    /// Applied locally, waiting for the server.
    Pending,
    /// An authoritative event for the target arrived.
    Confirmed,
    /// Reverted after a send failure or timeout.
    RolledBack,
}

/// A tracked optimistic change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingMutation {
    /// Mutation ID, echoed to the server as `mutationId`.
    pub id: MutationId,
    /// What was requested.
    pub kind: MutationKind,
    /// Affected task. For `AddTask` this is the local placeholder ID.
    pub target: TaskId,
    /// Position and value of the target before the change; `None` when the
    /// task did not exist yet.
    pub before: Option<(usize, Task)>,
    /// When the change was applied locally.
    pub submitted_at: Instant,
    /// Where in its lifecycle the mutation is.
    pub status: MutationStatus,
}

impl PendingMutation {
    pub(crate) fn new(
        kind: MutationKind,
        target: TaskId,
        before: Option<(usize, Task)>,
        submitted_at: Instant,
    ) -> Self {
        Self {
            id: MutationId::new(),
            kind,
            target,
            before,
            submitted_at,
            status: MutationStatus::Pending,
        }
    }

    /// `Pending → Confirmed`. Returns false from any other status.
    pub fn confirm(&mut self) -> bool {
        self.advance(MutationStatus::Confirmed)
    }

    /// `Pending → RolledBack`. Returns false from any other status.
    pub fn roll_back(&mut self) -> bool {
        self.advance(MutationStatus::RolledBack)
    }

    fn advance(&mut self, next: MutationStatus) -> bool {
        if self.status != MutationStatus::Pending {
            return false;
        }
        self.status = next;
        true
    }

    /// Whether the confirmation window has passed.
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.status == MutationStatus::Pending
            && now.saturating_duration_since(self.submitted_at) >= timeout
    }

    /// Payload for the outbound frame. `completed` is the optimistic value
    /// for toggles.
    pub(crate) fn payload(&self, completed: Option<bool>) -> Value {
        match &self.kind {
            MutationKind::AddTask { title } => json!({
                "title": title,
                "mutationId": self.id,
            }),
            MutationKind::DeleteTask { task_id } => json!({
                "taskId": task_id,
                "mutationId": self.id,
            }),
            MutationKind::ToggleTask { task_id }
            | MutationKind::SetTaskCompleted { task_id, .. } => {
                json!({
                    "taskId": task_id,
                    "completed": completed.unwrap_or_default(),
                    "mutationId": self.id,
                })
            }
        }
    }
}
