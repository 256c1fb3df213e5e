//! Session domain model.
//!
//! These types mirror the JSON shapes the server uses (camelCase). The sync
//! engine holds them inside an immutable store snapshot; nothing here
//! enforces cross-entity invariants. That is the reconciler's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MutationId, SessionId, TaskId, UserId};

/// Points awarded per completed task in the local score formula.
pub const POINTS_PER_TASK: i64 = 100;

/// Whether a session is run alone or with a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Single participant.
    Solo,
    /// Shared session with a leaderboard.
    Group,
}

/// Session lifecycle status. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, timer not started.
    Setup,
    /// Cycles running.
    Active,
    /// Terminal.
    Completed,
}

impl SessionStatus {
    /// Whether moving from `self` to `next` respects setup → active → completed.
    ///
    /// Staying in the same status is allowed (idempotent re-application).
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        next >= self
    }

    /// Whether this is the terminal status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Completed
    }
}

/// A focus session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session ID.
    pub id: SessionId,
    /// Solo or group.
    pub mode: SessionMode,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Focus interval length in minutes.
    pub focus_duration: u32,
    /// Break interval length in minutes.
    pub break_duration: u32,
    /// Current cycle number. Never decreases.
    #[serde(default)]
    pub current_cycle: u32,
}

/// A shared task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task ID, unique within the session.
    pub id: TaskId,
    /// Display title.
    pub title: String,
    /// Completion flag.
    #[serde(default)]
    pub completed: bool,
    /// Owning participant.
    pub owner_id: UserId,
    /// Set while an optimistic local change to this task is unconfirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<MutationId>,
}

impl Task {
    /// Create a confirmed task.
    pub fn new(
        id: impl Into<TaskId>,
        title: impl Into<String>,
        owner_id: impl Into<UserId>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            completed: false,
            owner_id: owner_id.into(),
            pending: None,
        }
    }

    /// Whether an optimistic change is still outstanding.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// A session participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// User ID, unique within the session.
    pub user_id: UserId,
    /// Display name.
    pub user_name: String,
    /// Avatar image URL.
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Completed task count.
    #[serde(default)]
    pub tasks_completed: u32,
    /// Accumulated focus time in minutes.
    #[serde(default)]
    pub focus_time: u32,
    /// Score supplied by the server; overrides the local formula when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
}

impl Participant {
    /// Create a participant with zeroed metrics.
    pub fn new(user_id: impl Into<UserId>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            avatar_url: None,
            tasks_completed: 0,
            focus_time: 0,
            score: None,
        }
    }

    /// Effective score: the server's value if present, else the local formula.
    #[must_use]
    pub fn effective_score(&self) -> i64 {
        self.score
            .unwrap_or_else(|| local_score(self.tasks_completed, self.focus_time))
    }
}

/// `tasksCompleted × 100 + focusTime`.
#[must_use]
pub fn local_score(tasks_completed: u32, focus_time: u32) -> i64 {
    i64::from(tasks_completed) * POINTS_PER_TASK + i64::from(focus_time)
}

/// A derived leaderboard row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// 1-based position in the ranking.
    pub rank: u32,
    /// Participant.
    pub user_id: UserId,
    /// Display name, for rendering.
    pub user_name: String,
    /// Avatar URL, for rendering.
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Effective score.
    pub score: i64,
    /// Completed task count.
    pub tasks_completed: u32,
    /// Focus minutes.
    pub focus_time: u32,
}

/// End-of-session summary, as delivered in `session_completed.finalReport`
/// or returned by the complete-session endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionReport {
    /// Tasks completed across the session.
    pub tasks_completed: u32,
    /// Tasks planned.
    pub tasks_total: u32,
    /// Focus minutes.
    pub focus_time: u32,
    /// Break minutes.
    pub break_time: u32,
    /// Cycles completed.
    pub cycles_completed: u32,
    /// Completion timestamp.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Baseline state fetched over REST before incremental events apply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Session record.
    pub session: Session,
    /// Tasks in insertion order.
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Participants in join order.
    #[serde(default)]
    pub participants: Vec<Participant>,
    /// Sequence number of the last event folded into this snapshot.
    #[serde(default)]
    pub last_seq: u64,
}
