//! Pure read functions over [`SessionState`].
//!
//! These are the only way the UI layer looks at session data. None of them
//! allocate unless they return an owned summary.

use focus_core::ids::{TaskId, UserId};
use focus_core::model::{LeaderboardEntry, Participant, Session, SessionMode, SessionReport, Task};
use serde::Serialize;

use crate::store::SessionState;

/// Completed vs. total task counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounts {
    /// Tasks marked completed.
    pub completed: u32,
    /// All tasks.
    pub total: u32,
}

/// Summary numbers shown on the stats panel and the report page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Completed tasks.
    pub tasks_completed: u32,
    /// All tasks.
    pub tasks_total: u32,
    /// `round(completed / total × 100)`, 0 when there are no tasks.
    pub completion_rate: u32,
    /// Focus minutes: focus duration × cycles.
    pub focus_time: u32,
    /// Break minutes: break duration × cycles.
    pub break_time: u32,
    /// Cycles reached.
    pub cycles_completed: u32,
}

/// One participant's task progress.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantProgress {
    /// Participant.
    pub user_id: UserId,
    /// Display name.
    pub user_name: String,
    /// Avatar URL.
    pub avatar_url: Option<String>,
    /// Owned tasks marked completed.
    pub tasks_completed: u32,
    /// Owned tasks.
    pub tasks_total: u32,
    /// `round(completed / total × 100)`, 0 with no owned tasks.
    pub progress_percent: u32,
}

/// The session record.
pub fn select_session(state: &SessionState) -> Option<&Session> {
    state.session.as_ref()
}

/// Tasks in insertion order.
pub fn select_tasks(state: &SessionState) -> &[Task] {
    &state.tasks
}

/// One task by ID.
pub fn select_task<'a>(state: &'a SessionState, task_id: &TaskId) -> Option<&'a Task> {
    state.tasks.iter().find(|t| &t.id == task_id)
}

/// Completed/total task counts.
pub fn select_task_counts(state: &SessionState) -> TaskCounts {
    count(state.tasks.iter())
}

/// Participants in join order.
pub fn select_participants(state: &SessionState) -> &[Participant] {
    &state.participants
}

/// Ranked leaderboard.
pub fn select_leaderboard(state: &SessionState) -> &[LeaderboardEntry] {
    &state.leaderboard
}

/// Current cycle, 0 before a baseline loads.
pub fn select_current_cycle(state: &SessionState) -> u32 {
    state.session.as_ref().map_or(0, |s| s.current_cycle)
}

/// Whether this is a group session.
pub fn select_is_group_mode(state: &SessionState) -> bool {
    state
        .session
        .as_ref()
        .is_some_and(|s| s.mode == SessionMode::Group)
}

/// Whether the session reached its terminal status.
pub fn select_is_completed(state: &SessionState) -> bool {
    state.session.as_ref().is_some_and(|s| s.status.is_terminal())
}

/// Optimistic mutations awaiting confirmation.
pub fn select_pending_count(state: &SessionState) -> usize {
    state.pending_mutations
}

/// Stats derived from tasks and cycle progress.
pub fn select_session_stats(state: &SessionState) -> SessionStats {
    let counts = select_task_counts(state);
    let (focus, brk, cycles) = state.session.as_ref().map_or((0, 0, 0), |s| {
        (s.focus_duration, s.break_duration, s.current_cycle)
    });
    SessionStats {
        tasks_completed: counts.completed,
        tasks_total: counts.total,
        completion_rate: percent(counts.completed, counts.total),
        focus_time: focus.saturating_mul(cycles),
        break_time: brk.saturating_mul(cycles),
        cycles_completed: cycles,
    }
}

/// Per-participant progress over the tasks each one owns.
pub fn select_participant_progress(state: &SessionState) -> Vec<ParticipantProgress> {
    state
        .participants
        .iter()
        .map(|p| {
            let owned = count(state.tasks.iter().filter(|t| t.owner_id == p.user_id));
            ParticipantProgress {
                user_id: p.user_id.clone(),
                user_name: p.user_name.clone(),
                avatar_url: p.avatar_url.clone(),
                tasks_completed: owned.completed,
                tasks_total: owned.total,
                progress_percent: percent(owned.completed, owned.total),
            }
        })
        .collect()
}

/// End-of-session report.
///
/// The server's `finalReport` when one arrived; otherwise one derived from
/// local stats. `None` until the session is completed.
pub fn select_final_report(state: &SessionState) -> Option<SessionReport> {
    if !select_is_completed(state) {
        return None;
    }
    let mut report = state.final_report.clone().unwrap_or_else(|| {
        let stats = select_session_stats(state);
        SessionReport {
            tasks_completed: stats.tasks_completed,
            tasks_total: stats.tasks_total,
            focus_time: stats.focus_time,
            break_time: stats.break_time,
            cycles_completed: stats.cycles_completed,
            completed_at: None,
        }
    });
    if report.completed_at.is_none() {
        report.completed_at = state.completed_at;
    }
    Some(report)
}

fn count<'a>(tasks: impl Iterator<Item = &'a Task>) -> TaskCounts {
    tasks.fold(TaskCounts::default(), |mut acc, t| {
        acc.total += 1;
        if t.completed {
            acc.completed += 1;
        }
        acc
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn percent(part: u32, whole: u32) -> u32 {
    if whole == 0 {
        return 0;
    }
    (f64::from(part) / f64::from(whole) * 100.0).round() as u32
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
