//! Pure state transitions, one per server event.
//!
//! Each function takes the current state and returns the next one, or a
//! `Protocol` error when the event would break an invariant (duplicate IDs,
//! unknown targets, cycle going backwards). On error the caller keeps the
//! old state untouched.

use focus_core::errors::{Result, SyncError};
use focus_core::model::{Participant, SessionStatus, Task};
use focus_core::protocol::{
    CycleAdvanced, LeaderboardUpdated, ParticipantJoined, ParticipantLeft, ServerEvent,
    SessionCompleted, TaskAdded, TaskDeleted, TaskToggled,
};

use crate::leaderboard::{MetricsUpdate, compute_leaderboard, merge_metrics};
use crate::store::SessionState;

/// Apply one authoritative event to `state`.
pub fn apply_event(state: &SessionState, event: &ServerEvent) -> Result<SessionState> {
    let mut next = state.clone();
    match event {
        ServerEvent::TaskAdded(p) => task_added(&mut next, p)?,
        ServerEvent::TaskDeleted(p) => task_deleted(&mut next, p)?,
        ServerEvent::TaskToggled(p) => task_toggled(&mut next, p)?,
        ServerEvent::ParticipantJoined(p) => participant_joined(&mut next, p)?,
        ServerEvent::ParticipantLeft(p) => participant_left(&mut next, p)?,
        ServerEvent::CycleAdvanced(p) => cycle_advanced(&mut next, p)?,
        ServerEvent::LeaderboardUpdated(p) => leaderboard_updated(&mut next, p),
        ServerEvent::SessionCompleted(p) => session_completed(&mut next, p)?,
    }
    Ok(next)
}

/// Recompute the derived leaderboard after participant metrics change.
pub fn refresh_leaderboard(state: &mut SessionState) {
    state.leaderboard = compute_leaderboard(&state.participants);
}

fn rejected(message: String) -> SyncError {
    SyncError::Protocol { message }
}

fn task_index(state: &SessionState, task_id: &str) -> Result<usize> {
    state
        .tasks
        .iter()
        .position(|t| t.id.as_str() == task_id)
        .ok_or_else(|| rejected(format!("unknown task {task_id}")))
}

fn task_added(state: &mut SessionState, p: &TaskAdded) -> Result<()> {
    if state.tasks.iter().any(|t| t.id == p.task_id) {
        return Err(rejected(format!("duplicate task id {}", p.task_id)));
    }
    state
        .tasks
        .push(Task::new(p.task_id.clone(), p.title.clone(), p.owner_id.clone()));
    Ok(())
}

fn task_deleted(state: &mut SessionState, p: &TaskDeleted) -> Result<()> {
    let idx = task_index(state, &p.task_id)?;
    let _ = state.tasks.remove(idx);
    Ok(())
}

fn task_toggled(state: &mut SessionState, p: &TaskToggled) -> Result<()> {
    let idx = task_index(state, &p.task_id)?;
    let task = &mut state.tasks[idx];
    task.completed = p.completed;
    task.pending = None;
    Ok(())
}

fn participant_joined(state: &mut SessionState, p: &ParticipantJoined) -> Result<()> {
    if state.participants.iter().any(|x| x.user_id == p.user_id) {
        return Err(rejected(format!("participant {} already joined", p.user_id)));
    }
    let mut participant = Participant::new(p.user_id.clone(), p.user_name.clone());
    participant.avatar_url.clone_from(&p.avatar_url);
    state.participants.push(participant);
    refresh_leaderboard(state);
    Ok(())
}

fn participant_left(state: &mut SessionState, p: &ParticipantLeft) -> Result<()> {
    let idx = state
        .participants
        .iter()
        .position(|x| x.user_id == p.user_id)
        .ok_or_else(|| rejected(format!("unknown participant {}", p.user_id)))?;
    let _ = state.participants.remove(idx);
    refresh_leaderboard(state);
    Ok(())
}

fn cycle_advanced(state: &mut SessionState, p: &CycleAdvanced) -> Result<()> {
    let session = state
        .session
        .as_mut()
        .ok_or_else(|| rejected("cycle_advanced before session baseline".into()))?;
    if p.cycle < session.current_cycle {
        return Err(rejected(format!(
            "cycle went backwards: {} -> {}",
            session.current_cycle, p.cycle
        )));
    }
    session.current_cycle = p.cycle;
    if session.status == SessionStatus::Setup {
        session.status = SessionStatus::Active;
    }
    Ok(())
}

fn leaderboard_updated(state: &mut SessionState, p: &LeaderboardUpdated) {
    let updates = p.entries.iter().map(|e| MetricsUpdate {
        user_id: e.user_id.clone(),
        score: e.score,
        tasks_completed: e.tasks_completed,
        focus_time: e.focus_time,
        user_name: e.user_name.clone(),
        avatar_url: e.avatar_url.clone(),
    });
    let _ = merge_metrics(&mut state.participants, updates);
    state.live_leaderboard = true;
    refresh_leaderboard(state);
}

fn session_completed(state: &mut SessionState, p: &SessionCompleted) -> Result<()> {
    let session = state
        .session
        .as_mut()
        .ok_or_else(|| rejected("session_completed before session baseline".into()))?;
    if !session.status.can_advance_to(SessionStatus::Completed) {
        return Err(rejected(format!("cannot complete from {:?}", session.status)));
    }
    session.status = SessionStatus::Completed;
    state.completed_at = Some(p.completed_at);
    state.final_report.clone_from(&p.final_report);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;
    use focus_core::model::{Session, SessionMode, SessionReport};
    use focus_core::protocol::LeaderboardUpdate;

    use super::*;

    fn base() -> SessionState {
        SessionState {
            session: Some(Session {
                id: "s1".into(),
                mode: SessionMode::Group,
                status: SessionStatus::Setup,
                focus_duration: 25,
                break_duration: 5,
                current_cycle: 1,
            }),
            tasks: vec![Task::new("t1", "Write", "u1")],
            participants: vec![Participant::new("u1", "Ann")],
            ..SessionState::default()
        }
    }

    fn toggled(id: &str, completed: bool) -> ServerEvent {
        ServerEvent::TaskToggled(TaskToggled {
            task_id: id.into(),
            completed,
        })
    }

    #[test]
    fn task_lifecycle() {
        let s = base();
        let s = apply_event(
            &s,
            &ServerEvent::TaskAdded(TaskAdded {
                task_id: "t2".into(),
                title: "Read".into(),
                owner_id: "u1".into(),
            }),
        )
        .unwrap();
        assert_eq!(s.tasks.len(), 2);

        let s = apply_event(&s, &toggled("t2", true)).unwrap();
        assert!(s.tasks[1].completed);

        let deleted = ServerEvent::TaskDeleted(TaskDeleted { task_id: "t1".into() });
        let s = apply_event(&s, &deleted).unwrap();
        assert_eq!(s.tasks.len(), 1);
        assert_eq!(s.tasks[0].id.as_str(), "t2");
    }

    #[test]
    fn toggle_clears_pending_marker() {
        let mut s = base();
        s.tasks[0].pending = Some("m1".into());
        let s = apply_event(&s, &toggled("t1", false)).unwrap();
        assert!(!s.tasks[0].is_pending());
    }

    #[test]
    fn invariant_violations_are_rejected() {
        let s = base();
        let dup = ServerEvent::TaskAdded(TaskAdded {
            task_id: "t1".into(),
            title: "Again".into(),
            owner_id: "u1".into(),
        });
        assert_matches!(apply_event(&s, &dup), Err(SyncError::Protocol { .. }));
        assert_matches!(apply_event(&s, &toggled("nope", true)), Err(SyncError::Protocol { .. }));
        assert_matches!(
            apply_event(&s, &ServerEvent::CycleAdvanced(CycleAdvanced { cycle: 0 })),
            Err(SyncError::Protocol { .. })
        );
        assert_matches!(
            apply_event(
                &s,
                &ServerEvent::ParticipantJoined(ParticipantJoined {
                    user_id: "u1".into(),
                    user_name: "Ann".into(),
                    avatar_url: None,
                })
            ),
            Err(SyncError::Protocol { .. })
        );
        let ghost = ServerEvent::ParticipantLeft(ParticipantLeft { user_id: "ghost".into() });
        assert_matches!(apply_event(&s, &ghost), Err(SyncError::Protocol { .. }));
    }

    #[test]
    fn cycle_advance_activates_session() {
        let s =
            apply_event(&base(), &ServerEvent::CycleAdvanced(CycleAdvanced { cycle: 2 })).unwrap();
        let session = s.session.unwrap();
        assert_eq!(session.current_cycle, 2);
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[test]
    fn same_cycle_is_accepted_unchanged() {
        let s = base();
        let next =
            apply_event(&s, &ServerEvent::CycleAdvanced(CycleAdvanced { cycle: 1 })).unwrap();
        assert_eq!(next.session.unwrap().current_cycle, 1);
    }

    #[test]
    fn leaderboard_update_ranks_and_marks_live() {
        let mut s = base();
        s.participants.push(Participant::new("u2", "Bo"));
        let s = apply_event(
            &s,
            &ServerEvent::LeaderboardUpdated(LeaderboardUpdated {
                entries: vec![
                    LeaderboardUpdate {
                        user_id: "u2".into(),
                        score: None,
                        tasks_completed: 2,
                        focus_time: 10,
                        rank: None,
                        user_name: None,
                        avatar_url: None,
                    },
                    LeaderboardUpdate {
                        user_id: "ghost".into(),
                        score: Some(999),
                        tasks_completed: 9,
                        focus_time: 9,
                        rank: None,
                        user_name: None,
                        avatar_url: None,
                    },
                ],
            }),
        )
        .unwrap();
        assert!(s.live_leaderboard);
        assert_eq!(s.leaderboard[0].user_id.as_str(), "u2");
        assert_eq!(s.leaderboard[0].score, 210);
        assert_eq!(s.leaderboard.len(), 2);
    }

    #[test]
    fn completion_stores_report() {
        let at = Utc::now();
        let s = apply_event(
            &base(),
            &ServerEvent::SessionCompleted(SessionCompleted {
                completed_at: at,
                final_report: Some(SessionReport {
                    tasks_total: 4,
                    ..SessionReport::default()
                }),
            }),
        )
        .unwrap();
        assert_eq!(s.session.as_ref().unwrap().status, SessionStatus::Completed);
        assert_eq!(s.completed_at, Some(at));
        assert_eq!(s.final_report.unwrap().tasks_total, 4);
    }

    #[test]
    fn settlement_after_departure_ranks_only_current_participants() {
        let mut s = base();
        s.participants.push(Participant::new("u2", "Bo"));
        let left = ServerEvent::ParticipantLeft(ParticipantLeft { user_id: "u2".into() });
        let s = apply_event(&s, &left).unwrap();
        let s = apply_event(
            &s,
            &ServerEvent::SessionCompleted(SessionCompleted {
                completed_at: Utc::now(),
                final_report: None,
            }),
        )
        .unwrap();

        let row = |id: &str, tasks: u32| LeaderboardUpdate {
            user_id: id.into(),
            score: None,
            tasks_completed: tasks,
            focus_time: 0,
            rank: None,
            user_name: Some(id.to_uppercase()),
            avatar_url: None,
        };
        let s = apply_event(
            &s,
            &ServerEvent::LeaderboardUpdated(LeaderboardUpdated {
                entries: vec![row("u2", 7), row("u1", 1)],
            }),
        )
        .unwrap();

        assert_eq!(s.participants.len(), 1);
        assert_eq!(s.leaderboard.len(), 1);
        assert_eq!(s.leaderboard[0].user_id.as_str(), "u1");
        assert_eq!(s.leaderboard[0].score, 100);
    }

    #[test]
    fn rejection_leaves_input_untouched() {
        let s = base();
        let before = s.clone();
        let _ = apply_event(&s, &toggled("nope", true));
        assert_eq!(s, before);
    }
}
