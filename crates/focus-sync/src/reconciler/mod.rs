//! Event ordering, optimistic mutations, and state transitions.
//!
//! [`Reconciler`] is a pure state machine: it takes server events, local
//! mutation intents, and the current time, and returns the next
//! [`SessionState`] plus a list of [`Outcome`]s describing what happened.
//! It performs no I/O and never reads a clock; [`ReconcilerHandle`] wraps it
//! behind a single lock, commits to the store, and turns outcomes into logs
//! and bus events.
//!
//! # Ordering
//!
//! - `seq == last + 1` applies immediately, then drains any buffered
//!   successors.
//! - `seq > last + 1` is buffered until the gap fills or the reorder window
//!   expires, at which point the gap is skipped.
//! - `seq <= last` (or a seq already buffered) is dropped as a
//!   [`SyncError::SequenceConflict`].
//!
//! Every accepted event consumes its sequence slot, even when the
//! transition itself is rejected or ignored.

mod handle;
pub mod pending;
pub mod transition;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use focus_core::errors::{Result, SyncError};
use focus_core::ids::{MutationId, SessionId, TaskId, UserId};
use focus_core::model::{LeaderboardEntry, SessionSnapshot, Task};
use focus_core::protocol::{SequencedEvent, ServerEvent, TaskDeleted, TaskToggled};
use focus_settings::ReconcilerSettings;
use serde_json::Value;

use crate::leaderboard::{MetricsUpdate, merge_metrics};
use crate::store::SessionState;

pub use handle::ReconcilerHandle;
pub use pending::{MutationKind, MutationStatus, PendingMutation};
use transition::{apply_event, refresh_leaderboard};

/// Reconciler tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Unconfirmed mutations older than this are rolled back.
    pub mutation_timeout: Duration,
    /// A sequence gap open longer than this is skipped.
    pub reorder_window: Duration,
    /// Maximum buffered out-of-order events.
    pub reorder_capacity: usize,
}

impl ReconcilerConfig {
    /// Take reconciler values from loaded settings.
    pub fn from_settings(settings: &ReconcilerSettings) -> Self {
        Self {
            mutation_timeout: settings.mutation_timeout(),
            reorder_window: settings.reorder_window(),
            reorder_capacity: settings.reorder_capacity.max(1),
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from_settings(&ReconcilerSettings::default())
    }
}

/// What one reconciliation step did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Event applied; state changed.
    Applied {
        /// Sequence number.
        seq: u64,
        /// Event name.
        event: &'static str,
    },
    /// Event consumed its slot but the session is completed.
    Ignored {
        /// Sequence number.
        seq: u64,
        /// Event name.
        event: &'static str,
    },
    /// Event consumed its slot but broke an invariant; state unchanged.
    Rejected {
        /// Sequence number.
        seq: u64,
        /// Why the transition was refused.
        error: SyncError,
    },
    /// Duplicate or out-of-date event; dropped.
    Stale(SyncError),
    /// Held until earlier sequence numbers arrive.
    Buffered {
        /// Sequence number.
        seq: u64,
    },
    /// Oldest buffered event evicted before any baseline loaded.
    Evicted {
        /// Sequence number.
        seq: u64,
    },
    /// Event for another session; dropped.
    ForeignSession {
        /// Sequence number.
        seq: u64,
        /// Session the event was tagged with.
        session_id: SessionId,
    },
    /// A sequence gap was given up on.
    GapSkipped {
        /// First missing sequence number.
        from: u64,
        /// Last missing sequence number.
        to: u64,
    },
    /// A pending mutation was superseded by an authoritative event.
    Confirmed {
        /// The mutation.
        mutation_id: MutationId,
    },
    /// A pending mutation was reverted.
    RolledBack {
        /// The mutation.
        mutation_id: MutationId,
        /// Why.
        reason: String,
    },
}

/// Counters for dropped and rejected input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Duplicate or stale events dropped.
    pub stale_dropped: u64,
    /// Events rejected by a transition.
    pub rejected: u64,
    /// Events ignored after completion.
    pub ignored: u64,
    /// Events for another session.
    pub foreign_dropped: u64,
    /// Gaps given up on.
    pub gaps_skipped: u64,
    /// Mutations rolled back.
    pub rolled_back: u64,
}

/// A mutation applied locally and ready to send.
#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingMutation {
    /// Mutation ID.
    pub id: MutationId,
    /// Outbound event name.
    pub event: &'static str,
    /// Outbound payload.
    pub payload: Value,
}

/// Pure reconciliation state machine.
#[derive(Debug)]
pub struct Reconciler {
    config: ReconcilerConfig,
    local_user: UserId,
    state: Arc<SessionState>,
    last_applied: u64,
    baseline: bool,
    active_session: Option<SessionId>,
    buffer: BTreeMap<u64, SequencedEvent>,
    gap_since: Option<Instant>,
    pending: Vec<PendingMutation>,
    diagnostics: Diagnostics,
}

impl Reconciler {
    /// Empty reconciler acting for `local_user`.
    pub fn new(config: ReconcilerConfig, local_user: UserId) -> Self {
        Self {
            config,
            local_user,
            state: Arc::new(SessionState::default()),
            last_applied: 0,
            baseline: false,
            active_session: None,
            buffer: BTreeMap::new(),
            gap_since: None,
            pending: Vec::new(),
            diagnostics: Diagnostics::default(),
        }
    }

    /// Current state. The `Arc` changes identity on every commit.
    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Highest sequence number applied.
    pub fn last_applied_seq(&self) -> u64 {
        self.last_applied
    }

    /// Whether a snapshot baseline has been loaded.
    pub fn has_baseline(&self) -> bool {
        self.baseline
    }

    /// Events waiting for a gap to fill.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Outstanding optimistic mutations, oldest first.
    pub fn pending(&self) -> &[PendingMutation] {
        &self.pending
    }

    /// Drop and rejection counters.
    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    /// Forget everything session-scoped.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone(), self.local_user.clone());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Baseline
    // ─────────────────────────────────────────────────────────────────────

    /// Replace state with a REST snapshot and resume from its sequence.
    ///
    /// Buffered events at or below `last_seq`, or tagged with another
    /// session, are discarded. Outstanding mutations are dropped without
    /// rollback since the snapshot already reflects the server's view.
    pub fn load_snapshot(&mut self, snapshot: SessionSnapshot, now: Instant) -> Vec<Outcome> {
        let session_id = snapshot.session.id.clone();
        let mut state = SessionState {
            session: Some(snapshot.session),
            tasks: snapshot.tasks,
            participants: snapshot.participants,
            ..SessionState::default()
        };
        refresh_leaderboard(&mut state);

        self.pending.clear();
        self.state = Arc::new(state);
        self.last_applied = snapshot.last_seq;
        self.baseline = true;

        let last = self.last_applied;
        let before = self.buffer.len();
        self.buffer.retain(|seq, ev| {
            *seq > last && ev.session_id.as_ref().is_none_or(|id| *id == session_id)
        });
        self.diagnostics.stale_dropped += (before - self.buffer.len()) as u64;
        self.active_session = Some(session_id);
        self.gap_since = (!self.buffer.is_empty()).then_some(now);

        let mut out = Vec::new();
        self.drain(now, &mut out);
        out
    }

    /// Fold REST leaderboard rows into participant metrics.
    ///
    /// Only used until the first live `leaderboard_updated`; afterwards the
    /// live data is fresher and this returns `false`.
    pub fn apply_leaderboard_fallback(&mut self, entries: Vec<LeaderboardEntry>) -> bool {
        if self.state.live_leaderboard {
            return false;
        }
        let mut next = (*self.state).clone();
        let updates = entries.into_iter().map(|e| MetricsUpdate {
            user_id: e.user_id,
            score: Some(e.score),
            tasks_completed: e.tasks_completed,
            focus_time: e.focus_time,
            user_name: Some(e.user_name),
            avatar_url: e.avatar_url,
        });
        if merge_metrics(&mut next.participants, updates) == 0 {
            return false;
        }
        refresh_leaderboard(&mut next);
        self.state = Arc::new(next);
        true
    }

    // ─────────────────────────────────────────────────────────────────────
    // Server events
    // ─────────────────────────────────────────────────────────────────────

    /// Feed one server event.
    pub fn receive(&mut self, event: SequencedEvent, now: Instant) -> Vec<Outcome> {
        let seq = event.seq;
        if let (Some(tag), Some(active)) = (&event.session_id, &self.active_session) {
            if tag != active {
                self.diagnostics.foreign_dropped += 1;
                return vec![Outcome::ForeignSession {
                    seq,
                    session_id: tag.clone(),
                }];
            }
        }

        if seq <= self.last_applied || self.buffer.contains_key(&seq) {
            self.diagnostics.stale_dropped += 1;
            return vec![Outcome::Stale(SyncError::SequenceConflict {
                seq,
                last_applied: self.last_applied,
            })];
        }

        let mut out = Vec::new();
        if !self.baseline {
            let _ = self.buffer.insert(seq, event);
            out.push(Outcome::Buffered { seq });
            if self.buffer.len() > self.config.reorder_capacity {
                if let Some((evicted, _)) = self.buffer.pop_first() {
                    out.push(Outcome::Evicted { seq: evicted });
                }
            }
            return out;
        }

        if seq == self.last_applied + 1 {
            self.apply(event, &mut out);
            self.drain(now, &mut out);
        } else {
            let _ = self.buffer.insert(seq, event);
            let _ = self.gap_since.get_or_insert(now);
            out.push(Outcome::Buffered { seq });
            if self.buffer.len() > self.config.reorder_capacity {
                self.skip_gap(now, &mut out);
            }
        }
        out
    }

    /// Time-driven work: skip expired gaps and roll back expired mutations.
    pub fn tick(&mut self, now: Instant) -> Vec<Outcome> {
        let mut out = Vec::new();
        if self.baseline
            && self.gap_since.is_some_and(|since| {
                now.saturating_duration_since(since) >= self.config.reorder_window
            })
        {
            self.skip_gap(now, &mut out);
        }

        let timeout = self.config.mutation_timeout;
        loop {
            let Some(target) = self
                .pending
                .iter()
                .find(|m| m.is_expired(now, timeout))
                .map(|m| m.target.clone())
            else {
                break;
            };
            let reason = format!("not confirmed within {}ms", timeout.as_millis());
            self.roll_back_target(&target, &reason, &mut out);
        }
        out
    }

    fn drain(&mut self, now: Instant, out: &mut Vec<Outcome>) {
        let mut progressed = false;
        while let Some(entry) = self.buffer.first_entry() {
            if *entry.key() != self.last_applied + 1 {
                break;
            }
            let event = entry.remove();
            self.apply(event, out);
            progressed = true;
        }
        if self.buffer.is_empty() {
            self.gap_since = None;
        } else if progressed {
            self.gap_since = Some(now);
        }
    }

    fn skip_gap(&mut self, now: Instant, out: &mut Vec<Outcome>) {
        let Some(&first) = self.buffer.keys().next() else {
            self.gap_since = None;
            return;
        };
        out.push(Outcome::GapSkipped {
            from: self.last_applied + 1,
            to: first - 1,
        });
        self.diagnostics.gaps_skipped += 1;
        self.last_applied = first - 1;
        self.drain(now, out);
    }

    fn apply(&mut self, event: SequencedEvent, out: &mut Vec<Outcome>) {
        let seq = event.seq;
        let name = event.event.name();
        self.last_applied = seq;

        let completed = self
            .state
            .session
            .as_ref()
            .is_some_and(|s| s.status.is_terminal());
        if completed && !matches!(event.event, ServerEvent::LeaderboardUpdated(_)) {
            self.diagnostics.ignored += 1;
            out.push(Outcome::Ignored { seq, event: name });
            return;
        }

        // Server order wins: put the touched entity back to its confirmed
        // value before applying the authoritative change.
        let target = self.touched_target(&event.event);
        let mut base = (*self.state).clone();
        if let Some(target) = &target {
            if let Some(oldest) = self.pending.iter().find(|m| &m.target == target) {
                revert(&mut base, target, oldest.before.as_ref());
            }
        }

        match apply_event(&base, &event.event) {
            Ok(mut next) => {
                if let Some(target) = &target {
                    for mut m in self.take_pending_for(target) {
                        let _ = m.confirm();
                        out.push(Outcome::Confirmed { mutation_id: m.id });
                    }
                }
                next.pending_mutations = self.pending.len();
                self.state = Arc::new(next);
                out.push(Outcome::Applied { seq, event: name });
            }
            Err(error) => {
                self.diagnostics.rejected += 1;
                out.push(Outcome::Rejected { seq, error });
            }
        }
    }

    /// Task targeted by a pending mutation that `event` settles.
    fn touched_target(&self, event: &ServerEvent) -> Option<TaskId> {
        match event {
            ServerEvent::TaskAdded(p) if p.owner_id == self.local_user => self
                .pending
                .iter()
                .find(|m| {
                    matches!(&m.kind, MutationKind::AddTask { title } if title == p.title.trim())
                })
                .map(|m| m.target.clone()),
            ServerEvent::TaskDeleted(TaskDeleted { task_id })
            | ServerEvent::TaskToggled(TaskToggled { task_id, .. }) => self
                .pending
                .iter()
                .any(|m| &m.target == task_id)
                .then(|| task_id.clone()),
            _ => None,
        }
    }

    fn take_pending_for(&mut self, target: &TaskId) -> Vec<PendingMutation> {
        let (taken, kept) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|m| &m.target == target);
        self.pending = kept;
        taken
    }

    // ─────────────────────────────────────────────────────────────────────
    // Optimistic mutations
    // ─────────────────────────────────────────────────────────────────────

    /// Apply a local intent optimistically and return the frame to send.
    pub fn begin_mutation(&mut self, kind: MutationKind, now: Instant) -> Result<OutgoingMutation> {
        let session = self.state.session.as_ref().ok_or_else(|| invalid("no active session"))?;
        if session.status.is_terminal() {
            return Err(invalid("session is completed"));
        }

        let mut next = (*self.state).clone();
        let (mutation, completed) = match kind {
            MutationKind::AddTask { title } => {
                let title = title.trim().to_owned();
                if title.is_empty() {
                    return Err(invalid("task title is empty"));
                }
                let m = PendingMutation::new(
                    MutationKind::AddTask { title: title.clone() },
                    TaskId::new(),
                    None,
                    now,
                );
                let mut task = Task::new(m.target.clone(), title, self.local_user.clone());
                task.pending = Some(m.id.clone());
                next.tasks.push(task);
                (m, None)
            }
            kind => {
                let Some(task_id) = kind.existing_target().cloned() else {
                    return Err(invalid("mutation has no target"));
                };
                let idx = next
                    .tasks
                    .iter()
                    .position(|t| t.id == task_id)
                    .ok_or_else(|| invalid(&format!("unknown task {task_id}")))?;
                if self.pending.iter().any(|m| {
                    m.target == task_id && matches!(m.kind, MutationKind::AddTask { .. })
                }) {
                    return Err(invalid(&format!("task {task_id} is not confirmed yet")));
                }

                let before = next.tasks[idx].clone();
                let m = PendingMutation::new(kind, task_id, Some((idx, before)), now);
                let completed = match &m.kind {
                    MutationKind::DeleteTask { .. } => {
                        let _ = next.tasks.remove(idx);
                        None
                    }
                    MutationKind::ToggleTask { .. } | MutationKind::SetTaskCompleted { .. } => {
                        let value = match &m.kind {
                            MutationKind::SetTaskCompleted { completed, .. } => *completed,
                            _ => !next.tasks[idx].completed,
                        };
                        let task = &mut next.tasks[idx];
                        task.completed = value;
                        task.pending = Some(m.id.clone());
                        Some(value)
                    }
                    MutationKind::AddTask { .. } => None,
                };
                (m, completed)
            }
        };

        let outgoing = OutgoingMutation {
            id: mutation.id.clone(),
            event: mutation.kind.event_name(),
            payload: mutation.payload(completed),
        };
        self.pending.push(mutation);
        next.pending_mutations = self.pending.len();
        self.state = Arc::new(next);
        Ok(outgoing)
    }

    /// Roll back `mutation_id` (and anything queued on the same task)
    /// immediately, e.g. after a send failure.
    pub fn fail_mutation(&mut self, mutation_id: &MutationId, reason: &str) -> Vec<Outcome> {
        let mut out = Vec::new();
        if let Some(target) = self
            .pending
            .iter()
            .find(|m| &m.id == mutation_id)
            .map(|m| m.target.clone())
        {
            self.roll_back_target(&target, reason, &mut out);
        }
        out
    }

    fn roll_back_target(&mut self, target: &TaskId, reason: &str, out: &mut Vec<Outcome>) {
        let mutations = self.take_pending_for(target);
        let Some(oldest) = mutations.first() else {
            return;
        };
        let mut next = (*self.state).clone();
        revert(&mut next, target, oldest.before.as_ref());
        next.pending_mutations = self.pending.len();
        self.state = Arc::new(next);

        for mut m in mutations {
            let _ = m.roll_back();
            self.diagnostics.rolled_back += 1;
            out.push(Outcome::RolledBack {
                mutation_id: m.id,
                reason: reason.to_owned(),
            });
        }
    }
}

fn invalid(message: &str) -> SyncError {
    SyncError::InvalidMutation {
        message: message.to_owned(),
    }
}

/// Put `target` back to `before` (its position and value prior to the first
/// outstanding mutation); `None` means it did not exist.
fn revert(state: &mut SessionState, target: &TaskId, before: Option<&(usize, Task)>) {
    let current = state.tasks.iter().position(|t| &t.id == target);
    match (current, before) {
        (Some(idx), Some((_, task))) => state.tasks[idx] = task.clone(),
        (Some(idx), None) => {
            let _ = state.tasks.remove(idx);
        }
        (None, Some((pos, task))) => {
            let pos = (*pos).min(state.tasks.len());
            state.tasks.insert(pos, task.clone());
        }
        (None, None) => {}
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;
    use focus_core::model::{Participant, Session, SessionMode, SessionStatus};
    use focus_core::protocol::{
        CycleAdvanced, LeaderboardUpdate, LeaderboardUpdated, ParticipantJoined, SessionCompleted,
        TaskAdded,
    };
    use proptest::prelude::*;

    use super::*;

    const ME: &str = "me";

    fn snapshot(last_seq: u64) -> SessionSnapshot {
        SessionSnapshot {
            session: Session {
                id: "s1".into(),
                mode: SessionMode::Group,
                status: SessionStatus::Active,
                focus_duration: 25,
                break_duration: 5,
                current_cycle: 1,
            },
            tasks: vec![Task::new("t1", "Write", ME)],
            participants: vec![Participant::new(ME, "Me"), Participant::new("u2", "Bo")],
            last_seq,
        }
    }

    fn loaded(last_seq: u64) -> (Reconciler, Instant) {
        let now = Instant::now();
        let mut r = Reconciler::new(ReconcilerConfig::default(), ME.into());
        let _ = r.load_snapshot(snapshot(last_seq), now);
        (r, now)
    }

    fn toggled(seq: u64, id: &str, completed: bool) -> SequencedEvent {
        SequencedEvent::new(
            seq,
            ServerEvent::TaskToggled(TaskToggled {
                task_id: id.into(),
                completed,
            }),
        )
    }

    fn added(seq: u64, id: &str, title: &str, owner: &str) -> SequencedEvent {
        SequencedEvent::new(
            seq,
            ServerEvent::TaskAdded(TaskAdded {
                task_id: id.into(),
                title: title.into(),
                owner_id: owner.into(),
            }),
        )
    }

    fn task<'a>(r: &'a Reconciler, id: &str) -> Option<&'a Task> {
        r.state().tasks.iter().find(|t| t.id.as_str() == id)
    }

    #[test]
    fn snapshot_sets_baseline() {
        let (r, _) = loaded(4);
        assert!(r.has_baseline());
        assert_eq!(r.last_applied_seq(), 4);
        assert_eq!(r.state().leaderboard.len(), 2);
    }

    #[test]
    fn in_order_events_apply() {
        let (mut r, now) = loaded(0);
        let out = r.receive(toggled(1, "t1", true), now);
        assert_eq!(out, vec![Outcome::Applied { seq: 1, event: "task_toggled" }]);
        assert!(task(&r, "t1").unwrap().completed);
        assert_eq!(r.last_applied_seq(), 1);
    }

    #[test]
    fn optimistic_toggle_overwritten_by_later_server_event() {
        let (mut r, now) = loaded(4);
        let sent = r
            .begin_mutation(MutationKind::ToggleTask { task_id: "t1".into() }, now)
            .unwrap();
        assert_eq!(sent.event, "toggle_task");
        assert_eq!(sent.payload["completed"], true);
        assert!(task(&r, "t1").unwrap().completed);
        assert!(task(&r, "t1").unwrap().is_pending());
        assert_eq!(r.state().pending_mutations, 1);

        let out = r.receive(toggled(5, "t1", false), now);
        assert!(out.contains(&Outcome::Confirmed { mutation_id: sent.id }));
        let t1 = task(&r, "t1").unwrap();
        assert!(!t1.completed);
        assert!(!t1.is_pending());
        assert_eq!(r.state().pending_mutations, 0);
    }

    #[test]
    fn stale_event_after_newer_one_is_dropped() {
        let (mut r, now) = loaded(4);
        let _ = r.receive(toggled(5, "t1", true), now);
        let before = Arc::clone(r.state());

        let out = r.receive(toggled(3, "t1", false), now);
        assert_matches!(
            out.as_slice(),
            [Outcome::Stale(SyncError::SequenceConflict { seq: 3, last_applied: 5 })]
        );
        assert!(Arc::ptr_eq(&before, r.state()));
        assert_eq!(r.diagnostics().stale_dropped, 1);
    }

    #[test]
    fn duplicate_delivery_is_idempotent() {
        let (mut r, now) = loaded(0);
        let _ = r.receive(added(1, "t2", "Read", "u2"), now);
        let once = (**r.state()).clone();
        let out = r.receive(added(1, "t2", "Read", "u2"), now);
        assert_matches!(out.as_slice(), [Outcome::Stale(_)]);
        assert_eq!(**r.state(), once);
    }

    #[test]
    fn gap_buffers_until_filled() {
        let (mut r, now) = loaded(0);
        assert_eq!(r.receive(toggled(2, "t1", false), now), vec![Outcome::Buffered { seq: 2 }]);
        assert_eq!(r.buffered(), 1);
        assert!(!task(&r, "t1").unwrap().completed);

        let out = r.receive(toggled(1, "t1", true), now);
        assert_eq!(out.len(), 2);
        assert_eq!(r.last_applied_seq(), 2);
        assert!(!task(&r, "t1").unwrap().completed);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn buffered_duplicate_is_stale() {
        let (mut r, now) = loaded(0);
        let _ = r.receive(toggled(3, "t1", true), now);
        assert_matches!(r.receive(toggled(3, "t1", true), now).as_slice(), [Outcome::Stale(_)]);
    }

    #[test]
    fn unfilled_gap_is_skipped_after_window() {
        let (mut r, now) = loaded(0);
        let _ = r.receive(toggled(3, "t1", true), now);

        assert!(r.tick(now + Duration::from_millis(100)).is_empty());
        let out = r.tick(now + ReconcilerConfig::default().reorder_window);
        assert_eq!(out[0], Outcome::GapSkipped { from: 1, to: 2 });
        assert_eq!(r.last_applied_seq(), 3);
        assert!(task(&r, "t1").unwrap().completed);
        assert_eq!(r.diagnostics().gaps_skipped, 1);
    }

    #[test]
    fn buffer_overflow_forces_skip() {
        let now = Instant::now();
        let config = ReconcilerConfig {
            reorder_capacity: 2,
            ..ReconcilerConfig::default()
        };
        let mut r = Reconciler::new(config, ME.into());
        let _ = r.load_snapshot(snapshot(0), now);
        let _ = r.receive(toggled(3, "t1", true), now);
        let _ = r.receive(toggled(4, "t1", false), now);
        let out = r.receive(toggled(5, "t1", true), now);
        assert!(out.contains(&Outcome::GapSkipped { from: 1, to: 2 }));
        assert_eq!(r.last_applied_seq(), 5);
    }

    #[test]
    fn events_before_baseline_wait_for_snapshot() {
        let now = Instant::now();
        let mut r = Reconciler::new(ReconcilerConfig::default(), ME.into());
        let _ = r.receive(toggled(4, "t1", true), now);
        let _ = r.receive(toggled(6, "t1", true), now);
        let _ = r.receive(toggled(5, "t1", false), now);
        assert!(r.state().session.is_none());

        let out = r.load_snapshot(snapshot(4), now);
        assert_eq!(r.last_applied_seq(), 6);
        assert_eq!(out.iter().filter(|o| matches!(o, Outcome::Applied { .. })).count(), 2);
        assert!(task(&r, "t1").unwrap().completed);
        assert_eq!(r.diagnostics().stale_dropped, 1);
    }

    #[test]
    fn foreign_session_events_are_dropped() {
        let (mut r, now) = loaded(0);
        let mut ev = toggled(1, "t1", true);
        ev.session_id = Some("other".into());
        assert_matches!(r.receive(ev, now).as_slice(), [Outcome::ForeignSession { seq: 1, .. }]);
        assert_eq!(r.last_applied_seq(), 0);

        let mut ev = toggled(1, "t1", true);
        ev.session_id = Some("s1".into());
        assert_matches!(r.receive(ev, now).as_slice(), [Outcome::Applied { .. }]);
    }

    #[test]
    fn rejected_event_consumes_slot_without_change() {
        let (mut r, now) = loaded(0);
        let before = Arc::clone(r.state());
        let out = r.receive(added(1, "t1", "Dup", "u2"), now);
        assert_matches!(
            out.as_slice(),
            [Outcome::Rejected { seq: 1, error: SyncError::Protocol { .. } }]
        );
        assert!(Arc::ptr_eq(&before, r.state()));
        assert_eq!(r.last_applied_seq(), 1);
    }

    #[test]
    fn completed_session_only_takes_leaderboard_updates() {
        let (mut r, now) = loaded(0);
        let _ = r.receive(
            SequencedEvent::new(
                1,
                ServerEvent::SessionCompleted(SessionCompleted {
                    completed_at: Utc::now(),
                    final_report: None,
                }),
            ),
            now,
        );
        let out = r.receive(
            SequencedEvent::new(2, ServerEvent::CycleAdvanced(CycleAdvanced { cycle: 4 })),
            now,
        );
        assert_eq!(out, vec![Outcome::Ignored { seq: 2, event: "cycle_advanced" }]);
        assert_eq!(r.state().session.as_ref().unwrap().current_cycle, 1);

        let out = r.receive(
            SequencedEvent::new(
                3,
                ServerEvent::LeaderboardUpdated(LeaderboardUpdated {
                    entries: vec![LeaderboardUpdate {
                        user_id: "u2".into(),
                        score: Some(500),
                        tasks_completed: 5,
                        focus_time: 0,
                        rank: Some(1),
                        user_name: None,
                        avatar_url: None,
                    }],
                }),
            ),
            now,
        );
        assert_matches!(out.as_slice(), [Outcome::Applied { seq: 3, .. }]);
        assert_eq!(r.state().leaderboard[0].user_id.as_str(), "u2");

        assert_matches!(
            r.begin_mutation(MutationKind::AddTask { title: "late".into() }, now),
            Err(SyncError::InvalidMutation { .. })
        );
    }

    #[test]
    fn timed_out_mutation_restores_exact_snapshot() {
        let (mut r, now) = loaded(0);
        let _ = r.receive(added(1, "t2", "Read", "u2"), now);
        let before = (**r.state()).clone();

        let del = r
            .begin_mutation(MutationKind::DeleteTask { task_id: "t1".into() }, now)
            .unwrap();
        let add = r
            .begin_mutation(MutationKind::AddTask { title: "  Plan ".into() }, now)
            .unwrap();
        assert_eq!(add.payload["title"], "Plan");
        assert_eq!(r.state().tasks.len(), 2);
        assert_ne!(**r.state(), before);

        let timeout = ReconcilerConfig::default().mutation_timeout;
        assert!(r.tick(now + timeout - Duration::from_millis(1)).is_empty());
        let out = r.tick(now + timeout);
        assert_eq!(out.len(), 2);
        let rolled_back = |id: &MutationId| {
            out.iter().any(|o| {
                matches!(o, Outcome::RolledBack { mutation_id, .. } if mutation_id == id)
            })
        };
        assert!(rolled_back(&del.id));
        assert!(rolled_back(&add.id));
        assert_eq!(**r.state(), before);
        assert!(r.pending().is_empty());
    }

    #[test]
    fn add_task_confirmed_by_matching_server_event() {
        let (mut r, now) = loaded(0);
        let sent = r
            .begin_mutation(MutationKind::AddTask { title: "Read".into() }, now)
            .unwrap();
        let placeholder = r.pending()[0].target.clone();
        assert!(task(&r, &placeholder).unwrap().is_pending());

        let out = r.receive(added(1, "srv-9", "Read", ME), now);
        assert!(out.contains(&Outcome::Confirmed { mutation_id: sent.id }));
        assert!(task(&r, &placeholder).is_none());
        assert!(!task(&r, "srv-9").unwrap().is_pending());
        assert_eq!(r.state().tasks.len(), 2);
    }

    #[test]
    fn add_from_someone_else_does_not_confirm() {
        let (mut r, now) = loaded(0);
        let _ = r
            .begin_mutation(MutationKind::AddTask { title: "Read".into() }, now)
            .unwrap();
        let out = r.receive(added(1, "srv-9", "Read", "u2"), now);
        assert!(!out.iter().any(|o| matches!(o, Outcome::Confirmed { .. })));
        assert_eq!(r.pending().len(), 1);
        assert_eq!(r.state().tasks.len(), 3);
    }

    #[test]
    fn failed_send_rolls_back_immediately() {
        let (mut r, now) = loaded(0);
        let before = (**r.state()).clone();
        let sent = r
            .begin_mutation(
                MutationKind::SetTaskCompleted {
                    task_id: "t1".into(),
                    completed: true,
                },
                now,
            )
            .unwrap();
        let out = r.fail_mutation(&sent.id, "queue full");
        assert_matches!(
            out.as_slice(),
            [Outcome::RolledBack { reason, .. }] if reason == "queue full"
        );
        assert_eq!(**r.state(), before);
        assert_eq!(r.diagnostics().rolled_back, 1);
    }

    #[test]
    fn invalid_mutations_are_refused() {
        let now = Instant::now();
        let mut r = Reconciler::new(ReconcilerConfig::default(), ME.into());
        assert_matches!(
            r.begin_mutation(MutationKind::ToggleTask { task_id: "t1".into() }, now),
            Err(SyncError::InvalidMutation { .. })
        );

        let (mut r, now) = loaded(0);
        assert_matches!(
            r.begin_mutation(MutationKind::AddTask { title: "   ".into() }, now),
            Err(SyncError::InvalidMutation { .. })
        );
        assert_matches!(
            r.begin_mutation(MutationKind::DeleteTask { task_id: "nope".into() }, now),
            Err(SyncError::InvalidMutation { .. })
        );
        let _ = r
            .begin_mutation(MutationKind::AddTask { title: "New".into() }, now)
            .unwrap();
        let placeholder = r.pending()[0].target.clone();
        assert_matches!(
            r.begin_mutation(MutationKind::ToggleTask { task_id: placeholder }, now),
            Err(SyncError::InvalidMutation { .. })
        );
    }

    #[test]
    fn leaderboard_fallback_only_before_live_update() {
        let (mut r, now) = loaded(0);
        let rest = vec![LeaderboardEntry {
            rank: 1,
            user_id: "u2".into(),
            user_name: "Bo".into(),
            avatar_url: None,
            score: 250,
            tasks_completed: 2,
            focus_time: 50,
        }];
        assert!(r.apply_leaderboard_fallback(rest.clone()));
        assert_eq!(r.state().leaderboard[0].user_id.as_str(), "u2");

        let _ = r.receive(
            SequencedEvent::new(
                1,
                ServerEvent::LeaderboardUpdated(LeaderboardUpdated { entries: vec![] }),
            ),
            now,
        );
        assert!(!r.apply_leaderboard_fallback(rest));
    }

    #[test]
    fn reset_forgets_everything() {
        let (mut r, now) = loaded(3);
        let _ = r.receive(toggled(9, "t1", true), now);
        r.reset();
        assert!(!r.has_baseline());
        assert_eq!(r.last_applied_seq(), 0);
        assert_eq!(r.buffered(), 0);
        assert_eq!(**r.state(), SessionState::default());
    }

    // ── properties ──────────────────────────────────────────────────────

    fn event_set() -> Vec<SequencedEvent> {
        let events = vec![
            added(1, "t2", "Read", "u2").event,
            ServerEvent::ParticipantJoined(ParticipantJoined {
                user_id: "u3".into(),
                user_name: "Cy".into(),
                avatar_url: None,
            }),
            toggled(0, "t1", true).event,
            toggled(0, "t2", true).event,
            ServerEvent::CycleAdvanced(CycleAdvanced { cycle: 2 }),
            toggled(0, "t1", false).event,
            ServerEvent::LeaderboardUpdated(LeaderboardUpdated {
                entries: vec![LeaderboardUpdate {
                    user_id: "u3".into(),
                    score: None,
                    tasks_completed: 1,
                    focus_time: 25,
                    rank: None,
                    user_name: None,
                    avatar_url: None,
                }],
            }),
            ServerEvent::TaskDeleted(TaskDeleted { task_id: "t2".into() }),
            ServerEvent::CycleAdvanced(CycleAdvanced { cycle: 3 }),
        ];
        events
            .into_iter()
            .zip(1u64..)
            .map(|(event, seq)| SequencedEvent::new(seq, event))
            .collect()
    }

    fn deliver(events: impl IntoIterator<Item = SequencedEvent>) -> SessionState {
        let (mut r, now) = loaded(0);
        for ev in events {
            let _ = r.receive(ev, now);
        }
        (**r.state()).clone()
    }

    proptest! {
        #[test]
        fn any_delivery_order_matches_sequence_order(
            shuffled in Just(event_set()).prop_shuffle()
        ) {
            prop_assert_eq!(deliver(shuffled), deliver(event_set()));
        }

        #[test]
        fn redelivery_changes_nothing(
            delivery in proptest::collection::vec(0..event_set().len(), 0..12)
                .prop_flat_map(|dups| {
                    let base = event_set();
                    let mut all = base.clone();
                    all.extend(dups.into_iter().map(|i| base[i].clone()));
                    Just(all).prop_shuffle()
                })
        ) {
            prop_assert_eq!(deliver(delivery), deliver(event_set()));
        }
    }
}
