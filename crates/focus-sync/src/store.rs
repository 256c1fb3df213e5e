//! Canonical in-memory session state.
//!
//! Readers get an `Arc<SessionState>` snapshot that never changes under
//! them. The reconciler is the only writer: it swaps in a new snapshot via
//! the crate-private [`SessionStateStore::replace`] while holding its own
//! lock, then calls [`SessionStateStore::notify`] after releasing it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use focus_core::model::{LeaderboardEntry, Participant, Session, SessionReport, Task};
use parking_lot::RwLock;

use crate::bus::{EventBus, Subscription};

const CHANGED: &str = "changed";

/// Everything the UI can read about the active session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Session record, once a baseline has loaded.
    pub session: Option<Session>,
    /// Tasks in insertion order, including optimistic placeholders.
    pub tasks: Vec<Task>,
    /// Participants in join order.
    pub participants: Vec<Participant>,
    /// Ranking derived from `participants`.
    pub leaderboard: Vec<LeaderboardEntry>,
    /// Whether a live `leaderboard_updated` has been applied.
    pub live_leaderboard: bool,
    /// Optimistic mutations not yet confirmed or rolled back.
    pub pending_mutations: usize,
    /// When the server completed the session.
    pub completed_at: Option<DateTime<Utc>>,
    /// Final statistics from `session_completed`.
    pub final_report: Option<SessionReport>,
}

struct StoreInner {
    state: RwLock<Arc<SessionState>>,
    version: AtomicU64,
    listeners: EventBus<Arc<SessionState>>,
}

/// Shared handle to the session state.
#[derive(Clone)]
pub struct SessionStateStore {
    inner: Arc<StoreInner>,
}

impl Default for SessionStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(Arc::new(SessionState::default())),
                version: AtomicU64::new(0),
                listeners: EventBus::new(),
            }),
        }
    }

    /// Current immutable snapshot.
    pub fn snapshot(&self) -> Arc<SessionState> {
        Arc::clone(&*self.inner.state.read())
    }

    /// Run a selector against the current snapshot.
    pub fn select<R>(&self, selector: impl FnOnce(&SessionState) -> R) -> R {
        selector(&self.snapshot())
    }

    /// Number of committed changes so far.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// Call `listener` with the new snapshot after every committed change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<SessionState>) + Send + Sync + 'static,
    {
        self.inner.listeners.on(CHANGED, listener)
    }

    /// Listeners currently registered.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.handler_count(CHANGED)
    }

    /// Swap in `next` without notifying. Returns the new version.
    pub(crate) fn replace(&self, next: Arc<SessionState>) -> u64 {
        *self.inner.state.write() = next;
        self.inner.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Tell listeners about the current snapshot.
    pub(crate) fn notify(&self) {
        let snapshot = self.snapshot();
        let _ = self.inner.listeners.dispatch(CHANGED, &snapshot);
    }

    /// Clear all session-scoped state and notify.
    pub(crate) fn reset(&self) {
        let _ = self.replace(Arc::new(SessionState::default()));
        self.notify();
    }
}

impl std::fmt::Debug for SessionStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStateStore")
            .field("version", &self.version())
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}
