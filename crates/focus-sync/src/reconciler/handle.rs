//! Single-writer wrapper around [`Reconciler`].
//!
//! All reconciliation runs under one lock. The store is updated while the
//! lock is held; listeners, logs, and bus events happen after it is
//! released so a listener may call back into the handle.

use std::sync::{Arc, Weak};

use focus_core::errors::{Result, SyncError};
use focus_core::ids::{MutationId, UserId};
use focus_core::model::{LeaderboardEntry, SessionSnapshot};
use focus_core::protocol::{SERVER_EVENT_NAMES, SequencedEvent};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::{Diagnostics, MutationKind, Outcome, Reconciler, ReconcilerConfig};
use crate::bus::{BusEvent, EventBus, Subscription, SyncNotice};
use crate::connection::FrameSink;
use crate::store::SessionStateStore;

struct Inner {
    reconciler: Mutex<Reconciler>,
    store: SessionStateStore,
    bus: EventBus<BusEvent>,
    sink: Arc<dyn FrameSink>,
}

/// Shared handle feeding events and mutations into one [`Reconciler`].
#[derive(Clone)]
pub struct ReconcilerHandle {
    inner: Arc<Inner>,
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

impl ReconcilerHandle {
    /// Wire a reconciler to `store`, reporting on `bus` and sending through
    /// `sink`.
    pub fn new(
        config: ReconcilerConfig,
        local_user: UserId,
        store: SessionStateStore,
        bus: EventBus<BusEvent>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                reconciler: Mutex::new(Reconciler::new(config, local_user)),
                store,
                bus,
                sink,
            }),
        }
    }

    /// Store this handle writes to.
    pub fn store(&self) -> &SessionStateStore {
        &self.inner.store
    }

    /// Subscribe to every server event name on the bus.
    ///
    /// The subscriptions hold only a weak reference to the handle.
    pub fn attach(&self) -> Vec<Subscription> {
        SERVER_EVENT_NAMES
            .iter()
            .map(|name| {
                let weak: Weak<Inner> = Arc::downgrade(&self.inner);
                self.inner.bus.on(*name, move |event| {
                    let Some(inner) = weak.upgrade() else { return };
                    if let BusEvent::Server(ev) = event {
                        ReconcilerHandle { inner }.receive(ev.clone());
                    }
                })
            })
            .collect()
    }

    /// Run `f` against the reconciler, committing any state change.
    fn step<R>(&self, f: impl FnOnce(&mut Reconciler) -> R) -> R {
        let (result, changed) = {
            let mut reconciler = self.inner.reconciler.lock();
            let before = Arc::clone(reconciler.state());
            let result = f(&mut reconciler);
            let after = reconciler.state();
            let changed = !Arc::ptr_eq(&before, after);
            if changed {
                let version = self.inner.store.replace(Arc::clone(after));
                trace!(version, "state committed");
            }
            (result, changed)
        };
        if changed {
            self.inner.store.notify();
        }
        result
    }

    /// Feed one server event.
    pub fn receive(&self, event: SequencedEvent) {
        let outcomes = self.step(|r| r.receive(event, now()));
        self.report(&outcomes);
    }

    /// Install a REST baseline.
    pub fn load_snapshot(&self, snapshot: SessionSnapshot) {
        let session_id = snapshot.session.id.clone();
        let last_seq = snapshot.last_seq;
        let outcomes = self.step(|r| r.load_snapshot(snapshot, now()));
        info!(session_id = %session_id, last_seq, "snapshot loaded");
        self.report(&outcomes);
    }

    /// Apply REST leaderboard rows if no live update has arrived yet.
    pub fn apply_leaderboard_fallback(&self, entries: Vec<LeaderboardEntry>) -> bool {
        let applied = self.step(|r| r.apply_leaderboard_fallback(entries));
        debug!(applied, "leaderboard fallback");
        applied
    }

    /// Run time-driven work (gap skips, mutation timeouts).
    pub fn tick(&self) {
        let outcomes = self.step(|r| r.tick(now()));
        self.report(&outcomes);
    }

    /// Apply `kind` optimistically and send it.
    ///
    /// If the frame cannot be queued the change is reverted at once and
    /// `OptimisticRollback` is returned.
    pub fn dispatch_mutation(&self, kind: MutationKind) -> Result<MutationId> {
        let outgoing = self.step(|r| r.begin_mutation(kind, now()))?;
        debug!(mutation_id = %outgoing.id, event = outgoing.event, "mutation applied locally");

        if let Err(e) = self.inner.sink.send(outgoing.event, outgoing.payload) {
            let reason = format!("send failed: {e}");
            let outcomes = self.step(|r| r.fail_mutation(&outgoing.id, &reason));
            self.report(&outcomes);
            return Err(SyncError::OptimisticRollback {
                mutation_id: outgoing.id,
                reason,
            });
        }
        Ok(outgoing.id)
    }

    /// Forget all session state and clear the store.
    pub fn reset(&self) {
        self.inner.reconciler.lock().reset();
        self.inner.store.reset();
        debug!("reconciler reset");
    }

    /// Highest sequence number applied.
    pub fn last_applied_seq(&self) -> u64 {
        self.inner.reconciler.lock().last_applied_seq()
    }

    /// Drop and rejection counters.
    pub fn diagnostics(&self) -> Diagnostics {
        self.inner.reconciler.lock().diagnostics()
    }

    fn report(&self, outcomes: &[Outcome]) {
        for outcome in outcomes {
            match outcome {
                Outcome::Applied { seq, event } => trace!(seq, event, "applied"),
                Outcome::Buffered { seq } => trace!(seq, "buffered out-of-order event"),
                Outcome::Confirmed { mutation_id } => {
                    debug!(mutation_id = %mutation_id, "mutation confirmed");
                }
                Outcome::Stale(e) => debug!(error = %e, "dropping stale event"),
                Outcome::Ignored { seq, event } => {
                    debug!(seq, event, "session completed, ignoring event");
                }
                Outcome::ForeignSession { seq, session_id } => {
                    debug!(seq, session_id = %session_id, "dropping event for another session");
                }
                Outcome::Evicted { seq } => warn!(seq, "reorder buffer full, evicted event"),
                Outcome::GapSkipped { from, to } => warn!(from, to, "skipping sequence gap"),
                Outcome::Rejected { seq, error } => {
                    warn!(seq, error = %error, "event rejected");
                    let _ = self
                        .inner
                        .bus
                        .publish(&BusEvent::ProtocolError(format!("seq {seq}: {error}")));
                }
                Outcome::RolledBack { mutation_id, reason } => {
                    warn!(mutation_id = %mutation_id, reason = %reason, "mutation rolled back");
                    let notice = SyncNotice::MutationRolledBack {
                        mutation_id: mutation_id.clone(),
                        reason: reason.clone(),
                    };
                    let _ = self.inner.bus.publish(&BusEvent::Notice(notice));
                }
            }
        }
    }
}

impl std::fmt::Debug for ReconcilerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcilerHandle")
            .field("last_applied_seq", &self.last_applied_seq())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
