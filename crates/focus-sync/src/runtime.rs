//! Process-wide sync context.
//!
//! [`SyncRuntime`] owns the one connection, bus, store, and reconciler for
//! the process. UI-side code never touches those directly; it calls
//! [`SyncRuntime::acquire`] and works through the returned
//! [`SyncConsumer`]. The first acquisition opens the connection. Dropping a
//! consumer removes only that consumer's listeners; the connection stays up
//! until [`SyncRuntime::shutdown`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use focus_core::errors::Result;
use focus_core::ids::{MutationId, SessionId, UserId};
use focus_core::protocol::SYNC_NOTICE;
use focus_settings::FocusSettings;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::SessionApi;
use crate::bus::{BusEvent, EventBus, Subscription, SyncNotice};
use crate::connection::{ConnectionConfig, ConnectionManager, ConnectionState};
use crate::endpoint::derive_ws_url;
use crate::reconciler::{MutationKind, ReconcilerConfig, ReconcilerHandle};
use crate::store::{SessionState, SessionStateStore};

/// Buffered user-visible notices per receiver.
const NOTICE_CAPACITY: usize = 64;

struct RuntimeInner {
    ws_url: String,
    bus: EventBus<BusEvent>,
    connection: ConnectionManager,
    store: SessionStateStore,
    reconciler: ReconcilerHandle,
    notices: broadcast::Sender<SyncNotice>,
    consumers: AtomicUsize,
    wiring: Mutex<Vec<Subscription>>,
    sweeper_stop: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Shared sync context. Cheap to clone.
#[derive(Clone)]
pub struct SyncRuntime {
    inner: Arc<RuntimeInner>,
}

impl SyncRuntime {
    /// Wire bus → reconciler → store and start the timeout sweeper.
    ///
    /// Does not connect; the first [`acquire`](Self::acquire) does. Must be
    /// called inside a tokio runtime.
    pub fn new(settings: &FocusSettings, local_user: UserId) -> Result<Self> {
        let ws_url = derive_ws_url(&settings.api.base_url, &settings.api.ws_path)?;
        let bus = EventBus::new();
        let connection =
            ConnectionManager::new(ConnectionConfig::from_settings(settings), bus.clone());
        let store = SessionStateStore::new();
        let reconciler = ReconcilerHandle::new(
            ReconcilerConfig::from_settings(&settings.reconciler),
            local_user,
            store.clone(),
            bus.clone(),
            Arc::new(connection.clone()),
        );

        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let mut wiring = reconciler.attach();
        let tx = notices.clone();
        wiring.push(bus.on(SYNC_NOTICE, move |event| {
            if let BusEvent::Notice(notice) = event {
                let _ = tx.send(notice.clone());
            }
        }));

        let sweeper_stop = CancellationToken::new();
        let sweeper = tokio::spawn(sweep(
            reconciler.clone(),
            settings.reconciler.sweep_interval(),
            sweeper_stop.clone(),
        ));

        debug!(ws_url = %ws_url, "sync runtime created");
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                ws_url,
                bus,
                connection,
                store,
                reconciler,
                notices,
                consumers: AtomicUsize::new(0),
                wiring: Mutex::new(wiring),
                sweeper_stop,
                sweeper: Mutex::new(Some(sweeper)),
            }),
        })
    }

    /// Register a consumer, connecting if it is the first.
    pub fn acquire(&self) -> Result<SyncConsumer> {
        let previous = self.inner.consumers.fetch_add(1, Ordering::AcqRel);
        if previous == 0 {
            if let Err(e) = self.inner.connection.connect(&self.inner.ws_url) {
                let _ = self.inner.consumers.fetch_sub(1, Ordering::AcqRel);
                return Err(e);
            }
        }
        debug!(consumers = previous + 1, "consumer acquired");
        Ok(SyncConsumer {
            runtime: self.clone(),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Live consumers.
    pub fn consumers(&self) -> usize {
        self.inner.consumers.load(Ordering::Acquire)
    }

    /// Derived socket URL.
    pub fn ws_url(&self) -> &str {
        &self.inner.ws_url
    }

    /// The shared connection.
    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    /// The shared store.
    pub fn store(&self) -> &SessionStateStore {
        &self.inner.store
    }

    /// The reconciler feeding the store.
    pub fn reconciler(&self) -> &ReconcilerHandle {
        &self.inner.reconciler
    }

    /// The runtime's event bus.
    pub fn bus(&self) -> &EventBus<BusEvent> {
        &self.inner.bus
    }

    /// Receiver of user-visible notices emitted from now on.
    pub fn notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.inner.notices.subscribe()
    }

    /// Fetch the REST baseline for `session_id` and install it.
    ///
    /// For group sessions the REST leaderboard is applied as well; a failure
    /// there is logged and otherwise ignored since live updates will follow.
    pub async fn load_session(&self, api: &dyn SessionApi, session_id: &SessionId) -> Result<()> {
        let snapshot = api.fetch_snapshot(session_id).await?;
        let group = snapshot.session.mode == focus_core::model::SessionMode::Group;
        self.inner.reconciler.load_snapshot(snapshot);

        if group {
            match api.fetch_leaderboard(session_id).await {
                Ok(entries) => {
                    let _ = self.inner.reconciler.apply_leaderboard_fallback(entries);
                }
                Err(e) => warn!(error = %e, "leaderboard fallback unavailable"),
            }
        }
        Ok(())
    }

    /// Stop the sweeper, drop all wiring, and close the connection.
    pub async fn shutdown(&self) {
        self.inner.sweeper_stop.cancel();
        let sweeper = self.inner.sweeper.lock().take();
        if let Some(handle) = sweeper {
            let _ = handle.await;
        }
        for sub in self.inner.wiring.lock().drain(..) {
            sub.unsubscribe();
        }
        self.inner.connection.shutdown().await;
        info!(consumers = self.consumers(), "sync runtime shut down");
    }
}

impl std::fmt::Debug for SyncRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRuntime")
            .field("ws_url", &self.inner.ws_url)
            .field("consumers", &self.consumers())
            .field("connection", &self.inner.connection)
            .finish_non_exhaustive()
    }
}

async fn sweep(reconciler: ReconcilerHandle, period: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => reconciler.tick(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Consumer
// ─────────────────────────────────────────────────────────────────────────────

/// One UI-side user of the runtime.
///
/// Exposes selectors, mutations, and change notifications. Dropping it
/// unsubscribes what it subscribed and nothing else.
pub struct SyncConsumer {
    runtime: SyncRuntime,
    subscriptions: Mutex<Vec<Arc<Subscription>>>,
}

impl SyncConsumer {
    /// Run a selector against the current state.
    pub fn select<R>(&self, selector: impl FnOnce(&SessionState) -> R) -> R {
        self.runtime.inner.store.select(selector)
    }

    /// Current immutable state.
    pub fn snapshot(&self) -> Arc<SessionState> {
        self.runtime.inner.store.snapshot()
    }

    /// Apply a change optimistically and send it.
    pub fn dispatch_mutation(&self, kind: MutationKind) -> Result<MutationId> {
        self.runtime.inner.reconciler.dispatch_mutation(kind)
    }

    /// Call `listener` after every committed state change.
    ///
    /// The subscription is also released when this consumer is dropped.
    pub fn subscribe<F>(&self, listener: F) -> Arc<Subscription>
    where
        F: Fn(&Arc<SessionState>) + Send + Sync + 'static,
    {
        let sub = Arc::new(self.runtime.inner.store.subscribe(listener));
        self.subscriptions.lock().push(Arc::clone(&sub));
        sub
    }

    /// Receiver of user-visible notices.
    pub fn notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.runtime.notices()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.runtime.inner.connection.state()
    }

    /// Whether the socket is open.
    pub fn is_connected(&self) -> bool {
        self.runtime.inner.connection.is_connected()
    }

    /// Clear session-scoped state, e.g. when navigating away.
    pub fn reset_session(&self) {
        self.runtime.inner.reconciler.reset();
    }
}

impl Drop for SyncConsumer {
    fn drop(&mut self) {
        for sub in self.subscriptions.get_mut().drain(..) {
            sub.unsubscribe();
        }
        let previous = self.runtime.inner.consumers.fetch_sub(1, Ordering::AcqRel);
        debug!(consumers = previous.saturating_sub(1), "consumer released");
    }
}

impl std::fmt::Debug for SyncConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConsumer")
            .field("subscriptions", &self.subscriptions.lock().len())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Global slot
// ─────────────────────────────────────────────────────────────────────────────

/// Explicitly initialized process-wide runtime.
pub mod global {
    use focus_core::errors::Result;
    use focus_core::ids::UserId;
    use focus_settings::FocusSettings;
    use parking_lot::Mutex;

    use super::SyncRuntime;

    static SLOT: Mutex<Option<SyncRuntime>> = parking_lot::const_mutex(None);

    /// Create the global runtime, or return the existing one.
    pub fn init(settings: &FocusSettings, local_user: UserId) -> Result<SyncRuntime> {
        let mut slot = SLOT.lock();
        if let Some(runtime) = slot.as_ref() {
            return Ok(runtime.clone());
        }
        let runtime = SyncRuntime::new(settings, local_user)?;
        *slot = Some(runtime.clone());
        Ok(runtime)
    }

    /// The global runtime, if initialized.
    pub fn get() -> Option<SyncRuntime> {
        SLOT.lock().clone()
    }

    /// Shut down and clear the global runtime.
    pub async fn shutdown() {
        let runtime = SLOT.lock().take();
        if let Some(runtime) = runtime {
            runtime.shutdown().await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
