//! Name-keyed publish/subscribe registry.
//!
//! [`EventBus::dispatch`] copies the handler list for the event name while
//! holding the lock and invokes the copies after releasing it. Handlers
//! registered during a dispatch therefore miss the in-flight event, and a
//! handler may freely call back into the bus (dispatch, subscribe, or
//! unsubscribe) without deadlocking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use focus_core::ids::MutationId;
use focus_core::protocol::{CONNECTION_STATE_CHANGED, PROTOCOL_ERROR, SYNC_NOTICE, SequencedEvent};
use parking_lot::Mutex;

use crate::connection::ConnectionState;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    handlers: HashMap<String, Vec<(u64, Handler<T>)>>,
}

impl<T> Registry<T> {
    fn remove(&mut self, name: &str, id: u64) {
        if let Some(list) = self.handlers.get_mut(name) {
            list.retain(|(hid, _)| *hid != id);
            if list.is_empty() {
                let _ = self.handlers.remove(name);
            }
        }
    }
}

/// Fan-out of `&T` values to callbacks registered by event name.
pub struct EventBus<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventBus<T> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                handlers: HashMap::new(),
            })),
        }
    }

    /// Number of callbacks registered for `name`.
    pub fn handler_count(&self, name: &str) -> usize {
        self.registry.lock().handlers.get(name).map_or(0, Vec::len)
    }
}

impl<T: 'static> EventBus<T> {
    /// Register `callback` for `name`. Callbacks for the same name run in
    /// registration order.
    pub fn on<F>(&self, name: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let name = name.into();
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry
                .handlers
                .entry(name.clone())
                .or_default()
                .push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = weak.upgrade() {
                registry.lock().remove(&name, id);
            }
        })
    }

    /// Deliver `data` to every callback registered for `name` at call time.
    ///
    /// Returns the number of callbacks invoked.
    pub fn dispatch(&self, name: &str, data: &T) -> usize {
        let snapshot: Vec<Handler<T>> = match self.registry.lock().handlers.get(name) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };
        for handler in &snapshot {
            handler(data);
        }
        snapshot.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscription
// ─────────────────────────────────────────────────────────────────────────────

/// Handle returned by every `subscribe`/`on` call in this crate.
///
/// [`unsubscribe`](Self::unsubscribe) is idempotent. Dropping the handle
/// does not unsubscribe.
pub struct Subscription {
    active: AtomicBool,
    release: Box<dyn Fn() + Send + Sync>,
}

impl Subscription {
    pub(crate) fn new(release: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            active: AtomicBool::new(true),
            release: Box::new(release),
        }
    }

    /// Stop delivery. Later calls do nothing.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            (self.release)();
        }
    }

    /// Whether [`unsubscribe`](Self::unsubscribe) has not yet been called.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime payloads
// ─────────────────────────────────────────────────────────────────────────────

/// User-visible conditions surfaced by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncNotice {
    /// An optimistic change was reverted.
    MutationRolledBack {
        /// The reverted mutation.
        mutation_id: MutationId,
        /// Why (send failure, timeout).
        reason: String,
    },
    /// The server rejected our credentials; re-authentication is required.
    AuthFailed {
        /// HTTP status of the rejected handshake.
        status: u16,
    },
    /// Reconnect attempts were exhausted.
    ConnectionLost {
        /// Attempts made.
        attempts: u32,
    },
}

impl SyncNotice {
    /// Stable snake_case kind, used as a log field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MutationRolledBack { .. } => "mutation_rolled_back",
            Self::AuthFailed { .. } => "auth_failed",
            Self::ConnectionLost { .. } => "connection_lost",
        }
    }

    /// Short text suitable for a toast.
    pub fn message(&self) -> String {
        match self {
            Self::MutationRolledBack { reason, .. } => {
                format!("Your change could not be saved ({reason}) and was undone.")
            }
            Self::AuthFailed { .. } => "Your session has expired. Please sign in again.".to_owned(),
            Self::ConnectionLost { attempts } => {
                format!("Lost connection to the server after {attempts} attempts.")
            }
        }
    }
}

/// Everything the runtime moves across its [`EventBus`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusEvent {
    /// Validated server event, keyed by its wire name.
    Server(SequencedEvent),
    /// Connection state transition (`connection_state_changed`).
    ConnectionState(ConnectionState),
    /// Dropped frame or rejected event (`protocol_error`).
    ProtocolError(String),
    /// User-visible notice (`sync_notice`).
    Notice(SyncNotice),
}

impl BusEvent {
    /// Name this event is dispatched under.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Server(ev) => ev.event.name(),
            Self::ConnectionState(_) => CONNECTION_STATE_CHANGED,
            Self::ProtocolError(_) => PROTOCOL_ERROR,
            Self::Notice(_) => SYNC_NOTICE,
        }
    }
}

impl EventBus<BusEvent> {
    /// Dispatch `event` under its own name.
    pub fn publish(&self, event: &BusEvent) -> usize {
        self.dispatch(event.name(), event)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
