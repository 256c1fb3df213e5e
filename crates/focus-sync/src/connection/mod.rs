//! Socket ownership: connect, reconnect with backoff, heartbeat, and the
//! outbound queue.
//!
//! [`ConnectionManager`] is a cheap handle around shared state. The socket
//! itself lives in a background driver task (see `driver`) spawned by the
//! first [`connect`](ConnectionManager::connect); every later call while the
//! driver runs is a no-op. Inbound frames are validated and published on the
//! [`EventBus`]; state changes go out as `connection_state_changed`.

mod driver;
pub mod heartbeat;
pub mod queue;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use focus_core::errors::{Result, SyncError};
use focus_core::protocol::WireFrame;
use focus_core::retry::BackoffConfig;
use focus_settings::FocusSettings;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, EventBus};

pub use heartbeat::{Heartbeat, HeartbeatStatus};
pub use queue::OutboundQueue;
pub use state::ConnectionState;

/// Anything that can carry a client frame to the server.
pub trait FrameSink: Send + Sync {
    /// Serialize and hand off `{event, payload}`.
    fn send(&self, event: &str, payload: Value) -> Result<()>;
}

/// Connection tuning.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionConfig {
    /// Bearer token sent with the upgrade request.
    pub auth_token: Option<String>,
    /// Outbound queue capacity.
    pub queue_capacity: usize,
    /// Heartbeat ping period.
    pub heartbeat_interval: Duration,
    /// Pong deadline after a ping.
    pub pong_timeout: Duration,
    /// Handshake deadline.
    pub connect_timeout: Duration,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
}

impl ConnectionConfig {
    /// Take connection values from loaded settings.
    pub fn from_settings(settings: &FocusSettings) -> Self {
        let c = &settings.connection;
        Self {
            auth_token: settings.api.auth_token.clone(),
            queue_capacity: c.outbound_queue_capacity,
            heartbeat_interval: c.heartbeat_interval(),
            pong_timeout: c.pong_timeout(),
            connect_timeout: c.connect_timeout(),
            backoff: c.backoff.clone(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from_settings(&FocusSettings::default())
    }
}

pub(crate) struct Shared {
    pub(crate) config: ConnectionConfig,
    pub(crate) bus: EventBus<BusEvent>,
    pub(crate) queue: OutboundQueue,
    pub(crate) shutdown: CancellationToken,
    state: Mutex<ConnectionState>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    /// Move to `next` and publish it. Illegal or no-op edges are ignored.
    pub(crate) fn transition(&self, next: ConnectionState) {
        let prev = {
            let mut state = self.state.lock();
            let prev = *state;
            if prev == next {
                return;
            }
            if !prev.can_transition_to(next) {
                warn!(from = %prev, to = %next, "ignoring illegal connection transition");
                return;
            }
            *state = next;
            prev
        };
        debug!(from = %prev, to = %next, "connection state changed");
        let _ = self.bus.publish(&BusEvent::ConnectionState(next));
    }
}

/// Handle to the shared connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a disconnected manager publishing on `bus`.
    pub fn new(config: ConnectionConfig, bus: EventBus<BusEvent>) -> Self {
        let queue = OutboundQueue::new(config.queue_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                bus,
                queue,
                shutdown: CancellationToken::new(),
                state: Mutex::new(ConnectionState::Disconnected),
                driver: Mutex::new(None),
            }),
        }
    }

    /// Start the driver for `url`.
    ///
    /// No-op while a driver is already connecting, connected, or waiting to
    /// reconnect. Must be called inside a tokio runtime.
    pub fn connect(&self, url: &str) -> Result<()> {
        if self.shared.shutdown.is_cancelled() {
            return Err(SyncError::Shutdown);
        }
        {
            let mut state = self.shared.state.lock();
            if state.is_active() {
                debug!(state = %*state, "connect ignored, driver already running");
                return Ok(());
            }
            *state = ConnectionState::Connecting;
        }
        info!(url, "connecting");
        let _ = self
            .shared
            .bus
            .publish(&BusEvent::ConnectionState(ConnectionState::Connecting));

        let handle = tokio::spawn(driver::run(Arc::clone(&self.shared), url.to_owned()));
        if let Some(previous) = self.shared.driver.lock().replace(handle) {
            // A finished driver (auth failure, exhaustion) left its handle behind.
            previous.abort();
        }
        Ok(())
    }

    /// Queue a client frame. Fails fast with `Backpressure` when the queue is
    /// full and with `Shutdown` after [`shutdown`](Self::shutdown).
    pub fn send(&self, event: &str, payload: Value) -> Result<()> {
        if self.shared.shutdown.is_cancelled() {
            return Err(SyncError::Shutdown);
        }
        let text = WireFrame::outbound(event, payload).to_json()?;
        self.shared.queue.push(text).inspect_err(|e| {
            warn!(event, error = %e, "outbound frame rejected");
        })
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Whether the socket is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Frames waiting to be written.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Close the socket, stop the driver, and refuse further sends.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let handle = self.shared.driver.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.shared.transition(ConnectionState::Disconnected);
        let dropped = self.shared.queue.clear();
        if dropped > 0 {
            debug!(dropped, "discarded queued frames on shutdown");
        }
        info!("connection shut down");
    }
}

impl FrameSink for ConnectionManager {
    fn send(&self, event: &str, payload: Value) -> Result<()> {
        ConnectionManager::send(self, event, payload)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
