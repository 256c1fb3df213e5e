//! # focus-sync
//!
//! Real-time synchronization for collaborative focus sessions.
//!
//! Data flows one way:
//!
//! ```text
//! socket ─► ConnectionManager ─► EventBus ─► ReconcilerHandle ─► SessionStateStore ─► selectors
//!                 ▲                                  │
//!                 └──────── FrameSink ◄──────────────┘ (optimistic mutations)
//! ```
//!
//! - [`connection`]: socket lifecycle, heartbeat, reconnect backoff, outbound queue
//! - [`bus`]: name-keyed publish/subscribe with snapshot dispatch
//! - [`reconciler`]: sequence ordering, optimistic mutations, pure transitions
//! - [`store`] / [`selectors`]: immutable state snapshots and read functions
//! - [`api`]: REST collaborator (snapshot, completion, leaderboard)
//! - [`runtime`]: reference-counted process-wide context

#![deny(unsafe_code)]

pub mod api;
pub mod bus;
pub mod connection;
pub mod endpoint;
pub mod leaderboard;
pub mod reconciler;
pub mod runtime;
pub mod selectors;
pub mod store;

pub use api::{HttpSessionApi, SessionApi};
pub use bus::{BusEvent, EventBus, Subscription, SyncNotice};
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, FrameSink};
pub use reconciler::{MutationKind, Outcome, Reconciler, ReconcilerConfig, ReconcilerHandle};
pub use runtime::{SyncConsumer, SyncRuntime};
pub use store::{SessionState, SessionStateStore};
