//! # focus-core
//!
//! Foundation types for collaborative focus-session synchronization.
//!
//! This crate provides the shared vocabulary the sync engine and its
//! consumers depend on. It performs no I/O:
//!
//! - **Branded IDs**: `SessionId`, `TaskId`, `UserId`, `MutationId` as newtypes
//! - **Domain model**: `Session`, `Task`, `Participant`, `LeaderboardEntry`
//! - **Wire protocol**: the `{event, payload, seq?}` frame and the
//!   [`protocol::ServerEvent`] tagged union validated at the transport edge
//! - **Errors**: [`errors::SyncError`] taxonomy via `thiserror`
//! - **Backoff**: exponential reconnect delay with bounded jitter
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod model;
pub mod protocol;
pub mod retry;

pub use errors::{Result, SyncError};
pub use ids::{MutationId, SessionId, TaskId, UserId};
