//! Error taxonomy for the sync subsystem.
//!
//! Transport and ordering errors are resolved inside the engine; only
//! mutation rollbacks and fatal auth failures are meant to reach
//! user-visible messaging. [`SyncError::is_user_visible`] encodes that
//! boundary so callers do not have to.

use thiserror::Error;

use crate::ids::MutationId;

/// Errors produced by the connection, reconciler, and REST collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Transient transport failure. Triggers backoff and reconnect.
    #[error("connection error: {message}")]
    Connection {
        /// Transport detail.
        message: String,
    },

    /// Malformed frame, unknown event name, or invalid state transition.
    #[error("protocol error: {message}")]
    Protocol {
        /// What was wrong with the frame.
        message: String,
    },

    /// Event at or below the last applied sequence number.
    #[error("stale event seq={seq} (last applied {last_applied})")]
    SequenceConflict {
        /// Sequence number of the dropped event.
        seq: u64,
        /// Cursor at the time it was dropped.
        last_applied: u64,
    },

    /// An optimistic change was reverted.
    #[error("change could not be saved and was reverted: {reason}")]
    OptimisticRollback {
        /// The reverted mutation.
        mutation_id: MutationId,
        /// Why it was reverted (timeout, send failure).
        reason: String,
    },

    /// The server rejected our credentials. Not retried.
    #[error("authentication rejected (status {status})")]
    FatalAuth {
        /// HTTP status returned during the handshake or request.
        status: u16,
    },

    /// The outbound queue is full.
    #[error("outbound queue full ({capacity} frames)")]
    Backpressure {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The configured reconnect attempt cap was reached.
    #[error("gave up reconnecting after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// A local mutation intent could not be applied to the current state.
    #[error("invalid mutation: {message}")]
    InvalidMutation {
        /// Why the intent was refused.
        message: String,
    },

    /// The connection has been shut down explicitly.
    #[error("connection shut down")]
    Shutdown,

    /// REST collaborator failure.
    #[error("api error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Api {
        /// HTTP status, if a response was received.
        status: Option<u16>,
        /// Detail.
        message: String,
    },
}

impl SyncError {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::SequenceConflict { .. } => "SEQUENCE_CONFLICT",
            Self::OptimisticRollback { .. } => "OPTIMISTIC_ROLLBACK",
            Self::FatalAuth { .. } => "FATAL_AUTH",
            Self::Backpressure { .. } => "BACKPRESSURE",
            Self::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            Self::InvalidMutation { .. } => "INVALID_MUTATION",
            Self::Shutdown => "SHUTDOWN",
            Self::Api { .. } => "API_ERROR",
        }
    }

    /// Whether this error should be shown to the user.
    #[must_use]
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::OptimisticRollback { .. } | Self::FatalAuth { .. } | Self::RetriesExhausted { .. }
        )
    }

    /// Whether the operation may succeed if retried later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Backpressure { .. } => true,
            Self::Api { status, .. } => status.is_none_or(|s| s >= 500 || s == 429),
            _ => false,
        }
    }

    /// Whether an HTTP status means the credentials were rejected.
    #[must_use]
    pub fn is_auth_status(status: u16) -> bool {
        status == 401 || status == 403
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SyncError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = SyncError::SequenceConflict { seq: 3, last_applied: 5 };
        assert_eq!(err.to_string(), "stale event seq=3 (last applied 5)");

        let err = SyncError::Api { status: Some(500), message: "boom".into() };
        assert_eq!(err.to_string(), "api error (500): boom");

        let err = SyncError::Api { status: None, message: "timeout".into() };
        assert_eq!(err.to_string(), "api error: timeout");
    }

    #[test]
    fn only_mutation_and_auth_failures_are_user_visible() {
        assert!(SyncError::FatalAuth { status: 401 }.is_user_visible());
        assert!(
            SyncError::OptimisticRollback {
                mutation_id: MutationId::from("m1"),
                reason: "timeout".into()
            }
            .is_user_visible()
        );
        assert!(!SyncError::Protocol { message: "x".into() }.is_user_visible());
        assert!(!SyncError::SequenceConflict { seq: 1, last_applied: 1 }.is_user_visible());
        assert!(!SyncError::Connection { message: "reset".into() }.is_user_visible());
    }

    #[test]
    fn retryable_classification() {
        assert!(SyncError::Connection { message: "reset".into() }.is_retryable());
        assert!(SyncError::Api { status: Some(503), message: String::new() }.is_retryable());
        assert!(SyncError::Api { status: None, message: String::new() }.is_retryable());
        assert!(!SyncError::Api { status: Some(404), message: String::new() }.is_retryable());
        assert!(!SyncError::FatalAuth { status: 403 }.is_retryable());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(SyncError::Shutdown.code(), "SHUTDOWN");
        assert_eq!(
            SyncError::InvalidMutation { message: String::new() }.code(),
            "INVALID_MUTATION"
        );
        assert_eq!(SyncError::Backpressure { capacity: 1 }.code(), "BACKPRESSURE");
    }

    #[test]
    fn auth_statuses() {
        assert!(SyncError::is_auth_status(401));
        assert!(SyncError::is_auth_status(403));
        assert!(!SyncError::is_auth_status(500));
    }
}
