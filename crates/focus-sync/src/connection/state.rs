//! Connection lifecycle states.

use std::fmt;

/// Where the socket is in its lifecycle.
///
/// ```text
/// Disconnected → Connecting → Connected → Reconnecting → Connecting …
///                     │                        │
///                     └──→ Reconnecting        └──→ Disconnected (retries exhausted)
/// ```
///
/// Any state may drop to `Disconnected` on shutdown or auth rejection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket and no driver running.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Reconnecting};
        matches!(
            (self, next),
            (Disconnected | Reconnecting, Connecting)
                | (Connecting, Connected | Reconnecting)
                | (Connected, Reconnecting)
                | (Connecting | Connected | Reconnecting, Disconnected)
        )
    }

    /// Whether a driver task is (or should be) running.
    #[must_use]
    pub fn is_active(self) -> bool {
        self != Self::Disconnected
    }

    /// Stable lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    #[test]
    fn happy_path_and_reconnect_loop() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Disconnected));
    }

    #[test]
    fn illegal_edges() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Reconnecting));
        assert!(!Reconnecting.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Connected.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Disconnected));
    }

    #[test]
    fn labels() {
        assert_eq!(Reconnecting.to_string(), "reconnecting");
        assert!(!Disconnected.is_active());
        assert!(Connecting.is_active());
    }
}
