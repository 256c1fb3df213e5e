//! REST collaborator used alongside the event stream.
//!
//! The socket only carries increments; the snapshot baseline, session
//! finalization, and the pre-live leaderboard come from these endpoints.

mod http;

use async_trait::async_trait;
use focus_core::errors::Result;
use focus_core::ids::SessionId;
use focus_core::model::{LeaderboardEntry, SessionReport, SessionSnapshot};

pub use http::HttpSessionApi;

/// Session endpoints consumed by the sync engine.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Baseline state plus the sequence number it reflects.
    async fn fetch_snapshot(&self, session_id: &SessionId) -> Result<SessionSnapshot>;

    /// Ask the server to finalize the session.
    async fn complete_session(&self, session_id: &SessionId) -> Result<SessionReport>;

    /// Current ranking, used until a live `leaderboard_updated` arrives.
    async fn fetch_leaderboard(&self, session_id: &SessionId) -> Result<Vec<LeaderboardEntry>>;
}
