use std::time::Duration;

use async_trait::async_trait;
use focus_core::errors::{Result, SyncError};
use focus_core::ids::SessionId;
use focus_core::model::{LeaderboardEntry, SessionReport, SessionSnapshot};
use focus_settings::ApiSettings;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::SessionApi;

/// [`SessionApi`] over HTTP with an optional bearer token.
#[derive(Clone, Debug)]
pub struct HttpSessionApi {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpSessionApi {
    /// Client for `base_url` (e.g. `https://host/api/v1`).
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Api {
                status: None,
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            auth_token,
        })
    }

    /// Client configured from the `api` settings section.
    pub fn from_settings(settings: &ApiSettings) -> Result<Self> {
        Self::new(
            settings.base_url.clone(),
            settings.auth_token.clone(),
            settings.request_timeout(),
        )
    }

    fn url(&self, session_id: &SessionId, suffix: &str) -> String {
        format!("{}/sessions/{}{suffix}", self.base_url, session_id)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let resp = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| SyncError::Api {
                status: None,
                message: e.to_string(),
            })?;
        let resp = check_status(resp).await?;
        resp.json().await.map_err(|e| SyncError::Api {
            status: None,
            message: format!("invalid response body: {e}"),
        })
    }
}

/// Map non-2xx responses to errors, pulling `{"error": ...}` from the body.
async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let code = status.as_u16();
    if SyncError::is_auth_status(code) {
        warn!(status = code, "api rejected credentials");
        return Err(SyncError::FatalAuth { status: code });
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_owned))
        .unwrap_or_else(|| {
            if text.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_owned()
            } else {
                text
            }
        });
    Err(SyncError::Api {
        status: Some(code),
        message,
    })
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn fetch_snapshot(&self, session_id: &SessionId) -> Result<SessionSnapshot> {
        let snapshot: SessionSnapshot =
            self.execute(self.client.get(self.url(session_id, ""))).await?;
        debug!(
            tasks = snapshot.tasks.len(),
            participants = snapshot.participants.len(),
            last_seq = snapshot.last_seq,
            "snapshot fetched"
        );
        Ok(snapshot)
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn complete_session(&self, session_id: &SessionId) -> Result<SessionReport> {
        self.execute(self.client.post(self.url(session_id, "/complete"))).await
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn fetch_leaderboard(&self, session_id: &SessionId) -> Result<Vec<LeaderboardEntry>> {
        self.execute(self.client.get(self.url(session_id, "/leaderboard")))
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
