//! Settings schema with compiled defaults.
//!
//! Every struct is `#[serde(default)]` so a partial settings file only needs
//! the keys it overrides. Durations are stored as milliseconds to keep the
//! JSON flat; the `*_ms` accessors convert to [`Duration`].

use std::time::Duration;

use focus_core::retry::BackoffConfig;
use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FocusSettings {
    /// REST and socket endpoints.
    pub api: ApiSettings,
    /// Socket lifecycle.
    pub connection: ConnectionSettings,
    /// Ordering and optimistic-mutation windows.
    pub reconciler: ReconcilerSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Endpoint settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// REST base URL; the socket origin is derived from it.
    pub base_url: String,
    /// Path of the event-stream endpoint on the API origin.
    pub ws_path: String,
    /// Per-request timeout for REST calls.
    pub request_timeout_ms: u64,
    /// Bearer token for REST calls and the socket handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".to_owned(),
            ws_path: "/api/v1/ws".to_owned(),
            request_timeout_ms: 10_000,
            auth_token: None,
        }
    }
}

impl ApiSettings {
    /// REST request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Socket lifecycle settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Frames held while the socket is not writable.
    pub outbound_queue_capacity: usize,
    /// Interval between heartbeat pings.
    pub heartbeat_interval_ms: u64,
    /// How long to wait for a pong before declaring the socket dead.
    pub pong_timeout_ms: u64,
    /// Handshake timeout.
    pub connect_timeout_ms: u64,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            heartbeat_interval_ms: 25_000,
            pong_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ConnectionSettings {
    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Pong timeout.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    /// Handshake timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Reconciler timing settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcilerSettings {
    /// An optimistic mutation unconfirmed after this long is rolled back.
    pub mutation_timeout_ms: u64,
    /// How long a sequence gap may stay open before it is skipped.
    pub reorder_window_ms: u64,
    /// Maximum events held while waiting for a gap to fill.
    pub reorder_capacity: usize,
    /// Period of the timeout sweep.
    pub sweep_interval_ms: u64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            mutation_timeout_ms: 8_000,
            reorder_window_ms: 3_000,
            reorder_capacity: 512,
            sweep_interval_ms: 250,
        }
    }
}

impl ReconcilerSettings {
    /// Mutation confirmation window.
    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_millis(self.mutation_timeout_ms)
    }

    /// Gap window.
    pub fn reorder_window(&self) -> Duration {
        Duration::from_millis(self.reorder_window_ms)
    }

    /// Sweep period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(FocusSettings::default()).unwrap();
        assert_eq!(json["api"]["baseUrl"], "http://localhost:8080/api/v1");
        assert_eq!(json["connection"]["outboundQueueCapacity"], 256);
        assert_eq!(json["connection"]["backoff"]["maxDelayMs"], 30_000);
        assert!(json["connection"]["backoff"]["maxAttempts"].is_null());
        assert_eq!(json["reconciler"]["reorderWindowMs"], 3_000);
        assert!(json["api"].get("authToken").is_none());
    }

    #[test]
    fn partial_object_fills_defaults() {
        let settings: FocusSettings =
            serde_json::from_str(r#"{"connection":{"pongTimeoutMs":500}}"#).unwrap();
        assert_eq!(settings.connection.pong_timeout(), Duration::from_millis(500));
        assert_eq!(settings.connection.heartbeat_interval(), Duration::from_secs(25));
        assert_eq!(settings.reconciler.mutation_timeout(), Duration::from_secs(8));
    }
}
