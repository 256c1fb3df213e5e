//! Logging setup.
//!
//! The engine logs through `tracing` with targets under `focus_sync::*`.
//! Binaries call [`init_subscriber`] once; tests use [`capture_logs`] to
//! assert on what was emitted without installing a global subscriber.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Level used when neither `RUST_LOG` nor settings provide one.
pub const DEFAULT_LEVEL: &str = "info";

/// Initialize the global tracing subscriber writing compact lines to stderr.
///
/// `RUST_LOG` wins over `level` when set. Later calls are no-ops.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let _ = subscriber.try_init();
}

/// Same as [`init_subscriber`] but emits one JSON object per line.
pub fn init_json_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json();

    let _ = subscriber.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_subscriber("warn");
        init_subscriber("debug");
        init_json_subscriber("info");
    }

    #[test]
    fn bad_level_falls_back() {
        init_subscriber("not-a-level[");
    }
}
