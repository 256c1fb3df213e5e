//! Settings loading: compiled defaults, then the JSON file, then `FOCUS_*`
//! environment variables.
//!
//! Merge rules for the file layer:
//! - objects merge recursively, per key
//! - arrays and primitives from the file replace the default
//! - `null` in the file keeps the default

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::FocusSettings;

/// Directory under `$HOME` holding the settings file.
pub const SETTINGS_DIR: &str = ".focus-sync";
/// Settings file name.
pub const SETTINGS_FILE: &str = "settings.json";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Path of the settings file (`~/.focus-sync/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_owned());
    PathBuf::from(home).join(SETTINGS_DIR).join(SETTINGS_FILE)
}

/// Load from the default path with environment overrides.
pub fn load_settings() -> Result<FocusSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` with environment overrides.
///
/// A missing file yields defaults; unreadable or malformed files are errors.
pub fn load_settings_from_path(path: &Path) -> Result<FocusSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<FocusSettings> {
    let defaults = serde_json::to_value(FocusSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "no settings file, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursively merge `source` over `target`.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `FOCUS_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut FocusSettings) {
    apply_overrides_with(settings, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`.
///
/// Empty values are treated as unset. Out-of-range or unparsable values are
/// ignored with a warning and the file/default value stays.
pub fn apply_overrides_with(settings: &mut FocusSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.string("FOCUS_API_BASE_URL") {
        settings.api.base_url = v;
    }
    if let Some(v) = env.string("FOCUS_WS_PATH") {
        settings.api.ws_path = v;
    }
    if let Some(v) = env.string("FOCUS_AUTH_TOKEN") {
        settings.api.auth_token = Some(v);
    }
    if let Some(v) = env.u64("FOCUS_HEARTBEAT_INTERVAL_MS", 1_000, 600_000) {
        settings.connection.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u64("FOCUS_PONG_TIMEOUT_MS", 100, 600_000) {
        settings.connection.pong_timeout_ms = v;
    }
    if let Some(v) = env.u64("FOCUS_MUTATION_TIMEOUT_MS", 100, 3_600_000) {
        settings.reconciler.mutation_timeout_ms = v;
    }
    if let Some(v) = env.u64("FOCUS_MAX_RECONNECT_ATTEMPTS", 0, u64::from(u32::MAX)) {
        // 0 means unbounded.
        settings.connection.backoff.max_attempts = u32::try_from(v).ok().filter(|n| *n > 0);
    }
    if let Some(v) = env.string("FOCUS_LOG_LEVEL") {
        match parse_log_level(&v) {
            Some(level) => settings.logging.level = level.to_owned(),
            None => warn!(
                key = "FOCUS_LOG_LEVEL",
                value = %v,
                "invalid log level env var, ignoring"
            ),
        }
    }
}

fn validate(settings: &FocusSettings) -> Result<()> {
    if settings.api.base_url.trim().is_empty() {
        return Err(SettingsError::InvalidValue("api.baseUrl is empty".into()));
    }
    if settings.connection.outbound_queue_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "connection.outboundQueueCapacity must be at least 1".into(),
        ));
    }
    if settings.connection.heartbeat_interval_ms == 0 || settings.connection.pong_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "heartbeat interval and pong timeout must be positive".into(),
        ));
    }
    if settings.reconciler.reorder_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "reconciler.reorderCapacity must be at least 1".into(),
        ));
    }
    Ok(())
}

// ── Pure parsers ────────────────────────────────────────────────────────────

/// Parse a `u64` within `[min, max]`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Normalize a log level name (case-insensitive).
pub fn parse_log_level(val: &str) -> Option<&'static str> {
    let lower = val.trim().to_ascii_lowercase();
    LOG_LEVELS.iter().copied().find(|l| *l == lower)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    fn u64(&self, key: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(key)?;
        let parsed = parse_u64_range(&val, min, max);
        if parsed.is_none() {
            warn!(key, value = %val, "invalid numeric env var, ignoring");
        }
        parsed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
