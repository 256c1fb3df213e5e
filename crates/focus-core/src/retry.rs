//! Reconnect backoff configuration and delay calculation.
//!
//! Portable, sync-only building blocks; the connection driver supplies the
//! randomness and does the sleeping.
//!
//! - [`BackoffConfig`]: base/max delay, jitter, optional attempt cap
//! - [`calculate_backoff_delay_with_random`]: exponential delay with jitter
//! - [`Backoff`]: attempt counter that yields successive delays
//!
//! Jitter shortens the capped exponential delay by up to half, so delays
//! never exceed the cap, keep growing while below it, and still spread out
//! once every client has reached it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor.
pub const DEFAULT_JITTER_FACTOR: f64 = 0.3;
/// Jitter is clamped to this to keep the uncapped sequence monotonic.
pub const MAX_JITTER_FACTOR: f64 = 0.5;

/// Reconnect backoff parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt, in ms.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in ms.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Downward jitter as a fraction of the capped delay (0.0 to 0.5).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Attempt cap; `None` retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            max_attempts: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Delay calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Calculate an exponential backoff delay with jitter.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 - random * jitter)`
///
/// `random` must be in `[0.0, 1.0)`; `jitter_factor` is clamped to
/// `[0.0, 0.5]`. The jitter is applied after the cap, so clients that have
/// all reached `max_delay` do not retry in lockstep. While the exponential
/// term is below the cap, the delay for `attempt + 1` is never smaller than
/// the delay for `attempt` regardless of the random draws.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let capped = base_delay_ms
        .saturating_mul(1u64 << attempt.min(63))
        .min(max_delay_ms);

    let jitter = jitter_factor.clamp(0.0, MAX_JITTER_FACTOR) * random.clamp(0.0, 1.0);
    let with_jitter = ((capped as f64) * (1.0 - jitter)).round() as u64;

    with_jitter.min(capped)
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff state
// ─────────────────────────────────────────────────────────────────────────────

/// Attempt counter producing successive reconnect delays.
#[derive(Clone, Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    /// Start a fresh backoff sequence.
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once the cap is reached.
    ///
    /// `random` is a draw from `[0.0, 1.0)`.
    pub fn next_delay(&mut self, random: f64) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let ms = calculate_backoff_delay_with_random(
            self.attempt,
            self.config.base_delay_ms,
            self.config.max_delay_ms,
            self.config.jitter_factor,
            random,
        );
        self.attempt += 1;
        Some(Duration::from_millis(ms))
    }

    /// Attempts consumed so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Whether the configured cap has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.config.max_attempts.is_some_and(|max| self.attempt >= max)
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// The configuration in use.
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
