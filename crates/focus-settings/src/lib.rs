//! # focus-settings
//!
//! Configuration for the focus-session sync client.
//!
//! Three layers, later ones winning:
//! 1. compiled defaults ([`FocusSettings::default()`])
//! 2. `~/.focus-sync/settings.json`, deep-merged over the defaults
//! 3. `FOCUS_*` environment variables

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{
    ApiSettings, ConnectionSettings, FocusSettings, LoggingSettings, ReconcilerSettings,
};

use std::sync::OnceLock;

static SETTINGS: OnceLock<FocusSettings> = OnceLock::new();

/// Process-wide settings.
///
/// The first call loads from disk and the environment; if that fails the
/// error is logged and compiled defaults are used.
pub fn get_settings() -> &'static FocusSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            FocusSettings::default()
        })
    })
}

/// Install settings before anything calls [`get_settings`].
///
/// Returns the value back if settings were already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: FocusSettings) -> std::result::Result<(), FocusSettings> {
    SETTINGS.set(settings)
}
