//! # apex-settings
//!
//! Layered configuration for the Apex gateway.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ApexSettings::default()`]
//! 2. **Settings file**: `~/.apex/settings.json` or an explicit path, deep-merged over defaults
//! 3. **Environment variables**: `APEX_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, expand_home, load_settings, load_settings_from_path,
    settings_path, validate,
};
pub use types::*;
