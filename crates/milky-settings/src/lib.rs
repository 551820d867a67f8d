//! # milky-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`MilkySettings::default()`]
//! 2. **User file**: `$MILKY_HOME/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**, highest priority
//!
//! Secrets ([`Secrets`]) come from the environment only.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod secrets;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_dir, settings_path};
pub use secrets::Secrets;
pub use types::*;
