//! # parley-settings
//!
//! Configuration with layered sources for the parley chat server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`ParleySettings::default()`]
//! 2. **Settings file** — `~/.parley/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables** — `PARLEY_*` overrides (highest priority)
//!
//! The binary applies its command-line flags on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{HubSettings, ParleySettings, ServerSettings};
