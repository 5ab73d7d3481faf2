//! Service Configuration Module
//!
//! Provides deployment configuration loaded from TOML files, replacing all
//! hardcoded risk thresholds, fusion weights, and collection periods with
//! operator-tunable values.
//!
//! ## Loading Order
//!
//! 1. `AGOS_CONFIG` environment variable (path to TOML file)
//! 2. `agos.toml` in the current working directory
//! 3. Built-in defaults (matching the pinned behavioral tables)
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(AgosConfig::load());
//!
//! // Anywhere in the codebase:
//! let radius = config::get().fusion.diffusion_radius_m;
//! ```

mod service_config;
pub mod defaults;

pub use service_config::*;

use std::sync::OnceLock;

/// Global service configuration, initialized once at startup.
static AGOS_CONFIG: OnceLock<AgosConfig> = OnceLock::new();

/// Initialize the global service configuration.
///
/// Must be called exactly once before any calls to `get()`.
pub fn init(config: AgosConfig) {
    if AGOS_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global service configuration.
///
/// Falls back to built-in defaults when `init()` has not been called,
/// which keeps unit tests free of init boilerplate.
pub fn get() -> &'static AgosConfig {
    AGOS_CONFIG.get_or_init(AgosConfig::default)
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    AGOS_CONFIG.get().is_some()
}
