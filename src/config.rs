//! Kernel configuration.

use serde::Deserialize;

/// Settings the exception handler reads on every fault.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Expose fault details (message, type, location, trace) to clients.
    /// Never enable in production.
    pub debug: bool,
    /// Input fields that are never flashed back to the session.
    pub dont_flash: Vec<String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            debug: false,
            dont_flash: vec![
                "current_password".to_string(),
                "password".to_string(),
                "password_confirmation".to_string(),
            ],
        }
    }
}

impl KernelConfig {
    /// Defaults, with `debug` taken from `APP_DEBUG`.
    pub fn from_env() -> Self {
        let debug = std::env::var("APP_DEBUG").is_ok_and(|v| parse_flag(&v));
        Self { debug, ..Self::default() }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
