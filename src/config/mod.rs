//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Session credentials wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use std::time::Duration;

use crate::error::{Error, Result};
use secrets::SecretString;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug)]
pub struct Config {
    /// Root of the trading endpoints (e.g. "http://localhost:8000/trading/").
    pub base_url: String,
    /// Value of the backend's `sessionid` cookie.
    pub session_id: Option<SecretString>,
    /// Value of the `csrftoken` cookie, echoed as `X-CSRFToken` on POSTs.
    pub csrf_token: Option<SecretString>,
    pub timeout: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let timeout_secs = match std::env::var("TICKERSYNC_TIMEOUT_SECS") {
            Ok(raw) => raw.parse::<u64>().map_err(|_| {
                Error::Config(format!("TICKERSYNC_TIMEOUT_SECS must be whole seconds, got {raw:?}"))
            })?,
            Err(_) => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            base_url: required_var("TICKERSYNC_BASE_URL")?,
            session_id: optional_secret("TICKERSYNC_SESSION_ID"),
            csrf_token: optional_secret("TICKERSYNC_CSRF_TOKEN"),
            timeout: Duration::from_secs(timeout_secs),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_secret(name: &str) -> Option<SecretString> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .map(SecretString::from)
}
