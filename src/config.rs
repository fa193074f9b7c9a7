//! Client configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const SESSION_DIR_NAME: &str = ".koerebog";
pub const SESSION_FILE_NAME: &str = "session.json";

/// Errors produced while building a [`ClientConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration value could not be parsed.
    #[error("config parse failed: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Timeouts {
    #[must_use]
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    #[must_use]
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Backend base URL without a trailing slash, e.g. `http://localhost:5000/api`.
    pub api_url: String,
    pub timeouts: Timeouts,
    /// Where the persisted session record lives.
    pub session_file: PathBuf,
}

impl ClientConfig {
    /// Build a config for `api_url` with default timeouts and session file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if `api_url` is not an http(s) URL.
    pub fn new(api_url: &str) -> Result<Self, ConfigError> {
        Ok(Self { api_url: normalize_api_url(api_url)?, timeouts: Timeouts::default(), session_file: default_session_file() })
    }

    /// Build typed client config from environment variables.
    ///
    /// Optional:
    /// - `KOEREBOG_API_URL`: default `http://localhost:5000/api`
    /// - `KOEREBOG_REQUEST_TIMEOUT_SECS`: default 30
    /// - `KOEREBOG_CONNECT_TIMEOUT_SECS`: default 10
    /// - `KOEREBOG_SESSION_FILE`: default `~/.koerebog/session.json`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for a malformed URL or timeout value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = std::env::var("KOEREBOG_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_owned());
        let timeouts = Timeouts {
            request_secs: env_parse_u64("KOEREBOG_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            connect_secs: env_parse_u64("KOEREBOG_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
        };
        let session_file = std::env::var_os("KOEREBOG_SESSION_FILE").map_or_else(default_session_file, PathBuf::from);

        Ok(Self { api_url: normalize_api_url(&api_url)?, timeouts, session_file })
    }

    /// Replace the API base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if `api_url` is not an http(s) URL.
    pub fn with_api_url(mut self, api_url: &str) -> Result<Self, ConfigError> {
        self.api_url = normalize_api_url(api_url)?;
        Ok(self)
    }
}

fn env_parse_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::Parse(format!("{key} must be a whole number of seconds, got '{raw}'"))),
        Err(_) => Ok(default),
    }
}

/// Trim whitespace and trailing slashes, and require an http(s) scheme.
pub(crate) fn normalize_api_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::Parse(format!("api url must start with http:// or https://, got '{raw}'")));
    }
    Ok(trimmed.to_owned())
}

fn default_session_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(SESSION_DIR_NAME)
        .join(SESSION_FILE_NAME)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
