//! Session configuration.

use crate::error::{SessionError, SessionResult};
use std::path::PathBuf;
use std::time::Duration;

/// Minimum length of the payload signing key, in bytes.
pub const MIN_KEY_LENGTH: usize = 32;

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Key used by the default codec to authenticate payloads
    pub key: String,
    /// Default session/cookie name
    pub cookie_name: String,
    /// Session lifetime; records older than this are expired
    pub lifetime: Duration,
    /// Interval between sweep runs for each registered driver
    pub gc_interval: Duration,
    /// Base directory for the default file driver
    pub storage_path: PathBuf,
    /// Maximum number of idle pooled session instances
    pub max_idle_sessions: usize,
}

impl SessionConfig {
    /// Create a configuration with the given signing key.
    ///
    /// The key authenticates every persisted payload and must be at least
    /// 32 bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use satchel::SessionConfig;
    ///
    /// let config = SessionConfig::new("0123456789abcdef0123456789abcdef").unwrap();
    /// assert_eq!(config.cookie_name, "session");
    /// ```
    pub fn new(key: impl Into<String>) -> SessionResult<Self> {
        let key = key.into();
        if key.len() < MIN_KEY_LENGTH {
            return Err(SessionError::Config(format!(
                "signing key must be at least {MIN_KEY_LENGTH} bytes, got {}",
                key.len()
            )));
        }

        Ok(Self {
            key,
            cookie_name: "session".to_string(),
            lifetime: Duration::from_secs(120 * 60),
            gc_interval: Duration::from_secs(30 * 60),
            storage_path: std::env::temp_dir().join("satchel-sessions"),
            max_idle_sessions: 64,
        })
    }

    /// Set the default session/cookie name.
    pub fn with_cookie_name(mut self, name: &str) -> Self {
        self.cookie_name = name.to_string();
        self
    }

    /// Set the session lifetime.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the interval between sweep runs. Must be non-zero.
    pub fn with_gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Set the base directory used by the default file driver.
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    /// Set the idle-session pool bound.
    pub fn with_max_idle_sessions(mut self, max: usize) -> Self {
        self.max_idle_sessions = max;
        self
    }
}
