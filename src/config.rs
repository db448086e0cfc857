//! Configuration for the remote store client and the viewport debouncer.

use std::time::Duration;

use crate::{Result, SyncError};

/// Default remote API root. Must end with a slash; endpoint paths are appended.
pub const DEFAULT_API_BASE: &str = "http://u26f5.net/api/v0.1/";

/// Configuration for sync operations.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Root URL of the remote path store.
    /// Default: `http://u26f5.net/api/v0.1/`
    pub api_base: String,

    /// Per-request timeout.
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Quiet period after the last viewport change before a bounds query fires.
    /// Default: 300 ms
    pub debounce_delay: Duration,

    /// Idle pooled connections kept per host.
    /// Default: 8
    pub max_idle_connections: usize,

    /// Path fetches a single bounds query runs at once.
    /// Default: 8
    pub max_concurrent_fetches: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(30),
            debounce_delay: Duration::from_millis(300),
            max_idle_connections: 8,
            max_concurrent_fetches: 8,
        }
    }
}

impl SyncConfig {
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        let mut base = api_base.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        self.api_base = base;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_debounce_delay(mut self, delay: Duration) -> Self {
        self.debounce_delay = delay;
        self
    }

    pub fn with_max_concurrent_fetches(mut self, limit: usize) -> Self {
        self.max_concurrent_fetches = limit;
        self
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.api_base.is_empty() {
            return Err(SyncError::ConfigError {
                message: "api_base is empty".to_string(),
            });
        }
        if !(self.api_base.starts_with("http://") || self.api_base.starts_with("https://")) {
            return Err(SyncError::ConfigError {
                message: format!("api_base '{}' is not an http(s) URL", self.api_base),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(SyncError::ConfigError {
                message: "request_timeout must be non-zero".to_string(),
            });
        }
        if self.max_concurrent_fetches == 0 {
            return Err(SyncError::ConfigError {
                message: "max_concurrent_fetches must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Absolute URL for an endpoint path relative to `api_base`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.debounce_delay, Duration::from_millis(300));
        assert_eq!(config.max_concurrent_fetches, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_fetch_limit() {
        let config = SyncConfig::default().with_max_concurrent_fetches(0);
        assert!(matches!(
            config.validate(),
            Err(SyncError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_api_base_gets_trailing_slash() {
        let config = SyncConfig::default().with_api_base("https://example.org/api");
        assert_eq!(config.api_base, "https://example.org/api/");
        assert_eq!(config.endpoint("/paths/"), "https://example.org/api/paths/");
    }

    #[test]
    fn test_validate_rejects_bad_base() {
        let config = SyncConfig::default().with_api_base("ftp://example.org");
        assert!(matches!(
            config.validate(),
            Err(SyncError::ConfigError { .. })
        ));
    }
}
