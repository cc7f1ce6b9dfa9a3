//! Service configuration loaded from the environment.
//!
//! Every setting has a default. Malformed values are logged and replaced with
//! the default rather than aborting startup.

use std::time::Duration;

use log::warn;

/// Default upstream request timeout.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(15);
/// Default lifetime of cached responses.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
/// Default maximum number of cached responses.
pub const DEFAULT_CACHE_CAPACITY: usize = 500;

const DEFAULT_TRACKING_API_URL: &str = "http://localhost:8082";

/// Settings for [`PositionService`](crate::PositionService) and its clients.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Base URL of the tracking platform (no trailing slash)
    pub tracking_api_url: String,
    pub tracking_api_user: Option<String>,
    pub tracking_api_password: Option<String>,
    /// Base URL of a remote optimization service; None = optimize in-process
    pub optimizer_url: Option<String>,
    /// Bound on every upstream call
    pub upstream_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            tracking_api_url: DEFAULT_TRACKING_API_URL.to_string(),
            tracking_api_user: None,
            tracking_api_password: None,
            optimizer_url: None,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl ServiceConfig {
    /// Load from process environment variables.
    ///
    /// | variable | default |
    /// |---|---|
    /// | `TRACKING_API_URL` | `http://localhost:8082` |
    /// | `TRACKING_API_USER` / `TRACKING_API_PASSWORD` | unset |
    /// | `OPTIMIZER_URL` | unset |
    /// | `UPSTREAM_TIMEOUT_SECS` | 15 |
    /// | `CACHE_TTL_SECS` | 300 |
    /// | `CACHE_CAPACITY` | 500 |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (tests, config maps).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let secs = |key: &str, fallback: Duration| match non_empty(key) {
            None => fallback,
            Some(raw) => match raw.parse::<u64>() {
                Ok(v) if v > 0 => Duration::from_secs(v),
                _ => {
                    warn!("[ServiceConfig] invalid {}='{}', using {:?}", key, raw, fallback);
                    fallback
                }
            },
        };

        let cache_capacity = match non_empty("CACHE_CAPACITY") {
            None => defaults.cache_capacity,
            Some(raw) => match raw.parse::<usize>() {
                Ok(v) if v > 0 => v,
                _ => {
                    warn!(
                        "[ServiceConfig] invalid CACHE_CAPACITY='{}', using {}",
                        raw, defaults.cache_capacity
                    );
                    defaults.cache_capacity
                }
            },
        };

        Self {
            tracking_api_url: non_empty("TRACKING_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.tracking_api_url),
            tracking_api_user: non_empty("TRACKING_API_USER"),
            tracking_api_password: non_empty("TRACKING_API_PASSWORD"),
            optimizer_url: non_empty("OPTIMIZER_URL").map(|u| u.trim_end_matches('/').to_string()),
            upstream_timeout: secs("UPSTREAM_TIMEOUT_SECS", defaults.upstream_timeout),
            cache_ttl: secs("CACHE_TTL_SECS", defaults.cache_ttl),
            cache_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ServiceConfig::from_lookup(|_| None);
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.upstream_timeout, Duration::from_secs(15));
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_values_are_read() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("TRACKING_API_URL", "https://gps.example.com/"),
            ("TRACKING_API_USER", "fleet"),
            ("TRACKING_API_PASSWORD", "secret"),
            ("OPTIMIZER_URL", "http://optimizer:3001"),
            ("UPSTREAM_TIMEOUT_SECS", "5"),
            ("CACHE_TTL_SECS", "60"),
            ("CACHE_CAPACITY", "20"),
        ]));
        assert_eq!(config.tracking_api_url, "https://gps.example.com");
        assert_eq!(config.tracking_api_user.as_deref(), Some("fleet"));
        assert_eq!(config.optimizer_url.as_deref(), Some("http://optimizer:3001"));
        assert_eq!(config.upstream_timeout, Duration::from_secs(5));
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.cache_capacity, 20);
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("UPSTREAM_TIMEOUT_SECS", "soon"),
            ("CACHE_TTL_SECS", "0"),
            ("CACHE_CAPACITY", "-3"),
            ("OPTIMIZER_URL", "   "),
        ]));
        assert_eq!(config.upstream_timeout, DEFAULT_UPSTREAM_TIMEOUT);
        assert_eq!(config.cache_ttl, DEFAULT_CACHE_TTL);
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert_eq!(config.optimizer_url, None);
    }
}
