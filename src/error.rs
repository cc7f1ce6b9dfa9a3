//! Unified error handling for the trajectory-optimizer library.
//!
//! The optimization pipeline itself never fails: filters are fail-open and
//! degenerate geometry collapses to zero distance. Errors only come from the
//! boundary (upstream HTTP, remote optimizer, configuration) and are swallowed
//! by the service layer into fallbacks.

use thiserror::Error;

/// Unified error type for trajectory-optimizer operations.
#[derive(Debug, Clone, Error)]
pub enum TrajectoryError {
    /// Upstream tracking API or remote optimizer returned an error
    #[error("{}", format_http(.message, .status_code))]
    Http {
        message: String,
        status_code: Option<u16>,
    },
    /// Upstream call exceeded its time budget
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },
    /// Upstream payload could not be decoded
    #[error("Parse error: {message}")]
    Parse { message: String },
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn format_http(message: &str, status_code: &Option<u16>) -> String {
    match status_code {
        Some(code) => format!("HTTP error ({}): {}", code, message),
        None => format!("HTTP error: {}", message),
    }
}

impl TrajectoryError {
    pub fn http(message: impl Into<String>, status_code: Option<u16>) -> Self {
        TrajectoryError::Http {
            message: message.into(),
            status_code,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        TrajectoryError::Parse {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        TrajectoryError::Config {
            message: message.into(),
        }
    }
}

/// Result type alias for trajectory-optimizer operations.
pub type Result<T> = std::result::Result<T, TrajectoryError>;

#[cfg(feature = "http")]
impl TrajectoryError {
    /// Convert a reqwest error, reporting timeouts against the client's
    /// configured `timeout`.
    pub fn from_reqwest(e: reqwest::Error, timeout: std::time::Duration) -> Self {
        if e.is_timeout() {
            return TrajectoryError::Timeout {
                operation: e
                    .url()
                    .map(|u| format!("GET {}", u.path()))
                    .unwrap_or_else(|| "request".to_string()),
                timeout_ms: timeout.as_millis() as u64,
            };
        }
        e.into()
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for TrajectoryError {
    /// Timeouts become [`TrajectoryError::Http`] here since the limit is not
    /// known; use [`TrajectoryError::from_reqwest`] where it is.
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return TrajectoryError::parse(e.to_string());
        }
        TrajectoryError::http(e.to_string(), e.status().map(|s| s.as_u16()))
    }
}

impl From<serde_json::Error> for TrajectoryError {
    fn from(e: serde_json::Error) -> Self {
        TrajectoryError::parse(e.to_string())
    }
}
