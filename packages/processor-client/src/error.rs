//! Error types for the processor client.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can branch
//! on the failure category: a rejected request (`Status`) is handled very
//! differently from an unreachable backend (`Network`).

use thiserror::Error;

/// Result type for processor client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Processor client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error (missing token, invalid base URL)
    #[error("configuration error: {0}")]
    Config(String),

    /// Network error (connection failed, timeout); always retryable
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx HTTP response; retryable only for 429 and 5xx
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Parse error (invalid JSON, malformed SSE frame)
    #[error("parse error: {0}")]
    Parse(String),

    /// The operation was interrupted by process shutdown
    #[error("operation cancelled")]
    Cancelled,
}

impl ClientError {
    /// Whether retrying the same request may succeed.
    ///
    /// Connection failures and timeouts are transient by definition. For HTTP
    /// responses, only 429 (rate limit) and 5xx qualify; any other 4xx means
    /// the request will never succeed unchanged and must surface immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network(_) => true,
            ClientError::Status { status, .. } => {
                *status == 429 || (500..=599).contains(status)
            }
            ClientError::Config(_) | ClientError::Parse(_) | ClientError::Cancelled => false,
        }
    }

    /// The HTTP status code, if this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Parse(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        let err = ClientError::Status {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn rate_limit_is_retryable() {
        let err = ClientError::Status {
            status: 429,
            message: "slow down".into(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn client_errors_are_not_retryable() {
        for status in [400, 401, 403, 404, 422] {
            let err = ClientError::Status {
                status,
                message: String::new(),
            };
            assert!(!err.is_retryable(), "HTTP {status} must not retry");
        }
    }

    #[test]
    fn network_errors_are_retryable() {
        assert!(ClientError::Network("connection refused".into()).is_retryable());
    }

    #[test]
    fn cancellation_is_not_retryable() {
        assert!(!ClientError::Cancelled.is_retryable());
    }

    #[test]
    fn status_accessor() {
        let err = ClientError::Status {
            status: 404,
            message: String::new(),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(ClientError::Network("x".into()).status(), None);
    }
}
