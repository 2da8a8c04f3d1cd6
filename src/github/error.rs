use thiserror::Error;

use crate::retry::Retryable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network failures, rate limiting, 5xx. Safe to retry.
    Transient,
    /// Authentication failures, malformed queries, other 4xx.
    Permanent,
}

/// Error from one of the HTTP collaborators (search, enrichment, feed).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub message: String,
    #[source]
    pub source: Option<reqwest::Error>,
}

impl ApiError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            status: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            status: None,
            message: message.into(),
            source: None,
        }
    }

    /// Network-level failure before any status was received.
    pub fn network(context: &str, err: reqwest::Error) -> Self {
        Self {
            kind: ErrorKind::Transient,
            status: None,
            message: format!("{context}: {err}"),
            source: Some(err),
        }
    }

    /// A response body that does not match the expected shape. Asking again
    /// returns the same body, so this is permanent.
    pub fn decode(context: &str, err: &serde_json::Error) -> Self {
        Self::permanent(format!("{context}: {err}"))
    }

    /// Classifies a non-success HTTP response.
    ///
    /// `rate_limit_exhausted` reflects `x-ratelimit-remaining: 0`, which turns
    /// an otherwise permanent 403 into a retryable one.
    pub fn from_status(status: u16, rate_limit_exhausted: bool, body: &str) -> Self {
        let kind = match status {
            403 if rate_limit_exhausted => ErrorKind::Transient,
            429 => ErrorKind::Transient,
            500..=599 => ErrorKind::Transient,
            _ => ErrorKind::Permanent,
        };
        let message = match status {
            401 => "authentication failed (check token)".to_string(),
            403 if rate_limit_exhausted => "rate limited".to_string(),
            403 => "access forbidden (check token permissions)".to_string(),
            422 => format!("query rejected: {body}"),
            _ => format!("HTTP {status}: {body}"),
        };
        Self {
            kind,
            status: Some(status),
            message,
            source: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

impl Retryable for ApiError {
    fn is_unrecoverable(&self) -> bool {
        self.kind == ErrorKind::Permanent
    }
}
