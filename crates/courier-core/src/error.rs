use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category used for status reporting and retry decisions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TransportErrorCategory {
    /// Backend unreachable or connection dropped.
    Network,
    /// Request exceeded the fixed request timeout.
    Timeout,
    /// Bearer credential missing or rejected.
    Auth,
    /// Request rejected as invalid (4xx other than auth/rate-limit).
    Client,
    /// Backend failed to process the request (5xx).
    Server,
    /// Backend asked the client to slow down.
    RateLimited,
    /// Response body could not be decoded.
    Serialization,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable transport error payload emitted across the event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct TransportError {
    /// High-level error category.
    pub category: TransportErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl TransportError {
    /// Construct a new transport error.
    pub fn new(
        category: TransportErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Error raised when a request hits the fixed request timeout.
    pub fn timeout(operation: &str, after: Duration) -> Self {
        Self::new(
            TransportErrorCategory::Timeout,
            "request_timeout",
            format!("{operation} timed out after {}ms", after.as_millis()),
        )
    }

    /// Whether the failure should consume a retry attempt with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category,
            TransportErrorCategory::Network
                | TransportErrorCategory::Timeout
                | TransportErrorCategory::Server
                | TransportErrorCategory::RateLimited
        )
    }

    pub fn is_auth_rejection(&self) -> bool {
        self.category == TransportErrorCategory::Auth
    }

    /// Whether the failure says something about link health.
    ///
    /// Client and serialization errors are about the request itself and do not
    /// degrade the connection state.
    pub fn affects_connection(&self) -> bool {
        self.is_retryable()
    }
}

/// Map HTTP status codes to transport error categories.
pub fn classify_http_status(status: u16) -> TransportErrorCategory {
    match status {
        401 | 403 => TransportErrorCategory::Auth,
        408 => TransportErrorCategory::Timeout,
        429 => TransportErrorCategory::RateLimited,
        400..=499 => TransportErrorCategory::Client,
        500..=599 => TransportErrorCategory::Server,
        _ => TransportErrorCategory::Internal,
    }
}
