//! Transport Error Types
//!
//! Structured error handling for object storage operations.
//! Maps HTTP status codes to specific error variants for retry decisions.

/// Object storage transport error types
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Authentication rejected: {0}")]
    AuthExpired(String),

    #[error("Rate limited, try again after backoff")]
    RateLimited,

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Conflicting concurrent request: {0}")]
    Conflict(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::RateLimited
                | TransportError::Timeout
                | TransportError::Network(_)
                | TransportError::Server(_, _)
                | TransportError::Conflict(_)
        )
    }

    /// Whether this error means the key does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound(_))
    }

    /// Create a TransportError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => TransportError::AuthExpired(body.to_string()),
            403 => TransportError::Forbidden(body.to_string()),
            404 => TransportError::NotFound(body.to_string()),
            408 => TransportError::Timeout,
            409 => TransportError::Conflict(body.to_string()),
            412 => TransportError::PreconditionFailed(body.to_string()),
            429 | 503 => TransportError::RateLimited,
            500..=599 => TransportError::Server(status, body.to_string()),
            _ => TransportError::Request(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() || err.is_request() {
            TransportError::Network(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            TransportError::from_status(404, "NoSuchKey"),
            TransportError::NotFound(_)
        ));
        assert!(matches!(
            TransportError::from_status(412, "PreconditionFailed"),
            TransportError::PreconditionFailed(_)
        ));
        assert!(matches!(
            TransportError::from_status(503, "SlowDown"),
            TransportError::RateLimited
        ));
        assert!(matches!(
            TransportError::from_status(500, "InternalError"),
            TransportError::Server(500, _)
        ));
        assert!(matches!(
            TransportError::from_status(400, "bad"),
            TransportError::Request(_)
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(TransportError::RateLimited.is_retryable());
        assert!(TransportError::Server(502, String::new()).is_retryable());
        assert!(!TransportError::NotFound("k".into()).is_retryable());
        assert!(!TransportError::PreconditionFailed("k".into()).is_retryable());
    }
}
