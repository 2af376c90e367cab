use std::time::Duration;

use thiserror::Error;

/// Result type alias for certbatch operations
pub type Result<T> = std::result::Result<T, CertError>;

/// Errors that can occur while planning, issuing or collecting certificates
#[derive(Error, Debug)]
pub enum CertError {
    /// Request rejected before any work was dispatched
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Task, chunk, object or CA record not found
    #[error("not found: {resource}")]
    NotFound {
        /// Description of the resource that wasn't found
        resource: String,
    },

    /// No CA backend configured under this alias
    #[error("unknown CA alias: {0}")]
    UnknownCaAlias(String),

    /// A CA backend (registry, secret store, private CA) rejected a call
    #[error("{backend} error: {message}")]
    Backend {
        /// Which backend failed
        backend: &'static str,
        /// Message from the backend
        message: String,
    },

    /// The private CA has not finished issuing the certificate yet
    #[error("certificate request still in progress")]
    RequestInProgress {
        /// Backend-suggested delay before polling again
        retry_after: Option<Duration>,
    },

    /// The private CA is rate limiting us
    #[error("rate limited by backend, retry after {retry_after:?}")]
    Throttled {
        /// Backend-suggested delay before polling again
        retry_after: Option<Duration>,
    },

    /// Polling gave up before the certificate became available
    #[error("gave up after {attempts} attempts")]
    RetriesExhausted {
        /// Number of polls made
        attempts: u32,
    },

    /// Object storage failure
    #[error("storage error: {0}")]
    Storage(String),

    /// ZIP archive could not be written or read
    #[error("archive error: {0}")]
    Archive(String),

    /// Key generation, CSR or signing failure
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Work item could not be dispatched or decoded
    #[error("queue error: {0}")]
    Queue(String),

    /// Configuration is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON parsing/serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CertError {
    /// Shorthand for [`CertError::NotFound`]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Shorthand for [`CertError::InvalidArgument`]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Shorthand for [`CertError::Backend`]
    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
        }
    }

    /// Returns true if the backend asked us to poll again later
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RequestInProgress { .. } | Self::Throttled { .. }
        )
    }

    /// Returns true if the error means the resource doesn't exist
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns the backend-suggested retry delay, if any
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RequestInProgress { retry_after } | Self::Throttled { retry_after } => {
                *retry_after
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let in_progress = CertError::RequestInProgress {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert!(in_progress.is_transient());
        assert_eq!(in_progress.retry_after(), Some(Duration::from_secs(2)));

        let throttled = CertError::Throttled { retry_after: None };
        assert!(throttled.is_transient());
        assert_eq!(throttled.retry_after(), None);

        assert!(!CertError::backend("private-ca", "access denied").is_transient());
        assert!(!CertError::not_found("task").is_transient());
    }

    #[test]
    fn test_not_found() {
        assert!(CertError::not_found("chunk 3").is_not_found());
        assert!(!CertError::invalid("bad").is_not_found());
    }
}
