//! Error types for ZeptoRelay
//!
//! This module defines the error types used throughout the delivery control plane.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Platform Error Classification
// ============================================================================

/// Structured messaging-platform error classification.
///
/// Provides fine-grained categorization of failures returned by the messaging
/// platform client (`sendMessage`, `editMessage`, ...), enabling retry, pause
/// and anchor-abandon decisions without string matching at every call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// 429: Flood control. Carries the provider's retry hint when present.
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },
    /// Connection reset, DNS failure, read timeout
    Network(String),
    /// 500/502/503/504: Server-side errors
    Server(String),
    /// Edit rejected because the new content equals the old content
    NotModified(String),
    /// The message to edit or delete no longer exists
    MessageNotFound(String),
    /// The message exists but can no longer be edited
    CantEdit(String),
    /// 400: Malformed request (bad entities, empty text, ...)
    BadRequest(String),
    /// 403: Bot was blocked or kicked from the chat
    Forbidden(String),
    /// Catch-all for unrecognized errors
    Unknown(String),
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::RateLimited {
                retry_after: Some(d),
                message,
            } => write!(f, "Rate limited (retry after {}s): {}", d.as_secs(), message),
            PlatformError::RateLimited {
                retry_after: None,
                message,
            } => write!(f, "Rate limited: {}", message),
            PlatformError::Network(msg) => write!(f, "Network error: {}", msg),
            PlatformError::Server(msg) => write!(f, "Server error: {}", msg),
            PlatformError::NotModified(msg) => write!(f, "Message not modified: {}", msg),
            PlatformError::MessageNotFound(msg) => write!(f, "Message not found: {}", msg),
            PlatformError::CantEdit(msg) => write!(f, "Message can't be edited: {}", msg),
            PlatformError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            PlatformError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            PlatformError::Unknown(msg) => write!(f, "Unknown platform error: {}", msg),
        }
    }
}

impl std::error::Error for PlatformError {}

impl PlatformError {
    /// Shorthand for a throttling error with an optional hint.
    pub fn rate_limited(retry_after: Option<Duration>, message: impl Into<String>) -> Self {
        PlatformError::RateLimited {
            retry_after,
            message: message.into(),
        }
    }

    /// Returns `true` if this error is transient and the request should be retried.
    ///
    /// Retryable errors: RateLimited, Network, Server.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::RateLimited { .. } | PlatformError::Network(_) | PlatformError::Server(_)
        )
    }

    /// Returns `true` for provider-side throttling.
    pub fn is_throttle(&self) -> bool {
        matches!(self, PlatformError::RateLimited { .. })
    }

    /// Returns `true` if further edits to the same anchor message are pointless.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            PlatformError::MessageNotFound(_)
                | PlatformError::CantEdit(_)
                | PlatformError::Forbidden(_)
        )
    }

    /// Returns `true` when an edit failed only because the content was unchanged.
    pub fn is_not_modified(&self) -> bool {
        matches!(self, PlatformError::NotModified(_))
    }

    /// Provider-supplied retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatformError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns the HTTP status code associated with this error, if applicable.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            PlatformError::RateLimited { .. } => Some(429),
            PlatformError::Server(_) => Some(500),
            PlatformError::NotModified(_)
            | PlatformError::MessageNotFound(_)
            | PlatformError::CantEdit(_)
            | PlatformError::BadRequest(_) => Some(400),
            PlatformError::Forbidden(_) => Some(403),
            PlatformError::Network(_) | PlatformError::Unknown(_) => None,
        }
    }
}

impl From<PlatformError> for RelayError {
    fn from(err: PlatformError) -> Self {
        if let PlatformError::RateLimited { retry_after, .. } = &err {
            return RelayError::Throttled {
                retry_after: *retry_after,
                source: err,
            };
        }
        if err.is_permanent() || matches!(err, PlatformError::BadRequest(_)) {
            RelayError::PermanentSend(err)
        } else {
            RelayError::TransientSend(err)
        }
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for ZeptoRelay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration-related errors (invalid config, zero capacities, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation attempted on a closed or cancelled queue/stream
    #[error("Queue closed")]
    QueueClosed,

    /// A suspended consumer was released because the queue was cleared
    #[error("Queue cleared")]
    QueueCleared,

    /// Enqueue rejected under the `reject` drop policy
    #[error("Queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Provider-side throttling; recoverable
    #[error("Throttled: {source}")]
    Throttled {
        retry_after: Option<Duration>,
        source: PlatformError,
    },

    /// Send failed with a transient error and retries were exhausted
    #[error("Transient send failure: {0}")]
    TransientSend(PlatformError),

    /// Send failed with an error that retrying cannot fix
    #[error("Permanent send failure: {0}")]
    PermanentSend(PlatformError),

    /// State store failures (load/save hooks)
    #[error("Store error: {0}")]
    Store(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelayError {
    /// The platform error underneath a send failure, if any.
    pub fn platform(&self) -> Option<&PlatformError> {
        match self {
            RelayError::Throttled { source, .. } => Some(source),
            RelayError::TransientSend(e) | RelayError::PermanentSend(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` for provider-side throttling.
    pub fn is_throttle(&self) -> bool {
        matches!(self, RelayError::Throttled { .. })
    }
}

/// A specialized `Result` type for ZeptoRelay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::Config("rate_limit.global_capacity must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: rate_limit.global_capacity must be > 0"
        );
        assert_eq!(
            RelayError::QueueFull { capacity: 3 }.to_string(),
            "Queue full (capacity 3)"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RelayError = io_err.into();
        assert!(matches!(err, RelayError::Io(_)));
    }

    #[test]
    fn test_platform_error_is_retryable() {
        assert!(PlatformError::rate_limited(None, "429").is_retryable());
        assert!(PlatformError::Network("reset".into()).is_retryable());
        assert!(PlatformError::Server("502".into()).is_retryable());

        assert!(!PlatformError::NotModified("same".into()).is_retryable());
        assert!(!PlatformError::MessageNotFound("gone".into()).is_retryable());
        assert!(!PlatformError::CantEdit("old".into()).is_retryable());
        assert!(!PlatformError::BadRequest("entities".into()).is_retryable());
        assert!(!PlatformError::Forbidden("blocked".into()).is_retryable());
        assert!(!PlatformError::Unknown("???".into()).is_retryable());
    }

    #[test]
    fn test_platform_error_permanent() {
        assert!(PlatformError::MessageNotFound("x".into()).is_permanent());
        assert!(PlatformError::CantEdit("x".into()).is_permanent());
        assert!(PlatformError::Forbidden("x".into()).is_permanent());
        assert!(!PlatformError::Server("x".into()).is_permanent());
        assert!(!PlatformError::NotModified("x".into()).is_permanent());
    }

    #[test]
    fn test_platform_error_retry_after() {
        let err = PlatformError::rate_limited(Some(Duration::from_secs(7)), "flood");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert!(err.to_string().contains("retry after 7s"));
        assert_eq!(PlatformError::Server("x".into()).retry_after(), None);
    }

    #[test]
    fn test_platform_error_status_code() {
        assert_eq!(
            PlatformError::rate_limited(None, "x").status_code(),
            Some(429)
        );
        assert_eq!(PlatformError::Forbidden("x".into()).status_code(), Some(403));
        assert_eq!(PlatformError::Network("x".into()).status_code(), None);
    }

    #[test]
    fn test_platform_error_into_relay_error() {
        let err: RelayError =
            PlatformError::rate_limited(Some(Duration::from_secs(3)), "slow down").into();
        assert!(err.is_throttle());
        assert!(matches!(
            err,
            RelayError::Throttled {
                retry_after: Some(d),
                ..
            } if d == Duration::from_secs(3)
        ));

        let err: RelayError = PlatformError::MessageNotFound("gone".into()).into();
        assert!(matches!(err, RelayError::PermanentSend(_)));

        let err: RelayError = PlatformError::Server("502".into()).into();
        assert!(matches!(err, RelayError::TransientSend(_)));
        assert_eq!(err.platform(), Some(&PlatformError::Server("502".into())));
    }
}
