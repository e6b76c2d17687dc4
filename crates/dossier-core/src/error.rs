//! Error types for dossier.
//!
//! The taxonomy separates failures the caller must fix (validation, auth)
//! from failures that may succeed on a later attempt (transport, most
//! processing failures). [`Error::is_retryable`] is the single place that
//! decides which is which.

use thiserror::Error;

use crate::models::{ProcessingStatus, ValidationCode};

/// Result type alias using dossier's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], used for logging and API mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Auth,
    Transport,
    Processing,
    ProviderExhausted,
    Infrastructure,
}

/// Core error type for dossier operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Input rejected before any I/O. Never retryable.
    #[error("{message}")]
    Validation {
        code: ValidationCode,
        message: String,
    },

    /// Authentication failed (missing or rejected token)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Forbidden (authenticated but not authorized)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Network or storage failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// A collaborator call exceeded its time budget
    #[error("Timed out after {secs}s during {operation}")]
    Timeout { operation: String, secs: u64 },

    /// Extraction or analysis failed
    #[error("Processing error: {message}")]
    Processing { message: String, retryable: bool },

    /// A backend is missing or misconfigured (e.g. schema absent, model not found)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Every enrichment provider in a chain failed
    #[error("All enrichment providers exhausted: {0}")]
    ProviderExhausted(String),

    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Source record not found
    #[error("Source record not found: {0}")]
    SourceNotFound(uuid::Uuid),

    /// Status change not permitted by the processing state machine
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ProcessingStatus,
        to: ProcessingStatus,
    },

    /// Retry requested for something that must not be retried
    #[error("Not retryable: {0}")]
    NotRetryable(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP request failed in a way that is not a transport issue
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a validation error.
    pub fn validation(code: ValidationCode, message: impl Into<String>) -> Self {
        Error::Validation {
            code,
            message: message.into(),
        }
    }

    /// Build a retryable processing error.
    pub fn processing(message: impl Into<String>) -> Self {
        Error::Processing {
            message: message.into(),
            retryable: true,
        }
    }

    /// Build a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        Error::Timeout {
            operation: operation.into(),
            secs,
        }
    }

    /// Classify a non-success HTTP status from a collaborator.
    ///
    /// 5xx, 408 and 429 are transient. 401/403 are auth failures. Any other
    /// 4xx means the request itself is wrong and will not succeed unchanged.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Error::Unauthorized(message),
            403 => Error::Forbidden(message),
            404 => Error::NotFound(message),
            408 | 429 | 500..=599 => Error::Transport(format!("HTTP {}: {}", status, message)),
            _ => Error::Request(format!("HTTP {}: {}", status, message)),
        }
    }

    /// Whether the same operation may succeed if attempted again unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) | Error::Timeout { .. } | Error::Io(_) => true,
            Error::Processing { retryable, .. } => *retryable,
            Error::Database(_) => true,
            Error::Validation { .. }
            | Error::Unauthorized(_)
            | Error::Forbidden(_)
            | Error::Config(_)
            | Error::ProviderExhausted(_)
            | Error::NotFound(_)
            | Error::SourceNotFound(_)
            | Error::InvalidTransition { .. }
            | Error::NotRetryable(_)
            | Error::InvalidInput(_)
            | Error::Serialization(_)
            | Error::Request(_)
            | Error::Internal(_) => false,
        }
    }

    /// Classify this error into the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } | Error::InvalidInput(_) => ErrorKind::Validation,
            Error::Unauthorized(_) | Error::Forbidden(_) => ErrorKind::Auth,
            Error::Transport(_) | Error::Timeout { .. } => ErrorKind::Transport,
            Error::Processing { .. } | Error::Config(_) => ErrorKind::Processing,
            Error::ProviderExhausted(_) => ErrorKind::ProviderExhausted,
            _ => ErrorKind::Infrastructure,
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation { code, .. } => code.as_str(),
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::Transport(_) => "TRANSPORT_ERROR",
            Error::Timeout { .. } => "TIMEOUT",
            Error::Processing { .. } => "PROCESSING_ERROR",
            Error::Config(_) => "BACKEND_MISCONFIGURED",
            Error::ProviderExhausted(_) => "PROVIDER_EXHAUSTED",
            Error::NotFound(_) | Error::SourceNotFound(_) => "NOT_FOUND",
            Error::InvalidTransition { .. } => "INVALID_TRANSITION",
            Error::NotRetryable(_) => "NOT_RETRYABLE",
            Error::InvalidInput(_) => "INVALID_INPUT",
            _ => "INTERNAL_ERROR",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Error::Timeout {
                operation: "http request".to_string(),
                secs: 0,
            };
        }
        if let Some(status) = e.status() {
            return match status.as_u16() {
                401 => Error::Unauthorized(e.to_string()),
                403 => Error::Forbidden(e.to_string()),
                500..=599 => Error::Transport(e.to_string()),
                _ => Error::Request(e.to_string()),
            };
        }
        if e.is_connect() || e.is_request() || e.is_body() {
            return Error::Transport(e.to_string());
        }
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_validation_error_displays_message_only() {
        let err = Error::validation(
            ValidationCode::FileTooLarge,
            "File is too large. Please upload a file smaller than 5MB.",
        );
        assert_eq!(
            err.to_string(),
            "File is too large. Please upload a file smaller than 5MB."
        );
        assert_eq!(err.code(), "FILE_TOO_LARGE");
    }

    #[test]
    fn test_validation_and_auth_are_not_retryable() {
        assert!(!Error::validation(ValidationCode::InvalidType, "x").is_retryable());
        assert!(!Error::Unauthorized("no token".into()).is_retryable());
        assert!(!Error::Forbidden("denied".into()).is_retryable());
    }

    #[test]
    fn test_transport_and_timeout_are_retryable() {
        assert!(Error::Transport("503".into()).is_retryable());
        assert!(Error::timeout("storage upload", 30).is_retryable());
    }

    #[test]
    fn test_processing_retryable_flag_is_respected() {
        assert!(Error::processing("extractor crashed").is_retryable());
        let err = Error::Processing {
            message: "schema missing".into(),
            retryable: false,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_config_error_is_never_retryable() {
        let err = Error::Config("model not found".into());
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Processing);
    }

    #[test]
    fn test_error_kind_classification() {
        assert_eq!(
            Error::validation(ValidationCode::EmptyFileName, "x").kind(),
            ErrorKind::Validation
        );
        assert_eq!(Error::Unauthorized("x".into()).kind(), ErrorKind::Auth);
        assert_eq!(Error::Transport("x".into()).kind(), ErrorKind::Transport);
        assert_eq!(
            Error::ProviderExhausted("x".into()).kind(),
            ErrorKind::ProviderExhausted
        );
        assert_eq!(
            Error::SourceNotFound(Uuid::nil()).kind(),
            ErrorKind::Infrastructure
        );
    }

    #[test]
    fn test_from_http_status_classification() {
        assert!(Error::from_http_status(503, "unavailable").is_retryable());
        assert!(Error::from_http_status(429, "slow down").is_retryable());
        assert!(matches!(
            Error::from_http_status(401, "bad token"),
            Error::Unauthorized(_)
        ));
        assert!(matches!(
            Error::from_http_status(403, "denied"),
            Error::Forbidden(_)
        ));
        let bad_request = Error::from_http_status(400, "malformed");
        assert!(matches!(bad_request, Error::Request(_)));
        assert!(!bad_request.is_retryable());
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::timeout("text extraction", 60);
        assert_eq!(err.to_string(), "Timed out after 60s during text extraction");
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = Error::InvalidTransition {
            from: ProcessingStatus::Completed,
            to: ProcessingStatus::Processing,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition: COMPLETED -> PROCESSING"
        );
    }

    #[test]
    fn test_source_not_found_with_random_uuid() {
        let id = Uuid::new_v4();
        let err = Error::SourceNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_from_io_error_is_retryable() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Interrupted, "interrupted");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
