//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Every
//! variant maps onto a wire [`ErrorStatus`] so that remote callers receive a
//! structured error frame instead of a dropped envelope.

use crate::wire::{ErrorCode, ErrorStatus};
use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the fabric.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed registration payload or request envelope.
    #[error("decode error: {0}")]
    Decode(String),

    /// Backing-file write failed. The in-memory state was already applied.
    #[error("persist error: {0}")]
    Persist(String),

    /// An address could not be bound.
    #[error("bind error: {0}")]
    Bind(String),

    /// Unknown id at lookup time.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unknown id at route time.
    #[error("invalid service: {0}")]
    InvalidService(String),

    /// Reply did not start with the expected signature, or was malformed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No reply after every attempt was spent.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The remote end answered with a non-empty error status.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(ErrorStatus),

    /// Local argument validation (ids, endpoints, config).
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Convert to the status carried in the error frame of a reply.
    pub fn to_error_status(&self) -> ErrorStatus {
        match self {
            Error::Decode(msg) | Error::Validation(msg) => {
                ErrorStatus::new(ErrorCode::DecodeFail, msg)
            }
            Error::Serialization(e) => ErrorStatus::new(ErrorCode::DecodeFail, e.to_string()),
            Error::Bind(msg) => ErrorStatus::new(ErrorCode::BindFail, msg),
            Error::NotFound(msg) => ErrorStatus::new(ErrorCode::NotFound, msg),
            Error::InvalidService(msg) => ErrorStatus::new(ErrorCode::InvalidService, msg),
            Error::ServiceUnavailable(status) => status.clone(),
            Error::Protocol(msg) | Error::Timeout(msg) => {
                ErrorStatus::new(ErrorCode::Unavailable, msg)
            }
            Error::Io(e) => ErrorStatus::new(ErrorCode::Receive, e.to_string()),
            Error::Persist(msg) | Error::Internal(msg) => {
                ErrorStatus::new(ErrorCode::Internal, msg)
            }
        }
    }

    /// Whether a failed exchange may be repeated on a fresh channel.
    ///
    /// Signature mismatches and remote error statuses are permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Io(_))
    }
}

// Convenience constructors
impl Error {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn persist(msg: impl Into<String>) -> Self {
        Self::Persist(msg.into())
    }

    pub fn bind(msg: impl Into<String>) -> Self {
        Self::Bind(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_service(msg: impl Into<String>) -> Self {
        Self::InvalidService(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<ErrorStatus> for Error {
    fn from(status: ErrorStatus) -> Self {
        Error::ServiceUnavailable(status)
    }
}
