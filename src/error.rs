//! Error types for the client runtime.

use crate::types::Method;
use thiserror::Error;

/// Main error type for store and durable-storage operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid durable format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Durable store is locked by another process")]
    Locked,

    #[error("Persistence failure for {key}: {reason}")]
    Persistence { key: String, reason: String },

    #[error("Listener failure on {key}: {reason}")]
    Listener { key: String, reason: String },
}

impl From<serde_json::Error> for RuntimeError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            RuntimeError::Deserialization(e.to_string())
        } else {
            RuntimeError::Serialization(e.to_string())
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Error returned by a [`Transport`](crate::requests::Transport).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {status_text}")]
    Status { status: u16, status_text: String },

    /// No HTTP response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The call was cancelled before it completed.
    #[error("aborted")]
    Aborted,
}

impl TransportError {
    pub fn status(status: u16, status_text: impl Into<String>) -> Self {
        TransportError::Status {
            status,
            status_text: status_text.into(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TransportError::Aborted)
    }
}

/// Outcome of a failed dispatch.
///
/// Cloneable because every caller joined to a deduplicated request
/// receives the same error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("{method} {url} failed with HTTP {status}: {status_text}")]
    Status {
        method: Method,
        url: String,
        status: u16,
        status_text: String,
    },

    #[error("{method} {url} failed: {message}")]
    Network {
        method: Method,
        url: String,
        message: String,
    },

    #[error("{method} {url} was aborted")]
    Aborted { method: Method, url: String },

    #[error("request task failed: {0}")]
    Task(String),
}

impl RequestError {
    pub(crate) fn from_transport(method: Method, url: &str, err: TransportError) -> Self {
        let url = url.to_string();
        match err {
            TransportError::Status {
                status,
                status_text,
            } => RequestError::Status {
                method,
                url,
                status,
                status_text,
            },
            TransportError::Network(message) => RequestError::Network {
                method,
                url,
                message,
            },
            TransportError::Aborted => RequestError::Aborted { method, url },
        }
    }

    /// Whether this failure is a cancellation rather than a real error.
    pub fn is_aborted(&self) -> bool {
        matches!(self, RequestError::Aborted { .. })
    }

    /// HTTP status of the failure, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
