//! Error types for taskdl
//!
//! Two families of errors live here:
//! - [`Error`] is returned synchronously by the controller and task manager
//!   (bad requests, unknown task IDs, illegal state transitions, config).
//! - [`BackendError`] is raised by a fetch backend inside a worker. It never
//!   reaches the caller of the controller; the worker records it on the task
//!   as a [`TaskFailure`] and the UI learns about it from the Failed event.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{DownloadMode, Platform, TaskId};

/// Result type alias for taskdl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for taskdl
#[derive(Debug, Error)]
pub enum Error {
    /// The request was rejected before admission
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// No task with this ID is registered
    #[error("task {id} not found")]
    NotFound {
        /// The task ID that was not found
        id: TaskId,
    },

    /// The requested operation is not allowed in the task's current state
    #[error("cannot {operation} task {id} in state {current_state}")]
    InvalidState {
        /// The task the operation was attempted on
        id: TaskId,
        /// The operation that was attempted (e.g., "pause", "resume", "remove")
        operation: String,
        /// The state that prevents the operation (e.g., "completed")
        current_state: String,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_tasks")
        key: Option<String>,
    },

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// Serialization error (config snapshot parsing)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for an [`Error::InvalidState`]
    pub(crate) fn invalid_state(
        id: &TaskId,
        operation: &str,
        current_state: impl std::fmt::Display,
    ) -> Self {
        Error::InvalidState {
            id: id.clone(),
            operation: operation.to_string(),
            current_state: current_state.to_string(),
        }
    }

    /// Shorthand for an [`Error::NotFound`]
    pub(crate) fn not_found(id: &TaskId) -> Self {
        Error::NotFound { id: id.clone() }
    }
}

/// Reasons a task request is rejected by `submit`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// URL / user identifier is empty or whitespace
    #[error("source URL or identifier must not be empty")]
    EmptySource,

    /// Source looks like a URL but cannot be parsed or uses an unsupported scheme
    #[error("invalid source URL {source_url}: {reason}")]
    InvalidUrl {
        /// The offending source
        source_url: String,
        /// Why it was rejected
        reason: String,
    },

    /// Platform name is not in the catalogue
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    /// Mode name is not in the catalogue
    #[error("unknown download mode: {0}")]
    UnknownMode(String),

    /// The platform exists but does not offer this mode
    #[error("platform {platform} does not support mode {mode}")]
    UnsupportedMode {
        /// Requested platform
        platform: Platform,
        /// Requested mode
        mode: DownloadMode,
    },

    /// A numeric override must be strictly positive
    #[error("{field} must be greater than zero")]
    NonPositive {
        /// Name of the override field
        field: &'static str,
    },

    /// A string override must not be blank
    #[error("{field} must not be empty")]
    EmptyOverride {
        /// Name of the override field
        field: &'static str,
    },
}

/// Classification of a fetch backend failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendErrorKind {
    /// Connection, DNS, TLS, HTTP status or remote timeout problems
    Network,
    /// Response could not be understood (changed API, bad JSON, missing fields)
    Parse,
    /// Local disk problem while writing artifacts
    Filesystem,
    /// Anything the backend could not classify
    Unknown,
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackendErrorKind::Network => "network",
            BackendErrorKind::Parse => "parse",
            BackendErrorKind::Filesystem => "filesystem",
            BackendErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Error raised by a [`FetchBackend`](crate::backend::FetchBackend)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct BackendError {
    /// Failure classification
    pub kind: BackendErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl BackendError {
    /// Create a backend error of the given kind
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Network failure
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Network, message)
    }

    /// Response parsing failure
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Parse, message)
    }

    /// Filesystem failure
    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Filesystem, message)
    }

    /// Unclassified failure
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unknown, message)
    }
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::TimedOut
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe => BackendError::network(e.to_string()),
            ErrorKind::InvalidData | ErrorKind::UnexpectedEof => {
                BackendError::parse(e.to_string())
            }
            _ => BackendError::filesystem(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::parse(e.to_string())
    }
}

/// Classification stored on a failed task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Backend network failure
    Network,
    /// Backend parse failure
    Parse,
    /// Backend filesystem failure
    Filesystem,
    /// Unclassified backend failure
    Unknown,
    /// No progress observed within the configured timeout
    Timeout,
}

impl From<BackendErrorKind> for FailureKind {
    fn from(kind: BackendErrorKind) -> Self {
        match kind {
            BackendErrorKind::Network => FailureKind::Network,
            BackendErrorKind::Parse => FailureKind::Parse,
            BackendErrorKind::Filesystem => FailureKind::Filesystem,
            BackendErrorKind::Unknown => FailureKind::Unknown,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Network => "network",
            FailureKind::Parse => "parse",
            FailureKind::Filesystem => "filesystem",
            FailureKind::Unknown => "unknown",
            FailureKind::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Failure recorded on a task when it enters the Failed state
///
/// This is what the UI sees: a classification plus a message suitable for
/// display, and how many attempts were made before giving up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Failure classification
    pub kind: FailureKind,
    /// Human-readable summary
    pub message: String,
    /// Number of backend attempts made (1 = no retries)
    pub attempts: u32,
}

impl TaskFailure {
    /// Build a failure from the last backend error
    pub fn from_backend(error: &BackendError, attempts: u32) -> Self {
        Self {
            kind: error.kind.into(),
            message: error.message.clone(),
            attempts,
        }
    }

    /// Build a timeout failure
    pub fn timeout(window: std::time::Duration, attempts: u32) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: format!("no progress within {}s", window.as_secs_f64()),
            attempts,
        }
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}
