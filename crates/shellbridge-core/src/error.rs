//! Error types for shellbridge.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for shellbridge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Control channel could not be opened or stopped responding
    #[error("Connection error: {0}")]
    Connection(String),

    /// Control channel is up but no focused window/tab/session could be resolved
    #[error("No active session: {0}")]
    NoActiveSession(String),

    /// Malformed or unexpected reply on the control channel
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Command matched a destructive pattern and was not confirmed
    #[error("Command blocked: matches destructive pattern '{pattern}'")]
    DestructiveCommandBlocked {
        /// The pattern that matched
        pattern: String,
        /// The command as submitted
        command: String,
    },

    /// Staging or delivering the command script failed
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// The terminal does not offer a required primitive
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Shell integration is not usable for this session
    #[error("Shell integration unavailable: {0}")]
    IntegrationUnavailable(String),

    /// Waiting for command output exceeded the caller's timeout (in ms).
    /// Reported as a warning, never as a failed call
    #[error(
        "Command did not finish within {}s; output may be incomplete",
        millis_as_secs(.0)
    )]
    CaptureTimeout(u64),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input or parameters (generic)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

/// Coarse error classification reported to callers in response envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Control channel unavailable or session context unresolvable
    ConnectionError,
    /// Policy gate; the caller must confirm to proceed
    DestructiveCommandBlocked,
    /// Script staging or delivery failed
    DispatchError,
    /// Collaborator is missing a required primitive
    UnsupportedOperation,
    /// Internal signal that selects the marker strategy
    IntegrationUnavailable,
    /// Soft timeout while collecting output
    CaptureTimeout,
    /// Anything else
    UnknownFailure,
}

fn millis_as_secs(ms: &u64) -> f64 {
    *ms as f64 / 1000.0
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection(_) | Error::NoActiveSession(_) | Error::Protocol(_) => {
                ErrorKind::ConnectionError
            }
            Error::DestructiveCommandBlocked { .. } => ErrorKind::DestructiveCommandBlocked,
            Error::Dispatch(_) | Error::Io(_) => ErrorKind::DispatchError,
            Error::Unsupported(_) => ErrorKind::UnsupportedOperation,
            Error::IntegrationUnavailable(_) => ErrorKind::IntegrationUnavailable,
            Error::CaptureTimeout(_) => ErrorKind::CaptureTimeout,
            Error::Config(_)
            | Error::Serialization(_)
            | Error::InvalidInput(_)
            | Error::Other(_) => ErrorKind::UnknownFailure,
        }
    }

    /// Whether the next call may succeed without caller intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::ConnectionError)
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
