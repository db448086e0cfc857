//! Unified error handling for the track sync engine.
//!
//! Every fallible operation reports through [`SyncError`] on its result
//! channel. Nothing here is thrown across task boundaries.

use std::fmt;

/// Unified error type for sync, store and recorder operations.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The remote store could not be reached (connect failure, timeout)
    NetworkUnreachable { message: String },
    /// The remote store answered with a non-2xx status
    ServerError { status: u16, message: String },
    /// Response body was missing or malformed
    DecodeError { message: String },
    /// A fetch for this remote ID is already in flight
    DuplicateInFlight { remote_id: String },
    /// A newer viewport query replaced this one; the result was discarded
    Superseded,
    /// Request rejected locally before any network call
    ValidationError { message: String },
    /// The persistence collaborator failed
    PersistenceError { message: String },
    /// Configuration error
    ConfigError { message: String },
    /// A referenced local record does not exist
    NotFound { message: String },
    /// Generic internal error
    Internal { message: String },
}

impl SyncError {
    /// Whether a caller should surface this error to the user.
    ///
    /// Superseded results are expected debounce behavior and never are.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, SyncError::Superseded)
    }

    /// Whether the error was raised before any network I/O happened.
    pub fn is_short_circuit(&self) -> bool {
        matches!(
            self,
            SyncError::ValidationError { .. } | SyncError::DuplicateInFlight { .. }
        )
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::NetworkUnreachable { message } => {
                write!(f, "Network unreachable: {}", message)
            }
            SyncError::ServerError { status, message } => {
                write!(f, "Server error ({}): {}", status, message)
            }
            SyncError::DecodeError { message } => {
                write!(f, "Could not decode response: {}", message)
            }
            SyncError::DuplicateInFlight { remote_id } => {
                write!(f, "Fetch for path '{}' is already in flight", remote_id)
            }
            SyncError::Superseded => write!(f, "Request superseded by a newer query"),
            SyncError::ValidationError { message } => {
                write!(f, "Validation error: {}", message)
            }
            SyncError::PersistenceError { message } => {
                write!(f, "Persistence error: {}", message)
            }
            SyncError::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            SyncError::NotFound { message } => write!(f, "Not found: {}", message),
            SyncError::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::DecodeError {
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            SyncError::ServerError {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else if e.is_decode() || e.is_body() {
            SyncError::DecodeError {
                message: e.to_string(),
            }
        } else if e.is_connect() || e.is_timeout() || e.is_request() {
            SyncError::NetworkUnreachable {
                message: e.to_string(),
            }
        } else {
            SyncError::Internal {
                message: e.to_string(),
            }
        }
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Extension trait for converting Option to SyncError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a not-found error.
    fn ok_or_not_found(self, what: &str) -> Result<T>;

    /// Convert Option to Result with a decode error (missing response field).
    fn ok_or_decode(self, field: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, what: &str) -> Result<T> {
        self.ok_or_else(|| SyncError::NotFound {
            message: what.to_string(),
        })
    }

    fn ok_or_decode(self, field: &str) -> Result<T> {
        self.ok_or_else(|| SyncError::DecodeError {
            message: format!("missing field '{}'", field),
        })
    }
}
