//! OBD-II Error Types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during a single OBD-II exchange
#[derive(Debug, Error)]
pub enum ObdError {
    /// Serial port I/O error
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Timeout waiting for response
    #[error("Timeout waiting for OBD response after {0}ms")]
    Timeout(u64),

    /// Invalid response from adapter
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Protocol not supported
    #[error("Protocol not supported: {0}")]
    UnsupportedProtocol(String),

    /// Adapter closed the stream
    #[error("OBD adapter disconnected")]
    Disconnected,

    /// Request issued on a closed link
    #[error("OBD link is closed")]
    Closed,
}

impl ObdError {
    /// Whether this error means the link itself is gone
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            ObdError::SerialError(_) | ObdError::Disconnected | ObdError::Closed
        )
    }
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}

/// Why establishing a link failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    /// Port could not be opened or the adapter stopped answering
    Unreachable,
    /// Discovery reported no usable parameters
    Unsupported,
    /// Settle and discovery did not finish within the connect timeout
    Timeout,
}

/// Fatal errors while opening and validating a link
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("OBD adapter at {port} is unreachable: {detail}")]
    Unreachable { port: String, detail: String },

    #[error("OBD adapter at {port} reports no supported parameters")]
    NoSupportedParameters { port: String },

    #[error("Vehicle does not support required parameters: {missing}")]
    MissingParameters { missing: String },

    #[error("OBD adapter did not finish initialising within {0:?}")]
    Timeout(Duration),
}

impl ConnectionError {
    /// Coarse failure category
    pub fn reason(&self) -> ConnectFailure {
        match self {
            ConnectionError::Unreachable { .. } => ConnectFailure::Unreachable,
            ConnectionError::NoSupportedParameters { .. }
            | ConnectionError::MissingParameters { .. } => ConnectFailure::Unsupported,
            ConnectionError::Timeout(_) => ConnectFailure::Timeout,
        }
    }
}
