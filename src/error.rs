//! Link error types with numeric code mapping.
//!
//! [`LinkError`] is the central error type for the connection manager. Every
//! public operation reports failures through it; nothing is thrown past the
//! manager boundary. Each variant maps to a stable numeric code and converts
//! into the failure object delivered to acknowledgement callbacks.

use serde::Serialize;

/// Failure object handed to acknowledgement callbacks.
///
/// All failures follow this shape:
/// ```json
/// {
///   "success": false,
///   "error": "socket not connected",
///   "code": 2001
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct FailureBody {
    /// Always `false`.
    pub success: bool,
    /// Human-readable error message.
    pub error: String,
    /// Numeric error code (see code ranges on [`LinkError`]).
    pub code: u32,
}

/// Connection manager error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category                  |
/// |-----------|---------------------------|
/// | 1000–1999 | Configuration / validation |
/// | 2000–2999 | Connection state          |
/// | 3000–3999 | Transport / protocol      |
/// | 4000–4999 | Acknowledgement           |
#[derive(Debug, Clone, thiserror::Error)]
pub enum LinkError {
    /// Bearer token is empty or shorter than the minimum length.
    #[error("invalid authentication token")]
    InvalidToken,

    /// No backend address is configured.
    #[error("backend url not configured")]
    MissingBackendUrl,

    /// The configured backend address is a development placeholder.
    #[error("backend url is a placeholder: {0}")]
    PlaceholderBackendUrl(String),

    /// The configured backend address is malformed or uses an unknown scheme.
    #[error("invalid backend url: {0}")]
    InvalidBackendUrl(String),

    /// Event name is empty, too long or reserved by the protocol.
    #[error("invalid event name: {0}")]
    InvalidEventName(String),

    /// A caller-supplied argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No live connection is available.
    #[error("socket not connected")]
    NotConnected,

    /// The manager was used outside a tokio runtime.
    #[error("no tokio runtime available to drive the connection")]
    NoRuntime,

    /// The transport failed (WebSocket handshake, I/O, TLS).
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer sent a frame that could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The handshake did not complete in time.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The server refused the namespace connect (`connect_error`).
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The server did not acknowledge in time.
    #[error("acknowledgement timed out")]
    AckTimeout,

    /// The session ended before the server acknowledged.
    #[error("acknowledgement cancelled by disconnect")]
    AckCancelled,

    /// The server acknowledged with something other than an object.
    #[error("invalid response format")]
    InvalidResponse,
}

impl LinkError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidToken => 1001,
            Self::MissingBackendUrl => 1002,
            Self::PlaceholderBackendUrl(_) => 1003,
            Self::InvalidBackendUrl(_) => 1004,
            Self::InvalidEventName(_) => 1005,
            Self::InvalidArgument(_) => 1006,
            Self::NotConnected => 2001,
            Self::NoRuntime => 2002,
            Self::Transport(_) => 3001,
            Self::Protocol(_) => 3002,
            Self::HandshakeTimeout => 3003,
            Self::Serialization(_) => 3004,
            Self::Rejected(_) => 3005,
            Self::AckTimeout => 4001,
            Self::AckCancelled => 4002,
            Self::InvalidResponse => 4003,
        }
    }

    /// Returns `true` for configuration errors that prevent any connection
    /// attempt.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingBackendUrl | Self::PlaceholderBackendUrl(_) | Self::InvalidBackendUrl(_)
        )
    }

    /// Returns `true` for failures the session task retries on its own.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Protocol(_) | Self::HandshakeTimeout | Self::Rejected(_)
        )
    }

    /// Builds the failure object delivered to acknowledgement callbacks.
    #[must_use]
    pub fn to_failure(&self) -> FailureBody {
        FailureBody {
            success: false,
            error: self.to_string(),
            code: self.error_code(),
        }
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<url::ParseError> for LinkError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidBackendUrl(err.to_string())
    }
}
