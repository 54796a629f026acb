//! Error taxonomy for the gateway.
//!
//! Per-call failures use the stable six-code set that crosses the wire and
//! the bus reply alike (§6/§7). Config failures are fatal at startup and
//! never reach a bus caller.

use thiserror::Error;

/// Stable error codes returned to bus callers and (for the HTTP variant)
/// mapped onto HTTP statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A mandatory field was absent from the request.
    Mandatory = 1,
    /// No connection was available to service the request.
    NoConn = 2,
    /// The reply did not arrive within the configured timeout.
    Timeout = 3,
    /// The connection closed while the request was in flight.
    ConnClosed = 4,
    /// `SYNC_CONN` slot already occupied by another in-flight request.
    Busy = 5,
    /// Unclassified failure.
    System = 99,
}

impl ErrorCode {
    /// The numeric code as carried on the wire / in `NERROR_CODE`.
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::Mandatory => "MANDATORY_FIELD_MISSING",
            ErrorCode::NoConn => "NO_CONN",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ConnClosed => "CONN_CLOSED",
            ErrorCode::Busy => "BUSY",
            ErrorCode::System => "SYSTEM",
        };
        f.write_str(s)
    }
}

/// Errors produced by the dispatch core.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A per-call failure carrying one of the stable error codes and a
    /// human-readable message. Never fatal to the process.
    #[error("{code}: {message}")]
    Call {
        /// The stable error code.
        code: ErrorCode,
        /// Free-text detail for logs and bus replies.
        message: String,
    },

    /// Configuration could not be parsed or was internally inconsistent.
    /// Fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    /// The id space is exhausted (`IdAlloc` has no free short id).
    #[error("connection id space exhausted")]
    IdSpaceExhausted,

    /// Underlying I/O failure talking to a peer.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Build a per-call error.
    pub fn call(code: ErrorCode, message: impl Into<String>) -> Self {
        GatewayError::Call {
            code,
            message: message.into(),
        }
    }

    /// The stable error code for this failure, for callers that must map
    /// it back onto a bus reply or an HTTP status. `Io`/`IdSpaceExhausted`
    /// map onto `NO_CONN`/`SYSTEM` since they never reach a caller as a
    /// bare I/O error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            GatewayError::Call { code, .. } => *code,
            GatewayError::IdSpaceExhausted => ErrorCode::NoConn,
            GatewayError::Io(_) => ErrorCode::System,
            GatewayError::Config(_) => ErrorCode::System,
        }
    }
}

/// Convenience result alias used throughout the dispatch core.
pub type Result<T> = std::result::Result<T, GatewayError>;
