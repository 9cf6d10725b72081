//! Error taxonomy shared across the gateway.
//!
//! Steady-state failures (transport, decode, reconciliation, diagnostics)
//! are recovered locally by their owning component and surface only through
//! the event bus and the diagnostic ledger. Only `Startup`, `Validation`
//! and `Configuration` errors are returned synchronously to API callers.

use thiserror::Error;

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway error types.
#[derive(Debug, Error)]
pub enum Error {
    /// A `start()` prerequisite is missing (absent bridge path, empty host).
    /// Fatal to that start call, never to the process.
    #[error("startup failed: {0}")]
    Startup(String),

    /// Connect/publish/subscribe failure on a transport link. Recovered by
    /// the reconnection state machine, never propagated past the adapter.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed inbound payload. Recovered by wrapping the raw bytes.
    #[error("decode error: {0}")]
    Decode(String),

    /// Device store write failure during reconciliation. The message is
    /// dropped; the connection stays alive.
    #[error("reconciliation error: {0}")]
    Reconciliation(String),

    /// A diagnostic check failed or timed out. Converted into a ledger
    /// record, never thrown back to the scheduler.
    #[error("diagnostic check error [{code}]: {message}")]
    DiagnosticCheck { code: String, message: String },

    /// Operation requires an active link.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// Invalid or unrecognized configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Input validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a diagnostic timeout failure.
    pub fn check_timeout(check: &str) -> Self {
        Self::DiagnosticCheck {
            code: "TIMEOUT".to_string(),
            message: format!("check '{}' exceeded its timeout", check),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl From<crate::storage::StorageError> for Error {
    fn from(e: crate::storage::StorageError) -> Self {
        Error::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_code() {
        let err = Error::check_timeout("mqtt-connectivity");
        match err {
            Error::DiagnosticCheck { code, .. } => assert_eq!(code, "TIMEOUT"),
            _ => panic!("expected DiagnosticCheck"),
        }
    }

    #[test]
    fn test_display_contains_context() {
        let err = Error::Startup("serial path /dev/ttyACM0 missing".to_string());
        assert!(err.to_string().contains("/dev/ttyACM0"));
    }
}
