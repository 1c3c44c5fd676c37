//! Error taxonomy for the voice engine.
//!
//! Propagation policy:
//!
//! - `Configuration` aborts session establishment outright.
//! - `Transport` tears the session down to `Disconnected`; reconnecting is
//!   the host's decision.
//! - `Protocol` errors are logged and dropped inside the read loop; they
//!   surface here only when the caller itself produced an unsendable message.
//! - Tool failures become structured results fed back to the model, never a
//!   host-level failure (see `tools`).
//! - `Device` failures are fatal to capture/playback only; an otherwise
//!   connected session stays up.

use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// Missing or invalid host-provided configuration (credentials, endpoint)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Control plane rejected the negotiation request or is unreachable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Duplex connection failed or dropped
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected wire message produced by this side
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Tool endpoint failure or watchdog expiry
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Microphone/output permission or hardware failure
    #[error("Device error: {0}")]
    Device(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation requires a live session
    #[error("Not connected")]
    NotConnected,
}

/// Result type for engine operations.
pub type VoiceResult<T> = Result<T, VoiceError>;

impl From<serde_json::Error> for VoiceError {
    fn from(e: serde_json::Error) -> Self {
        VoiceError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VoiceError::Configuration("api key missing".to_string());
        assert!(err.to_string().contains("Configuration error"));

        let err = VoiceError::NotConnected;
        assert_eq!(err.to_string(), "Not connected");
    }

    #[test]
    fn test_serde_error_conversion() {
        let bad = serde_json::from_str::<serde_json::Value>("{nope");
        let err: VoiceError = bad.unwrap_err().into();
        assert!(matches!(err, VoiceError::Serialization(_)));
    }
}
