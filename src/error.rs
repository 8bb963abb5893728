//! Error types for the relay
//!
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Relay errors
///
/// Transport and codec failures are local to one connection. `Config` and
/// bind failures surfaced through `Io` are fatal at startup.
#[derive(Debug, Error)]
pub enum RelayError {
    /// WebSocket protocol error, including the size-limit capacity error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The hub actor has stopped and no longer accepts commands
    #[error("Hub closed")]
    HubClosed,

    /// A frame could not be written within the allowed time
    #[error("Write timed out after {0:?}")]
    WriteTimeout(std::time::Duration),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RelayError {
    /// Whether this error is the transport rejecting an oversized message
    pub fn is_size_limit(&self) -> bool {
        use tokio_tungstenite::tungstenite::error::{CapacityError, Error};

        matches!(
            self,
            RelayError::WebSocket(Error::Capacity(
                CapacityError::MessageTooLong { .. }
            ))
        )
    }
}
