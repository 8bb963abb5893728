//! Envelope codec
//!
//! The wire format is a JSON object with exactly two fields, `sender` and
//! `content`. Encoding and decoding are pure; callers decide what to do
//! with a decode failure.

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// A single relayed message: who sent it and what they said
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    /// Display name of the sending connection
    pub sender: String,
    /// Message body as received from the sender
    pub content: String,
}

impl Envelope {
    /// Create an envelope for the given sender and content
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
        }
    }

    /// Serialize to a transport payload
    pub fn encode(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a transport payload
    pub fn decode(payload: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(payload)?)
    }
}
