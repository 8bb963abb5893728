//! Connection handle held by the hub
//!
//! The hub owns the only sending half of each connection's outbound buffer.
//! Dropping the handle closes the buffer, which the outbound pump observes as
//! end of stream once the remaining messages are drained.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::types::ConnectionId;

/// Serialized envelope shared between all recipients of one broadcast
pub type Payload = Arc<str>;

/// Receiving half of an outbound buffer, drained by the outbound pump
pub type OutboundReceiver = mpsc::Receiver<Payload>;

/// Result of a non-blocking enqueue onto an outbound buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// The payload was queued
    Enqueued,
    /// The outbound pump has gone away
    Closed,
    /// The buffer is at capacity; the receiver is lagging
    Full,
}

/// A registered connection as seen by the hub
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ConnectionId,
    /// Display name supplied at upgrade time (not unique)
    pub name: String,
    /// Hub → outbound pump buffer
    outbound: mpsc::Sender<Payload>,
}

impl Connection {
    /// Create a connection with a fresh ID and an outbound buffer of
    /// `capacity` messages
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, OutboundReceiver) {
        Self::with_id(ConnectionId::new(), name, capacity)
    }

    /// Create a connection with a caller-chosen ID
    pub fn with_id(
        id: ConnectionId,
        name: impl Into<String>,
        capacity: usize,
    ) -> (Self, OutboundReceiver) {
        let (outbound, receiver) = mpsc::channel(capacity);
        let connection = Self {
            id,
            name: name.into(),
            outbound,
        };
        (connection, receiver)
    }

    /// Queue a payload without waiting for buffer space
    pub fn try_enqueue(&self, payload: Payload) -> Enqueue {
        match self.outbound.try_send(payload) {
            Ok(()) => Enqueue::Enqueued,
            Err(TrySendError::Full(_)) => Enqueue::Full,
            Err(TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }
}
