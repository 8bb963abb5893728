//! Distribution hub actor
//!
//! The hub is the single owner of the connection registry. Every
//! registration, unregistration and broadcast arrives as a `HubCommand` on
//! one mpsc channel and is handled to completion before the next, so a
//! broadcast always iterates a consistent registry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connection::{Connection, Enqueue, Payload};
use crate::envelope::Envelope;
use crate::error::RelayError;
use crate::types::ConnectionId;

/// Commands sent from connection supervisors to the hub
#[derive(Debug)]
pub enum HubCommand {
    /// New connection completed its handshake
    Register { connection: Connection },
    /// Connection's inbound pump has exited
    Unregister { id: ConnectionId },
    /// Serialized envelope received from `origin`
    Broadcast { origin: ConnectionId, payload: Payload },
    /// Report the number of registered connections
    ConnectionCount { reply: oneshot::Sender<usize> },
}

/// The hub actor
///
/// Holds the registry and processes commands until every `HubHandle` is
/// dropped.
pub struct Hub {
    /// Registered connections: ConnectionId -> Connection
    connections: HashMap<ConnectionId, Connection>,
    /// Command receiver channel
    receiver: mpsc::Receiver<HubCommand>,
}

impl Hub {
    /// Create a hub and the handle used to talk to it
    pub fn new(queue_capacity: usize) -> (Self, HubHandle) {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let hub = Self {
            connections: HashMap::new(),
            receiver,
        };
        (hub, HubHandle { sender })
    }

    /// Run the hub event loop
    pub async fn run(mut self) {
        info!("Hub started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("Hub shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { connection } => self.handle_register(connection),
            HubCommand::Unregister { id } => self.handle_unregister(id),
            HubCommand::Broadcast { origin, payload } => self.handle_broadcast(origin, payload),
            HubCommand::ConnectionCount { reply } => {
                let _ = reply.send(self.connections.len());
            }
        }
    }

    /// Handle new connection registration
    fn handle_register(&mut self, connection: Connection) {
        let id = connection.id;
        let name = connection.name.clone();

        if self.connections.insert(id, connection).is_some() {
            warn!("Connection {} registered twice, replacing previous handle", id);
        }

        info!(
            "Connection {} ('{}') registered, total: {}",
            id,
            name,
            self.connections.len()
        );
    }

    /// Handle connection removal
    ///
    /// Removing the handle drops the outbound sender, closing the buffer.
    fn handle_unregister(&mut self, id: ConnectionId) {
        if let Some(connection) = self.connections.remove(&id) {
            info!(
                "Connection {} ('{}') unregistered, total: {}",
                id,
                connection.name,
                self.connections.len()
            );
        }
    }

    /// Handle fan-out of one envelope
    ///
    /// Connections whose buffer is full or closed are removed after the pass.
    fn handle_broadcast(&mut self, origin: ConnectionId, payload: Payload) {
        let envelope = match Envelope::decode(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Discarding malformed envelope from {}: {}", origin, e);
                return;
            }
        };

        let mut delivered = 0usize;
        let mut dropped = Vec::new();

        for (id, connection) in &self.connections {
            if *id == origin {
                continue;
            }
            match connection.try_enqueue(Arc::clone(&payload)) {
                Enqueue::Enqueued => delivered += 1,
                outcome => dropped.push((*id, outcome)),
            }
        }

        for (id, outcome) in dropped {
            if let Some(connection) = self.connections.remove(&id) {
                match outcome {
                    Enqueue::Full => warn!(
                        "Connection {} ('{}') send buffer full, removing",
                        id, connection.name
                    ),
                    _ => debug!(
                        "Connection {} ('{}') buffer already closed, removing",
                        id, connection.name
                    ),
                }
            }
        }

        debug!(
            "Broadcast from '{}' delivered to {} connection(s)",
            envelope.sender, delivered
        );
    }
}

/// Cloneable handle for sending commands to the hub
#[derive(Debug, Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Add a connection to the registry
    pub async fn register(&self, connection: Connection) -> Result<(), RelayError> {
        self.send(HubCommand::Register { connection }).await
    }

    /// Remove a connection from the registry, closing its outbound buffer
    pub async fn unregister(&self, id: ConnectionId) -> Result<(), RelayError> {
        self.send(HubCommand::Unregister { id }).await
    }

    /// Fan a serialized envelope out to every connection except `origin`
    pub async fn broadcast(&self, origin: ConnectionId, payload: Payload) -> Result<(), RelayError> {
        self.send(HubCommand::Broadcast { origin, payload }).await
    }

    /// Number of currently registered connections
    pub async fn connection_count(&self) -> Result<usize, RelayError> {
        let (reply, response) = oneshot::channel();
        self.send(HubCommand::ConnectionCount { reply }).await?;
        response.await.map_err(|_| RelayError::HubClosed)
    }

    async fn send(&self, cmd: HubCommand) -> Result<(), RelayError> {
        self.sender.send(cmd).await.map_err(|_| RelayError::HubClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::OutboundReceiver;

    fn register(hub: &mut Hub, name: &str, capacity: usize) -> (ConnectionId, OutboundReceiver) {
        let (connection, rx) = Connection::new(name, capacity);
        let id = connection.id;
        hub.handle_command(HubCommand::Register { connection });
        (id, rx)
    }

    fn broadcast(hub: &mut Hub, origin: ConnectionId, sender: &str, content: &str) {
        let payload: Payload = Envelope::new(sender, content).encode().unwrap().into();
        hub.handle_command(HubCommand::Broadcast { origin, payload });
    }

    fn received(rx: &mut OutboundReceiver) -> Option<Envelope> {
        rx.try_recv()
            .ok()
            .map(|payload| Envelope::decode(&payload).unwrap())
    }

    #[test]
    fn test_broadcast_reaches_everyone_but_sender() {
        let (mut hub, _handle) = Hub::new(8);
        let (a, mut rx_a) = register(&mut hub, "A", 8);
        let (_b, mut rx_b) = register(&mut hub, "B", 8);
        let (_c, mut rx_c) = register(&mut hub, "C", 8);

        broadcast(&mut hub, a, "A", "hi");

        let expected = Envelope::new("A", "hi");
        assert_eq!(received(&mut rx_b), Some(expected.clone()));
        assert_eq!(received(&mut rx_c), Some(expected));
        assert_eq!(received(&mut rx_a), None);
    }

    #[test]
    fn test_sender_exclusion_uses_id_not_name() {
        let (mut hub, _handle) = Hub::new(8);
        let (first, mut rx_first) = register(&mut hub, "Anonymous", 8);
        let (_second, mut rx_second) = register(&mut hub, "Anonymous", 8);

        broadcast(&mut hub, first, "Anonymous", "same name");

        assert_eq!(received(&mut rx_first), None);
        assert_eq!(
            received(&mut rx_second),
            Some(Envelope::new("Anonymous", "same name"))
        );
    }

    #[test]
    fn test_per_sender_order_preserved() {
        let (mut hub, _handle) = Hub::new(8);
        let (a, _rx_a) = register(&mut hub, "A", 8);
        let (_b, mut rx_b) = register(&mut hub, "B", 8);

        for i in 0..5 {
            broadcast(&mut hub, a, "A", &i.to_string());
        }

        for i in 0..5 {
            assert_eq!(received(&mut rx_b).unwrap().content, i.to_string());
        }
        assert_eq!(received(&mut rx_b), None);
    }

    #[test]
    fn test_full_buffer_drops_receiver() {
        let (mut hub, _handle) = Hub::new(8);
        let (a, mut rx_a) = register(&mut hub, "A", 1);
        let (b, _rx_b) = register(&mut hub, "B", 8);
        let (c, _rx_c) = register(&mut hub, "C", 8);

        // A is stalled: first message fills its buffer, second overflows
        broadcast(&mut hub, b, "B", "first");
        assert!(hub.connections.contains_key(&a));
        broadcast(&mut hub, b, "B", "second");
        assert!(!hub.connections.contains_key(&a));
        assert_eq!(hub.connections.len(), 2);

        broadcast(&mut hub, c, "C", "after drop");

        // A sees what was buffered before the drop, then end of stream
        assert_eq!(received(&mut rx_a), Some(Envelope::new("B", "first")));
        assert!(matches!(
            rx_a.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_closed_buffer_is_removed() {
        let (mut hub, _handle) = Hub::new(8);
        let (a, _rx_a) = register(&mut hub, "A", 8);
        let (b, rx_b) = register(&mut hub, "B", 8);
        drop(rx_b);

        broadcast(&mut hub, a, "A", "anyone there?");

        assert!(!hub.connections.contains_key(&b));
        assert_eq!(hub.connections.len(), 1);
    }

    #[test]
    fn test_unregister_closes_buffer_and_is_idempotent() {
        let (mut hub, _handle) = Hub::new(8);
        let (a, mut rx_a) = register(&mut hub, "A", 8);
        let (_b, _rx_b) = register(&mut hub, "B", 8);

        hub.handle_command(HubCommand::Unregister { id: a });
        assert_eq!(hub.connections.len(), 1);
        hub.handle_command(HubCommand::Unregister { id: a });
        assert_eq!(hub.connections.len(), 1);

        assert!(matches!(
            rx_a.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        let (mut hub, _handle) = Hub::new(8);
        let (_a, _rx_a) = register(&mut hub, "A", 8);

        hub.handle_command(HubCommand::Unregister {
            id: ConnectionId::new(),
        });

        assert_eq!(hub.connections.len(), 1);
    }

    #[test]
    fn test_malformed_envelope_is_discarded() {
        let (mut hub, _handle) = Hub::new(8);
        let (a, _rx_a) = register(&mut hub, "A", 8);
        let (_b, mut rx_b) = register(&mut hub, "B", 8);

        hub.handle_command(HubCommand::Broadcast {
            origin: a,
            payload: Arc::from("{not an envelope"),
        });
        assert_eq!(received(&mut rx_b), None);
        assert_eq!(hub.connections.len(), 2);

        broadcast(&mut hub, a, "A", "still works");
        assert_eq!(received(&mut rx_b), Some(Envelope::new("A", "still works")));
    }

    #[test]
    fn test_double_register_replaces() {
        let (mut hub, _handle) = Hub::new(8);
        let id = ConnectionId::new();
        let (first, mut rx_first) = Connection::with_id(id, "A", 8);
        let (second, _rx_second) = Connection::with_id(id, "A", 8);

        hub.handle_command(HubCommand::Register { connection: first });
        hub.handle_command(HubCommand::Register { connection: second });

        assert_eq!(hub.connections.len(), 1);
        assert!(matches!(
            rx_first.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_actor_via_handle() {
        let (hub, handle) = Hub::new(8);
        tokio::spawn(hub.run());

        let (a, _rx_a) = Connection::new("A", 8);
        let (b, mut rx_b) = Connection::new("B", 8);
        let a_id = a.id;
        let b_id = b.id;

        handle.register(a).await.unwrap();
        handle.register(b).await.unwrap();
        assert_eq!(handle.connection_count().await.unwrap(), 2);

        let payload: Payload = Envelope::new("A", "hello").encode().unwrap().into();
        handle.broadcast(a_id, payload).await.unwrap();
        let got = rx_b.recv().await.unwrap();
        assert_eq!(Envelope::decode(&got).unwrap(), Envelope::new("A", "hello"));

        handle.unregister(b_id).await.unwrap();
        assert!(rx_b.recv().await.is_none());
        assert_eq!(handle.connection_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_handle_reports_closed_hub() {
        let (hub, handle) = Hub::new(8);
        drop(hub);

        assert!(matches!(
            handle.unregister(ConnectionId::new()).await,
            Err(RelayError::HubClosed)
        ));
        assert!(matches!(
            handle.connection_count().await,
            Err(RelayError::HubClosed)
        ));
    }
}
