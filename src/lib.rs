//! WebSocket Fan-out Relay Library
//!
//! Every message a client sends is relayed to all other connected clients,
//! wrapped in a JSON envelope naming the sender.
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Hub` is the central actor owning the connection registry
//! - Each connection has an inbound pump (socket reader) and an outbound
//!   pump (socket writer), bridged to the hub by bounded channels
//! - Slow receivers are dropped when their outbound buffer is full, so one
//!   lagging client never stalls a broadcast
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use fanout_relay::{serve, Hub, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Arc::new(RelayConfig::default());
//!     let listener = TcpListener::bind(&config.bind_addr).await.unwrap();
//!     let (hub, handle) = Hub::new(config.hub_queue_capacity);
//!
//!     tokio::spawn(hub.run());
//!     serve(listener, handle, config).await;
//! }
//! ```

pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod heartbeat;
pub mod hub;
pub mod listener;
pub mod supervisor;
pub mod types;

// Re-export main types for convenience
pub use config::RelayConfig;
pub use connection::{Connection, Enqueue};
pub use envelope::Envelope;
pub use error::RelayError;
pub use hub::{Hub, HubCommand, HubHandle};
pub use listener::serve;
pub use supervisor::handle_connection;
pub use types::ConnectionId;
