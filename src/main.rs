//! WebSocket Fan-out Relay - Entry Point
//!
//! Starts the TCP listener and Hub actor, accepting connections.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fanout_relay::{serve, Hub, RelayConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=fanout_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fanout_relay=info")),
        )
        .init();

    // Bind address from the first argument, limits from RELAY_* variables
    let config = Arc::new(RelayConfig::from_env()?);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(
        "Fan-out relay listening on ws://{}{}",
        config.bind_addr, config.endpoint
    );

    let (hub, handle) = Hub::new(config.hub_queue_capacity);
    tokio::spawn(hub.run());

    info!("Hub actor started");

    serve(listener, handle, config).await;

    Ok(())
}
