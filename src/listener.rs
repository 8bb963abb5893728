//! Accept loop
//!
//! Spawns one supervisor task per accepted TCP connection.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::RelayConfig;
use crate::hub::HubHandle;
use crate::supervisor::handle_connection;

/// Accept connections forever, handing each one to a supervisor task
pub async fn serve(listener: TcpListener, hub: HubHandle, config: Arc<RelayConfig>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let hub = hub.clone();
                let config = Arc::clone(&config);

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, hub, config).await {
                        warn!("Connection handler error for {}: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
