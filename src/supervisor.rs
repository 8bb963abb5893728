//! Per-connection supervisor
//!
//! Performs the WebSocket handshake, registers the connection with the hub
//! and runs the two pumps: the inbound pump is the only reader of the
//! socket, the outbound pump the only writer.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinError;
use tokio::time;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::connection::{Connection, OutboundReceiver};
use crate::envelope::Envelope;
use crate::error::RelayError;
use crate::heartbeat::{Heartbeat, PongRecorder, Probe};
use crate::hub::HubHandle;
use crate::types::ConnectionId;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Handle a new TCP connection
///
/// Returns once both pumps have exited and the connection is unregistered.
/// The error, if any, is the one that ended the inbound pump.
pub async fn handle_connection(
    stream: TcpStream,
    hub: HubHandle,
    config: Arc<RelayConfig>,
) -> Result<(), RelayError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake, capturing the display name from the query string
    let mut name = None;
    let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() != config.endpoint {
            return Err(not_found(req.uri().path()));
        }
        name = Some(display_name(req.uri().query(), &config.default_name));
        Ok(response)
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        callback,
        Some(transport_config(&config)),
    )
    .await?;
    let name = name.unwrap_or_else(|| config.default_name.clone());

    let (ws_sender, ws_receiver) = ws_stream.split();
    let (connection, outbound) = Connection::new(name.clone(), config.outbound_capacity);
    let id = connection.id;
    info!("Connection {} ('{}') established from {}", id, name, peer_addr);

    hub.register(connection).await?;

    let (pongs, heartbeat) = Heartbeat::new(config.ping_interval, config.pong_timeout);
    let mut write_task = tokio::spawn(outbound_pump(
        id,
        ws_sender,
        outbound,
        heartbeat,
        config.pong_timeout,
    ));

    // The inbound pump runs on this task; if the outbound pump ends first the
    // read half is dropped with it.
    let mut outbound_finished = false;
    let result = tokio::select! {
        result = inbound_pump(id, &name, ws_receiver, &hub, &pongs) => result,
        joined = &mut write_task => {
            report_outbound_exit(id, joined);
            debug!("Outbound pump ended first for {}", id);
            outbound_finished = true;
            Ok(())
        }
    };

    match &result {
        Err(e) if e.is_size_limit() => {
            warn!("Connection {} exceeded max message size: {}", id, e)
        }
        Err(e) => debug!("Read error from {}: {}", id, e),
        Ok(()) => debug!("Inbound pump ended for {}", id),
    }

    // Closes the outbound buffer; the outbound pump then sends a close frame
    if hub.unregister(id).await.is_err() {
        debug!("Hub already closed while unregistering {}", id);
    }
    if !outbound_finished {
        report_outbound_exit(id, write_task.await);
    }

    info!("Connection {} ('{}') closed", id, name);

    result
}

/// Read frames, wrap data messages in envelopes and hand them to the hub
async fn inbound_pump(
    id: ConnectionId,
    name: &str,
    mut receiver: WsSource,
    hub: &HubHandle,
    pongs: &PongRecorder,
) -> Result<(), RelayError> {
    while let Some(msg) = receiver.next().await {
        let content = match msg? {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
            Message::Close(frame) => {
                debug!("Connection {} sent close frame: {:?}", id, frame);
                return Ok(());
            }
            Message::Ping(_) => {
                // Pong is queued automatically by tungstenite
                debug!("Ping from {}", id);
                continue;
            }
            Message::Pong(_) => {
                debug!("Pong from {}", id);
                pongs.record();
                continue;
            }
            Message::Frame(_) => continue,
        };

        let payload = Envelope::new(name, content).encode()?;
        debug!("Received message from {}: {}", id, payload);
        hub.broadcast(id, payload.into()).await?;
    }

    Ok(())
}

/// Drain the outbound buffer into the socket and keep the peer probed
///
/// Every write is bounded by `write_timeout` so a peer that stopped reading
/// cannot park the pump past its liveness deadline.
async fn outbound_pump(
    id: ConnectionId,
    mut sender: WsSink,
    mut outbound: OutboundReceiver,
    mut heartbeat: Heartbeat,
    write_timeout: Duration,
) {
    loop {
        tokio::select! {
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    let frame = Message::Text(payload.to_string());
                    if let Err(e) = write_frame(&mut sender, frame, write_timeout).await {
                        debug!("Write error to {}: {}", id, e);
                        break;
                    }
                }
                None => {
                    debug!("Hub closed buffer for {}", id);
                    let _ = write_frame(&mut sender, Message::Close(None), write_timeout).await;
                    break;
                }
            },
            probe = heartbeat.tick() => match probe {
                Probe::Ping => {
                    let frame = Message::Ping(Vec::new());
                    if let Err(e) = write_frame(&mut sender, frame, write_timeout).await {
                        debug!("Ping to {} failed: {}", id, e);
                        break;
                    }
                }
                Probe::Expired => {
                    warn!("Connection {} missed pong deadline, closing", id);
                    break;
                }
            },
        }
    }

    let _ = time::timeout(write_timeout, sender.close()).await;
    debug!("Outbound pump ended for {}", id);
}

/// Log a panicked or aborted outbound pump; returns whether it failed
fn report_outbound_exit(id: ConnectionId, joined: Result<(), JoinError>) -> bool {
    match joined {
        Ok(()) => false,
        Err(e) => {
            error!("Outbound pump for {} failed: {}", id, e);
            true
        }
    }
}

/// Send one frame, giving up after `limit`
async fn write_frame<S>(sink: &mut S, frame: Message, limit: Duration) -> Result<(), RelayError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    match time::timeout(limit, sink.send(frame)).await {
        Ok(sent) => Ok(sent?),
        Err(_) => Err(RelayError::WriteTimeout(limit)),
    }
}

/// Transport settings derived from the relay config
fn transport_config(config: &RelayConfig) -> WebSocketConfig {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config.max_frame_size = Some(config.max_message_size);
    ws_config
}

/// Extract the `name` query parameter, falling back to `default`
fn display_name(query: Option<&str>, default: &str) -> String {
    query
        .and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == "name")
                .map(|(_, value)| value.into_owned())
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn not_found(path: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(format!("No endpoint at {}", path)));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
