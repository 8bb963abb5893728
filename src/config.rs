//! Relay configuration
//!
//! Defaults live in constants. The bind address comes from the first command
//! line argument; the remaining knobs can be overridden through `RELAY_*`
//! environment variables.

use std::time::Duration;

use crate::error::RelayError;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Path of the upgrade endpoint
pub const DEFAULT_ENDPOINT: &str = "/ws";

/// Largest inbound message accepted, in bytes
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512;

/// Messages buffered per connection before it is considered lagging
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Channel buffer size for hub commands
pub const DEFAULT_HUB_QUEUE_CAPACITY: usize = 256;

/// Period between keepalive pings
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(54);

/// How long a peer may go without answering a ping
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Display name used when the client supplies none
pub const DEFAULT_NAME: &str = "Anonymous";

/// Runtime settings for the relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the listener binds to
    pub bind_addr: String,
    /// Path accepted for WebSocket upgrades
    pub endpoint: String,
    /// Largest inbound message, in bytes
    pub max_message_size: usize,
    /// Per-connection outbound buffer size, in messages
    pub outbound_capacity: usize,
    /// Hub command channel size
    pub hub_queue_capacity: usize,
    /// Period between keepalive pings
    pub ping_interval: Duration,
    /// Pong deadline; also bounds each socket write
    pub pong_timeout: Duration,
    /// Display name for clients that supply none
    pub default_name: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_ADDR.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            hub_queue_capacity: DEFAULT_HUB_QUEUE_CAPACITY,
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
            default_name: DEFAULT_NAME.to_string(),
        }
    }
}

impl RelayConfig {
    /// Build the configuration from process arguments and environment
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_sources(std::env::args().nth(1), |key| std::env::var(key).ok())
    }

    /// Build the configuration from an optional address and a variable lookup
    pub fn from_sources(
        addr: Option<String>,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, RelayError> {
        let mut config = Self::default();

        if let Some(addr) = addr {
            config.bind_addr = addr;
        }
        if let Some(size) = parse_var(&var, "RELAY_MAX_MESSAGE_SIZE")? {
            config.max_message_size = size;
        }
        if let Some(capacity) = parse_var(&var, "RELAY_OUTBOUND_CAPACITY")? {
            config.outbound_capacity = capacity;
        }
        if let Some(secs) = parse_var(&var, "RELAY_PING_INTERVAL_SECS")? {
            config.ping_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&var, "RELAY_PONG_TIMEOUT_SECS")? {
            config.pong_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the relay cannot run with
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.max_message_size == 0 {
            return Err(RelayError::Config("max message size must be non-zero".into()));
        }
        if self.outbound_capacity == 0 || self.hub_queue_capacity == 0 {
            return Err(RelayError::Config("queue capacities must be non-zero".into()));
        }
        if self.ping_interval.is_zero() || self.ping_interval >= self.pong_timeout {
            return Err(RelayError::Config(format!(
                "ping interval ({:?}) must be non-zero and shorter than pong timeout ({:?})",
                self.ping_interval, self.pong_timeout
            )));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, RelayError> {
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RelayError::Config(format!("{} has invalid value '{}'", key, raw))),
        None => Ok(None),
    }
}
