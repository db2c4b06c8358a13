// ABOUTME: Backend channel construction for the ecosystem service.
// ABOUTME: One HTTP/2 channel with keep-alive and optional TLS, shared by every call.

use std::time::Duration;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use crate::error::TransportError;

/// HTTP/2 keep-alive pings on the backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    pub interval: Duration,
    /// How long to wait for a ping ack before the connection is considered dead.
    pub timeout: Duration,
    /// Keep pinging when no call is in flight.
    pub while_idle: bool,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(20),
            while_idle: true,
        }
    }
}

/// Where and how to reach the backend.
///
/// Accepts a URL or a bare `host:port`, which is treated as plaintext.
/// TLS follows the scheme: `https://` enables it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub address: String,
    pub keep_alive: Option<KeepAlive>,
    pub connect_timeout: Duration,
}

impl ChannelConfig {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let address = address.trim();
        let address = if address.is_empty() || address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };

        Self {
            address,
            keep_alive: Some(KeepAlive::default()),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Plaintext config for a host and port pair.
    pub fn from_host_port(host: &str, port: u16) -> Self {
        Self::new(format!("http://{}:{}", host.trim(), port))
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Replace the keep-alive settings; `None` disables pings.
    pub fn with_keep_alive(mut self, keep_alive: Option<KeepAlive>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn uses_tls(&self) -> bool {
        self.address.to_ascii_lowercase().starts_with("https://")
    }

    fn endpoint(&self) -> Result<Endpoint, TransportError> {
        let mut endpoint = Endpoint::from_shared(self.address.clone())
            .map_err(|e| TransportError::InvalidAddress(format!("{}: {}", self.address, e)))?
            .connect_timeout(self.connect_timeout);

        if self.uses_tls() {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new())
                .map_err(|e| TransportError::ConnectionFailed(format!("TLS config error: {}", e)))?;
        }

        if let Some(ka) = self.keep_alive {
            endpoint = endpoint
                .http2_keep_alive_interval(ka.interval)
                .keep_alive_timeout(ka.timeout)
                .keep_alive_while_idle(ka.while_idle);
        }

        Ok(endpoint)
    }
}

/// Connect eagerly, failing if the backend is unreachable.
pub async fn create_channel(config: &ChannelConfig) -> Result<Channel, TransportError> {
    let channel = config
        .endpoint()?
        .connect()
        .await
        .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", config.address, e)))?;

    tracing::debug!(
        address = %config.address,
        tls = config.uses_tls(),
        keep_alive = config.keep_alive.is_some(),
        "Backend channel connected"
    );
    Ok(channel)
}
