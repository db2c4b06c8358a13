// ABOUTME: Configuration loading and validation for the gateway.
// ABOUTME: TOML file with defaulted sections, overridable from the command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;
use xlm_grpc::{CallTimeouts, ChannelConfig, CAPABILITY_CHAT, CAPABILITY_EMBEDDING};

use crate::error::{GatewayError, Result};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub backend: BackendConfig,
    pub session: SessionConfig,
    pub timeouts: TimeoutConfig,
    pub server: ServerConfig,
    pub title: TitleConfig,
}

/// Where the ecosystem backend lives.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// gRPC address, e.g. "http://127.0.0.1:50051".
    pub address: String,
    pub connect_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:50051".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

/// What to do when the backend refuses capability negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationPolicy {
    /// Log and carry on with the backend's default providers.
    #[default]
    Continue,
    /// Treat the refusal as fatal.
    Abort,
}

/// Identity and chat target for this gateway process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub client_name: String,
    pub provider: String,
    pub model: String,
    pub capabilities: Vec<String>,
    pub negotiation_policy: NegotiationPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_name: "xlm-gateway".to_string(),
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            capabilities: vec![CAPABILITY_CHAT.to_string(), CAPABILITY_EMBEDDING.to_string()],
            negotiation_policy: NegotiationPolicy::Continue,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub unary_secs: u64,
    pub negotiation_secs: u64,
    pub stream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let defaults = CallTimeouts::default();
        Self {
            unary_secs: defaults.unary.as_secs(),
            negotiation_secs: defaults.negotiation.as_secs(),
            stream_secs: defaults.stream.as_secs(),
        }
    }
}

/// HTTP + WebSocket listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Upper bound on relay tasks running at once.
    pub max_concurrent_streams: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
            max_concurrent_streams: 32,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TitleConfig {
    /// Title published when generation fails.
    pub placeholder: String,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            placeholder: crate::title::DEFAULT_PLACEHOLDER.to_string(),
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub backend: Option<String>,
    pub listen_addr: Option<String>,
    pub client_name: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

impl GatewayConfig {
    /// Default location: `~/.config/xlm-gateway/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("xlm-gateway").join("config.toml"))
    }

    /// Load from `path`, or from the default location if it exists.
    ///
    /// An explicit path must exist; a missing default file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("failed to read config from {:?}: {}", path, e))
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| GatewayError::Config(format!("failed to parse config: {}", e)))
    }

    pub fn apply(mut self, overrides: Overrides) -> Result<Self> {
        if let Some(backend) = overrides.backend {
            self.backend.address = backend;
        }
        if let Some(listen_addr) = overrides.listen_addr {
            self.server.listen_addr = listen_addr;
        }
        if let Some(client_name) = overrides.client_name {
            self.session.client_name = client_name;
        }
        if let Some(provider) = overrides.provider {
            self.session.provider = provider;
        }
        if let Some(model) = overrides.model {
            self.session.model = model;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("backend.address", &self.backend.address),
            ("session.client_name", &self.session.client_name),
            ("session.provider", &self.session.provider),
            ("session.model", &self.session.model),
            ("server.listen_addr", &self.server.listen_addr),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(GatewayError::Config(format!("{} is required", field)));
            }
        }

        let timeouts = [
            ("timeouts.unary_secs", self.timeouts.unary_secs),
            ("timeouts.negotiation_secs", self.timeouts.negotiation_secs),
            ("timeouts.stream_secs", self.timeouts.stream_secs),
        ];
        for (field, secs) in timeouts {
            if secs == 0 {
                return Err(GatewayError::Config(format!("{} must be positive", field)));
            }
        }

        if self.server.max_concurrent_streams == 0 {
            return Err(GatewayError::Config(
                "server.max_concurrent_streams must be positive".into(),
            ));
        }
        if self.title.placeholder.trim().is_empty() {
            return Err(GatewayError::Config("title.placeholder is required".into()));
        }
        Ok(())
    }

    pub fn call_timeouts(&self) -> CallTimeouts {
        CallTimeouts {
            unary: Duration::from_secs(self.timeouts.unary_secs),
            negotiation: Duration::from_secs(self.timeouts.negotiation_secs),
            stream: Duration::from_secs(self.timeouts.stream_secs),
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig::new(&self.backend.address)
            .with_connect_timeout(Duration::from_secs(self.backend.connect_timeout_secs))
    }
}
