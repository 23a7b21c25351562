//! Client configuration, loadable from TOML.

use std::{path::Path, time::Duration};

use {secrecy::Secret, serde::Deserialize};

use deckhand_protocol::{
    ClientInfo, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION, REQUEST_TIMEOUT_MS, roles, scopes,
};

use crate::{
    backoff::BackoffPolicy,
    error::{Error, Result},
};

/// Gateway used when neither a flag, an env var nor a config file names one.
pub const DEFAULT_GATEWAY_URL: &str = "ws://localhost:18789";

/// Client-side configuration. Every field has a default, so an empty TOML
/// document is a valid config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Gateway WebSocket URL.
    pub url: String,

    /// Bearer token sent in the `connect` request.
    pub token: Option<Secret<String>>,

    /// How long a request may stay unanswered before it is rejected.
    pub request_timeout_ms: u64,

    pub reconnect: ReconnectConfig,

    pub min_protocol: u32,
    pub max_protocol: u32,

    /// Client descriptor announced during the handshake.
    pub client: ClientDescriptor,

    pub role: String,
    pub scopes: Vec<String>,
    pub caps: Vec<String>,
    pub commands: Vec<String>,
    pub permissions: serde_json::Map<String, serde_json::Value>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            token: None,
            request_timeout_ms: REQUEST_TIMEOUT_MS,
            reconnect: ReconnectConfig::default(),
            min_protocol: MIN_PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client: ClientDescriptor::default(),
            role: roles::OPERATOR.to_string(),
            scopes: vec![scopes::READ.to_string(), scopes::WRITE.to_string()],
            caps: Vec::new(),
            commands: Vec::new(),
            permissions: serde_json::Map::new(),
        }
    }
}

impl ClientConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| Error::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::external(format!("failed to read {}", path.display()), e))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_protocol > self.max_protocol {
            return Err(Error::Config(format!(
                "min_protocol ({}) is greater than max_protocol ({})",
                self.min_protocol, self.max_protocol
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::Config("request_timeout_ms must be positive".into()));
        }
        self.reconnect.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn credential(&self) -> Credential {
        match &self.token {
            Some(token) => Credential::Token(token.clone()),
            None => Credential::None,
        }
    }
}

/// Reconnect backoff parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            multiplier: 1.5,
            max_delay_ms: 30_000,
        }
    }
}

impl ReconnectConfig {
    fn validate(&self) -> Result<()> {
        if self.initial_delay_ms == 0 {
            return Err(Error::Config(
                "reconnect.initial_delay_ms must be positive".into(),
            ));
        }
        if !(self.multiplier >= 1.0 && self.multiplier.is_finite()) {
            return Err(Error::Config(format!(
                "reconnect.multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(Error::Config(
                "reconnect.max_delay_ms must not be below initial_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.initial_delay_ms),
            multiplier: self.multiplier,
            max: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientDescriptor {
    pub id: String,
    pub display_name: Option<String>,
    pub version: String,
    pub platform: String,
    pub mode: String,
}

impl Default for ClientDescriptor {
    fn default() -> Self {
        Self {
            id: "agent-dashboard".to_string(),
            display_name: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
            mode: "ui".to_string(),
        }
    }
}

impl From<&ClientDescriptor> for ClientInfo {
    fn from(desc: &ClientDescriptor) -> Self {
        Self {
            id: desc.id.clone(),
            display_name: desc.display_name.clone(),
            version: desc.version.clone(),
            platform: desc.platform.clone(),
            mode: desc.mode.clone(),
        }
    }
}

/// Authentication material presented in the `connect` request.
///
/// A device signature, when a signer is installed on the client, is sent in
/// addition to whatever this carries.
#[derive(Clone, Default)]
pub enum Credential {
    #[default]
    None,
    Token(Secret<String>),
}

impl Credential {
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token(Secret::new(token.into()))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Token(_) => f.write_str("Token([REDACTED])"),
        }
    }
}
