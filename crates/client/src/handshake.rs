//! The `connect.challenge` → `connect` exchange: building the request and
//! interpreting the hello payload.

use {secrecy::ExposeSecret, serde_json::Value};

use deckhand_protocol::{
    ConnectAuth, ConnectParams, HelloOk, TICK_INTERVAL_MS, events::ChallengePayload,
};

use crate::{
    config::{ClientConfig, Credential},
    device::{DevicePayload, DeviceSigner, now_ms, sign_device},
    error::{Error, Result},
    scopes::GrantedScopes,
};

/// Negotiated server facts, replaced wholesale on every handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub protocol_version: Option<u32>,
    pub server_version: Option<String>,
    pub connection_id: Option<String>,
    pub supported_methods: Vec<String>,
    pub supported_events: Vec<String>,
    pub tick_interval_ms: u64,
}

/// Everything a successful handshake establishes.
#[derive(Debug, Clone)]
pub struct Session {
    pub server: ServerInfo,
    /// Opaque initial state blob (health, agents, channels, uptime, ...).
    pub snapshot: Option<Value>,
    pub scopes: GrantedScopes,
}

impl Session {
    /// Interpret the payload of a successful `connect` response.
    pub fn from_hello(payload: &Value) -> Result<Self> {
        let hello = HelloOk::from_payload(payload)
            .map_err(|e| Error::Handshake(format!("malformed hello payload: {e}")))?;
        let scopes = GrantedScopes::new(hello.scopes());
        let (server_version, connection_id) = match hello.server {
            Some(server) => (Some(server.version), Some(server.conn_id)),
            None => (None, None),
        };
        let features = hello.features.unwrap_or_default();
        Ok(Self {
            server: ServerInfo {
                protocol_version: hello.protocol,
                server_version: server_version.filter(|v| !v.is_empty()),
                connection_id: connection_id.filter(|c| !c.is_empty()),
                supported_methods: features.methods,
                supported_events: features.events,
                tick_interval_ms: hello
                    .policy
                    .map_or(TICK_INTERVAL_MS, |p| p.tick_interval_ms),
            },
            snapshot: hello.snapshot,
            scopes,
        })
    }
}

/// Assemble the `connect` request parameters.
pub fn connect_params(
    config: &ClientConfig,
    credential: &Credential,
    signer: Option<&dyn DeviceSigner>,
    challenge: &ChallengePayload,
) -> Result<ConnectParams> {
    let token = match credential {
        Credential::Token(token) => Some(token.expose_secret().as_str()),
        Credential::None => None,
    };

    let device = signer
        .map(|signer| {
            let payload = DevicePayload {
                device_id: signer.device_id(),
                client_id: &config.client.id,
                client_mode: &config.client.mode,
                role: &config.role,
                scopes: &config.scopes,
                signed_at_ms: now_ms(),
                token,
                nonce: challenge.nonce.as_deref().unwrap_or_default(),
            };
            sign_device(signer, &payload)
        })
        .transpose()
        .map_err(|e| Error::Handshake(format!("device signing failed: {e}")))?;

    let non_empty = |items: &Vec<String>| (!items.is_empty()).then(|| items.clone());

    Ok(ConnectParams {
        min_protocol: config.min_protocol,
        max_protocol: config.max_protocol,
        client: (&config.client).into(),
        role: Some(config.role.clone()),
        scopes: Some(config.scopes.clone()),
        caps: non_empty(&config.caps),
        commands: non_empty(&config.commands),
        permissions: (!config.permissions.is_empty()).then(|| config.permissions.clone()),
        device,
        auth: token.map(|token| ConnectAuth {
            token: Some(token.to_string()),
            password: None,
        }),
    })
}
