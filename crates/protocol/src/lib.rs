//! Gateway WebSocket protocol definitions, as seen from an operator client.
//!
//! All communication uses JSON frames over a text WebSocket.
//!
//! Frame types:
//! - `RequestFrame`: client → gateway RPC call
//! - `ResponseFrameInner`: gateway → client RPC result
//! - `EventFrameInner`: gateway → client server-push

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

pub mod events;

pub use events::{GatewayEvent, KnownEvent};

// ── Constants ────────────────────────────────────────────────────────────────

pub const PROTOCOL_VERSION: u32 = 4;
/// Oldest protocol revision this client still speaks.
pub const MIN_PROTOCOL_VERSION: u32 = 3;
pub const TICK_INTERVAL_MS: u64 = 30_000; // 30s
pub const REQUEST_TIMEOUT_MS: u64 = 15_000; // 15s

/// Method name of the handshake request.
pub const CONNECT_METHOD: &str = "connect";

// ── Subscriptions ────────────────────────────────────────────────────────────

pub mod subscriptions {
    /// Wildcard subscription: receive all events.
    pub const WILDCARD: &str = "*";
}

// ── Error shape ──────────────────────────────────────────────────────────────

/// Error body carried by a failed response. An empty `message` means the
/// gateway sent none that could be read.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorShape {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorShape {
    /// Read an error body of any shape. Only string `code`/`message` fields of
    /// an object are picked up; a bare string or number yields an empty shape.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let field = |name: &str| value.get(name).and_then(serde_json::Value::as_str);
        Self {
            code: field("code").map(str::to_string),
            message: field("message").unwrap_or_default().to_string(),
            details: value.get("details").cloned(),
        }
    }
}

impl<'de> Deserialize<'de> for ErrorShape {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

// ── Correlation ids ──────────────────────────────────────────────────────────

/// Correlation token of a request/response pair.
///
/// Outgoing ids are always strings; incoming ids may be either a JSON string
/// or a JSON number depending on the gateway build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    Text(String),
}

impl RequestId {
    /// Normalize to the numeric form used for pending-request lookup.
    ///
    /// Returns `None` for ids this client could never have issued.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self::Text(id.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) => Ok(Self::Text(s)),
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(Self::Number)
                .ok_or_else(|| serde::de::Error::custom("request id must be a non-negative integer")),
            other => Err(serde::de::Error::custom(format!(
                "request id must be a string or number, got {other}"
            ))),
        }
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Client → gateway RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub r#type: String, // always "req"
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RequestFrame {
    pub fn new(id: u64, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            r#type: "req".into(),
            id: id.into(),
            method: method.into(),
            params: Some(params),
        }
    }
}

/// Discriminated union of all frame types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayFrame {
    #[serde(rename = "req")]
    Request(RequestFrameInner),
    #[serde(rename = "res")]
    Response(ResponseFrameInner),
    #[serde(rename = "event")]
    Event(EventFrameInner),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrameInner {
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// A response settles its request whatever else is wrong with it, so only
/// the id is strict. Anything but `ok: true` counts as a failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrameInner {
    pub id: RequestId,
    #[serde(default, deserialize_with = "strictly_true")]
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

fn strictly_true<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value == serde_json::Value::Bool(true))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrameInner {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

// ── Connect handshake ────────────────────────────────────────────────────────

/// Parameters sent by the client in the `connect` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "minProtocol")]
    pub min_protocol: u32,
    #[serde(rename = "maxProtocol")]
    pub max_protocol: u32,
    pub client: ClientInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caps: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<ConnectAuth>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub version: String,
    pub platform: String,
    pub mode: String,
}

/// Signed device proof attached to a `connect` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub signature: String,
    #[serde(rename = "signedAt")]
    pub signed_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Payload of a successful `connect` response.
///
/// Every field is optional: older gateways send a bare `{}` and some only
/// report the granted scopes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloOk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<Features>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<serde_json::Value>,
    #[serde(rename = "grantedScopes", skip_serializing_if = "Option::is_none")]
    pub granted_scopes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<HelloAuth>,
}

impl HelloOk {
    /// Parse a handshake payload. Anything other than a JSON object is
    /// rejected as malformed.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, serde_json::Error> {
        if !payload.is_object() {
            return Err(serde::de::Error::custom(format!(
                "hello payload must be an object, got {payload}"
            )));
        }
        Self::deserialize(payload)
    }

    /// Scopes granted by the gateway: `grantedScopes` when present, otherwise
    /// the scopes echoed in the `auth` block.
    pub fn scopes(&self) -> Vec<String> {
        self.granted_scopes
            .clone()
            .or_else(|| self.auth.as_ref().map(|a| a.scopes.clone()))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerIdentity {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(rename = "connId")]
    pub conn_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

/// Auth echo in the hello; only its scopes are read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloAuth {
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    #[serde(rename = "tickIntervalMs", default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    TICK_INTERVAL_MS
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            tick_interval_ms: TICK_INTERVAL_MS,
        }
    }
}

// ── Roles and scopes ─────────────────────────────────────────────────────────

pub mod roles {
    pub const OPERATOR: &str = "operator";
}

/// Scopes requested by default.
pub mod scopes {
    pub const READ: &str = "operator.read";
    pub const WRITE: &str = "operator.write";
}
