//! Server-pushed events and the typed payload shapes of the ones the
//! dashboard understands. Unknown names still flow through as [`KnownEvent::Other`].

use serde::{Deserialize, Serialize};

// ── Event names ──────────────────────────────────────────────────────────────

pub mod names {
    /// Heartbeat; consumed by the client, never delivered to subscribers.
    pub const TICK: &str = "tick";
    pub const CONNECT_CHALLENGE: &str = "connect.challenge";
    /// Synthetic event emitted by the client after a successful handshake.
    pub const CONNECTED: &str = "connected";
    pub const HEALTH: &str = "health";
    pub const AGENT: &str = "agent";
    pub const CHAT: &str = "chat";
    pub const SESSION_MESSAGE: &str = "session.message";
    pub const HEARTBEAT: &str = "heartbeat";
}

pub const KNOWN_EVENTS: &[&str] = &[
    names::TICK,
    names::CONNECT_CHALLENGE,
    names::CONNECTED,
    names::HEALTH,
    names::AGENT,
    names::CHAT,
    names::SESSION_MESSAGE,
    names::HEARTBEAT,
];

// ── Raw event ────────────────────────────────────────────────────────────────

/// An event as delivered to subscribers: its name plus the raw payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl GatewayEvent {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    pub fn is_tick(&self) -> bool {
        self.name == names::TICK
    }

    /// Interpret the payload according to the event name.
    ///
    /// A payload that does not fit the known shape is returned as
    /// [`KnownEvent::Other`] rather than an error.
    pub fn typed(&self) -> KnownEvent {
        fn parse<T: serde::de::DeserializeOwned>(payload: &serde_json::Value) -> Option<T> {
            let value = if payload.is_null() {
                serde_json::Value::Object(Default::default())
            } else {
                payload.clone()
            };
            serde_json::from_value(value).ok()
        }

        let typed = match self.name.as_str() {
            names::TICK => Some(KnownEvent::Tick),
            names::CONNECT_CHALLENGE => parse(&self.payload).map(KnownEvent::Challenge),
            names::CONNECTED => Some(KnownEvent::Connected(self.payload.clone())),
            names::HEALTH => parse(&self.payload).map(KnownEvent::Health),
            names::AGENT => parse(&self.payload).map(KnownEvent::Agent),
            names::CHAT => parse(&self.payload).map(KnownEvent::Chat),
            names::SESSION_MESSAGE => parse(&self.payload).map(KnownEvent::SessionMessage),
            names::HEARTBEAT => parse(&self.payload).map(KnownEvent::Heartbeat),
            _ => None,
        };
        typed.unwrap_or_else(|| KnownEvent::Other(self.payload.clone()))
    }
}

/// Typed view over a [`GatewayEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum KnownEvent {
    Tick,
    Challenge(ChallengePayload),
    /// Full handshake payload, so subscribers can hydrate from the snapshot.
    Connected(serde_json::Value),
    Health(HealthPayload),
    Agent(AgentPayload),
    Chat(ChatPayload),
    SessionMessage(ChatPayload),
    Heartbeat(HeartbeatPayload),
    Other(serde_json::Value),
}

// ── Payload shapes ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthPayload {
    pub agents: Vec<AgentHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<serde_json::Value>,
    pub channel_order: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentHealth {
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<SessionCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<HeartbeatSettings>,
}

impl AgentHealth {
    pub fn session_count(&self) -> u64 {
        self.sessions.as_ref().map_or(0, |s| s.count)
    }

    pub fn heartbeat_enabled(&self) -> bool {
        self.heartbeat.as_ref().is_some_and(|h| h.enabled)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionCount {
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub enabled: bool,
}

/// Agent lifecycle and tool-use activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentActivity {
    Active,
    Idle,
}

impl AgentPayload {
    /// Classify the activity type, if it is one the dashboard tracks.
    pub fn activity(&self) -> Option<AgentActivity> {
        match self.kind.as_deref()? {
            "turn.start" | "processing" => Some(AgentActivity::Active),
            "turn.end" | "done" | "idle" => Some(AgentActivity::Idle),
            _ => None,
        }
    }
}

/// A conversational turn, streamed or final.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(rename = "final")]
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ChatPayload {
    /// Message text: `text` when present, otherwise a string `content`.
    pub fn body(&self) -> Option<&str> {
        self.text
            .as_deref()
            .or_else(|| self.content.as_ref().and_then(|c| c.as_str()))
    }

    pub fn speaker(&self) -> Option<&str> {
        self.agent_id.as_deref().or(self.agent.as_deref())
    }

    pub fn is_from_user(&self) -> bool {
        self.role.as_deref() == Some("user")
    }
}

/// Per-agent liveness report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeartbeatPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<u64>,
}
