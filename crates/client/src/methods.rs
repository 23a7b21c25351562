//! Typed shorthands for the gateway methods the dashboard calls. Each is a
//! plain [`GatewayClient::request`] with the method name filled in.

use serde_json::{Value, json};

use crate::{client::GatewayClient, error::Result};

pub mod names {
    pub const HEALTH: &str = "gateway.health";
    pub const SESSIONS_LIST: &str = "sessions.list";
    pub const SESSIONS_HISTORY: &str = "sessions.history";
    pub const SESSIONS_SEND: &str = "sessions.send";
    pub const CHANNELS_STATUS: &str = "channels.status";
    pub const CONFIG_GET: &str = "config.get";
}

fn no_params() -> Value {
    Value::Object(Default::default())
}

impl GatewayClient {
    pub async fn health(&self) -> Result<Value> {
        self.request(names::HEALTH, no_params()).await
    }

    pub async fn list_sessions(&self) -> Result<Value> {
        self.request(names::SESSIONS_LIST, no_params()).await
    }

    /// Message history of one session.
    pub async fn session_history(&self, session_key: &str) -> Result<Value> {
        self.request(names::SESSIONS_HISTORY, json!({ "sessionKey": session_key }))
            .await
    }

    pub async fn channels_status(&self) -> Result<Value> {
        self.request(names::CHANNELS_STATUS, no_params()).await
    }

    /// Post `content` into a session as if typed by the operator.
    pub async fn send_to_session(&self, session_key: &str, content: &str) -> Result<Value> {
        self.request(
            names::SESSIONS_SEND,
            json!({ "sessionKey": session_key, "content": content }),
        )
        .await
    }

    /// The gateway's running configuration.
    pub async fn gateway_config(&self) -> Result<Value> {
        self.request(names::CONFIG_GET, no_params()).await
    }
}
