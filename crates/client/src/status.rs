//! Observable connection status.

use std::fmt;

use serde::Serialize;

/// Connection state of a [`crate::GatewayClient`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    /// Socket opening or handshake in progress.
    Connecting,
    /// Handshake completed; server info and scopes are available.
    Connected,
    /// Transport or handshake failure; a reconnect is usually pending.
    Error,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
