//! Client error type.

use std::error::Error as StdError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No open socket; the request was rejected before an id was allocated.
    #[error("not connected")]
    NotConnected,
    /// The connection went away while the request was outstanding.
    #[error("disconnected")]
    Disconnected,
    #[error("request timed out: {method}")]
    Timeout { method: String },
    /// The gateway answered with `ok: false`.
    #[error("{message}")]
    Server {
        code: Option<String>,
        message: String,
    },
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("invalid gateway url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error(transparent)]
    Tungstenite(Box<tokio_tungstenite::tungstenite::Error>),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("config: {0}")]
    Config(String),
    #[error("{message}")]
    Message { message: String },
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn timeout(method: impl Into<String>) -> Self {
        Self::Timeout {
            method: method.into(),
        }
    }

    /// Whether this error came from the connection rather than the gateway.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Disconnected | Self::Tungstenite(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Tungstenite(Box::new(err))
    }
}

impl From<deckhand_protocol::ErrorShape> for Error {
    fn from(shape: deckhand_protocol::ErrorShape) -> Self {
        let message = if shape.message.is_empty() {
            "failed".to_string()
        } else {
            shape.message
        };
        Self::Server {
            code: shape.code,
            message,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
