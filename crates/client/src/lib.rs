//! Client for the agent gateway WebSocket protocol.
//!
//! A [`GatewayClient`] keeps one socket to the gateway alive: it answers the
//! `connect.challenge` handshake, correlates requests with their responses,
//! fans server events out to subscribers and reconnects with exponential
//! backoff when the socket drops.

pub mod backoff;
pub mod client;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod handshake;
pub mod methods;
pub mod pending;
pub mod router;
pub mod scopes;
pub mod status;
pub mod transport;

pub use {
    client::{GatewayClient, GatewayClientBuilder, parse_gateway_url},
    config::{ClientConfig, Credential, DEFAULT_GATEWAY_URL},
    device::DeviceSigner,
    error::{Error, Result},
    handshake::ServerInfo,
    router::{EventHandler, Subscription},
    status::ConnectionStatus,
    transport::{Connection, Connector, TransportEvent, WsConnector},
};

pub use deckhand_protocol::{GatewayEvent, KnownEvent};
