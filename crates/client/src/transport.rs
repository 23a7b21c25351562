//! Socket seam. The client talks to a [`Connection`] made of two channels;
//! [`WsConnector`] backs it with a real WebSocket.

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    tokio::sync::mpsc,
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, warn},
    url::Url,
};

use crate::error::Result;

/// What the transport reports back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound text frame.
    Message(String),
    /// Transport-level failure. A `Closed` follows.
    Error(String),
    /// The socket is gone. Always the last event.
    Closed,
}

/// An open socket.
///
/// Dropping `outbound` closes the socket from the client side.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a socket to `url`. Resolves once the transport is open.
    async fn open(&self, url: &Url) -> Result<Connection>;
}

/// [`Connector`] over `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &Url) -> Result<Connection> {
        let (stream, _) = connect_async(url.as_str()).await?;
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (mut sink, mut source) = stream.split();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = outbound_rx.recv() => match outgoing {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text.into())).await {
                                let _ = inbound_tx.send(TransportEvent::Error(e.to_string()));
                                break;
                            }
                        },
                        None => {
                            debug!("gateway socket released by client, closing");
                            let _ = sink.send(Message::Close(None)).await;
                            let _ = sink.close().await;
                            return;
                        },
                    },
                    incoming = source.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if inbound_tx.send(TransportEvent::Message(text.as_str().to_owned())).is_err() {
                                return;
                            }
                        },
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => {
                                if inbound_tx.send(TransportEvent::Message(text)).is_err() {
                                    return;
                                }
                            },
                            Err(_) => warn!("dropping non-UTF-8 binary frame from gateway"),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "gateway closed the socket");
                            break;
                        },
                        // Ping/pong are answered by tungstenite.
                        Some(Ok(_)) => {},
                        Some(Err(e)) => {
                            let _ = inbound_tx.send(TransportEvent::Error(e.to_string()));
                            break;
                        },
                        None => break,
                    },
                }
            }
            let _ = inbound_tx.send(TransportEvent::Closed);
        });

        Ok(Connection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
