//! End-to-end test over a real WebSocket, using `tokio-tungstenite` on both
//! ends.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use {
    futures::{SinkExt, StreamExt},
    serde_json::{Value, json},
    tokio::{net::TcpListener, time::timeout},
    tokio_tungstenite::{accept_async, tungstenite::Message},
};

use deckhand_client::{ClientConfig, ConnectionStatus, Credential, GatewayClient};

/// Accept one client, run the handshake and answer `gateway.health` once.
async fn serve_once(listener: TcpListener) -> Value {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();

    let challenge = json!({ "type": "event", "event": "connect.challenge", "payload": { "nonce": "abc" } });
    ws.send(Message::Text(challenge.to_string().into()))
        .await
        .unwrap();

    let mut connect = Value::Null;
    while let Some(message) = ws.next().await {
        let Message::Text(text) = message.unwrap() else {
            continue;
        };
        let frame: Value = serde_json::from_str(text.as_str()).unwrap();
        let reply = match frame["method"].as_str() {
            Some("connect") => {
                connect = frame.clone();
                json!({
                    "type": "res",
                    "id": frame["id"],
                    "ok": true,
                    "payload": {
                        "protocol": 4,
                        "server": { "version": "test", "connId": "ws-1" },
                        "grantedScopes": ["operator.read"],
                    },
                })
            },
            Some("gateway.health") => json!({
                "type": "res",
                "id": frame["id"],
                "ok": true,
                "payload": { "healthy": true },
            }),
            _ => continue,
        };
        ws.send(Message::Text(reply.to_string().into()))
            .await
            .unwrap();
        if frame["method"] == "gateway.health" {
            break;
        }
    }
    connect
}

#[tokio::test]
async fn handshake_and_request_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve_once(listener));

    let client = GatewayClient::new(ClientConfig::default());
    client.connect(format!("ws://{addr}"), Credential::token("tok"));

    let mut status = client.watch_status();
    timeout(
        Duration::from_secs(10),
        status.wait_for(|s| *s == ConnectionStatus::Connected),
    )
    .await
    .expect("handshake did not complete")
    .unwrap();
    assert!(client.has_scope("operator.read"));
    assert_eq!(
        client.server_info().unwrap().connection_id.as_deref(),
        Some("ws-1")
    );

    let health = timeout(Duration::from_secs(10), client.health())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(health, json!({ "healthy": true }));

    let connect = server.await.unwrap();
    assert_eq!(connect["params"]["auth"]["token"], "tok");
    client.disconnect();
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
}
