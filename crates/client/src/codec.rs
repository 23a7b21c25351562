//! Text framing for the gateway socket. Stateless.

use deckhand_protocol::{GatewayFrame, RequestFrame};

use crate::error::Result;

/// Serialize an outgoing request.
pub fn encode_request(id: u64, method: &str, params: serde_json::Value) -> Result<String> {
    Ok(serde_json::to_string(&RequestFrame::new(id, method, params))?)
}

/// Parse one inbound text message.
pub fn decode(text: &str) -> Result<GatewayFrame> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, crate::error::Error, serde_json::json};

    #[test]
    fn encodes_request_shape() {
        let text = encode_request(12, "sessions.history", json!({ "sessionKey": "main" })).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "req",
                "id": "12",
                "method": "sessions.history",
                "params": { "sessionKey": "main" },
            })
        );
    }

    #[test]
    fn decodes_event() {
        let frame = decode(r#"{"type":"event","event":"tick","payload":{"ts":1}}"#).unwrap();
        assert!(matches!(frame, GatewayFrame::Event(ref e) if e.event == "tick"));
    }

    #[test]
    fn non_json_is_an_error() {
        assert!(matches!(decode("not json"), Err(Error::Json(_))));
    }

    #[test]
    fn missing_tag_is_an_error() {
        assert!(decode(r#"{"id":"1","ok":true}"#).is_err());
    }
}
