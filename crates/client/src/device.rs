//! Seam to the external device-identity module.
//!
//! Key storage and the signature algorithm live outside this crate; the
//! client only knows how to lay out the payload that gets signed and where
//! the proof goes in the `connect` request.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use deckhand_protocol::DeviceInfo;

use crate::error::Result;

/// Produces signed device proofs for the handshake.
pub trait DeviceSigner: Send + Sync {
    /// Stable device identifier (typically a hash of the public key).
    fn device_id(&self) -> &str;
    /// Public key in the encoding the gateway expects.
    fn public_key(&self) -> &str;
    /// Sign `payload` and return the encoded signature.
    fn sign(&self, payload: &str) -> Result<String>;
}

/// Inputs of the v2 device-auth payload.
#[derive(Debug, Clone)]
pub struct DevicePayload<'a> {
    pub device_id: &'a str,
    pub client_id: &'a str,
    pub client_mode: &'a str,
    pub role: &'a str,
    pub scopes: &'a [String],
    pub signed_at_ms: u64,
    pub token: Option<&'a str>,
    pub nonce: &'a str,
}

impl DevicePayload<'_> {
    /// `v2|deviceId|clientId|clientMode|role|scopes|signedAtMs|token|nonce`
    pub fn render(&self) -> String {
        [
            "v2",
            self.device_id,
            self.client_id,
            self.client_mode,
            self.role,
            self.scopes.join(",").as_str(),
            self.signed_at_ms.to_string().as_str(),
            self.token.unwrap_or_default(),
            self.nonce,
        ]
        .join("|")
    }
}

/// Build the signed `device` block of a `connect` request.
pub fn sign_device(signer: &dyn DeviceSigner, payload: &DevicePayload<'_>) -> Result<DeviceInfo> {
    let signature = signer.sign(&payload.render())?;
    Ok(DeviceInfo {
        id: signer.device_id().to_string(),
        public_key: signer.public_key().to_string(),
        signature,
        signed_at: payload.signed_at_ms,
        nonce: (!payload.nonce.is_empty()).then(|| payload.nonce.to_string()),
    })
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(saturating_millis)
        .unwrap_or_default()
}

fn saturating_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, crate::error::Error};

    #[test]
    fn signed_at_saturates_instead_of_wrapping() {
        assert_eq!(saturating_millis(Duration::from_millis(1_700_000_000_123)), 1_700_000_000_123);
        assert_eq!(saturating_millis(Duration::MAX), u64::MAX);
    }

    struct ReversingSigner;

    impl DeviceSigner for ReversingSigner {
        fn device_id(&self) -> &str {
            "dev-abc"
        }

        fn public_key(&self) -> &str {
            "pk-abc"
        }

        fn sign(&self, payload: &str) -> Result<String> {
            Ok(payload.chars().rev().collect())
        }
    }

    struct BrokenSigner;

    impl DeviceSigner for BrokenSigner {
        fn device_id(&self) -> &str {
            "dev"
        }

        fn public_key(&self) -> &str {
            "pk"
        }

        fn sign(&self, _payload: &str) -> Result<String> {
            Err(Error::message("key locked"))
        }
    }

    fn scopes() -> Vec<String> {
        vec!["operator.read".into(), "operator.write".into()]
    }

    #[test]
    fn payload_layout() {
        let scopes = scopes();
        let payload = DevicePayload {
            device_id: "dev-abc",
            client_id: "agent-dashboard",
            client_mode: "ui",
            role: "operator",
            scopes: &scopes,
            signed_at_ms: 1_700_000_000_000,
            token: Some("tok"),
            nonce: "n-1",
        };
        assert_eq!(
            payload.render(),
            "v2|dev-abc|agent-dashboard|ui|operator|operator.read,operator.write|1700000000000|tok|n-1"
        );
    }

    #[test]
    fn missing_token_renders_empty_field() {
        let payload = DevicePayload {
            device_id: "d",
            client_id: "c",
            client_mode: "ui",
            role: "operator",
            scopes: &[],
            signed_at_ms: 5,
            token: None,
            nonce: "",
        };
        assert_eq!(payload.render(), "v2|d|c|ui|operator||5||");
    }

    #[test]
    fn sign_device_fills_block() {
        let scopes = scopes();
        let payload = DevicePayload {
            device_id: "dev-abc",
            client_id: "agent-dashboard",
            client_mode: "ui",
            role: "operator",
            scopes: &scopes,
            signed_at_ms: 42,
            token: None,
            nonce: "n-9",
        };
        let device = sign_device(&ReversingSigner, &payload).unwrap();
        assert_eq!(device.id, "dev-abc");
        assert_eq!(device.public_key, "pk-abc");
        assert_eq!(device.signed_at, 42);
        assert_eq!(device.nonce.as_deref(), Some("n-9"));
        let expected: String = payload.render().chars().rev().collect();
        assert_eq!(device.signature, expected);
    }

    #[test]
    fn signer_failure_propagates() {
        let payload = DevicePayload {
            device_id: "dev",
            client_id: "c",
            client_mode: "ui",
            role: "operator",
            scopes: &[],
            signed_at_ms: 1,
            token: None,
            nonce: "n",
        };
        assert!(sign_device(&BrokenSigner, &payload).is_err());
    }
}
