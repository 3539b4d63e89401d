//! Webhook payload signing and verification.
//!
//! Signed material is the payload serialized as compact JSON with a
//! `timestamp` field appended after the payload's own fields:
//!
//! ```text
//! {"open":true,"timestamp":"2024-05-01T12:00:00.000Z"}
//! ```
//!
//! Receivers rebuild exactly this string from the request body and the
//! `X-Timestamp` header, so field order is part of the wire contract and must
//! not change. The HMAC-SHA256 of it is sent lowercase hex-encoded as
//! `X-Signature: sha256=<hex>`.

use crate::sensors::DoorState;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of the `X-Signature` header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Request body of a door notification: `{"open": <bool>}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub open: bool,
}

impl From<DoorState> for NotificationPayload {
    fn from(state: DoorState) -> Self {
        Self {
            open: state.is_open(),
        }
    }
}

/// Payload fields first, then `timestamp`.
#[derive(Serialize)]
struct SignedMaterial<'a, P: Serialize> {
    #[serde(flatten)]
    payload: &'a P,
    timestamp: &'a str,
}

/// HMAC-SHA256 signer keyed with the shared webhook secret.
#[derive(Clone)]
pub struct PayloadSigner {
    key: Vec<u8>,
}

impl fmt::Debug for PayloadSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadSigner")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl PayloadSigner {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    /// Sign `payload` at `timestamp`, returning the lowercase hex digest.
    pub fn sign<P: Serialize>(&self, payload: &P, timestamp: &str) -> String {
        let mut mac = self.mac();
        mac.update(&canonical_json(payload, timestamp));
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check a signature produced by [`sign`](Self::sign).
    ///
    /// Accepts the bare hex digest or the `sha256=` header form. Comparison is
    /// constant-time.
    pub fn verify<P: Serialize>(&self, payload: &P, timestamp: &str, signature: &str) -> bool {
        let digest = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);
        let Ok(expected) = hex::decode(digest) else {
            return false;
        };

        let mut mac = self.mac();
        mac.update(&canonical_json(payload, timestamp));
        mac.verify_slice(&expected).is_ok()
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("HMAC can take any size key")
    }
}

/// The exact bytes covered by the signature.
pub fn canonical_json<P: Serialize>(payload: &P, timestamp: &str) -> Vec<u8> {
    serde_json::to_vec(&SignedMaterial { payload, timestamp })
        .expect("payload serializes to an in-memory JSON object")
}

/// Format a hex digest as an `X-Signature` header value.
pub fn signature_header(hex_digest: &str) -> String {
    format!("{SIGNATURE_PREFIX}{hex_digest}")
}
