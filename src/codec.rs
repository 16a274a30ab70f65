//! Default authenticated payload codec.

use crate::error::{SessionError, SessionResult};
use crate::traits::{Attributes, Codec};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Signed envelope wrapping the persisted attribute set.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    issued_at: DateTime<Utc>,
    attributes: Attributes,
}

/// HMAC-SHA256 signed JSON codec.
///
/// The session name is mixed into the MAC input, so a payload written
/// under one namespace does not authenticate under another. Envelopes
/// older than `max_age` fail decoding the same way tampered ones do.
pub struct SignedCodec {
    key: Vec<u8>,
    max_age: Duration,
}

impl SignedCodec {
    /// Create a codec with the given signing key and maximum payload age.
    pub fn new(key: impl Into<Vec<u8>>, max_age: Duration) -> Self {
        Self {
            key: key.into(),
            max_age,
        }
    }

    /// Sign `name` and `body` with HMAC-SHA256.
    fn sign(&self, name: &str, body: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(name.as_bytes());
        mac.update(b".");
        mac.update(body.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

impl Codec for SignedCodec {
    fn encode(&self, name: &str, attributes: &Attributes) -> SessionResult<String> {
        let envelope = Envelope {
            issued_at: Utc::now(),
            attributes: attributes.clone(),
        };
        let json = serde_json::to_string(&envelope)
            .map_err(|e| SessionError::Codec(e.to_string()))?;
        let signature = self.sign(name, &json);
        Ok(URL_SAFE_NO_PAD.encode(format!("{json}.{signature}")))
    }

    fn decode(&self, name: &str, payload: &str) -> SessionResult<Attributes> {
        let decoded = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| SessionError::Codec(e.to_string()))?;
        let decoded = String::from_utf8(decoded).map_err(|e| SessionError::Codec(e.to_string()))?;

        // The signature is base64 and never contains a dot; the JSON body may.
        let (json, signature) = decoded
            .rsplit_once('.')
            .ok_or_else(|| SessionError::Codec("malformed payload".to_string()))?;

        if self.sign(name, json) != signature {
            return Err(SessionError::Codec("signature mismatch".to_string()));
        }

        let envelope: Envelope =
            serde_json::from_str(json).map_err(|e| SessionError::Codec(e.to_string()))?;

        let max_age =
            chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::MAX);
        if Utc::now().signed_duration_since(envelope.issued_at) > max_age {
            return Err(SessionError::Codec("payload expired".to_string()));
        }

        Ok(envelope.attributes)
    }
}
