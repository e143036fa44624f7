use crate::error::{ChatError, Result};
use aes_gcm::{Aes256Gcm, Key};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

pub const SESSION_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// AES-256-GCM session key.
///
/// The raw bytes never leave this type except in exported (base64) form, which
/// is only produced for session storage and for wrapping under the server key.
pub struct SessionKey {
    bytes: Zeroizing<[u8; SESSION_KEY_LEN]>,
}

impl SessionKey {
    /// Generate a fresh random 256-bit key
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; SESSION_KEY_LEN]);
        rand::thread_rng().fill_bytes(bytes.as_mut());
        Self { bytes }
    }

    /// Import a key previously produced by [`SessionKey::export`]
    pub fn import(exported: &str) -> Result<Self> {
        let raw = Zeroizing::new(
            STANDARD
                .decode(exported.trim())
                .map_err(|e| ChatError::Crypto(format!("invalid exported session key: {}", e)))?,
        );
        let bytes: [u8; SESSION_KEY_LEN] = raw.as_slice().try_into().map_err(|_| {
            ChatError::Crypto(format!(
                "session key must be {} bytes, got {}",
                SESSION_KEY_LEN,
                raw.len()
            ))
        })?;
        Ok(Self {
            bytes: Zeroizing::new(bytes),
        })
    }

    pub fn export(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.bytes.as_ref()))
    }

    /// Short, non-reversible identifier for logs
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.bytes.as_ref());
        hex::encode(&digest[..8])
    }

    pub(crate) fn as_aes_key(&self) -> &Key<Aes256Gcm> {
        Key::<Aes256Gcm>::from_slice(self.bytes.as_ref())
    }

    pub(crate) fn raw(&self) -> &[u8] {
        self.bytes.as_ref()
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", self.fingerprint())
    }
}

/// Encrypted message body as stored on the server: `{"iv": "...", "data": "..."}`.
///
/// `data` is the AES-GCM ciphertext with the 16-byte tag appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    #[serde(rename = "iv", with = "base64_field")]
    pub nonce: Vec<u8>,
    #[serde(rename = "data", with = "base64_field")]
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Decide whether a message body is an envelope.
    ///
    /// Only an object with exactly the `iv` and `data` fields, both valid
    /// base64, counts. Everything else is plaintext, which keeps messages sent
    /// before encryption was enabled readable.
    pub fn detect(body: &str) -> Option<Self> {
        if !body.trim_start().starts_with('{') {
            return None;
        }
        serde_json::from_str(body).ok()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

mod base64_field {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
