use super::types::SessionKey;
use crate::error::{ChatError, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use once_cell::sync::OnceCell;
use regex::Regex;
use rsa::{pkcs8::DecodePublicKey, Oaep, RsaPublicKey};
use sha2::Sha256;

const PEM_PUBLIC_KEY_BLOCK: &str = r"(?s)-----BEGIN PUBLIC KEY-----(.*?)-----END PUBLIC KEY-----";

static PEM_BLOCK: OnceCell<Regex> = OnceCell::new();

fn pem_block() -> Result<&'static Regex> {
    PEM_BLOCK
        .get_or_try_init(|| Regex::new(PEM_PUBLIC_KEY_BLOCK))
        .map_err(|e| ChatError::Crypto(format!("invalid PEM pattern: {}", e)))
}

/// The server's RSA public key, used only to wrap the session key
#[derive(Debug, Clone)]
pub struct ServerPublicKey(RsaPublicKey);

impl ServerPublicKey {
    /// Parse an SPKI PEM. Header, footer and all whitespace are stripped
    /// before the body is base64-decoded.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let body = pem_block()?
            .captures(pem)
            .and_then(|caps| caps.get(1))
            .ok_or_else(|| ChatError::Crypto("server key is not a PEM public key".to_string()))?;

        let der_b64: String = body.as_str().split_whitespace().collect();
        let der = STANDARD
            .decode(der_b64)
            .map_err(|e| ChatError::Crypto(format!("invalid PEM body: {}", e)))?;

        RsaPublicKey::from_public_key_der(&der)
            .map(Self)
            .map_err(|e| ChatError::Crypto(format!("unsupported server public key: {}", e)))
    }

    /// Wrap the raw session key with RSA-OAEP (SHA-256) and base64-encode it
    pub fn wrap(&self, key: &SessionKey) -> Result<String> {
        let mut rng = rand::thread_rng();
        let wrapped = self
            .0
            .encrypt(&mut rng, Oaep::new::<Sha256>(), key.raw())
            .map_err(|e| ChatError::Crypto(format!("failed to wrap session key: {}", e)))?;
        Ok(STANDARD.encode(wrapped))
    }
}
