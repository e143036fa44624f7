use super::types::{Envelope, SessionKey, NONCE_LEN};
use crate::error::{ChatError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

/// Encrypt a message body with a fresh random nonce
pub fn encrypt(plaintext: &str, key: Option<&SessionKey>) -> Result<Envelope> {
    let key = key.ok_or_else(|| ChatError::Crypto("no session key".to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(key.as_aes_key());
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| ChatError::Crypto("encryption failed".to_string()))?;

    Ok(Envelope {
        nonce: nonce_bytes.to_vec(),
        ciphertext,
    })
}

/// Decrypt an envelope. Callers treat failure as "show a placeholder", never as fatal.
pub fn decrypt(envelope: &Envelope, key: Option<&SessionKey>) -> Result<String> {
    let key = key.ok_or_else(|| ChatError::Crypto("no session key".to_string()))?;

    if envelope.nonce.len() != NONCE_LEN {
        return Err(ChatError::Crypto(format!(
            "invalid nonce length {}",
            envelope.nonce.len()
        )));
    }
    let nonce = Nonce::from_slice(&envelope.nonce);

    let cipher = Aes256Gcm::new(key.as_aes_key());
    let plaintext = cipher
        .decrypt(nonce, envelope.ciphertext.as_ref())
        .map_err(|_| ChatError::Crypto("decryption failed - message may be tampered".to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|_| ChatError::Crypto("invalid UTF-8 in decrypted message".to_string()))
}
