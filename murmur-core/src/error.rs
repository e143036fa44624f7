//! Error taxonomy shared by the cipher, key exchange, transport and sync layers.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Key missing or unwrappable, AEAD authentication failure.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// Network error, timeout or unexpected HTTP status.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The server refused access to the requested scope (or the session expired).
    #[error("authorization failure: {0}")]
    Authorization(String),

    /// Malformed envelope or response shape.
    #[error("protocol mismatch: {0}")]
    Protocol(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("session storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ChatError {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Transport(format!("request timed out: {}", e))
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<base64::DecodeError> for ChatError {
    fn from(e: base64::DecodeError) -> Self {
        Self::Protocol(format!("invalid base64: {}", e))
    }
}

impl From<garde::Report> for ChatError {
    fn from(e: garde::Report) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<keyring::Error> for ChatError {
    fn from(e: keyring::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ChatError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Transport("operation timed out".to_string())
    }
}
