use super::scope::Scope;
use crate::crypto::Envelope;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Server-assigned message id. The API sends ids as numbers in message
/// lists and as strings in existence checks; both normalise to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(i64),
            Text(String),
        }

        match RawId::deserialize(deserializer)? {
            RawId::Number(n) => Ok(Self(n.to_string())),
            RawId::Text(s) if !s.trim().is_empty() => Ok(Self(s.trim().to_string())),
            RawId::Text(_) => Err(serde::de::Error::custom("empty message id")),
        }
    }
}

/// A message body as received: plaintext, or an envelope still to be opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Plain(String),
    Sealed(Envelope),
}

impl MessageBody {
    /// Tagged check at the deserialization boundary
    pub fn classify(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        match Envelope::detect(&raw) {
            Some(envelope) => MessageBody::Sealed(envelope),
            None => MessageBody::Plain(raw),
        }
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self, MessageBody::Sealed(_))
    }

    /// Text as it travelled over the wire
    pub fn wire_text(&self) -> String {
        match self {
            MessageBody::Plain(text) => text.clone(),
            MessageBody::Sealed(envelope) => envelope.to_json().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub path: String,
}

/// A message persisted by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender: String,
    pub body: MessageBody,
    /// Server-assigned, monotonic within a scope; doubles as the sync cursor
    pub timestamp: i64,
    pub attachments: Vec<Attachment>,
    pub scope: Scope,
}

/// A search hit; the body may still be sealed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub id: MessageId,
    pub sender: String,
    pub body: MessageBody,
    pub timestamp: i64,
}
