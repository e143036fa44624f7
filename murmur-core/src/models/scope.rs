use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const GENERAL_CHAT_NAME: &str = "General";
const MAX_PEER_NAME_LENGTH: usize = 128;

/// A conversation context: the general channel, a group, or a private pairing
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Scope {
    #[default]
    General,
    Group(u64),
    Private(String),
}

impl Scope {
    /// Value of the `type` query parameter used by the REST API
    pub fn kind(&self) -> &'static str {
        match self {
            Scope::General => "general",
            Scope::Group(_) => "group",
            Scope::Private(_) => "private",
        }
    }

    /// Value of the `chat_id` query parameter, absent for the general channel
    pub fn chat_id(&self) -> Option<String> {
        match self {
            Scope::General => None,
            Scope::Group(id) => Some(id.to_string()),
            Scope::Private(peer) => Some(peer.clone()),
        }
    }

    pub fn is_general(&self) -> bool {
        matches!(self, Scope::General)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::General => f.write_str("general"),
            Scope::Group(id) => write!(f, "group:{}", id),
            Scope::Private(peer) => write!(f, "private:{}", peer),
        }
    }
}

impl FromStr for Scope {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            None if s == "general" => Ok(Scope::General),
            Some(("group", id)) => id
                .parse::<u64>()
                .ok()
                .filter(|id| *id > 0)
                .map(Scope::Group)
                .ok_or_else(|| ChatError::Validation(format!("invalid group id: {}", id))),
            Some(("private", peer))
                if !peer.trim().is_empty() && peer.trim().chars().count() <= MAX_PEER_NAME_LENGTH =>
            {
                Ok(Scope::Private(peer.trim().to_string()))
            }
            _ => Err(ChatError::Validation(format!("invalid scope: {}", s))),
        }
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

impl TryFrom<String> for Scope {
    type Error = ChatError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Persisted record of the selected conversation, restored across reloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: Option<u64>,
    pub name: String,
}

impl SelectionRecord {
    pub fn new(scope: &Scope, name: Option<&str>) -> Self {
        // A private record is resolved by its name, so the peer always wins
        let (id, name) = match scope {
            Scope::General => (None, name.unwrap_or(GENERAL_CHAT_NAME).to_string()),
            Scope::Group(id) => (
                Some(*id),
                name.map(str::to_string)
                    .unwrap_or_else(|| format!("Group {}", id)),
            ),
            Scope::Private(peer) => (None, peer.clone()),
        };
        Self {
            kind: scope.kind().to_string(),
            id,
            name,
        }
    }

    /// The scope this record points at, if it is well-formed
    pub fn scope(&self) -> Option<Scope> {
        match (self.kind.as_str(), self.id) {
            ("general", _) => Some(Scope::General),
            ("group", Some(id)) if id > 0 => Some(Scope::Group(id)),
            ("private", _) if !self.name.trim().is_empty() => {
                Some(Scope::Private(self.name.clone()))
            }
            _ => None,
        }
    }
}
