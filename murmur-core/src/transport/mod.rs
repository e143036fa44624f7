//! The REST boundary the core consumes.
//!
//! [`Transport`] is the seam between the sync engine and the network:
//! [`HttpTransport`] talks to the real server, tests script their own.

mod http;
pub mod wire;

pub use http::HttpTransport;

use crate::error::Result;
use crate::models::input::{OutgoingAttachment, SearchQuery};
use crate::models::{Message, MessageBody, MessageId, Scope, SearchHit};
use async_trait::async_trait;

/// One `fetch_messages` response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBatch {
    pub messages: Vec<Message>,
    /// High-water timestamp reported by the server
    pub cursor: i64,
    /// Entries dropped because they did not match the message schema
    pub skipped: usize,
}

/// A message whose text changed on the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditedMessage {
    pub id: MessageId,
    pub body: MessageBody,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

/// Calls the core makes against the server.
///
/// Access denied to a scope is reported as `ChatError::Authorization`, which
/// callers keep distinct from an empty batch.
#[async_trait]
pub trait Transport: Send + Sync {
    /// PEM-encoded server public key
    async fn fetch_server_public_key(&self) -> Result<String>;

    async fn register_session_key(&self, wrapped_key_b64: &str) -> Result<()>;

    async fn fetch_messages(&self, scope: &Scope, cursor: i64) -> Result<MessageBatch>;

    /// Which of `ids` still exist. The answer is a full set, not a diff.
    async fn check_existence(&self, scope: &Scope, ids: &[MessageId]) -> Result<Vec<MessageId>>;

    async fn check_edits(&self, scope: &Scope, since: i64) -> Result<Vec<EditedMessage>>;

    /// Returns the persisted id when the server reports one
    async fn send_message(
        &self,
        scope: &Scope,
        body: &str,
        attachments: &[OutgoingAttachment],
    ) -> Result<Option<MessageId>>;

    async fn edit_message(&self, scope: &Scope, id: &MessageId, body: &str) -> Result<()>;

    async fn delete_message(&self, scope: &Scope, id: &MessageId) -> Result<()>;

    async fn search_messages(&self, scope: &Scope, query: &SearchQuery) -> Result<SearchPage>;
}
