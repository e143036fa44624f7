//! JSON response shapes of the chat server.
//!
//! Lists are decoded entry by entry: an entry that does not match its schema
//! is skipped and counted, it never fails the whole response.

use super::{EditedMessage, MessageBatch, SearchPage};
use crate::error::Result;
use crate::models::{Attachment, Message, MessageBody, MessageId, Scope, SearchHit};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

const SYSTEM_SENDER: &str = "System";

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: MessageId,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    message_text: Option<String>,
    timestamp: i64,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<Value>,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ExistenceResponse {
    #[serde(rename = "existingIds", default)]
    existing_ids: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct WireEdit {
    id: MessageId,
    text: String,
}

#[derive(Debug, Deserialize)]
struct EditsResponse {
    #[serde(rename = "editedMessages", default)]
    edited_messages: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct WireSearchHit {
    id: MessageId,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    sender: Option<String>,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    messages: Vec<Value>,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    page: u32,
    #[serde(default)]
    per_page: u32,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    message_id: Option<MessageId>,
}

/// Decode each entry on its own; returns the decoded entries and the skip count
fn decode_entries<T: DeserializeOwned>(entries: Vec<Value>, what: &str) -> (Vec<T>, usize) {
    let mut decoded = Vec::with_capacity(entries.len());
    let mut skipped = 0;
    for entry in entries {
        match serde_json::from_value(entry) {
            Ok(value) => decoded.push(value),
            Err(e) => {
                warn!(error = %e, kind = what, "Skipping malformed entry");
                skipped += 1;
            }
        }
    }
    (decoded, skipped)
}

pub fn parse_batch(body: &str, scope: &Scope, requested_cursor: i64) -> Result<MessageBatch> {
    let response: MessagesResponse = serde_json::from_str(body)?;
    let (wire, skipped) = decode_entries::<WireMessage>(response.messages, "message");

    let messages: Vec<Message> = wire
        .into_iter()
        .map(|m| Message {
            id: m.id,
            sender: m.sender.unwrap_or_else(|| SYSTEM_SENDER.to_string()),
            body: MessageBody::classify(m.message_text.unwrap_or_default()),
            timestamp: m.timestamp,
            attachments: m.attachments,
            scope: scope.clone(),
        })
        .collect();

    let cursor = response
        .timestamp
        .or_else(|| messages.iter().map(|m| m.timestamp).max())
        .unwrap_or(requested_cursor);

    Ok(MessageBatch {
        messages,
        cursor,
        skipped,
    })
}

pub fn parse_existence(body: &str) -> Result<Vec<MessageId>> {
    let response: ExistenceResponse = serde_json::from_str(body)?;
    Ok(decode_entries(response.existing_ids, "existing id").0)
}

pub fn parse_edits(body: &str) -> Result<Vec<EditedMessage>> {
    let response: EditsResponse = serde_json::from_str(body)?;
    let (edits, _) = decode_entries::<WireEdit>(response.edited_messages, "edit");
    Ok(edits
        .into_iter()
        .map(|e| EditedMessage {
            id: e.id,
            body: MessageBody::classify(e.text),
        })
        .collect())
}

pub fn parse_search(body: &str) -> Result<SearchPage> {
    let response: SearchResponse = serde_json::from_str(body)?;
    let (hits, _) = decode_entries::<WireSearchHit>(response.messages, "search hit");
    Ok(SearchPage {
        hits: hits
            .into_iter()
            .map(|h| SearchHit {
                id: h.id,
                sender: h.sender.unwrap_or_else(|| SYSTEM_SENDER.to_string()),
                body: MessageBody::classify(h.text.unwrap_or_default()),
                timestamp: h.timestamp,
            })
            .collect(),
        total: response.total,
        page: response.page,
        per_page: response.per_page,
    })
}

/// `message_id` from a send response; a body without one is still a success
pub fn parse_send(body: &str) -> Option<MessageId> {
    serde_json::from_str::<SendResponse>(body)
        .ok()
        .and_then(|r| r.message_id)
}
