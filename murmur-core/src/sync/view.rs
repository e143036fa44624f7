use super::state::SessionState;
use crate::crypto::KeyExchangeState;
use crate::models::{Attachment, MessageId, Scope};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// One line of the conversation as handed to the renderer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewEntry {
    /// `None` while the message is still pending
    pub id: Option<MessageId>,
    pub correlation_id: Option<Uuid>,
    pub sender: String,
    pub text: String,
    pub timestamp: i64,
    pub attachments: Vec<Attachment>,
    pub pending: bool,
    pub undecryptable: bool,
    /// Evaluated when the view is built; a paused driver publishes no new
    /// views, so an expired highlight clears on resume
    pub highlighted: bool,
}

/// Snapshot of the active conversation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversationView {
    pub scope: Scope,
    pub cursor: i64,
    pub encrypted: bool,
    pub key_state: Option<KeyExchangeState>,
    pub entries: Vec<ViewEntry>,
}

impl ConversationView {
    /// Rendered messages in order, then pending ones oldest first.
    /// Edits younger than `highlight` are flagged.
    pub(crate) fn build(
        state: &SessionState,
        key_state: KeyExchangeState,
        encrypted: bool,
        highlight: Duration,
        now: Instant,
    ) -> Self {
        let rendered = state.timeline.iter().map(|m| ViewEntry {
            id: Some(m.id.clone()),
            correlation_id: None,
            sender: m.sender.clone(),
            text: m.text.clone(),
            timestamp: m.timestamp,
            attachments: m.attachments.clone(),
            pending: false,
            undecryptable: m.undecryptable,
            highlighted: m
                .edited_at
                .map_or(false, |at| now.saturating_duration_since(at) < highlight),
        });

        let optimistic = state.pending.iter().map(|p| ViewEntry {
            id: None,
            correlation_id: Some(p.correlation_id),
            sender: p.sender.clone().unwrap_or_default(),
            text: p.body.clone(),
            timestamp: p.created_at,
            attachments: p
                .attachment_names
                .iter()
                .map(|name| Attachment {
                    filename: name.clone(),
                    mime_type: String::new(),
                    path: String::new(),
                })
                .collect(),
            pending: true,
            undecryptable: false,
            highlighted: false,
        });

        Self {
            scope: state.scope.clone(),
            cursor: state.cursor,
            encrypted,
            key_state: Some(key_state),
            entries: rendered.chain(optimistic).collect(),
        }
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.entries.iter().filter_map(|e| e.id.clone()).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.pending).count()
    }

    pub fn text_of(&self, id: &MessageId) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.id.as_ref() == Some(id))
            .map(|e| e.text.as_str())
    }
}
