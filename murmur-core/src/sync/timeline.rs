use crate::models::{Attachment, Message, MessageId};
use std::cmp::Ordering;
use std::collections::HashSet;
use tokio::time::Instant;

/// A persisted message as the view shows it, body already opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub id: MessageId,
    pub sender: String,
    pub text: String,
    pub timestamp: i64,
    pub attachments: Vec<Attachment>,
    /// The body was an envelope that could not be opened; `text` is the raw wire form
    pub undecryptable: bool,
    pub edited_at: Option<Instant>,
}

impl RenderedMessage {
    pub fn new(message: Message, text: String, undecryptable: bool) -> Self {
        Self {
            id: message.id,
            sender: message.sender,
            text,
            timestamp: message.timestamp,
            attachments: message.attachments,
            undecryptable,
            edited_at: None,
        }
    }

    fn order(&self, timestamp: i64, id: &MessageId) -> Ordering {
        self.timestamp
            .cmp(&timestamp)
            .then_with(|| self.id.cmp(id))
    }
}

/// Rendered messages of one scope, kept sorted by (timestamp, id)
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    messages: Vec<RenderedMessage>,
    ids: HashSet<MessageId>,
}

impl Timeline {
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// Insert in order; an id already present is left untouched
    pub fn insert(&mut self, message: RenderedMessage) -> bool {
        if self.ids.contains(&message.id) {
            return false;
        }
        let index = self
            .messages
            .binary_search_by(|m| m.order(message.timestamp, &message.id))
            .unwrap_or_else(|i| i);
        self.ids.insert(message.id.clone());
        self.messages.insert(index, message);
        true
    }

    pub fn remove(&mut self, id: &MessageId) -> bool {
        if !self.ids.remove(id) {
            return false;
        }
        self.messages.retain(|m| &m.id != id);
        true
    }

    /// Keep only ids in `existing`; returns how many were dropped
    pub fn retain_existing(&mut self, existing: &HashSet<MessageId>) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| existing.contains(&m.id));
        self.ids.retain(|id| existing.contains(id));
        before - self.messages.len()
    }

    /// Replace the text of `id` if it differs. Reapplying the same text is a no-op.
    pub fn apply_edit(&mut self, id: &MessageId, text: String, undecryptable: bool, at: Instant) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(message) if message.text != text => {
                message.text = text;
                message.undecryptable = undecryptable;
                message.edited_at = Some(at);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: &MessageId) -> Option<&RenderedMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.messages.iter().map(|m| m.id.clone()).collect()
    }

    pub fn oldest_timestamp(&self) -> Option<i64> {
        self.messages.first().map(|m| m.timestamp)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderedMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
    }
}
