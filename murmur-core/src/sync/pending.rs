//! Optimistic messages shown before the server confirms them.

use crate::models::{Message, MessageId, Scope};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub correlation_id: Uuid,
    pub scope: Scope,
    /// Local user, when known; `None` matches any sender
    pub sender: Option<String>,
    pub body: String,
    pub attachment_names: Vec<String>,
    /// Unix seconds, same clock domain as server timestamps
    pub created_at: i64,
    /// Id echoed by the server on a successful send
    pub server_id: Option<MessageId>,
    /// Set once the server accepted the send
    pub sent_at: Option<Instant>,
}

impl PendingMessage {
    pub fn new(scope: Scope, sender: Option<String>, body: String, attachment_names: Vec<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            scope,
            sender,
            body,
            attachment_names,
            created_at: chrono::Utc::now().timestamp(),
            server_id: None,
            sent_at: None,
        }
    }

    /// Content match: same scope, sender and plaintext, within `window` of creation
    fn matches_content(&self, message: &Message, text: &str, window: Duration) -> bool {
        if self.server_id.is_some() {
            return false;
        }
        let sender_ok = self
            .sender
            .as_deref()
            .map_or(true, |sender| sender == message.sender);
        let window = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);

        self.scope == message.scope
            && sender_ok
            && self.body == text
            && (message.timestamp - self.created_at).abs() <= window
    }
}

/// Outstanding optimistic messages, oldest first
#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    entries: Vec<PendingMessage>,
}

impl PendingQueue {
    pub fn push(&mut self, pending: PendingMessage) {
        self.entries.push(pending);
    }

    pub fn remove(&mut self, correlation_id: Uuid) -> Option<PendingMessage> {
        let index = self
            .entries
            .iter()
            .position(|p| p.correlation_id == correlation_id)?;
        Some(self.entries.remove(index))
    }

    /// Record a successful send and the id the server echoed, if any
    pub fn mark_sent(&mut self, correlation_id: Uuid, server_id: Option<MessageId>, at: Instant) -> bool {
        match self.entries.iter_mut().find(|p| p.correlation_id == correlation_id) {
            Some(pending) => {
                pending.server_id = server_id;
                pending.sent_at = Some(at);
                true
            }
            None => false,
        }
    }

    /// Remove sent entries left unmatched for longer than `window`
    pub fn expire(&mut self, now: Instant, window: Duration) -> Vec<PendingMessage> {
        let (expired, kept): (Vec<_>, Vec<_>) = self.entries.drain(..).partition(|p| {
            p.sent_at
                .map_or(false, |at| now.saturating_duration_since(at) > window)
        });
        self.entries = kept;
        expired
    }

    /// Remove and return the entry an incoming message confirms.
    ///
    /// An exact server id match wins over a content match.
    pub fn take_match(&mut self, message: &Message, text: &str, window: Duration) -> Option<PendingMessage> {
        let index = self
            .entries
            .iter()
            .position(|p| p.server_id.as_ref() == Some(&message.id))
            .or_else(|| {
                self.entries
                    .iter()
                    .position(|p| p.matches_content(message, text, window))
            })?;
        Some(self.entries.remove(index))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingMessage> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageBody;

    const WINDOW: Duration = Duration::from_secs(30);

    fn message(id: u64, sender: &str, text: &str, timestamp: i64) -> Message {
        Message {
            id: MessageId::from(id),
            sender: sender.to_string(),
            body: MessageBody::Plain(text.to_string()),
            timestamp,
            attachments: Vec::new(),
            scope: Scope::General,
        }
    }

    fn pending(body: &str) -> PendingMessage {
        PendingMessage::new(Scope::General, Some("alice".to_string()), body.to_string(), Vec::new())
    }

    #[test]
    fn test_content_match() {
        let mut queue = PendingQueue::default();
        let entry = pending("hello");
        let now = entry.created_at;
        queue.push(entry);

        assert!(queue.take_match(&message(1, "bob", "hello", now), "hello", WINDOW).is_none());
        assert!(queue.take_match(&message(1, "alice", "hell", now), "hell", WINDOW).is_none());
        assert!(queue
            .take_match(&message(1, "alice", "hello", now + 120), "hello", WINDOW)
            .is_none());

        assert!(queue.take_match(&message(1, "alice", "hello", now + 1), "hello", WINDOW).is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_server_id_takes_precedence() {
        let mut queue = PendingQueue::default();
        let first = pending("same");
        let second = pending("same");
        let now = first.created_at;
        let second_id = second.correlation_id;
        queue.push(first);
        queue.push(second);
        assert!(queue.mark_sent(second_id, Some(MessageId::from(9)), Instant::now()));

        let matched = queue
            .take_match(&message(9, "alice", "same", now), "same", WINDOW)
            .unwrap();
        assert_eq!(matched.correlation_id, second_id);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_entry_with_other_server_id_is_not_content_matched() {
        let mut queue = PendingQueue::default();
        let entry = pending("dup");
        let now = entry.created_at;
        let id = entry.correlation_id;
        queue.push(entry);
        queue.mark_sent(id, Some(MessageId::from(3)), Instant::now());

        assert!(queue.take_match(&message(4, "alice", "dup", now), "dup", WINDOW).is_none());
        assert_eq!(queue.remove(id).map(|p| p.correlation_id), Some(id));
        assert!(queue.remove(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_sent_entries_expire() {
        let mut queue = PendingQueue::default();
        let sent = pending("sent");
        let sent_id = sent.correlation_id;
        let in_flight = pending("in flight");
        let in_flight_id = in_flight.correlation_id;
        queue.push(sent);
        queue.push(in_flight);
        queue.mark_sent(sent_id, None, Instant::now());

        tokio::time::advance(WINDOW).await;
        assert!(queue.expire(Instant::now(), WINDOW).is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        let expired = queue.expire(Instant::now(), WINDOW);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].correlation_id, sent_id);
        assert_eq!(queue.iter().next().map(|p| p.correlation_id), Some(in_flight_id));
    }

    #[test]
    fn test_unknown_sender_matches_anyone() {
        let mut queue = PendingQueue::default();
        let entry = PendingMessage::new(Scope::General, None, "hi".to_string(), Vec::new());
        let now = entry.created_at;
        queue.push(entry);
        assert!(queue.take_match(&message(1, "whoever", "hi", now), "hi", WINDOW).is_some());
    }
}
