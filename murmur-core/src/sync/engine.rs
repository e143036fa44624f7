use super::pending::PendingMessage;
use super::state::SessionState;
use super::timeline::RenderedMessage;
use super::view::ConversationView;
use crate::config::ClientConfig;
use crate::crypto::{self, KeyExchangeManager, KeyExchangeState, SessionStorage, SELECTION_SLOT};
use crate::error::{ChatError, Result};
use crate::models::input::{EditInput, OutgoingMessage, SearchQuery, ValidateExt};
use crate::models::{MessageBody, MessageId, Scope, SelectionRecord};
use crate::transport::{MessageBatch, Transport};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tunables the engine reads on every operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Sender name our own messages come back with, if known
    pub local_user: Option<String>,
    pub optimistic_window: Duration,
    pub edit_highlight: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            local_user: config.username.clone(),
            optimistic_window: config.optimistic_window(),
            edit_highlight: config.edit_highlight(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Number of newly rendered messages
    Applied(usize),
    /// Access to the scope was refused; the engine moved to general
    FellBack,
}

/// What one sync cycle changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub added: usize,
    pub removed: usize,
    pub edited: usize,
    pub fell_back: bool,
    /// Some step failed and will be retried next cycle
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub correlation_id: Uuid,
    pub server_id: Option<MessageId>,
    pub encrypted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub id: MessageId,
    pub sender: String,
    pub text: String,
    pub timestamp: i64,
    pub undecryptable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResults {
    pub results: Vec<SearchResult>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

/// Keeps the rendered conversation consistent with the server.
///
/// All state lives in one [`SessionState`] behind `&mut self`, so the
/// read-then-write operations below can never interleave. A failed call
/// returns before touching the cursor or the rendered set.
pub struct ReconciliationEngine<S> {
    transport: Arc<dyn Transport>,
    keys: KeyExchangeManager<S>,
    state: SessionState,
    settings: EngineSettings,
}

impl<S: SessionStorage> ReconciliationEngine<S> {
    pub fn new(
        transport: Arc<dyn Transport>,
        keys: KeyExchangeManager<S>,
        scope: Scope,
        settings: EngineSettings,
    ) -> Self {
        Self {
            transport,
            keys,
            state: SessionState::new(scope),
            settings,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.state.scope
    }

    pub fn cursor(&self) -> i64 {
        self.state.cursor
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn key_state(&self) -> KeyExchangeState {
        self.keys.state()
    }

    pub fn encryption_enabled(&self) -> bool {
        self.keys.encryption_enabled()
    }

    pub fn keys(&self) -> &KeyExchangeManager<S> {
        &self.keys
    }

    pub fn view(&self) -> ConversationView {
        ConversationView::build(
            &self.state,
            self.keys.state(),
            self.keys.encryption_enabled(),
            self.settings.edit_highlight,
            Instant::now(),
        )
    }

    /// Fetch everything newer than the cursor and merge it.
    ///
    /// Refused access to a non-general scope switches back to general
    /// instead of failing.
    pub async fn poll(&mut self) -> Result<PollOutcome> {
        let scope = self.state.scope.clone();
        let batch = match self.transport.fetch_messages(&scope, self.state.cursor).await {
            Ok(batch) => batch,
            Err(e) if e.is_authorization() && !scope.is_general() => {
                warn!(scope = %scope, error = %e, "Access to scope refused, falling back to general");
                self.switch_scope(Scope::General, None);
                return Ok(PollOutcome::FellBack);
            }
            Err(e) => return Err(e),
        };
        Ok(PollOutcome::Applied(self.apply_batch(batch)))
    }

    /// Merge a fetched batch. Applying the same batch twice renders nothing new.
    pub fn apply_batch(&mut self, batch: MessageBatch) -> usize {
        let MessageBatch {
            mut messages,
            cursor,
            skipped,
        } = batch;

        let scope = self.state.scope.clone();
        messages.retain(|m| m.scope == scope);
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let mut added = 0;
        for message in messages {
            if self.state.timeline.contains(&message.id) {
                continue;
            }
            let (text, undecryptable) = self.open(&message.body);
            if let Some(confirmed) =
                self.state
                    .pending
                    .take_match(&message, &text, self.settings.optimistic_window)
            {
                debug!(correlation_id = %confirmed.correlation_id, id = %message.id, "Pending message confirmed");
            }
            self.state
                .timeline
                .insert(RenderedMessage::new(message, text, undecryptable));
            added += 1;
        }

        for expired in self
            .state
            .pending
            .expire(Instant::now(), self.settings.optimistic_window)
        {
            debug!(correlation_id = %expired.correlation_id, "Pending message expired unmatched");
        }

        if self.state.advance_cursor(cursor) || added > 0 {
            debug!(scope = %scope, added, skipped, cursor = self.state.cursor, "Batch applied");
        }
        added
    }

    /// Drop rendered messages the server no longer reports.
    ///
    /// The server answers with the full existing set every time; nothing is
    /// assumed stable between calls.
    pub async fn reconcile_deletions(&mut self) -> Result<usize> {
        let ids = self.state.timeline.ids();
        if ids.is_empty() {
            return Ok(0);
        }
        let scope = self.state.scope.clone();
        let existing: HashSet<MessageId> = self
            .transport
            .check_existence(&scope, &ids)
            .await?
            .into_iter()
            .collect();

        let removed = self.state.timeline.retain_existing(&existing);
        if removed > 0 {
            info!(scope = %scope, count = removed, "Removed deleted messages");
        }
        Ok(removed)
    }

    /// Apply server-side edits to every rendered message
    pub async fn reconcile_edits(&mut self) -> Result<usize> {
        let Some(oldest) = self.state.timeline.oldest_timestamp() else {
            return Ok(0);
        };
        let scope = self.state.scope.clone();
        let edits = self.transport.check_edits(&scope, oldest.saturating_sub(1)).await?;

        let now = Instant::now();
        let mut changed = 0;
        for edit in edits {
            let (text, undecryptable) = self.open(&edit.body);
            if self.state.timeline.apply_edit(&edit.id, text, undecryptable, now) {
                debug!(id = %edit.id, "Applied remote edit");
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Show the message immediately, then send it (sealed when encryption is on).
    ///
    /// On failure the pending entry is withdrawn and the error returned. On
    /// success the next poll replaces it with the persisted message.
    pub async fn send_optimistic(&mut self, message: OutgoingMessage) -> Result<SendReceipt> {
        message.check()?;
        let scope = self.state.scope.clone();

        let pending = PendingMessage::new(
            scope.clone(),
            self.settings.local_user.clone(),
            message.body.clone(),
            message.attachments.iter().map(|a| a.filename.clone()).collect(),
        );
        let correlation_id = pending.correlation_id;
        self.state.pending.push(pending);

        let sent = match self.seal(&message.body) {
            Ok((wire_body, encrypted)) => self
                .transport
                .send_message(&scope, &wire_body, &message.attachments)
                .await
                .map(|server_id| (server_id, encrypted)),
            Err(e) => Err(e),
        };

        match sent {
            Ok((server_id, encrypted)) => {
                self.state
                    .pending
                    .mark_sent(correlation_id, server_id.clone(), Instant::now());
                info!(scope = %scope, %correlation_id, encrypted, "Message sent");
                Ok(SendReceipt {
                    correlation_id,
                    server_id,
                    encrypted,
                })
            }
            Err(e) => {
                self.state.pending.remove(correlation_id);
                warn!(scope = %scope, %correlation_id, error = %e, "Send failed, pending message withdrawn");
                Err(e)
            }
        }
    }

    pub async fn edit_message(&mut self, id: &MessageId, input: EditInput) -> Result<()> {
        input.check()?;
        if !self.state.timeline.contains(id) {
            return Err(ChatError::Validation(format!(
                "message {} is not in this conversation",
                id
            )));
        }
        let (wire_body, _) = self.seal(&input.body)?;
        let scope = self.state.scope.clone();
        self.transport.edit_message(&scope, id, &wire_body).await?;

        self.state
            .timeline
            .apply_edit(id, input.body, false, Instant::now());
        info!(scope = %scope, %id, "Message edited");
        Ok(())
    }

    pub async fn delete_message(&mut self, id: &MessageId) -> Result<()> {
        let scope = self.state.scope.clone();
        self.transport.delete_message(&scope, id).await?;
        self.state.timeline.remove(id);
        info!(scope = %scope, %id, "Message deleted");
        Ok(())
    }

    /// Move to `scope`: cursor to 0, rendered and pending state dropped,
    /// selection persisted.
    pub fn switch_scope(&mut self, scope: Scope, name: Option<&str>) {
        let record = SelectionRecord::new(&scope, name);
        let stored = serde_json::to_string(&record)
            .map_err(ChatError::from)
            .and_then(|json| self.keys.storage_mut().store(SELECTION_SLOT, &json));
        if let Err(e) = stored {
            warn!(error = %e, "Failed to persist conversation selection");
        }

        info!(from = %self.state.scope, to = %scope, "Switching conversation");
        self.state.reset(scope);
    }

    /// Server search in the active scope; sealed hits are opened like polled messages
    pub async fn search_messages(&self, query: &SearchQuery) -> Result<SearchResults> {
        query.validate_input()?;
        let page = self
            .transport
            .search_messages(&self.state.scope, query)
            .await?;

        let results = page
            .hits
            .into_iter()
            .map(|hit| {
                let (text, undecryptable) = self.open(&hit.body);
                SearchResult {
                    id: hit.id,
                    sender: hit.sender,
                    text,
                    timestamp: hit.timestamp,
                    undecryptable,
                }
            })
            .collect();

        Ok(SearchResults {
            results,
            total: page.total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    /// Wipe the key and session storage and start over in general
    pub fn logout(&mut self) -> Result<()> {
        self.keys.clear()?;
        self.state.reset(Scope::General);
        info!("Session cleared");
        Ok(())
    }

    /// Poll, then reconcile deletions and edits.
    ///
    /// Errors are logged and reported, never returned: routine polling
    /// retries on the next cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        match self.poll().await {
            Ok(PollOutcome::Applied(added)) => report.added = added,
            Ok(PollOutcome::FellBack) => {
                report.fell_back = true;
                return report;
            }
            Err(e) => {
                log_cycle_error("poll", &e);
                report.failed = true;
                return report;
            }
        }

        match self.reconcile_deletions().await {
            Ok(removed) => report.removed = removed,
            Err(e) => {
                log_cycle_error("deletions", &e);
                report.failed = true;
            }
        }

        match self.reconcile_edits().await {
            Ok(edited) => report.edited = edited,
            Err(e) => {
                log_cycle_error("edits", &e);
                report.failed = true;
            }
        }

        report
    }

    /// Plaintext for display; an envelope that will not open shows its raw form
    fn open(&self, body: &MessageBody) -> (String, bool) {
        match body {
            MessageBody::Plain(text) => (text.clone(), false),
            MessageBody::Sealed(envelope) => match crypto::decrypt(envelope, self.keys.active_key()) {
                Ok(text) => (text, false),
                Err(e) => {
                    warn!(error = %e, "Could not open message envelope");
                    (body.wire_text(), true)
                }
            },
        }
    }

    /// Wire form of `text` and whether it was encrypted
    fn seal(&self, text: &str) -> Result<(String, bool)> {
        if text.is_empty() {
            return Ok((String::new(), false));
        }
        match self.keys.seal(text)? {
            Some(envelope) => Ok((envelope.to_json()?, true)),
            None => Ok((text.to_string(), false)),
        }
    }
}

fn log_cycle_error(step: &str, e: &ChatError) {
    if e.is_transport() {
        debug!(step, error = %e, "Sync step failed, retrying next cycle");
    } else {
        warn!(step, error = %e, "Sync step failed");
    }
}
