//! Scripted in-memory server shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use murmur_core::crypto::{Envelope, MemoryStorage};
use murmur_core::models::input::{OutgoingAttachment, SearchQuery};
use murmur_core::models::{Message, MessageBody, MessageId, Scope, SearchHit};
use murmur_core::sync::{EngineSettings, ReconciliationEngine};
use murmur_core::transport::{EditedMessage, MessageBatch, SearchPage, Transport};
use murmur_core::{ChatError, ClientConfig, Result};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ME: &str = "alice";

#[derive(Default)]
struct Inner {
    public_key: Option<String>,
    registered: Vec<String>,
    messages: Vec<Message>,
    next_id: u64,
    denied: HashSet<Scope>,
    offline: bool,
    fetch_delay: Option<Duration>,
    echo_ids: bool,
    reject_writes: bool,
    edits: Vec<EditedMessage>,
    existing_override: Option<Vec<MessageId>>,
    sent: Vec<(Scope, String)>,
    fetches: usize,
}

/// Server double: holds messages per scope and answers like the REST API
#[derive(Clone, Default)]
pub struct ScriptedServer {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedServer {
    pub fn new() -> Self {
        let server = Self::default();
        server.inner.lock().unwrap().next_id = 100;
        server
    }

    /// Server with an RSA key pair; returns the private half for unwrapping
    pub fn with_keypair() -> (Self, RsaPrivateKey) {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let server = Self::new();
        server.inner.lock().unwrap().public_key = Some(pem);
        (server, private)
    }

    pub fn set_public_key(&self, pem: &str) {
        self.inner.lock().unwrap().public_key = Some(pem.to_string());
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    pub fn post(&self, id: u64, scope: Scope, sender: &str, body: MessageBody, timestamp: i64) {
        self.inner.lock().unwrap().messages.push(Message {
            id: MessageId::from(id),
            sender: sender.to_string(),
            body,
            timestamp,
            attachments: Vec::new(),
            scope,
        });
    }

    pub fn post_text(&self, id: u64, text: &str, timestamp: i64) {
        self.post(id, Scope::General, "bob", MessageBody::Plain(text.to_string()), timestamp);
    }

    pub fn remove(&self, id: u64) {
        let id = MessageId::from(id);
        self.inner.lock().unwrap().messages.retain(|m| m.id != id);
    }

    pub fn queue_edit(&self, id: u64, text: &str) {
        self.inner.lock().unwrap().edits.push(EditedMessage {
            id: MessageId::from(id),
            body: MessageBody::Plain(text.to_string()),
        });
    }

    pub fn set_existing(&self, ids: &[u64]) {
        self.inner.lock().unwrap().existing_override =
            Some(ids.iter().copied().map(MessageId::from).collect());
    }

    pub fn deny(&self, scope: Scope) {
        self.inner.lock().unwrap().denied.insert(scope);
    }

    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().unwrap().offline = offline;
    }

    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.inner.lock().unwrap().fetch_delay = delay;
    }

    pub fn set_echo_ids(&self, echo: bool) {
        self.inner.lock().unwrap().echo_ids = echo;
    }

    pub fn set_reject_writes(&self, reject: bool) {
        self.inner.lock().unwrap().reject_writes = reject;
    }

    pub fn registered(&self) -> Vec<String> {
        self.inner.lock().unwrap().registered.clone()
    }

    pub fn sent(&self) -> Vec<(Scope, String)> {
        self.inner.lock().unwrap().sent.clone()
    }

    pub fn fetches(&self) -> usize {
        self.inner.lock().unwrap().fetches
    }

    fn check_online(&self) -> Result<()> {
        if self.inner.lock().unwrap().offline {
            Err(ChatError::Transport("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for ScriptedServer {
    async fn fetch_server_public_key(&self) -> Result<String> {
        self.check_online()?;
        self.inner
            .lock()
            .unwrap()
            .public_key
            .clone()
            .ok_or_else(|| ChatError::Transport("HTTP error: 404 Not Found".to_string()))
    }

    async fn register_session_key(&self, wrapped_key_b64: &str) -> Result<()> {
        self.check_online()?;
        self.inner
            .lock()
            .unwrap()
            .registered
            .push(wrapped_key_b64.to_string());
        Ok(())
    }

    async fn fetch_messages(&self, scope: &Scope, cursor: i64) -> Result<MessageBatch> {
        let delay = {
            let mut inner = self.inner.lock().unwrap();
            inner.fetches += 1;
            inner.fetch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_online()?;

        let inner = self.inner.lock().unwrap();
        if inner.denied.contains(scope) {
            return Err(ChatError::Authorization("403 Forbidden: no access".to_string()));
        }
        // Newest first, like an unordered server
        let mut messages: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| &m.scope == scope && m.timestamp > cursor)
            .cloned()
            .collect();
        messages.reverse();
        let high_water = messages.iter().map(|m| m.timestamp).max().unwrap_or(cursor);
        Ok(MessageBatch {
            messages,
            cursor: high_water,
            skipped: 0,
        })
    }

    async fn check_existence(&self, scope: &Scope, ids: &[MessageId]) -> Result<Vec<MessageId>> {
        self.check_online()?;
        let inner = self.inner.lock().unwrap();
        if let Some(existing) = &inner.existing_override {
            return Ok(existing.clone());
        }
        Ok(ids
            .iter()
            .filter(|id| inner.messages.iter().any(|m| &m.id == *id && &m.scope == scope))
            .cloned()
            .collect())
    }

    async fn check_edits(&self, _scope: &Scope, _since: i64) -> Result<Vec<EditedMessage>> {
        self.check_online()?;
        Ok(self.inner.lock().unwrap().edits.clone())
    }

    async fn send_message(
        &self,
        scope: &Scope,
        body: &str,
        _attachments: &[OutgoingAttachment],
    ) -> Result<Option<MessageId>> {
        self.check_online()?;
        let mut inner = self.inner.lock().unwrap();
        if inner.reject_writes {
            return Err(ChatError::Transport("HTTP error: 500 Internal Server Error".to_string()));
        }
        inner.sent.push((scope.clone(), body.to_string()));
        inner.next_id += 1;
        let id = MessageId::from(inner.next_id);
        inner.messages.push(Message {
            id: id.clone(),
            sender: ME.to_string(),
            body: MessageBody::classify(body),
            timestamp: chrono::Utc::now().timestamp(),
            attachments: Vec::new(),
            scope: scope.clone(),
        });
        Ok(inner.echo_ids.then_some(id))
    }

    async fn edit_message(&self, _scope: &Scope, id: &MessageId, body: &str) -> Result<()> {
        self.check_online()?;
        let mut inner = self.inner.lock().unwrap();
        if inner.reject_writes {
            return Err(ChatError::Authorization("403 Forbidden: not the author".to_string()));
        }
        for message in inner.messages.iter_mut().filter(|m| &m.id == id) {
            message.body = MessageBody::classify(body);
        }
        Ok(())
    }

    async fn delete_message(&self, _scope: &Scope, id: &MessageId) -> Result<()> {
        self.check_online()?;
        let mut inner = self.inner.lock().unwrap();
        if inner.reject_writes {
            return Err(ChatError::Authorization("403 Forbidden: not the author".to_string()));
        }
        inner.messages.retain(|m| &m.id != id);
        Ok(())
    }

    async fn search_messages(&self, scope: &Scope, query: &SearchQuery) -> Result<SearchPage> {
        self.check_online()?;
        let inner = self.inner.lock().unwrap();
        // The server matches on stored text, so sealed bodies are returned as candidates too
        let hits: Vec<SearchHit> = inner
            .messages
            .iter()
            .filter(|m| &m.scope == scope)
            .filter(|m| m.body.is_sealed() || m.body.wire_text().contains(&query.query))
            .map(|m| SearchHit {
                id: m.id.clone(),
                sender: m.sender.clone(),
                body: m.body.clone(),
                timestamp: m.timestamp,
            })
            .collect();
        Ok(SearchPage {
            total: hits.len() as u64,
            hits,
            page: query.page,
            per_page: query.per_page,
        })
    }
}

pub fn config() -> ClientConfig {
    ClientConfig {
        username: Some(ME.to_string()),
        ..ClientConfig::default()
    }
}

pub fn plain_engine(server: &ScriptedServer) -> ReconciliationEngine<MemoryStorage> {
    ReconciliationEngine::new(
        server.transport(),
        murmur_core::crypto::KeyExchangeManager::new(MemoryStorage::new()),
        Scope::General,
        EngineSettings::from_config(&config()),
    )
}

pub fn sealed(text: &str, key: &murmur_core::crypto::SessionKey) -> MessageBody {
    let envelope: Envelope = murmur_core::crypto::encrypt(text, Some(key)).unwrap();
    MessageBody::Sealed(envelope)
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
