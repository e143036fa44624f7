mod common;

use common::{config, now, plain_engine, sealed, ScriptedServer, ME};
use murmur_core::crypto::{
    KeyExchangeManager, MemoryStorage, SessionKey, SessionStorage, SELECTION_SLOT, SESSION_KEY_SLOT,
};
use murmur_core::models::input::{EditInput, OutgoingMessage, SearchQuery};
use murmur_core::models::{MessageBody, MessageId, Scope, SelectionRecord};
use murmur_core::sync::{EngineSettings, PollOutcome, ReconciliationEngine};
use murmur_core::transport::Transport;
use murmur_core::ChatError;
use std::time::Duration;

fn ids(engine: &ReconciliationEngine<MemoryStorage>) -> Vec<MessageId> {
    engine.view().ids()
}

fn mids(raw: &[u64]) -> Vec<MessageId> {
    raw.iter().copied().map(MessageId::from).collect()
}

#[tokio::test]
async fn test_same_batch_twice_renders_once() {
    let server = ScriptedServer::new();
    server.post_text(1, "one", 10);
    server.post_text(2, "two", 20);
    let mut engine = plain_engine(&server);

    let batch = server.fetch_messages(&Scope::General, 0).await.unwrap();
    assert_eq!(engine.apply_batch(batch.clone()), 2);
    assert_eq!(engine.apply_batch(batch), 0);

    assert_eq!(ids(&engine), mids(&[1, 2]));
}

#[tokio::test]
async fn test_cursor_is_monotonic() {
    let server = ScriptedServer::new();
    let mut engine = plain_engine(&server);

    server.post_text(1, "one", 10);
    engine.poll().await.unwrap();
    assert_eq!(engine.cursor(), 10);

    assert_eq!(engine.poll().await.unwrap(), PollOutcome::Applied(0));
    assert_eq!(engine.cursor(), 10);

    server.post_text(3, "three", 30);
    server.post_text(2, "two", 20);
    engine.poll().await.unwrap();
    assert_eq!(engine.cursor(), 30);
    assert_eq!(ids(&engine), mids(&[1, 2, 3]));
}

#[tokio::test]
async fn test_failed_poll_leaves_state_unchanged() {
    let server = ScriptedServer::new();
    server.post_text(1, "one", 10);
    let mut engine = plain_engine(&server);
    engine.poll().await.unwrap();

    server.post_text(2, "two", 20);
    server.set_offline(true);
    let report = engine.run_cycle().await;
    assert!(report.failed);
    assert_eq!(engine.cursor(), 10);
    assert_eq!(ids(&engine), mids(&[1]));

    server.set_offline(false);
    let report = engine.run_cycle().await;
    assert!(!report.failed);
    assert_eq!(report.added, 1);
    assert_eq!(engine.cursor(), 20);
}

#[tokio::test]
async fn test_deletion_convergence() {
    let server = ScriptedServer::new();
    for id in 1..=3 {
        server.post_text(id, "x", id as i64);
    }
    let mut engine = plain_engine(&server);
    engine.poll().await.unwrap();
    assert_eq!(ids(&engine), mids(&[1, 2, 3]));

    server.set_existing(&[1, 3]);
    assert_eq!(engine.reconcile_deletions().await.unwrap(), 1);
    assert_eq!(ids(&engine), mids(&[1, 3]));

    // A fresh full answer every call; nothing assumed from the last one
    server.set_existing(&[3]);
    engine.reconcile_deletions().await.unwrap();
    assert_eq!(ids(&engine), mids(&[3]));
}

#[tokio::test]
async fn test_edit_convergence() {
    let server = ScriptedServer::new();
    server.post_text(5, "a", 50);
    let mut engine = plain_engine(&server);
    engine.poll().await.unwrap();

    server.queue_edit(5, "b");
    assert_eq!(engine.reconcile_edits().await.unwrap(), 1);
    assert_eq!(engine.view().text_of(&MessageId::from(5)), Some("b"));
    assert!(engine.view().entries[0].highlighted);

    assert_eq!(engine.reconcile_edits().await.unwrap(), 0);
    assert_eq!(engine.view().text_of(&MessageId::from(5)), Some("b"));
}

#[tokio::test]
async fn test_edits_for_unrendered_messages_are_ignored() {
    let server = ScriptedServer::new();
    let mut engine = plain_engine(&server);
    server.queue_edit(9, "ghost");
    assert_eq!(engine.reconcile_edits().await.unwrap(), 0);

    server.post_text(1, "real", 1);
    engine.poll().await.unwrap();
    assert_eq!(engine.reconcile_edits().await.unwrap(), 0);
    assert_eq!(ids(&engine), mids(&[1]));
}

#[tokio::test]
async fn test_optimistic_message_replaced_by_persisted_one() {
    let server = ScriptedServer::new();
    let mut engine = plain_engine(&server);

    let receipt = engine
        .send_optimistic(OutgoingMessage::text("hello"))
        .await
        .unwrap();
    let view = engine.view();
    assert_eq!(view.pending_count(), 1);
    assert_eq!(view.entries[0].correlation_id, Some(receipt.correlation_id));
    assert_eq!(view.entries[0].sender, ME);

    engine.poll().await.unwrap();

    let view = engine.view();
    assert_eq!(view.pending_count(), 0);
    assert_eq!(view.entries.len(), 1);
    assert_eq!(view.entries[0].text, "hello");
}

#[tokio::test]
async fn test_echoed_id_matches_exactly() {
    let server = ScriptedServer::new();
    server.set_echo_ids(true);
    let mut engine = plain_engine(&server);

    let first = engine.send_optimistic(OutgoingMessage::text("same")).await.unwrap();
    let second = engine.send_optimistic(OutgoingMessage::text("same")).await.unwrap();
    assert_eq!(first.server_id, Some(MessageId::from(101)));
    assert_eq!(second.server_id, Some(MessageId::from(102)));

    engine.poll().await.unwrap();
    let view = engine.view();
    assert_eq!(view.pending_count(), 0);
    assert_eq!(view.ids(), mids(&[101, 102]));
}

#[tokio::test(start_paused = true)]
async fn test_unmatched_pending_expires_after_window() {
    let server = ScriptedServer::new();
    let mut engine = plain_engine(&server);

    engine.send_optimistic(OutgoingMessage::text("hello")).await.unwrap();
    // Persisted copy stamped by a server clock two minutes ahead
    server.remove(101);
    server.post(101, Scope::General, ME, MessageBody::Plain("hello".into()), now() + 120);

    engine.run_cycle().await;
    assert_eq!(ids(&engine), mids(&[101]));
    assert_eq!(engine.view().pending_count(), 1);

    tokio::time::advance(config().optimistic_window() + Duration::from_secs(1)).await;
    engine.run_cycle().await;

    let view = engine.view();
    assert_eq!(view.pending_count(), 0);
    assert_eq!(view.entries.len(), 1);
    assert_eq!(view.text_of(&MessageId::from(101)), Some("hello"));
}

#[tokio::test]
async fn test_someone_elses_identical_text_does_not_confirm() {
    let server = ScriptedServer::new();
    let mut engine = plain_engine(&server);

    engine.send_optimistic(OutgoingMessage::text("hi")).await.unwrap();
    server.remove(101);
    server.post(50, Scope::General, "mallory", MessageBody::Plain("hi".into()), now());

    engine.poll().await.unwrap();
    assert_eq!(engine.view().pending_count(), 1);
}

#[tokio::test]
async fn test_failed_send_withdraws_pending() {
    let server = ScriptedServer::new();
    server.set_reject_writes(true);
    let mut engine = plain_engine(&server);

    let result = engine.send_optimistic(OutgoingMessage::text("lost")).await;
    assert!(matches!(result, Err(ChatError::Transport(_))));
    assert_eq!(engine.view().pending_count(), 0);
    assert!(server.sent().is_empty());
}

#[tokio::test]
async fn test_authorization_failure_falls_back_to_general() {
    let server = ScriptedServer::new();
    server.post(1, Scope::Group(7), "bob", MessageBody::Plain("team".into()), 10);
    server.post_text(2, "lobby", 5);
    let mut engine = plain_engine(&server);

    engine.switch_scope(Scope::Group(7), Some("Team"));
    engine.poll().await.unwrap();
    assert_eq!(engine.cursor(), 10);

    server.deny(Scope::Group(7));
    let report = engine.run_cycle().await;
    assert!(report.fell_back);
    assert!(!report.failed);
    assert_eq!(engine.scope(), &Scope::General);
    assert_eq!(engine.cursor(), 0);
    assert!(engine.view().entries.is_empty());

    let stored = engine.keys().storage().load(SELECTION_SLOT).unwrap().unwrap();
    let record: SelectionRecord = serde_json::from_str(&stored).unwrap();
    assert_eq!(record.scope(), Some(Scope::General));

    engine.run_cycle().await;
    assert_eq!(ids(&engine), mids(&[2]));
}

#[tokio::test]
async fn test_authorization_failure_on_general_is_not_fatal() {
    let server = ScriptedServer::new();
    server.deny(Scope::General);
    let mut engine = plain_engine(&server);

    assert!(engine.poll().await.unwrap_err().is_authorization());
    let report = engine.run_cycle().await;
    assert!(report.failed);
    assert_eq!(engine.scope(), &Scope::General);
}

#[tokio::test]
async fn test_edit_and_delete_commands() {
    let server = ScriptedServer::new();
    let mut engine = plain_engine(&server);
    engine.send_optimistic(OutgoingMessage::text("draft")).await.unwrap();
    engine.run_cycle().await;
    let id = MessageId::from(101);

    engine
        .edit_message(&id, EditInput { body: "final".into() })
        .await
        .unwrap();
    assert_eq!(engine.view().text_of(&id), Some("final"));
    // The server now reports the same text; nothing changes
    server.queue_edit(101, "final");
    assert_eq!(engine.reconcile_edits().await.unwrap(), 0);

    engine.delete_message(&id).await.unwrap();
    assert!(engine.view().entries.is_empty());
    engine.run_cycle().await;
    assert!(engine.view().entries.is_empty());
}

#[tokio::test]
async fn test_rejected_delete_keeps_message() {
    let server = ScriptedServer::new();
    server.post_text(1, "theirs", 1);
    let mut engine = plain_engine(&server);
    engine.poll().await.unwrap();

    server.set_reject_writes(true);
    let result = engine.delete_message(&MessageId::from(1)).await;
    assert!(result.unwrap_err().is_authorization());
    assert_eq!(ids(&engine), mids(&[1]));
}

#[tokio::test]
async fn test_search_opens_envelopes() {
    let key = SessionKey::generate();
    let mut storage = MemoryStorage::new();
    storage.store(SESSION_KEY_SLOT, &key.export()).unwrap();

    let server = ScriptedServer::new();
    server.post(1, Scope::General, "bob", sealed("needle in sealed", &key), 1);
    server.post(2, Scope::General, "bob", MessageBody::Plain("plain needle".into()), 2);
    server.post(3, Scope::General, "bob", sealed("other key", &SessionKey::generate()), 3);

    let mut keys = KeyExchangeManager::new(storage);
    keys.bootstrap(server.transport().as_ref()).await;
    let engine = ReconciliationEngine::new(
        server.transport(),
        keys,
        Scope::General,
        EngineSettings::default(),
    );

    let results = engine.search_messages(&SearchQuery::new("needle")).await.unwrap();
    assert_eq!(results.total, 3);
    assert_eq!(results.results[0].text, "needle in sealed");
    assert_eq!(results.results[1].text, "plain needle");
    assert!(results.results[2].undecryptable);
}
