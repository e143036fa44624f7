use murmur_core::models::{MessageId, Scope};
use murmur_core::sync::{ConversationView, ViewEntry};
use murmur_core::{SyncHandle, Result};
use std::collections::HashSet;
use std::future::Future;
use tracing::{debug, info, warn};

/// What changed between two published views
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ViewDiff<'a> {
    pub scope_changed: bool,
    pub added: Vec<&'a ViewEntry>,
    pub removed: Vec<MessageId>,
    pub highlighted: Vec<&'a ViewEntry>,
}

impl<'a> ViewDiff<'a> {
    pub fn between(old: &ConversationView, new: &'a ConversationView) -> Self {
        if old.scope != new.scope {
            return Self {
                scope_changed: true,
                added: new.entries.iter().filter(|e| !e.pending).collect(),
                ..Self::default()
            };
        }

        let old_ids: HashSet<MessageId> = old.ids().into_iter().collect();
        let new_ids: HashSet<MessageId> = new.ids().into_iter().collect();
        let was_highlighted: HashSet<&MessageId> = old
            .entries
            .iter()
            .filter(|e| e.highlighted)
            .filter_map(|e| e.id.as_ref())
            .collect();

        Self {
            scope_changed: false,
            added: new
                .entries
                .iter()
                .filter(|e| e.id.as_ref().map_or(false, |id| !old_ids.contains(id)))
                .collect(),
            removed: old
                .ids()
                .into_iter()
                .filter(|id| !new_ids.contains(id))
                .collect(),
            highlighted: new
                .entries
                .iter()
                .filter(|e| e.highlighted)
                .filter(|e| e.id.as_ref().map_or(false, |id| !was_highlighted.contains(id)))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.scope_changed
            && self.added.is_empty()
            && self.removed.is_empty()
            && self.highlighted.is_empty()
    }
}

fn log_diff(view: &ConversationView, diff: &ViewDiff<'_>) {
    if diff.scope_changed {
        info!(scope = %view.scope, encrypted = view.encrypted, "Following conversation");
    }
    for entry in &diff.added {
        info!(
            sender = %entry.sender,
            timestamp = entry.timestamp,
            undecryptable = entry.undecryptable,
            attachments = entry.attachments.len(),
            "{}",
            entry.text
        );
    }
    for id in &diff.removed {
        info!(%id, "Message deleted");
    }
    for entry in &diff.highlighted {
        info!(sender = %entry.sender, "Edited: {}", entry.text);
    }
}

/// Log every view change until `shutdown` resolves, then stop the driver
pub async fn follow<F>(handle: SyncHandle, scope: Option<Scope>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let mut views = handle.subscribe();
    if let Some(scope) = scope {
        handle.switch_scope(scope, None).await?;
    }

    let mut last = ConversationView::default();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            changed = views.changed() => {
                if changed.is_err() {
                    warn!("Sync driver stopped unexpectedly");
                    break;
                }
                let view = views.borrow_and_update().clone();
                let diff = ViewDiff::between(&last, &view);
                if diff.is_empty() {
                    debug!(cursor = view.cursor, "View republished without visible changes");
                } else {
                    log_diff(&view, &diff);
                }
                last = view;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}
