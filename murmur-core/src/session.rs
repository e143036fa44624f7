use crate::config::ClientConfig;
use crate::crypto::{KeyExchangeManager, SessionStorage, SELECTION_SLOT};
use crate::error::{ChatError, Result};
use crate::models::{Scope, SelectionRecord};
use crate::sync::{EngineSettings, ReconciliationEngine};
use crate::transport::Transport;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bootstrap a session: key exchange, then restore the selected conversation.
///
/// Key exchange never fails the bootstrap; a broken exchange leaves the
/// session unencrypted.
pub async fn open_session<S: SessionStorage>(
    config: &ClientConfig,
    transport: Arc<dyn Transport>,
    storage: S,
) -> Result<ReconciliationEngine<S>> {
    config.check()?;

    let mut keys = KeyExchangeManager::new(storage);
    let key_state = keys.bootstrap(transport.as_ref()).await;
    let scope = restore_selection(keys.storage_mut());

    info!(
        key_state = ?key_state,
        encrypted = keys.encryption_enabled(),
        scope = %scope,
        "Session opened"
    );

    Ok(ReconciliationEngine::new(
        transport,
        keys,
        scope,
        EngineSettings::from_config(config),
    ))
}

/// Selected conversation from storage, general when missing or unreadable.
/// The general record is written back so the next restore finds it.
pub fn restore_selection<S: SessionStorage + ?Sized>(storage: &mut S) -> Scope {
    let restored = match storage.load(SELECTION_SLOT) {
        Ok(Some(raw)) => match serde_json::from_str::<SelectionRecord>(&raw) {
            Ok(record) => record.scope(),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable conversation selection");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "Failed to read conversation selection");
            None
        }
    };

    if let Some(scope) = restored {
        debug!(scope = %scope, "Restored conversation selection");
        return scope;
    }

    let general = SelectionRecord::new(&Scope::General, None);
    let stored = serde_json::to_string(&general)
        .map_err(ChatError::from)
        .and_then(|json| storage.store(SELECTION_SLOT, &json));
    if let Err(e) = stored {
        warn!(error = %e, "Failed to persist default conversation selection");
    }
    Scope::General
}
