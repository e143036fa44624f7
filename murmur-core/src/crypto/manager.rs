use super::storage::{SessionStorage, SESSION_KEY_SLOT};
use super::types::{Envelope, SessionKey};
use super::wrap::ServerPublicKey;
use super::cipher;
use crate::error::{ChatError, Result};
use crate::transport::Transport;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Key exchange progress for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyExchangeState {
   Uninitialized,
   Restoring,
   Restored,
   Generating,
   Transmitting,
   Ready,
   /// Key exchange failed; the session runs unencrypted
   Failed,
}

/// Owns the session key for its whole lifetime and lends it to the envelope cipher
pub struct KeyExchangeManager<S> {
   storage: S,
   state: KeyExchangeState,
   key: Option<SessionKey>,
}

impl<S: SessionStorage> KeyExchangeManager<S> {
   pub fn new(storage: S) -> Self {
      Self {
         storage,
         state: KeyExchangeState::Uninitialized,
         key: None,
      }
   }

   pub fn state(&self) -> KeyExchangeState {
      self.state
   }

   pub fn storage(&self) -> &S {
      &self.storage
   }

   pub fn storage_mut(&mut self) -> &mut S {
      &mut self.storage
   }

   /// True once a registered key is held; false means messages flow as plaintext
   pub fn encryption_enabled(&self) -> bool {
      self.state == KeyExchangeState::Ready && self.key.is_some()
   }

   /// The key to use for the envelope cipher, if encryption is enabled
   pub fn active_key(&self) -> Option<&SessionKey> {
      if self.encryption_enabled() {
         self.key.as_ref()
      } else {
         None
      }
   }

   /// Run the bootstrap sequence: restore, else generate + transmit.
   ///
   /// Never fails; a broken exchange ends in `Failed` and the session keeps
   /// working without encryption.
   pub async fn bootstrap<T: Transport + ?Sized>(&mut self, transport: &T) -> KeyExchangeState {
      if self.encryption_enabled() {
         return self.state;
      }

      self.transition(KeyExchangeState::Restoring);
      match self.restore() {
         Ok(Some(key)) => {
            info!(fingerprint = %key.fingerprint(), "Restored session key");
            self.key = Some(key);
            self.transition(KeyExchangeState::Restored);
            self.transition(KeyExchangeState::Ready);
            return self.state;
         }
         Ok(None) => debug!("No persisted session key"),
         Err(e) => warn!(error = %e, "Discarding unreadable persisted session key"),
      }

      if let Err(e) = self.ensure_key() {
         warn!(error = %e, "Session key generation failed, continuing without encryption");
         self.fail();
         return self.state;
      }

      self.transmit(transport).await
   }

   /// Make sure exactly one key is held, generating it only when none exists.
   ///
   /// A second call while a key is live is a no-op, so a session never holds
   /// two keys.
   pub fn ensure_key(&mut self) -> Result<&SessionKey> {
      if self.key.is_none() {
         self.transition(KeyExchangeState::Generating);
         let key = SessionKey::generate();
         self.storage.store(SESSION_KEY_SLOT, &key.export())?;
         info!(fingerprint = %key.fingerprint(), "Generated session key");
         self.key = Some(key);
      }
      self.key
         .as_ref()
         .ok_or_else(|| ChatError::Crypto("no session key".to_string()))
   }

   /// Re-run the exchange if a caller finds no usable key (e.g. after `clear`)
   pub async fn ensure_ready<T: Transport + ?Sized>(&mut self, transport: &T) -> KeyExchangeState {
      if self.encryption_enabled() {
         self.state
      } else {
         self.bootstrap(transport).await
      }
   }

   /// Forget the key and wipe session storage (logout)
   pub fn clear(&mut self) -> Result<()> {
      self.key = None;
      self.transition(KeyExchangeState::Uninitialized);
      self.storage.clear()
   }

   /// Encrypt `plaintext` when encryption is enabled; `None` means send it as-is
   pub fn seal(&self, plaintext: &str) -> Result<Option<Envelope>> {
      match self.active_key() {
         Some(key) => cipher::encrypt(plaintext, Some(key)).map(Some),
         None => Ok(None),
      }
   }

   fn restore(&self) -> Result<Option<SessionKey>> {
      match self.storage.load(SESSION_KEY_SLOT)? {
         Some(exported) => SessionKey::import(&exported).map(Some),
         None => Ok(None),
      }
   }

   async fn transmit<T: Transport + ?Sized>(&mut self, transport: &T) -> KeyExchangeState {
      self.transition(KeyExchangeState::Transmitting);
      match self.register(transport).await {
         Ok(()) => {
            info!("Session key registered with server");
            self.transition(KeyExchangeState::Ready);
         }
         Err(e) => {
            warn!(error = %e, "Key exchange failed, continuing without encryption");
            self.fail();
         }
      }
      self.state
   }

   async fn register<T: Transport + ?Sized>(&self, transport: &T) -> Result<()> {
      let key = self
         .key
         .as_ref()
         .ok_or_else(|| ChatError::Crypto("no session key".to_string()))?;

      let pem = transport.fetch_server_public_key().await?;
      let wrapped = ServerPublicKey::from_pem(&pem)?.wrap(key)?;
      transport.register_session_key(&wrapped).await
   }

   /// Drop a key the server never received so a later bootstrap does not
   /// restore it as if it were registered.
   fn fail(&mut self) {
      self.key = None;
      if let Err(e) = self.storage.remove(SESSION_KEY_SLOT) {
         warn!(error = %e, "Failed to remove unregistered session key");
      }
      self.transition(KeyExchangeState::Failed);
   }

   fn transition(&mut self, next: KeyExchangeState) {
      debug!(from = ?self.state, to = ?next, "Key exchange transition");
      self.state = next;
   }
}
