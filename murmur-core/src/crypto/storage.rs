use crate::error::Result;
use keyring::Entry;
use std::collections::HashMap;

/// Slot holding the exported session key
pub const SESSION_KEY_SLOT: &str = "sessionKey";
/// Slot holding the conversation-selection record
pub const SELECTION_SLOT: &str = "currentChat";

const KEYRING_SERVICE: &str = "murmur-chat";
const KEYRING_SLOT_PREFIX: &str = "session-";

/// Per-session key/value storage, cleared on logout.
pub trait SessionStorage: Send + Sync {
    fn load(&self, slot: &str) -> Result<Option<String>>;
    fn store(&mut self, slot: &str, value: &str) -> Result<()>;
    fn remove(&mut self, slot: &str) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
}

/// Process-lifetime storage; nothing survives a restart.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    entries: HashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self, slot: &str) -> Result<Option<String>> {
        Ok(self.entries.get(slot).cloned())
    }

    fn store(&mut self, slot: &str, value: &str) -> Result<()> {
        self.entries.insert(slot.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, slot: &str) -> Result<()> {
        self.entries.remove(slot);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

/// OS keyring (Windows Credential Manager, macOS Keychain, Linux Secret Service),
/// one entry per slot and user
#[derive(Debug, Clone)]
pub struct KeyringStorage {
    user: String,
}

impl KeyringStorage {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    fn entry(&self, slot: &str) -> Result<Entry> {
        Ok(Entry::new(
            KEYRING_SERVICE,
            &format!("{}{}-{}", KEYRING_SLOT_PREFIX, self.user, slot),
        )?)
    }
}

impl SessionStorage for KeyringStorage {
    fn load(&self, slot: &str) -> Result<Option<String>> {
        match self.entry(slot)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&mut self, slot: &str, value: &str) -> Result<()> {
        self.entry(slot)?.set_password(value)?;
        Ok(())
    }

    fn remove(&mut self, slot: &str) -> Result<()> {
        match self.entry(slot)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()), // Already deleted
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&mut self) -> Result<()> {
        for slot in [SESSION_KEY_SLOT, SELECTION_SLOT] {
            self.remove(slot)?;
        }
        Ok(())
    }
}
