//! Session encryption: AES-256-GCM envelopes under a per-session key that is
//! registered with the server wrapped in RSA-OAEP.

pub mod cipher;
mod manager;
mod storage;
mod types;
mod wrap;

pub use cipher::{decrypt, encrypt};
pub use manager::{KeyExchangeManager, KeyExchangeState};
pub use storage::{KeyringStorage, MemoryStorage, SessionStorage, SELECTION_SLOT, SESSION_KEY_SLOT};
pub use types::{Envelope, SessionKey, NONCE_LEN, SESSION_KEY_LEN};
pub use wrap::ServerPublicKey;
