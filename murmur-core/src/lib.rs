//! Secure channel and message synchronization core of the murmur chat client.
//!
//! A session registers a fresh AES-256-GCM key with the server (wrapped under
//! the server's RSA key), then keeps the rendered conversation in step with a
//! polling REST API.

pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
pub mod session;
pub mod sync;
pub mod transport;

pub use config::ClientConfig;
pub use error::{ChatError, Result};
pub use session::open_session;
pub use sync::{ConversationView, ReconciliationEngine, SyncDriver, SyncHandle};
pub use transport::{HttpTransport, Transport};
