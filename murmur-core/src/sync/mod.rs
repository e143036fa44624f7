//! Incremental reconciliation of the rendered conversation with the server.

mod driver;
mod engine;
mod pending;
mod state;
mod timeline;
mod view;

pub use driver::{SyncDriver, SyncHandle};
pub use engine::{
    CycleReport, EngineSettings, PollOutcome, ReconciliationEngine, SearchResult, SearchResults,
    SendReceipt,
};
pub use pending::{PendingMessage, PendingQueue};
pub use state::SessionState;
pub use timeline::{RenderedMessage, Timeline};
pub use view::{ConversationView, ViewEntry};
