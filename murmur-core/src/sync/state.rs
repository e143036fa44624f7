use super::pending::PendingQueue;
use super::timeline::Timeline;
use crate::models::Scope;

/// Per-scope sync state owned by the engine
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub scope: Scope,
    /// High-water timestamp fetched so far; only moves forward within a scope
    pub cursor: i64,
    pub timeline: Timeline,
    pub pending: PendingQueue,
}

impl SessionState {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            ..Self::default()
        }
    }

    /// Start over in `scope`
    pub fn reset(&mut self, scope: Scope) {
        self.scope = scope;
        self.cursor = 0;
        self.timeline.clear();
        self.pending.clear();
    }

    pub fn advance_cursor(&mut self, cursor: i64) -> bool {
        if cursor > self.cursor {
            self.cursor = cursor;
            true
        } else {
            false
        }
    }
}
