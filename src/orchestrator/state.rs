use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Stages of one build pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncState {
    Idle,
    QueueOpened,
    /// Prior failures discarded on operator request.
    Cleared,
    EventRecorded,
    Invoking,
    Reconciled,
    Aborted,
}

impl SyncState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncState::Reconciled | SyncState::Aborted)
    }

    /// Whether `next` may follow `self`. Any non-terminal state may abort.
    pub fn can_transition_to(self, next: SyncState) -> bool {
        use SyncState::*;
        match (self, next) {
            (from, Aborted) => !from.is_terminal(),
            (Idle, QueueOpened) => true,
            (QueueOpened, Cleared) => true,
            (QueueOpened, EventRecorded) | (Cleared, EventRecorded) => true,
            (EventRecorded, Invoking) => true,
            (Invoking, Reconciled) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Idle => "Idle",
            SyncState::QueueOpened => "QueueOpened",
            SyncState::Cleared => "Cleared",
            SyncState::EventRecorded => "EventRecorded",
            SyncState::Invoking => "Invoking",
            SyncState::Reconciled => "Reconciled",
            SyncState::Aborted => "Aborted",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state plus the path taken to reach it.
#[derive(Debug, Clone)]
pub struct StateTracker {
    history: Vec<SyncState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self {
            history: vec![SyncState::Idle],
        }
    }
}

impl StateTracker {
    pub fn current(&self) -> SyncState {
        self.history
            .last()
            .copied()
            .unwrap_or(SyncState::Idle)
    }

    /// Record a transition. Illegal transitions are a programming error
    /// and are caught in debug builds.
    pub fn advance(&mut self, next: SyncState) {
        let from = self.current();
        debug_assert!(
            from.can_transition_to(next),
            "illegal sync state transition {} -> {}",
            from,
            next
        );
        debug!(from = %from, to = %next, "Sync state transition");
        self.history.push(next);
    }

    pub fn history(&self) -> &[SyncState] {
        &self.history
    }
}
