pub mod runner;
pub mod state;

pub use runner::{SyncOrchestrator, SyncReport};
pub use state::{StateTracker, SyncState};
