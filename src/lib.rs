pub mod branch;
pub mod errors;
pub mod invoke;
pub mod notify;
pub mod orchestrator;
pub mod queue;
pub mod recorder;
pub mod resolve;
pub mod scm;
pub mod sync_config;

pub use errors::{NotificationError, SyncError};
