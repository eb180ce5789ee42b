//! Durable push queue.
//!
//! Every push destined for ISPW is recorded here before the CLI runs and is
//! only removed after a synchronization run covering it succeeds.

pub mod event;
pub mod store;

pub use event::PushEvent;
pub use store::{PushQueueStore, QueueTx, queue_file};
