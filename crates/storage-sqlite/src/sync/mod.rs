//! Durable sync queue and the background worker that drains it.

mod queue_repository;
mod worker;

pub(crate) use queue_repository::insert_queue_entry;
pub use queue_repository::{SyncQueueEntryDB, SyncQueueRepository};
pub use worker::SyncWorker;
