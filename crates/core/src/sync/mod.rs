//! Sync queue models and worker policy.

mod sync_model;
mod sync_payload;
mod sync_worker_policy;

pub use sync_model::*;
pub use sync_payload::*;
pub use sync_worker_policy::*;
