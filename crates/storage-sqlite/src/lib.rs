//! SQLite storage for the offline-first persistence layer.
//!
//! This crate owns the local mirror and everything that touches it:
//! - Connection pooling, the single writer thread and local batches
//! - Embedded migrations guarded by a single-row schema version
//! - Repository implementations for every domain entity
//! - The durable sync queue and the background worker that drains it
//!
//! ```text
//!   core (models, traits)      remote (RemoteStore impls)
//!            │                          │
//!            └────────────┬─────────────┘
//!                         ▼
//!              storage-sqlite (this crate)
//!                         │
//!                         ▼
//!                     SQLite DB
//! ```

pub mod db;
pub mod errors;
pub mod repository;
pub mod schema;
pub mod schema_init;

pub mod details;
pub mod master_variables;
pub mod sync;
pub mod transactions;
pub mod users;

pub use db::{
    create_pool, get_connection, init, ConnectionManager, DbConnection, DbPool, WriteHandle,
};
pub use details::{DetailRepository, FixedCostRepository, RecurringServiceRepository};
pub use errors::{IntoCore, StorageError};
pub use master_variables::MasterVariableRepository;
pub use repository::RepositoryBase;
pub use schema_init::{initialize_schema, SCHEMA_VERSION};
pub use sync::{SyncQueueRepository, SyncWorker};
pub use transactions::TransactionRepository;
pub use users::UserRepository;

pub use gatekeeper_core::errors::{DatabaseError, Error, Result};
