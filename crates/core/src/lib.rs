//! Domain models, ports and services for the offline-first persistence layer.
//!
//! Nothing in this crate touches a database or the network. Storage and the
//! remote client live in their own crates and plug in through the traits
//! declared here.

pub mod config;
pub mod details;
pub mod errors;
pub mod master_variables;
pub mod persistence;
pub mod remote;
pub mod sync;
pub mod transactions;
pub mod users;

pub use errors::{DatabaseError, Error, Result};
pub use persistence::{BatchWork, LocalBatch, WriteOutcome};
