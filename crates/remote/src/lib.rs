//! Remote table store adapters.
//!
//! - [`PostgrestClient`]: HTTP client for the hosted PostgREST API
//! - [`MemoryRemoteStore`]: in-process store with failure injection

pub mod client;
pub mod error;
pub mod memory;

pub use client::PostgrestClient;
pub use error::{RemoteApiError, Result};
pub use memory::{MemoryRemoteStore, RemoteVerb};
