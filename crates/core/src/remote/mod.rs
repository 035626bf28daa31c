//! Port to the remote relational backend.

mod remote_query;
mod remote_store;

pub use remote_query::*;
pub use remote_store::*;
