//! Storage-specific errors and their mapping into the core taxonomy.

use gatekeeper_core::errors::{DatabaseError, Error};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Connection failed: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        let database = match err {
            StorageError::Query(e) => DatabaseError::QueryFailed(e.to_string()),
            StorageError::Connection(e) => DatabaseError::ConnectionFailed(e.to_string()),
            StorageError::Pool(e) => DatabaseError::ConnectionFailed(e.to_string()),
            StorageError::Migration(msg) => DatabaseError::MigrationFailed(msg),
            StorageError::Io(e) => DatabaseError::Internal(e.to_string()),
        };
        Error::Database(database)
    }
}

/// Shorthand for `.map_err(StorageError::from).map_err(Error::from)`.
pub trait IntoCore<T> {
    fn into_core(self) -> gatekeeper_core::Result<T>;
}

impl<T, E> IntoCore<T> for std::result::Result<T, E>
where
    E: Into<StorageError>,
{
    fn into_core(self) -> gatekeeper_core::Result<T> {
        self.map_err(|e| Error::from(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_query_failure() {
        let err: Error = StorageError::from(diesel::result::Error::NotFound).into();
        assert!(matches!(err, Error::Database(DatabaseError::QueryFailed(_))));
    }

    #[test]
    fn into_core_wraps_diesel_results() {
        let result: std::result::Result<(), diesel::result::Error> =
            Err(diesel::result::Error::RollbackTransaction);
        assert!(result.into_core().is_err());
    }
}
