//! Error taxonomy shared by every gatekeeper crate.

use thiserror::Error;

use crate::sync::{classify_http_status, SyncRetryClass};

/// Result type alias used across the persistence layer.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for repository, sync and service operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    /// The remote store was never configured or failed to initialize.
    /// Repositories treat this as the uniform "go local" signal.
    #[error("Remote store is not initialized")]
    RemoteNotInitialized,

    #[error("Remote request failed: {message}")]
    Remote {
        status: Option<u16>,
        message: String,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A multi-step remote write could not be completed and was rolled back.
    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            status: None,
            message: message.into(),
        }
    }

    pub fn remote_status(status: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status: Some(status),
            message: message.into(),
        }
    }

    /// True for failures that mean "the remote side did not take the write":
    /// not configured, unreachable, or rejected.
    pub fn is_remote_unavailable(&self) -> bool {
        matches!(self, Self::RemoteNotInitialized | Self::Remote { .. })
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Self::RemoteNotInitialized)
    }

    /// Transport failures without a status retry; everything that is not a
    /// remote answer is treated as permanent.
    pub fn retry_class(&self) -> SyncRetryClass {
        match self {
            Self::Remote {
                status: Some(status),
                ..
            } => classify_http_status(*status),
            Self::Remote { status: None, .. } | Self::RemoteNotInitialized => {
                SyncRetryClass::Retryable
            }
            _ => SyncRetryClass::Permanent,
        }
    }
}

impl From<crate::sync::PayloadError> for Error {
    fn from(err: crate::sync::PayloadError) -> Self {
        Self::Sync(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_is_a_remote_unavailability() {
        assert!(Error::RemoteNotInitialized.is_remote_unavailable());
        assert!(Error::RemoteNotInitialized.is_offline());
        assert!(Error::remote_status(503, "unavailable").is_remote_unavailable());
        assert!(!Error::remote("timeout").is_offline());
    }

    #[test]
    fn retry_class_follows_the_remote_status() {
        assert_eq!(
            Error::remote_status(401, "jwt expired").retry_class(),
            SyncRetryClass::ReauthRequired
        );
        assert_eq!(
            Error::remote_status(503, "unavailable").retry_class(),
            SyncRetryClass::Retryable
        );
        assert_eq!(Error::remote("timeout").retry_class(), SyncRetryClass::Retryable);
        assert_eq!(
            Error::Integrity("partial replace".into()).retry_class(),
            SyncRetryClass::Permanent
        );
        assert!(!Error::Integrity("partial".to_string()).is_remote_unavailable());
    }

    #[test]
    fn database_error_message_is_wrapped() {
        let err = Error::from(DatabaseError::QueryFailed("no such table".to_string()));
        assert_eq!(
            err.to_string(),
            "Database operation failed: Query failed: no such table"
        );
    }
}
