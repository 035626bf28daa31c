//! Error types for the remote table client.

use gatekeeper_core::sync::{classify_http_status, SyncRetryClass};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RemoteApiError>;

#[derive(Debug, Error)]
pub enum RemoteApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-2xx answer; `message` is the PostgREST error text when present.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Rejected before sending: bad base URL, unscoped write or unencodable filter.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authentication error: {0}")]
    Auth(String),
}

impl RemoteApiError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            Self::Auth(_) => Some(401),
            Self::Json(_) | Self::InvalidRequest(_) => None,
        }
    }

    /// Transport failures are retried; malformed requests never are.
    pub fn retry_class(&self) -> SyncRetryClass {
        match self {
            Self::Api { status, .. } => classify_http_status(*status),
            Self::Http(_) => SyncRetryClass::Retryable,
            Self::Json(_) => SyncRetryClass::Permanent,
            Self::InvalidRequest(_) => SyncRetryClass::Permanent,
            Self::Auth(_) => SyncRetryClass::ReauthRequired,
        }
    }
}

impl From<RemoteApiError> for gatekeeper_core::Error {
    fn from(err: RemoteApiError) -> Self {
        gatekeeper_core::Error::Remote {
            status: err.status_code(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_class_for_auth_error_is_reauth() {
        let err = RemoteApiError::api(401, "JWT expired");
        assert_eq!(err.retry_class(), SyncRetryClass::ReauthRequired);
    }

    #[test]
    fn conflict_is_retryable_and_bad_request_is_not() {
        assert_eq!(
            RemoteApiError::api(409, "duplicate key").retry_class(),
            SyncRetryClass::Retryable
        );
        assert_eq!(
            RemoteApiError::api(400, "column does not exist").retry_class(),
            SyncRetryClass::Permanent
        );
    }

    #[test]
    fn converts_into_core_remote_error_with_status() {
        let err: gatekeeper_core::Error = RemoteApiError::api(503, "down").into();
        match err {
            gatekeeper_core::Error::Remote { status, message } => {
                assert_eq!(status, Some(503));
                assert!(message.contains("down"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
