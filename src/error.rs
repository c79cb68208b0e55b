//! Error types for autorank
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// Errors reported by a [`crate::store::RemoteStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached at all
    #[error("store unreachable: {0}")]
    Unavailable(String),

    /// The store answered with a non-success status
    #[error("store returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The response body could not be understood
    #[error("unexpected store response: {0}")]
    Decode(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            StoreError::Unavailable(err.to_string())
        } else if let Some(status) = err.status() {
            StoreError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }
}

/// All error types that can occur while reconciling ranks
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The inbound item was malformed or incomplete
    #[error("invalid item: {0}")]
    Validation(String),

    /// The edit never showed up in the mirror or the change feed
    #[error("timed out waiting for the edit to land, last_seq = {last_seq}")]
    ConsistencyTimeout { last_seq: String },

    /// The bulk write reported per-item failures
    #[error("error updating docs in database: {succeeded}/{attempted} succeeded")]
    RemoteWrite { attempted: usize, succeeded: usize },

    /// No store is configured, or it cannot be reached
    #[error("db connection failed: {0}")]
    RemoteUnavailable(String),

    /// Any other store failure
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => ReconcileError::RemoteUnavailable(msg),
            other => ReconcileError::Store(other),
        }
    }
}

impl ReconcileError {
    /// Whether the remote store may hold part of a write that then failed.
    pub fn may_be_partially_applied(&self) -> bool {
        matches!(self, ReconcileError::RemoteWrite { succeeded, .. } if *succeeded > 0)
    }
}

/// Result type alias for reconciliation operations
pub type Result<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error() {
        let err = ReconcileError::Validation("missing parentId".to_string());
        assert_eq!(err.to_string(), "invalid item: missing parentId");
    }

    #[test]
    fn test_timeout_error_carries_cursor() {
        let err = ReconcileError::ConsistencyTimeout {
            last_seq: "42-abc".to_string(),
        };
        assert!(err.to_string().contains("last_seq = 42-abc"));
    }

    #[test]
    fn test_remote_write_error_counts() {
        let err = ReconcileError::RemoteWrite {
            attempted: 3,
            succeeded: 1,
        };
        assert_eq!(err.to_string(), "error updating docs in database: 1/3 succeeded");
        assert!(err.may_be_partially_applied());

        let none = ReconcileError::RemoteWrite {
            attempted: 3,
            succeeded: 0,
        };
        assert!(!none.may_be_partially_applied());
    }

    #[test]
    fn test_unavailable_store_error_maps_to_remote_unavailable() {
        let err: ReconcileError = StoreError::Unavailable("connection refused".to_string()).into();
        assert!(matches!(err, ReconcileError::RemoteUnavailable(_)));
    }

    #[test]
    fn test_http_store_error_maps_to_store() {
        let err: ReconcileError = StoreError::Http {
            status: 500,
            message: "boom".to_string(),
        }
        .into();
        assert!(matches!(err, ReconcileError::Store(StoreError::Http { status: 500, .. })));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: StoreError = json_err.into();
        assert!(matches!(err, StoreError::Json(_)));
    }
}
