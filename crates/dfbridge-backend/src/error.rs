//! Error types for dfbridge-backend

use thiserror::Error;

/// Errors raised by a backend connection.
///
/// Backends map their native failures onto these variants; the adapter
/// layer translates them into request-level errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Connection could not be established or was lost
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Backend rejected or failed to run a query
    #[error("Query failed: {0}")]
    Query(String),

    /// Payload could not be encoded or decoded
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Record addressed by identifier does not exist
    #[error("Record '{id}' not found in '{collection}'")]
    RecordNotFound { collection: String, id: String },

    /// Collection (database, container, object type) does not exist
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Collection already exists
    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    /// Optimistic concurrency check failed
    #[error("Document update conflict for '{id}': expected revision {expected}, found {actual}")]
    RevisionConflict {
        id: String,
        expected: String,
        actual: String,
    },

    /// Protocol-level failure reported by a REST backend
    #[error("{code} {message}")]
    Rest {
        status: u16,
        code: String,
        message: String,
    },

    /// Backend session is stale and must be re-established
    #[error("Backend session expired")]
    SessionExpired,

    /// Backend declares no support for the requested operation
    #[error("Operation not supported by backend: {0}")]
    Unsupported(String),
}

impl BackendError {
    /// Whether this error signals an expired authentication session.
    ///
    /// REST backends report this as HTTP 401.
    pub fn is_session_expired(&self) -> bool {
        matches!(
            self,
            BackendError::SessionExpired | BackendError::Rest { status: 401, .. }
        )
    }
}

impl From<surrealdb::Error> for BackendError {
    fn from(err: surrealdb::Error) -> Self {
        BackendError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Serialization(err.to_string())
    }
}
