//! Request-level error taxonomy for adapters.

use dfbridge_backend::BackendError;
use thiserror::Error;

use crate::batch::UnitOutcome;

/// Errors surfaced to callers of the table and schema adapters.
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    /// Caller-supplied data is structurally invalid. Never retried.
    #[error("{0}")]
    BadRequest(String),

    /// Requested record, field or collection does not exist
    #[error("{0}")]
    NotFound(String),

    /// Backend declares no support for the requested capability
    #[error("{0}")]
    NotImplemented(String),

    /// Backend call failed unexpectedly; carries the backend message
    #[error("{0}")]
    InternalServerError(String),

    /// Protocol-level failure reported by a REST backend
    #[error("{code} {message}")]
    Rest {
        status: u16,
        code: String,
        message: String,
    },

    /// A batch failed part way. `outcomes[i]` is the result of unit `i`;
    /// units never attempted are absent from the tail.
    #[error("Batch Error: {message}")]
    Batch {
        message: String,
        outcomes: Vec<UnitOutcome>,
        rolled_back: bool,
    },
}

impl AdapterError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        AdapterError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AdapterError::NotFound(msg.into())
    }

    /// Wrap a backend failure with the operation that was attempted.
    ///
    /// Validation and capability errors pass through unchanged.
    pub fn wrap(context: &str, err: AdapterError) -> Self {
        match err {
            AdapterError::InternalServerError(msg) => {
                AdapterError::InternalServerError(format!("{context}\n{msg}"))
            }
            other => other,
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AdapterError::BadRequest(_) => 400,
            AdapterError::NotFound(_) => 404,
            AdapterError::NotImplemented(_) => 501,
            AdapterError::InternalServerError(_) => 500,
            AdapterError::Rest { status, .. } => *status,
            AdapterError::Batch { .. } => 400,
        }
    }
}

impl From<BackendError> for AdapterError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::RecordNotFound { .. } | BackendError::CollectionNotFound(_) => {
                AdapterError::NotFound(err.to_string())
            }
            BackendError::Rest {
                status,
                code,
                message,
            } => AdapterError::Rest {
                status,
                code,
                message,
            },
            BackendError::Unsupported(_) => AdapterError::NotImplemented(err.to_string()),
            other => AdapterError::InternalServerError(other.to_string()),
        }
    }
}

/// Result type for adapter operations
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;
