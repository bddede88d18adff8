//! SICC Error Types
//!
//! Defines the error taxonomy shared by every SICC component.

use thiserror::Error;

/// SICC Result type alias
pub type SiccResult<T> = Result<T, SiccError>;

/// SICC errors
#[derive(Debug, Error)]
pub enum SiccError {
    /// Caller supplied malformed or out-of-range input
    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },

    /// Referenced pattern, agent or record is absent
    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    /// An embedding, store or LLM call exceeded its budget
    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Store connection dropped or the store is temporarily busy
    #[error("transient store error: {message}")]
    TransientStore { message: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigValidationError),

    /// Database error
    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Store(rusqlite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SiccError {
    /// Create a validation error naming the offending field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// `entity_type` is the display name, e.g. `Pattern`
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Create a transient store error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientStore {
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Busy or locked store; the only variant `with_retry` retries
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStore { .. })
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for SiccError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Self::transient(e.to_string())
            }
            _ => Self::Store(e),
        }
    }
}
