//! Error types for docstore

use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for docstore operations
pub type Result<T> = std::result::Result<T, DocStoreError>;

/// Error produced by a storage collaborator, kept as-is
pub type OperationError = Arc<dyn StdError + Send + Sync + 'static>;

/// Unified error type for all docstore operations
#[derive(Error, Debug, Clone)]
pub enum DocStoreError {
    /// A call-site argument had the wrong type or shape. Raised before any I/O.
    #[error("Invalid {param} param, must be {expected}")]
    InvalidArgument {
        param: &'static str,
        expected: &'static str,
    },

    /// Failure reported by the storage collaborator, passed through unchanged.
    #[error(transparent)]
    OperationFailure(OperationError),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl DocStoreError {
    /// Shorthand for building an `InvalidArgument`
    pub fn invalid(param: &'static str, expected: &'static str) -> Self {
        DocStoreError::InvalidArgument { param, expected }
    }

    /// Wraps any collaborator error without translating it
    pub fn operation<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        DocStoreError::OperationFailure(Arc::new(err))
    }

    /// Returns true if the call was rejected before reaching the collaborator
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, DocStoreError::InvalidArgument { .. })
    }

    /// Name of the offending parameter for `InvalidArgument` errors
    pub fn param(&self) -> Option<&'static str> {
        match self {
            DocStoreError::InvalidArgument { param, .. } => Some(*param),
            _ => None,
        }
    }

    /// The collaborator's own error, if this is an `OperationFailure`
    pub fn operation_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            DocStoreError::OperationFailure(err) => Some(err.as_ref()),
            _ => None,
        }
    }

    /// Native driver error, when the failure came from the MongoDB driver
    #[cfg(feature = "mongodb-errors")]
    pub fn mongodb_error(&self) -> Option<&mongodb::error::Error> {
        self.operation_error()
            .and_then(|err| err.downcast_ref::<mongodb::error::Error>())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for DocStoreError {
    fn from(err: mongodb::error::Error) -> Self {
        DocStoreError::operation(err)
    }
}
