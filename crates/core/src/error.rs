//! Error types for docmapper
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! - [`Error`]: everything the change-tracking core can raise
//! - [`StorageError`]: failures reported by a storage collaborator

use crate::operation::OperatorKind;
use crate::path::{FieldPath, PathParseError};
use crate::types::{ContextId, DocumentId};
use thiserror::Error;

/// Result type alias for docmapper operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for storage collaborator calls
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Failure reported by a storage collaborator
///
/// The core never retries these and never inspects them beyond logging; they
/// reach the caller inside [`Error::Storage`] unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The store could not be reached
    #[error("connectivity failure: {0}")]
    Connectivity(String),

    /// The store rejected the write because of a constraint (e.g. duplicate key)
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The store did not answer in time
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The store refused the command for another reason
    #[error("command rejected: {0}")]
    Rejected(String),
}

/// Error types for the change-tracking core
#[derive(Debug, Error)]
pub enum Error {
    /// Read or write of a field excluded from the loaded projection
    #[error("field '{path}' was not loaded by the projection")]
    FieldNotLoaded {
        /// The field that was accessed
        path: FieldPath,
    },

    /// Two operators that cannot share one update command target the same path
    #[error("cannot combine {incoming} with pending {existing} on '{path}'")]
    OperatorConflict {
        /// Path both operators target
        path: FieldPath,
        /// Operator already pending
        existing: OperatorKind,
        /// Operator that was rejected
        incoming: OperatorKind,
    },

    /// Failure reported by the storage collaborator
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The addressed document no longer exists
    #[error("document {id} not found in '{collection}'")]
    DocumentNotFound {
        /// Collection that was searched
        collection: String,
        /// Identity of the missing document
        id: DocumentId,
    },

    /// Operation on an atomic context that was already reverted
    #[error("atomic context {context} was reverted")]
    RevertedState {
        /// The reverted context
        context: ContextId,
    },

    /// An operator cannot be applied to the value it targets
    #[error("invalid operand for '{path}': {reason}")]
    InvalidOperand {
        /// Path the operator targets
        path: FieldPath,
        /// Human-readable reason
        reason: String,
    },

    /// A field path failed to parse
    #[error("invalid field path: {0}")]
    InvalidPath(#[from] PathParseError),

    /// Invalid operation or state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration could not be read or parsed
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error came from the storage collaborator
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    /// Whether this error is an operator composition conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::OperatorConflict { .. })
    }
}
