//! Core types and traits for docmapper
//!
//! This crate defines the foundational types used throughout the system:
//! - Value / Document: tagged value union for document attributes
//! - FieldPath: dot-separated paths with nested get/set/remove helpers
//! - Operation / OperatorKind / PendingOperator: field-level update operators
//! - ComposedUpdate: the wire shape of one flushed update command
//! - DocumentId, ContextId, ShardKey, Projection: identity and addressing
//! - Error: error type hierarchy
//! - Traits: collaborator seams (SchemaInfo, StorageClient, AssociationResolver)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod operation;
pub mod path;
pub mod traits;
pub mod types;
pub mod update;
pub mod value;

pub use error::{Error, Result, StorageError, StorageResult};
pub use operation::{BitOp, Operation, OperatorKind, PendingOperator, PopEnd};
pub use path::{FieldPath, PathParseError};
pub use traits::{AssociationResolver, SchemaInfo, StorageClient, UpdateResult};
pub use types::{ContextId, DocumentId, Projection, ShardKey, ID_FIELD};
pub use update::{ComposedUpdate, UpdateClause};
pub use value::{document_from_json, Document, Value};
