//! docmapper - change tracking and atomic updates for document-mapped entities
//!
//! docmapper keeps per-instance change tracking for entities mapped onto a
//! document store and composes their changes into single update commands:
//! dirty fields, in-place atomic operators, and nested atomic scopes whose
//! operators are buffered and written once.
//!
//! # Quick Start
//!
//! ```ignore
//! use docmapper::{DeclaredSchema, InMemoryStorage, Mapper};
//! use std::sync::Arc;
//!
//! let mapper = Mapper::new(Arc::new(InMemoryStorage::new()));
//! let mut person = mapper.create(Arc::new(DeclaredSchema::new("people")));
//! person.write("name", "Tom")?;
//! person.commit()?; // insert
//!
//! person.atomically(None, |p| {
//!     p.inc("age", 1)?;
//!     p.push("tags", "admin")
//! })?; // one update: {"$inc": {"age": 1}, "$push": {"tags": "admin"}}
//! ```
//!
//! # Architecture
//!
//! - `docmapper-core`: values, field paths, operators, update composition and
//!   the collaborator traits
//! - `docmapper-concurrency`: operator buffers and the atomic context stack
//! - `docmapper-storage`: in-memory reference store
//! - `docmapper-engine`: entities, change tracking, the commit coordinator and
//!   configuration

pub use docmapper_concurrency::{ContextStatus, OperatorBuffer};
pub use docmapper_core::{
    document_from_json, AssociationResolver, BitOp, ComposedUpdate, ContextId, Document,
    DocumentId, Error, FieldPath, Operation, OperatorKind, PendingOperator, PopEnd, Projection,
    Result, SchemaInfo, ShardKey, StorageClient, StorageError, StorageResult, UpdateResult, Value,
    ID_FIELD,
};
pub use docmapper_engine::{
    AtomicScope, Change, CommitStats, DeclaredSchema, Entity, Mapper, MapperConfig,
    CONFIG_FILE_NAME,
};
pub use docmapper_storage::{InMemoryStorage, StorageCall};
