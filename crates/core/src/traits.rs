//! Collaborator traits
//!
//! The change-tracking core talks to the rest of a document mapper only
//! through these seams:
//! - [`SchemaInfo`]: declared fields, storage-name aliasing, projection checks
//!   and shard-key declaration
//! - [`StorageClient`]: the document store (insert / update / delete / find)
//! - [`AssociationResolver`]: materializes embedded association roots
//!
//! Implementations are shared between many entity instances, so every trait
//! requires `Send + Sync`.

use crate::error::{Result, StorageResult};
use crate::path::FieldPath;
use crate::types::{DocumentId, Projection, ShardKey};
use crate::update::ComposedUpdate;
use crate::value::Document;

/// Schema knowledge the core consults
///
/// Only naming and projection questions are asked here; the storage shape of a
/// value never depends on the schema.
pub trait SchemaInfo: Send + Sync {
    /// Collection documents of this schema live in
    fn collection(&self) -> &str;

    /// Whether `path` (or its top-level root) is a declared field
    fn is_field_declared(&self, path: &FieldPath) -> bool;

    /// Name the store uses for `path`
    ///
    /// Defaults to the logical path.
    fn storage_name(&self, path: &FieldPath) -> String {
        path.as_str()
    }

    /// Logical field name for a top-level storage name
    ///
    /// Inverse of [`SchemaInfo::storage_name`] on top-level fields; used when
    /// a fetched document replaces the attributes.
    fn field_for_storage_name(&self, name: &str) -> String {
        name.to_string()
    }

    /// Whether `path` is part of the loaded projection
    ///
    /// A `false` here makes reads and writes of the path fail with
    /// `FieldNotLoaded`.
    fn is_projected(&self, _path: &FieldPath) -> bool {
        true
    }

    /// Fields whose persisted values route key-addressed operations
    fn shard_key_fields(&self) -> Vec<FieldPath> {
        Vec::new()
    }
}

/// Outcome of an `update_one` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    /// Documents the key (and shard key) addressed
    pub matched: u64,
    /// Documents whose content changed
    pub modified: u64,
}

/// Document store the core writes through
///
/// The core never retries a call and never locks around one; each call is
/// expected to be atomic for the single document it addresses.
///
/// Thread safety: All methods must be safe to call concurrently from
/// multiple threads (requires Send + Sync).
pub trait StorageClient: Send + Sync {
    /// Insert a full document
    ///
    /// When the document carries no `_id`, the store assigns one.
    ///
    /// # Returns
    /// Identity of the inserted document.
    ///
    /// # Errors
    /// Constraint violations (e.g. duplicate `_id`) and transport failures.
    fn insert(&self, collection: &str, document: Document) -> StorageResult<DocumentId>;

    /// Apply one composed update to the document addressed by `id`
    ///
    /// # Arguments
    /// * `collection` - Collection holding the document
    /// * `id` - Identity of the document
    /// * `shard_key` - Routing values, when the schema declares a shard key
    /// * `update` - Operators to apply, all-or-nothing
    ///
    /// # Errors
    /// Transport failures and operators the store refuses.
    fn update_one(
        &self,
        collection: &str,
        id: &DocumentId,
        shard_key: Option<&ShardKey>,
        update: &ComposedUpdate,
    ) -> StorageResult<UpdateResult>;

    /// Delete the document addressed by `id`
    ///
    /// # Returns
    /// Number of documents removed (0 or 1).
    ///
    /// # Errors
    /// Transport failures.
    fn delete_one(
        &self,
        collection: &str,
        id: &DocumentId,
        shard_key: Option<&ShardKey>,
    ) -> StorageResult<u64>;

    /// Fetch the document addressed by `id`
    ///
    /// `projection` names storage fields. Returns `None` when no document
    /// matches.
    ///
    /// # Errors
    /// Transport failures.
    fn find_one(
        &self,
        collection: &str,
        id: &DocumentId,
        shard_key: Option<&ShardKey>,
        projection: Option<&Projection>,
    ) -> StorageResult<Option<Document>>;
}

/// Materializes embedded association roots on demand
///
/// Consulted when a nested write traverses a top-level field that is an
/// association boundary and holds no value yet.
pub trait AssociationResolver: Send + Sync {
    /// Whether the top-level field `root` is an association boundary
    fn is_association(&self, root: &str) -> bool;

    /// Fetch or create the child document rooted at `root`
    ///
    /// # Errors
    /// Whatever the association layer reports.
    fn resolve_or_create(&self, root: &FieldPath) -> Result<Document>;
}
