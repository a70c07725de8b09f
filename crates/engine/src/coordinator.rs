//! Commit coordinator for writing entity changes
//!
//! The CommitCoordinator turns drained operator buffers into storage calls:
//! - One composed `update_one` per flush (nothing at all for an empty flush)
//! - A full-document `insert` for entities that were never persisted
//! - Clearing tracked changes for exactly the committed paths on success
//! - Commit metrics (flushes, inserts, no-op flushes, failures)
//!
//! On failure nothing in memory changes; the caller decides what to keep for
//! a retry. Storage errors are surfaced unchanged, never retried here.

use crate::state::EntityState;
use docmapper_core::{
    ComposedUpdate, Document, DocumentId, Error, FieldPath, PendingOperator, Projection, Result,
    SchemaInfo, ShardKey, StorageClient,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Commit coordinator shared by every entity of a mapper
///
/// # Memory Ordering
///
/// The metric counters use Relaxed ordering: they are observational only and
/// do not synchronize any other memory operations.
pub struct CommitCoordinator {
    storage: Arc<dyn StorageClient>,
    /// Update commands issued
    flushes: AtomicU64,
    /// Insert commands issued
    inserts: AtomicU64,
    /// Flushes that had nothing to write
    noop_flushes: AtomicU64,
    /// Storage calls that failed
    failures: AtomicU64,
    /// Operators written across all flushes
    operators_written: AtomicU64,
}

impl fmt::Debug for CommitCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitCoordinator")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl CommitCoordinator {
    /// Create a coordinator writing through `storage`
    pub fn new(storage: Arc<dyn StorageClient>) -> Self {
        Self {
            storage,
            flushes: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            noop_flushes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            operators_written: AtomicU64::new(0),
        }
    }

    /// Storage collaborator
    pub fn storage(&self) -> &Arc<dyn StorageClient> {
        &self.storage
    }

    fn storage_failure(&self, error: docmapper_core::StorageError) -> Error {
        self.failures.fetch_add(1, Ordering::Relaxed);
        Error::Storage(error)
    }

    /// Write `operators` as one composed update
    ///
    /// # Arguments
    /// * `schema` - Naming and collection of the entity
    /// * `id` - Identity of the persisted document
    /// * `shard_key` - Routing values, when the schema declares a shard key
    /// * `operators` - Drained buffer, in enqueue order
    /// * `state` - Entity state whose committed paths get cleared
    ///
    /// # Returns
    /// The committed paths (every path an operator wrote, including `$rename`
    /// targets). Empty when there was nothing to write.
    ///
    /// # Errors
    /// - `Storage` when the store fails the command
    /// - `DocumentNotFound` when the command matched no document
    ///
    /// Dirty state is untouched on error.
    pub fn flush(
        &self,
        schema: &dyn SchemaInfo,
        id: &DocumentId,
        shard_key: Option<&ShardKey>,
        operators: &[PendingOperator],
        state: &mut EntityState,
    ) -> Result<Vec<FieldPath>> {
        if operators.is_empty() {
            self.noop_flushes.fetch_add(1, Ordering::Relaxed);
            return Ok(Vec::new());
        }

        let update = ComposedUpdate::compose(operators, |path| schema.storage_name(path));
        let collection = schema.collection();
        debug!(
            target: "docmapper::commit",
            collection,
            id = %id,
            operators = operators.len(),
            update = %update,
            "Flushing update"
        );

        let result = match self.storage.update_one(collection, id, shard_key, &update) {
            Ok(result) => result,
            Err(error) => {
                warn!(target: "docmapper::commit", collection, id = %id, %error, "Update failed");
                return Err(self.storage_failure(error));
            }
        };
        if result.matched == 0 {
            self.failures.fetch_add(1, Ordering::Relaxed);
            warn!(target: "docmapper::commit", collection, id = %id, "Update matched no document");
            return Err(Error::DocumentNotFound {
                collection: collection.to_string(),
                id: id.clone(),
            });
        }

        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.operators_written
            .fetch_add(operators.len() as u64, Ordering::Relaxed);

        let committed: Vec<FieldPath> = operators
            .iter()
            .flat_map(|op| op.touched_paths())
            .cloned()
            .collect();
        state.tracker.clear_after_commit(&committed, &state.attributes);
        debug!(
            target: "docmapper::commit",
            collection,
            id = %id,
            modified = result.modified,
            "Update committed"
        );
        Ok(committed)
    }

    /// Insert the whole document of a never-persisted entity
    ///
    /// The document is written under storage names. On success the identity
    /// the store reports is kept and every tracked change is cleared.
    ///
    /// # Errors
    /// `Storage` when the store rejects the insert (e.g. duplicate `_id`).
    pub fn insert(&self, schema: &dyn SchemaInfo, state: &mut EntityState) -> Result<DocumentId> {
        let collection = schema.collection();
        let document = to_storage_document(schema, state.attributes.document())?;
        let id = match self.storage.insert(collection, document) {
            Ok(id) => id,
            Err(error) => {
                warn!(target: "docmapper::commit", collection, %error, "Insert failed");
                return Err(self.storage_failure(error));
            }
        };
        self.inserts.fetch_add(1, Ordering::Relaxed);
        if state.attributes.id().as_ref() != Some(&id) {
            state.attributes.set_id(&id);
        }
        state.tracker.clear_all(&state.attributes);
        info!(target: "docmapper::commit", collection, id = %id, "Inserted document");
        Ok(id)
    }

    /// Delete the addressed document
    ///
    /// # Returns
    /// Number of documents removed (0 or 1).
    ///
    /// # Errors
    /// `Storage` when the store fails the call.
    pub fn delete(
        &self,
        schema: &dyn SchemaInfo,
        id: &DocumentId,
        shard_key: Option<&ShardKey>,
    ) -> Result<u64> {
        let collection = schema.collection();
        let removed = self
            .storage
            .delete_one(collection, id, shard_key)
            .map_err(|error| {
                warn!(target: "docmapper::commit", collection, id = %id, %error, "Delete failed");
                self.storage_failure(error)
            })?;
        info!(target: "docmapper::commit", collection, id = %id, removed, "Deleted document");
        Ok(removed)
    }

    /// Fetch the addressed document as stored
    ///
    /// `projection` names logical paths; it is translated to storage names
    /// for the call. The returned document keeps storage names.
    ///
    /// # Errors
    /// `Storage` when the store fails the call.
    pub fn find(
        &self,
        schema: &dyn SchemaInfo,
        id: &DocumentId,
        shard_key: Option<&ShardKey>,
        projection: Option<&Projection>,
    ) -> Result<Option<Document>> {
        let collection = schema.collection();
        let projection = projection
            .map(|p| to_storage_projection(schema, p))
            .transpose()?;
        self.storage
            .find_one(collection, id, shard_key, projection.as_ref())
            .map_err(|error| {
                warn!(target: "docmapper::commit", collection, id = %id, %error, "Find failed");
                self.storage_failure(error)
            })
    }

    /// Get commit metrics
    ///
    /// Returns current snapshot of commit statistics.
    pub fn stats(&self) -> CommitStats {
        CommitStats {
            flushes: self.flushes.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            noop_flushes: self.noop_flushes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            operators_written: self.operators_written.load(Ordering::Relaxed),
        }
    }
}

/// Rename top-level fields to their storage names
fn to_storage_document(schema: &dyn SchemaInfo, document: &Document) -> Result<Document> {
    document
        .iter()
        .map(|(field, value)| {
            let path = FieldPath::parse(field)?;
            Ok((schema.storage_name(&path), value.clone()))
        })
        .collect()
}

/// Rename top-level storage fields back to logical names
pub(crate) fn from_storage_document(schema: &dyn SchemaInfo, document: Document) -> Document {
    document
        .into_iter()
        .map(|(name, value)| (schema.field_for_storage_name(&name), value))
        .collect()
}

fn to_storage_projection(schema: &dyn SchemaInfo, projection: &Projection) -> Result<Projection> {
    let names = projection.paths().iter().map(|p| schema.storage_name(p));
    match projection {
        Projection::Include(_) => Projection::include(names),
        Projection::Exclude(_) => Projection::exclude(names),
    }
}

/// Commit metrics
///
/// Provides statistics about storage writes issued by a coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// Update commands that succeeded
    pub flushes: u64,
    /// Inserts that succeeded
    pub inserts: u64,
    /// Flushes skipped because nothing was pending
    pub noop_flushes: u64,
    /// Storage calls that failed (including updates that matched nothing)
    pub failures: u64,
    /// Operators written across all successful flushes
    pub operators_written: u64,
}

impl CommitStats {
    /// Total writes that reached the store successfully
    pub fn total_writes(&self) -> u64 {
        self.flushes + self.inserts
    }

    /// Average operators per successful flush
    pub fn operators_per_flush(&self) -> f64 {
        if self.flushes > 0 {
            self.operators_written as f64 / self.flushes as f64
        } else {
            0.0
        }
    }
}
