//! In-memory document store
//!
//! Reference [`StorageClient`] for tests and embedding:
//!
//! - DashMap keyed by collection name, one shard lock per collection
//! - Composed updates apply all-or-nothing against a working copy
//! - Every call is logged as a [`StorageCall`] so callers can assert exactly
//!   which commands were issued
//! - Failure injection: the next N calls can be told to fail with a given
//!   [`StorageError`]

use dashmap::DashMap;
use docmapper_core::path::{get_in, put_in, remove_in, set_in};
use docmapper_core::{
    ComposedUpdate, Document, DocumentId, Operation, Projection, ShardKey,
    StorageClient, StorageError, StorageResult, UpdateResult, ID_FIELD,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// One call received by [`InMemoryStorage`]
#[derive(Debug, Clone, PartialEq)]
pub enum StorageCall {
    /// `insert`
    Insert {
        /// Target collection
        collection: String,
        /// Document as received
        document: Document,
    },
    /// `update_one`
    Update {
        /// Target collection
        collection: String,
        /// Addressed document
        id: DocumentId,
        /// Routing values, if sent
        shard_key: Option<ShardKey>,
        /// Command as received
        update: ComposedUpdate,
    },
    /// `delete_one`
    Delete {
        /// Target collection
        collection: String,
        /// Addressed document
        id: DocumentId,
        /// Routing values, if sent
        shard_key: Option<ShardKey>,
    },
    /// `find_one`
    Find {
        /// Target collection
        collection: String,
        /// Addressed document
        id: DocumentId,
        /// Routing values, if sent
        shard_key: Option<ShardKey>,
        /// Field selection, if sent
        projection: Option<Projection>,
    },
}

impl StorageCall {
    /// Whether this call writes (insert, update or delete)
    pub fn is_write(&self) -> bool {
        !matches!(self, StorageCall::Find { .. })
    }

    /// Composed update carried by an `Update` call
    pub fn update(&self) -> Option<&ComposedUpdate> {
        match self {
            StorageCall::Update { update, .. } => Some(update),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct InjectedFailure {
    remaining: usize,
    error: StorageError,
}

/// Thread-safe in-memory document store
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    collections: DashMap<String, BTreeMap<DocumentId, Document>>,
    calls: Mutex<Vec<StorageCall>>,
    failure: Mutex<Option<InjectedFailure>>,
    /// Successful writes applied
    writes: AtomicU64,
}

impl InMemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a document directly, bypassing the call log
    ///
    /// The document must carry an `_id`; returns its identity, or `None` when
    /// the `_id` is missing or not a string/integer.
    pub fn seed(&self, collection: &str, document: Document) -> Option<DocumentId> {
        let id = document.get(ID_FIELD).and_then(DocumentId::from_value)?;
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), document);
        Some(id)
    }

    /// Stored copy of a document
    pub fn document(&self, collection: &str, id: &DocumentId) -> Option<Document> {
        self.collections.get(collection)?.get(id).cloned()
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |docs| docs.len())
    }

    /// Whether a collection holds no documents
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<StorageCall> {
        self.calls.lock().clone()
    }

    /// Write calls (insert / update / delete) received so far
    pub fn write_calls(&self) -> Vec<StorageCall> {
        self.calls.lock().iter().filter(|c| c.is_write()).cloned().collect()
    }

    /// Composed updates received so far, in order
    pub fn updates(&self) -> Vec<ComposedUpdate> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| c.update().cloned())
            .collect()
    }

    /// Number of calls received
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Forget the call log
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Number of writes that were applied
    pub fn applied_writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Fail the next `count` calls with `error`
    pub fn fail_next(&self, count: usize, error: StorageError) {
        *self.failure.lock() = Some(InjectedFailure {
            remaining: count,
            error,
        });
    }

    fn record(&self, call: StorageCall) -> StorageResult<()> {
        self.calls.lock().push(call);
        let mut failure = self.failure.lock();
        let Some(injected) = failure.as_mut() else {
            return Ok(());
        };
        if injected.remaining == 0 {
            *failure = None;
            return Ok(());
        }
        injected.remaining -= 1;
        let error = injected.error.clone();
        if injected.remaining == 0 {
            *failure = None;
        }
        warn!(target: "docmapper::storage", %error, "Injected storage failure");
        Err(error)
    }

    fn addressed<'a>(
        docs: &'a mut BTreeMap<DocumentId, Document>,
        id: &DocumentId,
        shard_key: Option<&ShardKey>,
    ) -> Option<&'a mut Document> {
        docs.get_mut(id)
            .filter(|doc| shard_key.map_or(true, |key| key.matches(doc)))
    }
}

/// Apply every operator of `update` to a copy of `doc`
///
/// The original is untouched unless every operator succeeds.
fn apply_update(doc: &Document, update: &ComposedUpdate) -> StorageResult<Document> {
    let rejected = |e: docmapper_core::Error| StorageError::Rejected(e.to_string());
    let operators = update.operators().map_err(rejected)?;
    let mut working = doc.clone();
    for op in &operators {
        if op.path.root() == ID_FIELD {
            return Err(StorageError::Rejected(format!(
                "{} would modify the immutable field '{}'",
                op.kind(),
                ID_FIELD
            )));
        }
        match &op.operation {
            Operation::Rename(target) => {
                if let Some(value) = remove_in(&mut working, &op.path) {
                    set_in(&mut working, target, value).map_err(rejected)?;
                }
            }
            operation => {
                let updated = operation
                    .apply(&op.path, get_in(&working, &op.path))
                    .map_err(rejected)?;
                put_in(&mut working, &op.path, updated).map_err(rejected)?;
            }
        }
    }
    Ok(working)
}

fn project(doc: &Document, projection: &Projection) -> Document {
    match projection {
        Projection::Include(paths) => {
            let mut projected = Document::new();
            if let Some(id) = doc.get(ID_FIELD) {
                projected.insert(ID_FIELD.to_string(), id.clone());
            }
            for path in paths {
                if let Some(value) = get_in(doc, path) {
                    // Paths come from a parsed projection and target a fresh document
                    let _ = set_in(&mut projected, path, value.clone());
                }
            }
            projected
        }
        Projection::Exclude(paths) => {
            let mut projected = doc.clone();
            for path in paths.iter().filter(|p| p.root() != ID_FIELD) {
                remove_in(&mut projected, path);
            }
            projected
        }
    }
}

impl StorageClient for InMemoryStorage {
    fn insert(&self, collection: &str, document: Document) -> StorageResult<DocumentId> {
        self.record(StorageCall::Insert {
            collection: collection.to_string(),
            document: document.clone(),
        })?;

        let mut document = document;
        let id = match document.get(ID_FIELD) {
            Some(value) => DocumentId::from_value(value).ok_or_else(|| {
                StorageError::Rejected(format!("unsupported {} value {}", ID_FIELD, value))
            })?,
            None => {
                let id = DocumentId::new();
                document.insert(ID_FIELD.to_string(), id.to_value());
                id
            }
        };

        let mut docs = self.collections.entry(collection.to_string()).or_default();
        if docs.contains_key(&id) {
            return Err(StorageError::Constraint(format!(
                "duplicate key {} in '{}'",
                id, collection
            )));
        }
        docs.insert(id.clone(), document);
        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(target: "docmapper::storage", collection, id = %id, "Inserted document");
        Ok(id)
    }

    fn update_one(
        &self,
        collection: &str,
        id: &DocumentId,
        shard_key: Option<&ShardKey>,
        update: &ComposedUpdate,
    ) -> StorageResult<UpdateResult> {
        self.record(StorageCall::Update {
            collection: collection.to_string(),
            id: id.clone(),
            shard_key: shard_key.cloned(),
            update: update.clone(),
        })?;

        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(UpdateResult::default());
        };
        let Some(doc) = Self::addressed(&mut docs, id, shard_key) else {
            return Ok(UpdateResult::default());
        };
        let updated = apply_update(doc, update)?;
        let modified = u64::from(updated != *doc);
        *doc = updated;
        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "docmapper::storage",
            collection,
            id = %id,
            operators = update.operator_count(),
            "Applied update"
        );
        Ok(UpdateResult {
            matched: 1,
            modified,
        })
    }

    fn delete_one(
        &self,
        collection: &str,
        id: &DocumentId,
        shard_key: Option<&ShardKey>,
    ) -> StorageResult<u64> {
        self.record(StorageCall::Delete {
            collection: collection.to_string(),
            id: id.clone(),
            shard_key: shard_key.cloned(),
        })?;

        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        if Self::addressed(&mut docs, id, shard_key).is_none() {
            return Ok(0);
        }
        docs.remove(id);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(1)
    }

    fn find_one(
        &self,
        collection: &str,
        id: &DocumentId,
        shard_key: Option<&ShardKey>,
        projection: Option<&Projection>,
    ) -> StorageResult<Option<Document>> {
        self.record(StorageCall::Find {
            collection: collection.to_string(),
            id: id.clone(),
            shard_key: shard_key.cloned(),
            projection: projection.cloned(),
        })?;

        let Some(docs) = self.collections.get(collection) else {
            return Ok(None);
        };
        let found = docs
            .get(id)
            .filter(|doc| shard_key.map_or(true, |key| key.matches(doc)));
        Ok(found.map(|doc| match projection {
            Some(projection) => project(doc, projection),
            None => doc.clone(),
        }))
    }
}
