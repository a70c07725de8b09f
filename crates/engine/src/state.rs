//! Entity state: attribute store plus change tracker
//!
//! The two always move together. Snapshots taken by atomic scopes read and
//! restore both through the [`TrackedState`] seam.

use crate::attributes::AttributeStore;
use crate::tracker::{Change, ChangeTracker};
use docmapper_concurrency::{SnapshotEntry, TrackedState};
use docmapper_core::{FieldPath, Result, SchemaInfo, ShardKey, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Current values and their tracked originals
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityState {
    /// Current values
    pub attributes: AttributeStore,
    /// Originals of fields written since the last commit
    pub tracker: ChangeTracker,
}

impl EntityState {
    /// Clean state over `attributes`
    pub fn new(attributes: AttributeStore) -> Self {
        Self {
            attributes,
            tracker: ChangeTracker::new(),
        }
    }

    /// Write (`Some`) or remove (`None`) `path` and track the change
    ///
    /// Returns the previous value.
    ///
    /// # Errors
    /// `FieldNotLoaded` or `InvalidOperand` from the attribute store; nothing
    /// changes in that case.
    pub fn write(&mut self, path: &FieldPath, value: Option<Value>) -> Result<Option<Value>> {
        let before = self.attributes.put(path, value)?;
        self.tracker.record_write(path, before.clone());
        Ok(before)
    }

    /// See [`ChangeTracker::dirty_fields`]
    pub fn dirty_fields(&self) -> BTreeSet<FieldPath> {
        self.tracker.dirty_fields(&self.attributes)
    }

    /// See [`ChangeTracker::changes`]
    pub fn changes(&self) -> BTreeMap<FieldPath, Change> {
        self.tracker.changes(&self.attributes)
    }

    /// Whether a dirty field overlaps `path`
    pub fn overlaps_dirty(&self, path: &FieldPath) -> bool {
        self.tracker.overlaps_dirty(path, &self.attributes)
    }

    /// Value of `path` in the persisted document
    pub fn persisted_value(&self, path: &FieldPath) -> Option<Value> {
        self.tracker.original(path, &self.attributes)
    }

    /// Shard key built from persisted values, if the schema declares one
    pub fn shard_key(&self, schema: &dyn SchemaInfo) -> Option<ShardKey> {
        let fields = schema.shard_key_fields();
        if fields.is_empty() {
            return None;
        }
        Some(fields.iter().fold(ShardKey::new(), |key, field| {
            key.with(
                schema.storage_name(field),
                self.persisted_value(field).unwrap_or(Value::Null),
            )
        }))
    }
}

impl TrackedState for EntityState {
    fn value_at(&self, path: &FieldPath) -> Option<Value> {
        self.attributes.value_at(path)
    }

    fn originals_overlapping(&self, path: &FieldPath) -> Vec<(FieldPath, Option<Value>)> {
        self.tracker.originals_overlapping(path)
    }

    fn restore(&mut self, entry: &SnapshotEntry) -> Result<()> {
        self.attributes.put_unchecked(&entry.path, entry.value.clone())?;
        self.tracker.restore_originals(&entry.path, &entry.originals);
        Ok(())
    }
}
