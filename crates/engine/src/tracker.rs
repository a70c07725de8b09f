//! Change tracking
//!
//! The [`ChangeTracker`] remembers, for every path written since the last
//! successful commit, the value that path held in the persisted document.
//! Current values live in the [`AttributeStore`]; a path is dirty exactly when
//! its remembered original differs from its current value.
//!
//! Tracked paths never overlap. Writing an ancestor of tracked paths folds
//! their originals into the ancestor's original; writing below a tracked
//! ancestor records nothing new, because the ancestor's original already
//! covers it.

use crate::attributes::AttributeStore;
use docmapper_core::path::{get_at, remove_at, set_at};
use docmapper_core::{FieldPath, Result, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Before/after pair for one field (None = absent)
pub type Change = (Option<Value>, Option<Value>);

/// Original-value bookkeeping for one entity instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeTracker {
    originals: BTreeMap<FieldPath, Option<Value>>,
    previous: BTreeMap<FieldPath, Change>,
}

/// Write `value` at `relative` inside `target`, creating an object if needed
fn overlay(target: &mut Option<Value>, relative: &FieldPath, value: Option<Value>) {
    match value {
        Some(value) => {
            let base = target.get_or_insert_with(Value::object);
            if let Err(error) = set_at(base, relative, value) {
                warn!(
                    target: "docmapper::commit",
                    path = %relative,
                    %error,
                    "Could not fold value into tracked original"
                );
            }
        }
        None => {
            if let Some(base) = target {
                remove_at(base, relative);
            }
        }
    }
}

impl ChangeTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    fn tracked_ancestor(&self, path: &FieldPath) -> Option<(&FieldPath, &Option<Value>)> {
        self.originals.iter().find(|(p, _)| p.is_ancestor_of(path))
    }

    fn tracked_descendants(&self, path: &FieldPath) -> Vec<FieldPath> {
        self.originals
            .keys()
            .filter(|p| path.is_strict_ancestor_of(p))
            .cloned()
            .collect()
    }

    /// Record that `path` is about to change from `before`
    ///
    /// Captures `before` as the original unless `path` (or an ancestor) is
    /// already tracked in this epoch.
    pub fn record_write(&mut self, path: &FieldPath, before: Option<Value>) {
        if self.tracked_ancestor(path).is_some() {
            return;
        }
        let mut original = before;
        for descendant in self.tracked_descendants(path) {
            let descendant_original = self.originals.remove(&descendant).flatten();
            if let Some(relative) = descendant.relative_to(path) {
                overlay(&mut original, &relative, descendant_original);
            }
        }
        self.originals.insert(path.clone(), original);
    }

    /// Whether `path` or an ancestor is tracked
    pub fn is_tracked(&self, path: &FieldPath) -> bool {
        self.tracked_ancestor(path).is_some()
    }

    /// Value `path` holds in the persisted document, as far as tracking knows
    pub fn original(&self, path: &FieldPath, attrs: &AttributeStore) -> Option<Value> {
        if let Some((ancestor, original)) = self.tracked_ancestor(path) {
            return match path.relative_to(ancestor) {
                Some(relative) => original.as_ref().and_then(|v| get_at(v, &relative)).cloned(),
                None => original.clone(),
            };
        }
        let mut value = attrs.value_at(path);
        for descendant in self.tracked_descendants(path) {
            if let Some(relative) = descendant.relative_to(path) {
                let original = self.originals.get(&descendant).cloned().flatten();
                overlay(&mut value, &relative, original);
            }
        }
        value
    }

    /// Whether the current value of `path` differs from its original
    pub fn is_dirty(&self, path: &FieldPath, attrs: &AttributeStore) -> bool {
        self.original(path, attrs) != attrs.value_at(path)
    }

    /// Whether any dirty field overlaps `path`
    pub fn overlaps_dirty(&self, path: &FieldPath, attrs: &AttributeStore) -> bool {
        self.originals
            .iter()
            .any(|(p, original)| p.overlaps(path) && *original != attrs.value_at(p))
    }

    /// All tracked paths whose current value differs from the original
    pub fn dirty_fields(&self, attrs: &AttributeStore) -> BTreeSet<FieldPath> {
        self.originals
            .iter()
            .filter(|(p, original)| **original != attrs.value_at(p))
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Before/after pairs of every dirty field
    pub fn changes(&self, attrs: &AttributeStore) -> BTreeMap<FieldPath, Change> {
        self.originals
            .iter()
            .filter_map(|(p, original)| {
                let current = attrs.value_at(p);
                (*original != current).then(|| (p.clone(), (original.clone(), current)))
            })
            .collect()
    }

    /// Whether any field is dirty
    pub fn has_changes(&self, attrs: &AttributeStore) -> bool {
        self.originals
            .iter()
            .any(|(p, original)| *original != attrs.value_at(p))
    }

    /// Changes captured by the last successful commit that had any
    pub fn previous_changes(&self) -> &BTreeMap<FieldPath, Change> {
        &self.previous
    }

    /// Restore the current value of `path` to its original
    ///
    /// Clears the dirty state of `path` and everything below it. Touches
    /// nothing but memory.
    ///
    /// # Errors
    /// Fails only if the original cannot be written back at its path.
    pub fn reset_field(&mut self, path: &FieldPath, attrs: &mut AttributeStore) -> Result<()> {
        if let Some((ancestor, original)) = self.tracked_ancestor(path) {
            let ancestor = ancestor.clone();
            let original = original.clone();
            match path.relative_to(&ancestor) {
                Some(relative) => {
                    let value = original.as_ref().and_then(|v| get_at(v, &relative)).cloned();
                    attrs.put_unchecked(path, value)?;
                }
                None => {
                    attrs.put_unchecked(path, original)?;
                    self.originals.remove(path);
                }
            }
            return Ok(());
        }
        for descendant in self.tracked_descendants(path) {
            let original = self.originals.remove(&descendant).flatten();
            attrs.put_unchecked(&descendant, original)?;
        }
        Ok(())
    }

    /// Mark `committed` paths as persisted
    ///
    /// The changes of the committed paths become [`previous_changes`] (only
    /// when there are any). Uncommitted fields keep their dirty state.
    ///
    /// [`previous_changes`]: ChangeTracker::previous_changes
    pub fn clear_after_commit(&mut self, committed: &[FieldPath], attrs: &AttributeStore) {
        let snapshot: BTreeMap<FieldPath, Change> = self
            .changes(attrs)
            .into_iter()
            .filter(|(p, _)| committed.iter().any(|c| c.overlaps(p)))
            .collect();

        for path in committed {
            self.originals.retain(|p, _| !path.is_ancestor_of(p));
            let current = attrs.value_at(path);
            for (tracked, original) in self.originals.iter_mut() {
                if let Some(relative) = path.relative_to(tracked) {
                    overlay(original, &relative, current.clone());
                }
            }
        }
        self.originals
            .retain(|p, original| *original != attrs.value_at(p));

        if !snapshot.is_empty() {
            self.previous = snapshot;
        }
    }

    /// Mark every field as persisted (after an insert)
    pub fn clear_all(&mut self, attrs: &AttributeStore) {
        let snapshot = self.changes(attrs);
        self.originals.clear();
        if !snapshot.is_empty() {
            self.previous = snapshot;
        }
    }

    /// Drop all tracking without touching `previous_changes` (after a reload)
    pub fn forget(&mut self) {
        self.originals.clear();
    }

    /// Tracked originals on paths overlapping `path`
    pub fn originals_overlapping(&self, path: &FieldPath) -> Vec<(FieldPath, Option<Value>)> {
        self.originals
            .iter()
            .filter(|(p, _)| p.overlaps(path))
            .map(|(p, v)| (p.clone(), v.clone()))
            .collect()
    }

    /// Replace tracking on paths overlapping `path` with `entries`
    pub fn restore_originals(&mut self, path: &FieldPath, entries: &[(FieldPath, Option<Value>)]) {
        self.originals.retain(|p, _| !p.overlaps(path));
        self.originals.extend(entries.iter().cloned());
    }
}
