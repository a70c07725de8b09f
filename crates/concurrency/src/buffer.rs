//! Pending operator buffer
//!
//! An [`OperatorBuffer`] accumulates the operators one atomic scope produces
//! until they are flushed as a single update command. Entries never overlap:
//! no two pending operators write the same path or an ancestor/descendant pair
//! of paths. Every enqueue keeps that true by merging, superseding or
//! rejecting the incoming operator.
//!
//! ## Merge rules
//!
//! | pending \ incoming | `set`/`unset` | `inc` | other |
//! |--------------------|---------------|-------|-------|
//! | `set`/`unset` | incoming replaces it | folded into the pending value | folded into the pending value |
//! | `inc` | incoming replaces it | operands sum | conflict |
//! | other | incoming replaces it | conflict | conflict |
//!
//! Overlapping paths follow the same idea: a pending ancestor `set`/`unset`
//! absorbs a descendant operator by folding it into the ancestor's value, an
//! incoming ancestor `set`/`unset` supersedes pending descendants, and every
//! other overlap is a conflict. `$rename` never merges: it conflicts with any
//! pending operator touching its source or target.
//!
//! A replacement keeps the slot of the entry it replaced, so composing the
//! buffer preserves the order in which each path was first touched.

use docmapper_core::path::{get_at, remove_at, set_at};
use docmapper_core::{Error, FieldPath, Operation, OperatorKind, PendingOperator, Result, Value};
use std::collections::BTreeSet;

/// Ordered, non-overlapping set of pending operators
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperatorBuffer {
    entries: Vec<PendingOperator>,
}

/// What enqueueing an operator does to one pending entry
enum Effect {
    /// Entry is untouched
    Keep,
    /// Entry is dropped (incoming replacement covers it)
    Drop,
    /// Incoming operator is absorbed; entry becomes this operation
    Absorb(Operation),
}

impl OperatorBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `operation` on `path`
    ///
    /// # Errors
    /// - `OperatorConflict` when the operator cannot share a command with a
    ///   pending operator on an overlapping path
    /// - `InvalidOperand` when folding into a pending value fails (e.g. `inc`
    ///   on a pending string)
    ///
    /// The buffer is unchanged when an error is returned.
    pub fn enqueue(&mut self, path: FieldPath, operation: Operation) -> Result<()> {
        self.enqueue_operator(PendingOperator::new(path, operation))
    }

    /// Enqueue an already-bound operator
    ///
    /// See [`OperatorBuffer::enqueue`].
    pub fn enqueue_operator(&mut self, incoming: PendingOperator) -> Result<()> {
        if let Operation::Rename(target) = &incoming.operation {
            if incoming.path.overlaps(target) {
                return Err(Error::InvalidOperand {
                    path: incoming.path.clone(),
                    reason: format!("cannot rename into overlapping path '{}'", target),
                });
            }
        }

        let mut effects = Vec::with_capacity(self.entries.len());
        let mut absorbed = false;
        for entry in &self.entries {
            let effect = merge_effect(entry, &incoming)?;
            absorbed |= matches!(effect, Effect::Absorb(_));
            effects.push(effect);
        }

        // All checks passed; apply
        let mut slot = None;
        let mut kept = Vec::with_capacity(self.entries.len() + 1);
        for (entry, effect) in self.entries.drain(..).zip(effects) {
            match effect {
                Effect::Keep => kept.push(entry),
                Effect::Drop => {
                    slot.get_or_insert(kept.len());
                }
                Effect::Absorb(operation) => kept.push(PendingOperator::new(entry.path, operation)),
            }
        }
        if !absorbed {
            match slot {
                Some(index) => kept.insert(index, incoming),
                None => kept.push(incoming),
            }
        }
        self.entries = kept;
        Ok(())
    }

    /// Take every pending operator in order, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<PendingOperator> {
        std::mem::take(&mut self.entries)
    }

    /// Re-apply every pending operator of this buffer into `other`
    ///
    /// Operators are replayed in enqueue order with the same merge rules.
    ///
    /// # Errors
    /// The first conflict aborts the merge and leaves `other` unchanged.
    pub fn merge_into(&self, other: &mut OperatorBuffer) -> Result<()> {
        let mut merged = other.clone();
        for op in &self.entries {
            merged.enqueue_operator(op.clone())?;
        }
        *other = merged;
        Ok(())
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of pending operators
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Pending operators in order
    pub fn operators(&self) -> &[PendingOperator] {
        &self.entries
    }

    /// Iterate over pending operators in order
    pub fn iter(&self) -> impl Iterator<Item = &PendingOperator> {
        self.entries.iter()
    }

    /// Every path a pending operator writes (including `$rename` targets)
    pub fn touched_paths(&self) -> BTreeSet<FieldPath> {
        self.entries
            .iter()
            .flat_map(|op| op.touched_paths())
            .cloned()
            .collect()
    }

    /// Whether a pending operator writes `path` or an overlapping path
    pub fn touches(&self, path: &FieldPath) -> bool {
        self.entries
            .iter()
            .any(|op| op.touched_paths().into_iter().any(|p| p.overlaps(path)))
    }

    /// Pending operator on exactly `path`, if any
    pub fn pending_for(&self, path: &FieldPath) -> Option<&PendingOperator> {
        self.entries.iter().find(|op| &op.path == path)
    }

    /// Drop every pending operator that touches a path overlapping `path`
    ///
    /// Returns how many were dropped.
    pub fn discard_overlapping(&mut self, path: &FieldPath) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|op| !op.touched_paths().into_iter().any(|p| p.overlaps(path)));
        before - self.entries.len()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Turn operators overlapping `committed` into replacements
    ///
    /// Once another scope has written `committed`, a pending operator on an
    /// overlapping path no longer matches the persisted value it was computed
    /// against. Each such operator is replaced by `set`/`unset` of the value
    /// `current` reports for every path it touches.
    ///
    /// Returns how many operators were replaced.
    ///
    /// # Errors
    /// The buffer is unchanged when the replacements cannot be enqueued.
    pub fn refresh<F>(&mut self, committed: &[FieldPath], current: F) -> Result<usize>
    where
        F: Fn(&FieldPath) -> Option<Value>,
    {
        let stale = |op: &PendingOperator| {
            op.touched_paths()
                .into_iter()
                .any(|p| committed.iter().any(|c| c.overlaps(p)))
        };
        if !self.entries.iter().any(|op| stale(op)) {
            return Ok(0);
        }

        let mut rebuilt = OperatorBuffer::new();
        let mut refreshed = 0;
        for op in &self.entries {
            if stale(op) {
                refreshed += 1;
                for path in op.touched_paths() {
                    rebuilt.enqueue(path.clone(), Operation::replacement(current(path)))?;
                }
            } else {
                rebuilt.enqueue_operator(op.clone())?;
            }
        }
        *self = rebuilt;
        Ok(refreshed)
    }
}

impl<'a> IntoIterator for &'a OperatorBuffer {
    type Item = &'a PendingOperator;
    type IntoIter = std::slice::Iter<'a, PendingOperator>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn conflict(path: &FieldPath, existing: OperatorKind, incoming: OperatorKind) -> Error {
    Error::OperatorConflict {
        path: path.clone(),
        existing,
        incoming,
    }
}

fn merge_effect(entry: &PendingOperator, incoming: &PendingOperator) -> Result<Effect> {
    let overlapping = entry.touched_paths().into_iter().any(|existing| {
        incoming
            .touched_paths()
            .into_iter()
            .any(|p| p.overlaps(existing))
    });
    if !overlapping {
        return Ok(Effect::Keep);
    }
    if entry.kind() == OperatorKind::Rename || incoming.kind() == OperatorKind::Rename {
        return Err(conflict(&incoming.path, entry.kind(), incoming.kind()));
    }

    let incoming_replaces = incoming.kind().is_replacement();
    let entry_replaces = entry.kind().is_replacement();

    if entry.path == incoming.path {
        if incoming_replaces {
            return Ok(Effect::Drop);
        }
        if entry_replaces {
            return fold(&entry.operation, None, incoming).map(Effect::Absorb);
        }
        if let (Operation::Inc(pending), Operation::Inc(amount)) =
            (&entry.operation, &incoming.operation)
        {
            let sum = pending
                .checked_add(amount)
                .ok_or_else(|| Error::InvalidOperand {
                    path: incoming.path.clone(),
                    reason: format!(
                        "cannot add {} to pending {} increment",
                        amount.type_name(),
                        pending.type_name()
                    ),
                })?;
            return Ok(Effect::Absorb(Operation::Inc(sum)));
        }
        return Err(conflict(&incoming.path, entry.kind(), incoming.kind()));
    }

    if let Some(relative) = incoming.path.relative_to(&entry.path) {
        // Pending ancestor
        if entry_replaces {
            return fold(&entry.operation, Some(&relative), incoming).map(Effect::Absorb);
        }
        return Err(conflict(&incoming.path, entry.kind(), incoming.kind()));
    }

    // Pending descendant
    if incoming_replaces {
        return Ok(Effect::Drop);
    }
    Err(conflict(&incoming.path, entry.kind(), incoming.kind()))
}

/// Fold `incoming` into a pending `set`/`unset`, producing a replacement
///
/// `relative` is the incoming path below the pending one (None = same path).
fn fold(
    pending: &Operation,
    relative: Option<&FieldPath>,
    incoming: &PendingOperator,
) -> Result<Operation> {
    let current = match pending {
        Operation::Set(value) => Some(value),
        _ => None,
    };
    let Some(relative) = relative else {
        return Ok(Operation::replacement(
            incoming.operation.apply(&incoming.path, current)?,
        ));
    };

    let inner = current.and_then(|value| get_at(value, relative));
    let updated = incoming.operation.apply(&incoming.path, inner)?;
    if current.is_none() && updated.is_none() {
        return Ok(Operation::Unset);
    }
    let mut base = current.cloned().unwrap_or_else(Value::object);
    match updated {
        Some(value) => {
            set_at(&mut base, relative, value).map_err(|_| Error::InvalidOperand {
                path: incoming.path.clone(),
                reason: "pending value cannot hold this path".to_string(),
            })?;
        }
        None => {
            remove_at(&mut base, relative);
        }
    }
    Ok(Operation::Set(base))
}
