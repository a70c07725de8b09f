//! Persistence contexts
//!
//! A [`PersistenceContext`] is one atomic scope on one entity instance. It
//! owns an [`OperatorBuffer`] (unless it joins an enclosing scope) and a
//! [`ContextSnapshot`] of every field touched since the scope was entered, so
//! a failed scope can put the entity back exactly as it found it.
//!
//! The snapshot is captured lazily: the first time a path is touched inside
//! the scope, its value and tracking state are recorded before the write
//! happens. Restoring walks the entries in reverse capture order, which makes
//! nested captures (`address` after `address.city`, or the other way round)
//! come out right.

use crate::buffer::OperatorBuffer;
use docmapper_core::path::{remove_at, set_at};
use docmapper_core::{ContextId, Error, FieldPath, Result, Value};

/// Tracked state a snapshot is taken from and restored into
///
/// Implemented by the entity layer over its attribute store and change
/// tracker.
pub trait TrackedState {
    /// Current value at `path` (None = absent)
    fn value_at(&self, path: &FieldPath) -> Option<Value>;

    /// Tracked originals on paths overlapping `path`
    fn originals_overlapping(&self, path: &FieldPath) -> Vec<(FieldPath, Option<Value>)>;

    /// Put the value and tracking state recorded in `entry` back
    ///
    /// # Errors
    /// Fails if the value cannot be written back at its path.
    fn restore(&mut self, entry: &SnapshotEntry) -> Result<()>;
}

/// State of one path at scope entry
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    /// The touched path
    pub path: FieldPath,
    /// Value at entry (None = absent)
    pub value: Option<Value>,
    /// Tracked originals overlapping `path` at entry
    pub originals: Vec<(FieldPath, Option<Value>)>,
}

impl SnapshotEntry {
    /// Record the state of `path` now
    pub fn capture(path: &FieldPath, state: &dyn TrackedState) -> Self {
        Self {
            path: path.clone(),
            value: state.value_at(path),
            originals: state.originals_overlapping(path),
        }
    }

    /// Fold a successful write of `committed` into this entry
    ///
    /// After an inner scope flushes, the committed value is the one a later
    /// revert must fall back to.
    pub fn absorb_commit(&mut self, committed: &FieldPath, state: &dyn TrackedState) {
        if committed.is_ancestor_of(&self.path) {
            *self = SnapshotEntry::capture(&self.path, state);
            return;
        }
        let Some(relative) = committed.relative_to(&self.path) else {
            return;
        };
        let mut base = self.value.take().unwrap_or_else(Value::object);
        match state.value_at(committed) {
            Some(value) => {
                // Entry value cannot hold the committed path; take it wholesale
                if set_at(&mut base, &relative, value).is_err() {
                    *self = SnapshotEntry::capture(&self.path, state);
                    return;
                }
            }
            None => {
                remove_at(&mut base, &relative);
            }
        }
        self.value = Some(base);
        self.originals.retain(|(path, _)| !path.overlaps(committed));
        self.originals.extend(state.originals_overlapping(committed));
    }
}

/// Lazily captured entry-time state of every touched path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextSnapshot {
    entries: Vec<SnapshotEntry>,
}

impl ContextSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `path` is already covered by a captured entry
    ///
    /// A captured ancestor covers all its descendants.
    pub fn covers(&self, path: &FieldPath) -> bool {
        self.entries.iter().any(|e| e.path.is_ancestor_of(path))
    }

    /// Capture `path` unless already covered
    ///
    /// Returns true if a new entry was recorded.
    pub fn capture(&mut self, path: &FieldPath, state: &dyn TrackedState) -> bool {
        if self.covers(path) {
            return false;
        }
        self.entries.push(SnapshotEntry::capture(path, state));
        true
    }

    /// Fold a successful write of `committed` into every affected entry
    pub fn absorb_commit(&mut self, committed: &FieldPath, state: &dyn TrackedState) {
        for entry in &mut self.entries {
            if entry.path.overlaps(committed) {
                entry.absorb_commit(committed, state);
            }
        }
    }

    /// Restore every entry into `state`, most recent capture first
    ///
    /// # Errors
    /// Stops at the first entry that cannot be restored.
    pub fn restore_into(&self, state: &mut dyn TrackedState) -> Result<()> {
        for entry in self.entries.iter().rev() {
            state.restore(entry)?;
        }
        Ok(())
    }

    /// Captured entries in capture order
    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    /// Paths captured so far
    pub fn paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.entries.iter().map(|e| &e.path)
    }

    /// Whether nothing has been captured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Status of a persistence context in its lifecycle
///
/// State transitions:
/// - `Open` → `Committed` (scope exited normally and its buffer, if any, was written)
/// - `Open` → `Reverted` (scope exited with a failure; touched fields restored)
/// - `Open` → `Failed` (scope exited normally but writing its buffer failed)
///
/// Terminal states (no transitions allowed):
/// - `Committed`
/// - `Reverted`
/// - `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStatus {
    /// Scope is active and accepting operators
    Open,
    /// Scope completed
    Committed,
    /// Scope was rolled back
    Reverted,
    /// Scope completed but its write failed; operators were kept for retry
    Failed,
}

/// One atomic scope on one entity instance
#[derive(Debug, Clone)]
pub struct PersistenceContext {
    id: ContextId,
    parent: Option<ContextId>,
    /// Context whose buffer receives this scope's operators when joined
    owner: Option<ContextId>,
    status: ContextStatus,
    buffer: OperatorBuffer,
    /// Owner buffer as it was when this joined scope was entered
    checkpoint: Option<OperatorBuffer>,
    snapshot: ContextSnapshot,
}

impl PersistenceContext {
    /// Create a context that owns its buffer
    pub fn new(id: ContextId, parent: Option<ContextId>) -> Self {
        Self {
            id,
            parent,
            owner: None,
            status: ContextStatus::Open,
            buffer: OperatorBuffer::new(),
            checkpoint: None,
            snapshot: ContextSnapshot::new(),
        }
    }

    /// Create a context that forwards its operators to `owner`
    ///
    /// # Arguments
    /// * `id` - Identity of the new context
    /// * `parent` - Directly enclosing context
    /// * `owner` - Nearest enclosing context that owns a buffer
    /// * `checkpoint` - Copy of the owner's buffer at entry, restored on revert
    pub fn joined(
        id: ContextId,
        parent: ContextId,
        owner: ContextId,
        checkpoint: OperatorBuffer,
    ) -> Self {
        Self {
            id,
            parent: Some(parent),
            owner: Some(owner),
            status: ContextStatus::Open,
            buffer: OperatorBuffer::new(),
            checkpoint: Some(checkpoint),
            snapshot: ContextSnapshot::new(),
        }
    }

    /// Identity of this context
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Directly enclosing context
    pub fn parent(&self) -> Option<ContextId> {
        self.parent
    }

    /// Whether operators are forwarded to an enclosing scope
    pub fn is_joined(&self) -> bool {
        self.owner.is_some()
    }

    /// Context that owns the buffer this scope writes into
    pub fn buffer_owner(&self) -> ContextId {
        self.owner.unwrap_or(self.id)
    }

    /// Current status
    pub fn status(&self) -> ContextStatus {
        self.status
    }

    /// Check if the context is open
    pub fn is_open(&self) -> bool {
        self.status == ContextStatus::Open
    }

    /// Check if the context can accept operators
    ///
    /// # Errors
    /// `RevertedState` for a reverted context, `InvalidOperation` for any
    /// other closed one.
    pub fn ensure_open(&self) -> Result<()> {
        match self.status {
            ContextStatus::Open => Ok(()),
            ContextStatus::Reverted => Err(Error::RevertedState { context: self.id }),
            other => Err(Error::InvalidOperation(format!(
                "atomic context {} is closed ({:?})",
                self.id, other
            ))),
        }
    }

    /// Transition to Committed
    ///
    /// # Errors
    /// Fails unless the context is open.
    pub fn mark_committed(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.status = ContextStatus::Committed;
        Ok(())
    }

    /// Transition to Reverted, discarding pending operators
    ///
    /// # Errors
    /// Fails unless the context is open.
    pub fn mark_reverted(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.status = ContextStatus::Reverted;
        self.buffer.clear();
        Ok(())
    }

    /// Transition to Failed
    ///
    /// # Errors
    /// Fails unless the context is open.
    pub fn mark_failed(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.status = ContextStatus::Failed;
        Ok(())
    }

    /// Buffer owned by this context (empty when joined)
    pub fn buffer(&self) -> &OperatorBuffer {
        &self.buffer
    }

    /// Mutable buffer owned by this context
    pub fn buffer_mut(&mut self) -> &mut OperatorBuffer {
        &mut self.buffer
    }

    /// Take the buffer out, leaving an empty one
    pub fn take_buffer(&mut self) -> OperatorBuffer {
        std::mem::take(&mut self.buffer)
    }

    /// Owner buffer captured at entry (joined contexts only)
    pub fn checkpoint(&self) -> Option<&OperatorBuffer> {
        self.checkpoint.as_ref()
    }

    /// Mutable checkpoint, refreshed when an inner scope flushes
    pub fn checkpoint_mut(&mut self) -> Option<&mut OperatorBuffer> {
        self.checkpoint.as_mut()
    }

    /// Entry-time snapshot
    pub fn snapshot(&self) -> &ContextSnapshot {
        &self.snapshot
    }

    /// Mutable entry-time snapshot
    pub fn snapshot_mut(&mut self) -> &mut ContextSnapshot {
        &mut self.snapshot
    }
}
