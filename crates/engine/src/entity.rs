//! Entity: one mapped document instance
//!
//! An [`Entity`] owns everything the change-tracking core keeps per instance:
//! the attribute store, the change tracker, the stack of open atomic scopes
//! and the retry buffer. Nothing here is shared between instances, and
//! nothing is stored in ambient global state; the scope stack travels with
//! the entity.
//!
//! # Write paths
//!
//! - Plain writes ([`Entity::write`], [`Entity::remove`]) only change memory
//!   outside a scope; [`Entity::commit`] later sends every dirty field as one
//!   composed update. Inside a scope they enqueue `$set`/`$unset`.
//! - Atomic operators ([`Entity::inc`], [`Entity::push`], ...) apply to memory
//!   at once. Inside a scope they are buffered; outside a scope a persisted
//!   entity writes them immediately as a one-operator update.
//! - Closing a non-joined scope writes its buffer as one command. Closing a
//!   joined scope leaves its operators with the enclosing owner.
//!
//! An operator on a path whose dirty state no pending operator accounts for
//! is sent as a replacement of the current value, so the store never applies
//! an operator to a value memory has already moved past.

use crate::attributes::AttributeStore;
use crate::coordinator::from_storage_document;
use crate::mapper::Mapper;
use crate::scope::AtomicScope;
use crate::state::EntityState;
use crate::tracker::Change;
use docmapper_concurrency::{ContextStack, ContextStatus, OperatorBuffer, PersistenceContext};
use docmapper_core::{
    BitOp, ContextId, Document, DocumentId, Error, FieldPath, Operation, OperatorKind,
    PendingOperator, PopEnd, Result, SchemaInfo, Value, ID_FIELD,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// One document-mapped instance with change tracking and atomic scopes
pub struct Entity {
    schema: Arc<dyn SchemaInfo>,
    mapper: Mapper,
    state: EntityState,
    persisted: bool,
    destroyed: bool,
    contexts: ContextStack,
    /// Operators whose write failed, resent by the next commit
    retry: OperatorBuffer,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("collection", &self.schema.collection())
            .field("id", &self.id())
            .field("persisted", &self.persisted)
            .field("destroyed", &self.destroyed)
            .field("scopes", &self.contexts.depth())
            .field("dirty", &self.dirty_fields())
            .field("retry", &self.retry.len())
            .finish()
    }
}

impl Entity {
    pub(crate) fn new(
        schema: Arc<dyn SchemaInfo>,
        mapper: Mapper,
        attributes: AttributeStore,
        persisted: bool,
    ) -> Self {
        Self {
            schema,
            mapper,
            state: EntityState::new(attributes),
            persisted,
            destroyed: false,
            contexts: ContextStack::new(),
            retry: OperatorBuffer::new(),
        }
    }

    // =========================================================================
    // Identity and state
    // =========================================================================

    /// Schema this entity was created with
    pub fn schema(&self) -> &dyn SchemaInfo {
        self.schema.as_ref()
    }

    /// Mapper this entity writes through
    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    /// Identity, once assigned
    pub fn id(&self) -> Option<DocumentId> {
        self.state.attributes.id()
    }

    /// Whether the document exists in the store
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Whether the document was deleted
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Current attributes
    pub fn attributes(&self) -> &AttributeStore {
        &self.state.attributes
    }

    fn ensure_live(&self) -> Result<()> {
        if self.destroyed {
            return Err(Error::InvalidOperation(format!(
                "document {} in '{}' was deleted",
                self.id().map(|id| id.to_string()).unwrap_or_default(),
                self.schema.collection()
            )));
        }
        Ok(())
    }

    fn ensure_no_scope(&self, action: &str) -> Result<()> {
        if !self.contexts.is_empty() {
            return Err(Error::InvalidOperation(format!(
                "cannot {} inside an atomic scope",
                action
            )));
        }
        Ok(())
    }

    fn require_id(&self) -> Result<DocumentId> {
        self.id()
            .ok_or_else(|| Error::InvalidOperation("entity has no identity".to_string()))
    }

    fn check_readable(&self, path: &FieldPath) -> Result<()> {
        if !self.schema.is_projected(path) {
            return Err(Error::FieldNotLoaded { path: path.clone() });
        }
        self.state.attributes.check_readable(path)
    }

    fn check_writable(&self, path: &FieldPath) -> Result<()> {
        if path.root() == ID_FIELD {
            return Err(Error::InvalidOperation(format!(
                "'{}' is the identity and cannot be written",
                path
            )));
        }
        if !self.schema.is_projected(path) {
            return Err(Error::FieldNotLoaded { path: path.clone() });
        }
        self.state.attributes.check_writable(path)
    }

    /// Read the value at `path`
    ///
    /// # Errors
    /// `FieldNotLoaded` when the projection left `path` out.
    pub fn get(&self, path: &str) -> Result<Option<&Value>> {
        let path = FieldPath::parse(path)?;
        self.check_readable(&path)?;
        self.state.attributes.get(&path)
    }

    // =========================================================================
    // Change tracking
    // =========================================================================

    /// Paths whose current value differs from the persisted one
    pub fn dirty_fields(&self) -> BTreeSet<FieldPath> {
        self.state.dirty_fields()
    }

    /// Before/after pair of every dirty field
    pub fn changes(&self) -> BTreeMap<FieldPath, Change> {
        self.state.changes()
    }

    /// Whether any field is dirty
    pub fn has_changes(&self) -> bool {
        self.state.tracker.has_changes(&self.state.attributes)
    }

    /// Changes written by the last commit that had any
    pub fn previous_changes(&self) -> &BTreeMap<FieldPath, Change> {
        self.state.tracker.previous_changes()
    }

    /// Put `path` back to its persisted value
    ///
    /// Pending and retried operators on overlapping paths are dropped. No
    /// storage call is made.
    ///
    /// # Errors
    /// `FieldNotLoaded` when the projection left `path` out.
    pub fn reset_field(&mut self, path: &str) -> Result<()> {
        let path = FieldPath::parse(path)?;
        self.check_readable(&path)?;
        if !self.contexts.is_empty() {
            self.contexts.capture(&path, &self.state);
            self.contexts.discard_overlapping(&path);
        }
        self.retry.discard_overlapping(&path);
        self.state
            .tracker
            .reset_field(&path, &mut self.state.attributes)
    }

    // =========================================================================
    // Plain writes
    // =========================================================================

    /// Write `value` at `path`
    ///
    /// See [`Entity::record_field_write`].
    pub fn write(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        self.record_field_write(path, Some(value.into()))
    }

    /// Remove the field at `path`
    ///
    /// See [`Entity::record_field_write`].
    pub fn remove(&mut self, path: &str) -> Result<()> {
        self.record_field_write(path, None)
    }

    /// Write (`Some`) or remove (`None`) the value at `path`
    ///
    /// Inside a scope the change is enqueued as `$set`/`$unset`; outside one
    /// the field is only marked dirty until the next [`Entity::commit`].
    ///
    /// # Errors
    /// - `FieldNotLoaded` when the projection left `path` out
    /// - `OperatorConflict` when a pending operator cannot be replaced
    /// - `InvalidOperand` when an ancestor of `path` holds a scalar
    pub fn record_field_write(&mut self, path: &str, value: Option<Value>) -> Result<()> {
        let path = FieldPath::parse(path)?;
        self.ensure_live()?;
        self.check_writable(&path)?;
        self.materialize_association(&path)?;
        self.write_path(path, value)
    }

    fn write_path(&mut self, path: FieldPath, value: Option<Value>) -> Result<()> {
        if !self.contexts.is_empty() {
            self.contexts.enqueue(PendingOperator::new(
                path.clone(),
                Operation::replacement(value.clone()),
            ))?;
            self.contexts.capture(&path, &self.state);
        }
        self.retry.discard_overlapping(&path);
        self.state.write(&path, value)?;
        Ok(())
    }

    /// Embed the association root `path` traverses if it holds nothing yet
    fn materialize_association(&mut self, path: &FieldPath) -> Result<()> {
        if path.is_top_level() {
            return Ok(());
        }
        let Some(resolver) = self.mapper.associations().cloned() else {
            return Ok(());
        };
        let root = path.root_path();
        if !resolver.is_association(root.root()) || self.state.attributes.value_at(&root).is_some()
        {
            return Ok(());
        }
        let child = resolver.resolve_or_create(&root)?;
        debug!(
            target: "docmapper::atomic",
            collection = self.schema.collection(),
            root = %root,
            "Materialized association root"
        );
        self.write_path(root, Some(Value::Object(child)))
    }

    // =========================================================================
    // Atomic operators
    // =========================================================================

    /// `$set`
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        self.apply_operator(path, Operation::Set(value.into()))
    }

    /// `$unset`
    pub fn unset(&mut self, path: &str) -> Result<()> {
        self.apply_operator(path, Operation::Unset)
    }

    /// `$inc` by an integer or float amount
    pub fn inc(&mut self, path: &str, amount: impl Into<Value>) -> Result<()> {
        self.apply_operator(path, Operation::Inc(amount.into()))
    }

    /// `$push` one element
    pub fn push(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        self.apply_operator(path, Operation::Push(value.into()))
    }

    /// `$addToSet` one element
    pub fn add_to_set(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        self.apply_operator(path, Operation::AddToSet(value.into()))
    }

    /// `$pull` every element equal to `value`
    pub fn pull(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        self.apply_operator(path, Operation::Pull(value.into()))
    }

    /// `$pullAll` every element equal to any of `values`
    pub fn pull_all(&mut self, path: &str, values: Vec<Value>) -> Result<()> {
        self.apply_operator(path, Operation::PullAll(values))
    }

    /// `$pop` the first or last element
    pub fn pop(&mut self, path: &str, end: PopEnd) -> Result<()> {
        self.apply_operator(path, Operation::Pop(end))
    }

    /// `$bit` and/or/xor
    pub fn bit(&mut self, path: &str, op: BitOp) -> Result<()> {
        self.apply_operator(path, Operation::Bit(op))
    }

    /// `$rename` to `target`
    pub fn rename(&mut self, path: &str, target: &str) -> Result<()> {
        let target = FieldPath::parse(target)?;
        self.apply_operator(path, Operation::Rename(target))
    }

    /// Apply an operator given in wire form (`kind` plus raw operand)
    ///
    /// # Errors
    /// `InvalidOperand` when the operand does not fit `kind`; otherwise as
    /// the typed operator methods.
    pub fn enqueue_operator(&mut self, kind: OperatorKind, path: &str, operand: Value) -> Result<()> {
        let parsed = FieldPath::parse(path)?;
        let operation = Operation::from_wire(kind, &parsed, operand)?;
        self.apply_operator(path, operation)
    }

    /// Apply `operation` at `path` in memory and route it to the right buffer
    ///
    /// # Errors
    /// - `FieldNotLoaded` when the projection left a touched path out
    /// - `InvalidOperand` when the operator does not fit the current value
    /// - `OperatorConflict` when it cannot share a command with a pending one
    /// - `Storage` / `DocumentNotFound` for an immediate write that failed;
    ///   the change stays in memory and in the retry buffer
    fn apply_operator(&mut self, path: &str, operation: Operation) -> Result<()> {
        let path = FieldPath::parse(path)?;
        self.ensure_live()?;
        self.check_writable(&path)?;
        if let Operation::Rename(target) = &operation {
            self.check_writable(target)?;
            if path.overlaps(target) {
                return Err(Error::InvalidOperand {
                    path: path.clone(),
                    reason: format!("cannot rename into overlapping path '{}'", target),
                });
            }
        }
        self.materialize_association(&path)?;

        let current = self.state.attributes.value_at(&path);
        let updated = operation.apply(&path, current.as_ref())?;
        let operator = PendingOperator::new(path, operation);
        let touched: Vec<FieldPath> = operator.touched_paths().into_iter().cloned().collect();

        if !self.contexts.is_empty() {
            let stale = !operator.kind().is_replacement()
                && touched.iter().any(|p| self.has_unpending_dirty(p));
            let staged = if stale {
                self.replacement_ops(&operator, updated.clone())
            } else {
                vec![operator.clone()]
            };
            self.contexts.enqueue_all(staged)?;
            for path in &touched {
                self.retry.discard_overlapping(path);
                self.contexts.capture(path, &self.state);
            }
            return self.apply_in_memory(&operator, updated);
        }

        if !self.persisted {
            return self.apply_in_memory(&operator, updated);
        }

        let stale = touched.iter().any(|p| self.state.overlaps_dirty(p));
        let operators = if stale {
            self.replacement_ops(&operator, updated.clone())
        } else {
            vec![operator.clone()]
        };
        for path in &touched {
            self.retry.discard_overlapping(path);
        }
        self.apply_in_memory(&operator, updated)?;
        if let Err(error) = self.flush_operators(&operators) {
            self.keep_for_retry(operators);
            return Err(error);
        }
        Ok(())
    }

    /// Whether a dirty field overlapping `path` has no pending operator in
    /// the buffer that receives operators now
    fn has_unpending_dirty(&self, path: &FieldPath) -> bool {
        self.state
            .dirty_fields()
            .iter()
            .any(|dirty| dirty.overlaps(path) && !self.contexts.owner_covers(dirty))
    }

    /// `$set`/`$unset` operators leaving the touched paths as `operator` will
    fn replacement_ops(&self, operator: &PendingOperator, updated: Option<Value>) -> Vec<PendingOperator> {
        match &operator.operation {
            Operation::Rename(target) => match self.state.attributes.value_at(&operator.path) {
                Some(value) => vec![
                    PendingOperator::new(operator.path.clone(), Operation::Unset),
                    PendingOperator::new(target.clone(), Operation::Set(value)),
                ],
                None => Vec::new(),
            },
            _ => vec![PendingOperator::new(
                operator.path.clone(),
                Operation::replacement(updated),
            )],
        }
    }

    fn apply_in_memory(&mut self, operator: &PendingOperator, updated: Option<Value>) -> Result<()> {
        match &operator.operation {
            Operation::Rename(target) => {
                if self.state.attributes.value_at(&operator.path).is_some() {
                    let moved = self.state.write(&operator.path, None)?;
                    self.state.write(target, moved)?;
                }
            }
            _ => {
                self.state.write(&operator.path, updated)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Atomic scopes
    // =========================================================================

    /// Whether an atomic scope is open
    pub fn in_atomic_scope(&self) -> bool {
        !self.contexts.is_empty()
    }

    /// Number of open atomic scopes
    pub fn scope_depth(&self) -> usize {
        self.contexts.depth()
    }

    /// Status of a scope, open or ended
    pub fn scope_status(&self, id: ContextId) -> Option<ContextStatus> {
        self.contexts.status_of(id)
    }

    /// Operators waiting in the buffer that receives operators now
    pub fn pending_operators(&self) -> &[PendingOperator] {
        self.contexts
            .owner_buffer()
            .map(|buffer| buffer.operators())
            .unwrap_or(&[])
    }

    /// Operators kept from failed writes
    pub fn retry_operators(&self) -> &[PendingOperator] {
        self.retry.operators()
    }

    /// Drop operators kept from failed writes
    ///
    /// The fields they changed stay dirty.
    pub fn discard_pending(&mut self) {
        if !self.retry.is_empty() {
            debug!(
                target: "docmapper::commit",
                collection = self.schema.collection(),
                discarded = self.retry.len(),
                "Discarded retry operators"
            );
        }
        self.retry.clear();
    }

    /// Open an atomic scope
    ///
    /// `join` defaults to the mapper's `join_contexts` setting. A joined
    /// scope forwards its operators to the nearest enclosing scope that owns
    /// a buffer; a scope with nothing to join owns its buffer.
    ///
    /// # Errors
    /// `InvalidOperation` on a deleted entity.
    pub fn begin_atomic(&mut self, join: Option<bool>) -> Result<ContextId> {
        self.ensure_live()?;
        let join = join.unwrap_or(self.mapper.config().join_contexts);
        Ok(self.contexts.push(join))
    }

    /// Close the innermost scope, which must be `id`
    ///
    /// With `failed` the scope is reverted: every field touched since it
    /// opened gets its entry value and tracking back, and its operators are
    /// dropped. Otherwise a non-joined scope writes its buffer as one command.
    ///
    /// # Errors
    /// - `RevertedState` if `id` was already reverted
    /// - `InvalidOperation` if `id` is not the innermost open scope
    /// - `Storage` / `DocumentNotFound` if the write failed; the operators
    ///   move to the retry buffer and the fields stay dirty
    pub fn end_atomic(&mut self, id: ContextId, failed: bool) -> Result<()> {
        let mut context = self.contexts.pop(id)?;
        if failed {
            return self.revert(context);
        }

        if context.is_joined() {
            context.mark_committed()?;
            self.contexts.record_closed(&context);
            debug!(
                target: "docmapper::atomic",
                context = %id,
                owner = %context.buffer_owner(),
                "Joined atomic context ended"
            );
            return Ok(());
        }

        let operators = context.take_buffer().drain();
        let count = operators.len();
        match self.flush_scope(operators) {
            Ok(()) => {
                context.mark_committed()?;
                self.contexts.record_closed(&context);
                debug!(target: "docmapper::atomic", context = %id, operators = count, "Committed atomic context");
                Ok(())
            }
            Err(error) => {
                context.mark_failed()?;
                self.contexts.record_closed(&context);
                warn!(target: "docmapper::atomic", context = %id, %error, "Atomic context write failed");
                Err(error)
            }
        }
    }

    fn revert(&mut self, mut context: PersistenceContext) -> Result<()> {
        context.snapshot().restore_into(&mut self.state)?;
        if context.is_joined() {
            self.contexts.restore_checkpoint(&context);
        }
        for path in context.snapshot().paths() {
            self.retry.discard_overlapping(path);
        }
        let restored = context.snapshot().entries().len();
        context.mark_reverted()?;
        self.contexts.record_closed(&context);
        debug!(
            target: "docmapper::atomic",
            context = %context.id(),
            restored,
            "Reverted atomic context"
        );
        Ok(())
    }

    /// Run `body` inside an atomic scope
    ///
    /// The scope commits when `body` returns `Ok` and reverts when it returns
    /// `Err`; the body's error is returned after the revert.
    ///
    /// # Errors
    /// The body's error, or a failure opening or committing the scope.
    pub fn atomically<T, E, F>(&mut self, join: Option<bool>, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Entity) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let id = self.begin_atomic(join)?;
        match body(self) {
            Ok(value) => {
                self.end_atomic(id, false)?;
                Ok(value)
            }
            Err(error) => {
                if let Err(revert_error) = self.end_atomic(id, true) {
                    warn!(target: "docmapper::atomic", context = %id, error = %revert_error, "Revert failed");
                }
                Err(error)
            }
        }
    }

    /// Open an atomic scope held by a guard
    ///
    /// The guard derefs to the entity. Dropping it without
    /// [`AtomicScope::commit`] reverts the scope.
    ///
    /// # Errors
    /// As [`Entity::begin_atomic`].
    pub fn scope(&mut self, join: Option<bool>) -> Result<AtomicScope<'_>> {
        let id = self.begin_atomic(join)?;
        Ok(AtomicScope::new(self, id))
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write every change
    ///
    /// - Inside a scope: dirty fields the scope has no operator for are
    ///   enqueued as `$set`/`$unset` and written when the scope ends
    /// - Never persisted: the whole document is inserted
    /// - Otherwise: retried operators plus `$set`/`$unset` for the remaining
    ///   dirty fields go out as one command; nothing goes out when there is
    ///   nothing to write
    ///
    /// # Errors
    /// `Storage` / `DocumentNotFound` when the write fails; dirty state and
    /// retried operators are kept. `InvalidOperation` on a deleted entity.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_live()?;
        if !self.contexts.is_empty() {
            let deferred: Vec<PendingOperator> = self
                .dirty_fields()
                .into_iter()
                .filter(|dirty| !self.contexts.owner_covers(dirty))
                .map(|dirty| {
                    let value = self.state.attributes.value_at(&dirty);
                    PendingOperator::new(dirty, Operation::replacement(value))
                })
                .collect();
            return self.contexts.enqueue_all(deferred);
        }

        if !self.persisted {
            return self.insert();
        }

        let mut buffer = self.retry.clone();
        for dirty in self.dirty_fields() {
            let covered = buffer
                .iter()
                .flat_map(|op| op.touched_paths())
                .any(|touched| touched.is_ancestor_of(&dirty));
            if covered {
                continue;
            }
            buffer.discard_overlapping(&dirty);
            let value = self.state.attributes.value_at(&dirty);
            buffer.enqueue(dirty, Operation::replacement(value))?;
        }
        let operators = buffer.drain();
        self.flush_operators(&operators)?;
        self.retry.clear();
        Ok(())
    }

    fn insert(&mut self) -> Result<()> {
        self.mapper
            .coordinator()
            .insert(self.schema.as_ref(), &mut self.state)?;
        self.persisted = true;
        self.retry.clear();
        Ok(())
    }

    /// Write a drained scope buffer
    fn flush_scope(&mut self, operators: Vec<PendingOperator>) -> Result<()> {
        if !self.persisted {
            if operators.is_empty() {
                return Ok(());
            }
            let committed = self
                .state
                .attributes
                .fields()
                .filter(|field| *field != ID_FIELD)
                .map(FieldPath::parse)
                .collect::<Result<Vec<_>>>()?;
            self.insert()?;
            return self.contexts.absorb_commit(&committed, &self.state);
        }
        if let Err(error) = self.flush_operators(&operators) {
            self.keep_for_retry(operators);
            return Err(error);
        }
        Ok(())
    }

    /// Send `operators` as one update and fold the result into open scopes
    fn flush_operators(&mut self, operators: &[PendingOperator]) -> Result<Vec<FieldPath>> {
        let id = self.require_id()?;
        let shard_key = self.state.shard_key(self.schema.as_ref());
        let committed = self.mapper.coordinator().flush(
            self.schema.as_ref(),
            &id,
            shard_key.as_ref(),
            operators,
            &mut self.state,
        )?;
        if !committed.is_empty() {
            self.contexts.absorb_commit(&committed, &self.state)?;
        }
        Ok(committed)
    }

    /// Move operators of a failed write into the retry buffer
    ///
    /// Retried operators on overlapping paths are superseded.
    fn keep_for_retry(&mut self, operators: Vec<PendingOperator>) {
        for operator in operators {
            for path in operator.touched_paths() {
                self.retry.discard_overlapping(path);
            }
            if let Err(error) = self.retry.enqueue_operator(operator) {
                warn!(target: "docmapper::commit", %error, "Could not keep operator for retry");
            }
        }
        debug!(
            target: "docmapper::commit",
            collection = self.schema.collection(),
            pending = self.retry.len(),
            "Kept operators for retry"
        );
    }

    /// Replace the attributes with a freshly fetched document (storage names)
    ///
    /// All dirty state and retried operators are dropped; the loaded
    /// projection is kept.
    ///
    /// # Errors
    /// `InvalidOperation` inside an atomic scope.
    pub fn reload(&mut self, stored: Document) -> Result<()> {
        self.ensure_no_scope("reload")?;
        let document = from_storage_document(self.schema.as_ref(), stored);
        let projection = self.state.attributes.projection().cloned();
        self.state.attributes.replace(document, projection);
        self.state.tracker.forget();
        self.retry.clear();
        self.persisted = true;
        debug!(
            target: "docmapper::commit",
            collection = self.schema.collection(),
            id = ?self.id(),
            "Reloaded document"
        );
        Ok(())
    }

    /// Fetch the stored document and [`reload`](Entity::reload) from it
    ///
    /// # Errors
    /// - `DocumentNotFound` when the document is gone and the mapper raises
    ///   on missing documents; otherwise the attributes reset to the identity
    /// - `InvalidOperation` inside an atomic scope or without an identity
    /// - `Storage` when the store fails the call
    pub fn reload_from_storage(&mut self) -> Result<()> {
        self.ensure_no_scope("reload")?;
        let id = self.require_id()?;
        let shard_key = self.state.shard_key(self.schema.as_ref());
        let projection = self.state.attributes.projection().cloned();
        let found = self.mapper.coordinator().find(
            self.schema.as_ref(),
            &id,
            shard_key.as_ref(),
            projection.as_ref(),
        )?;
        match found {
            Some(stored) => self.reload(stored),
            None if self.mapper.config().raise_not_found_error => Err(Error::DocumentNotFound {
                collection: self.schema.collection().to_string(),
                id,
            }),
            None => {
                let mut document = Document::new();
                document.insert(ID_FIELD.to_string(), id.to_value());
                self.state.attributes.replace(document, projection);
                self.state.tracker.forget();
                self.retry.clear();
                Ok(())
            }
        }
    }

    /// Delete the stored document and mark the entity destroyed
    ///
    /// A never-persisted entity is only marked destroyed.
    ///
    /// # Errors
    /// `InvalidOperation` inside an atomic scope or when already deleted;
    /// `Storage` when the store fails the call.
    pub fn delete(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.ensure_no_scope("delete")?;
        if self.persisted {
            let id = self.require_id()?;
            let shard_key = self.state.shard_key(self.schema.as_ref());
            self.mapper
                .coordinator()
                .delete(self.schema.as_ref(), &id, shard_key.as_ref())?;
        }
        self.destroyed = true;
        self.retry.clear();
        Ok(())
    }
}
