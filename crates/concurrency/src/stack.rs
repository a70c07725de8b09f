//! Per-entity stack of open persistence contexts
//!
//! The stack belongs to exactly one entity instance and is carried with it;
//! nothing here is global or thread-local. Contexts nest strictly: the only
//! context that may be closed is the most recently opened one.

use crate::buffer::OperatorBuffer;
use crate::context::{ContextStatus, PersistenceContext, TrackedState};
use docmapper_core::{ContextId, Error, FieldPath, PendingOperator, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Ordered sequence of open contexts, most recent last
#[derive(Debug, Default)]
pub struct ContextStack {
    active: Vec<PersistenceContext>,
    /// Final status of every context popped so far
    closed: BTreeMap<ContextId, ContextStatus>,
    next_id: u64,
}

impl ContextStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no scope is open
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Number of open scopes
    pub fn depth(&self) -> usize {
        self.active.len()
    }

    /// Innermost open context
    pub fn current(&self) -> Option<&PersistenceContext> {
        self.active.last()
    }

    /// Open context by id
    pub fn get(&self, id: ContextId) -> Option<&PersistenceContext> {
        self.active.iter().find(|c| c.id() == id)
    }

    fn get_mut(&mut self, id: ContextId) -> Option<&mut PersistenceContext> {
        self.active.iter_mut().find(|c| c.id() == id)
    }

    /// Open contexts, outermost first
    pub fn iter(&self) -> impl Iterator<Item = &PersistenceContext> {
        self.active.iter()
    }

    /// Status of a context, open or closed
    pub fn status_of(&self, id: ContextId) -> Option<ContextStatus> {
        self.get(id)
            .map(|c| c.status())
            .or_else(|| self.closed.get(&id).copied())
    }

    /// Open a new context
    ///
    /// `join` only takes effect when an enclosing context exists; the new
    /// context then forwards its operators to the nearest enclosing context
    /// that owns a buffer.
    pub fn push(&mut self, join: bool) -> ContextId {
        self.next_id += 1;
        let id = ContextId::from_raw(self.next_id);
        let context = match self.active.last() {
            Some(parent) if join => {
                let owner = parent.buffer_owner();
                let checkpoint = self
                    .get(owner)
                    .map(|c| c.buffer().clone())
                    .unwrap_or_default();
                PersistenceContext::joined(id, parent.id(), owner, checkpoint)
            }
            Some(parent) => PersistenceContext::new(id, Some(parent.id())),
            None => PersistenceContext::new(id, None),
        };
        debug!(
            target: "docmapper::atomic",
            context = %id,
            depth = self.active.len() + 1,
            joined = context.is_joined(),
            "Opened atomic context"
        );
        self.active.push(context);
        id
    }

    /// Pop the innermost context, which must be `id`
    ///
    /// # Errors
    /// - `RevertedState` if `id` was already reverted
    /// - `InvalidOperation` if `id` is not the innermost open context
    pub fn pop(&mut self, id: ContextId) -> Result<PersistenceContext> {
        if let Some(status) = self.closed.get(&id) {
            return match status {
                ContextStatus::Reverted => Err(Error::RevertedState { context: id }),
                other => Err(Error::InvalidOperation(format!(
                    "atomic context {} already ended ({:?})",
                    id, other
                ))),
            };
        }
        match self.active.last() {
            Some(top) if top.id() == id => {}
            Some(top) => {
                return Err(Error::InvalidOperation(format!(
                    "atomic context {} is not the innermost open context ({} is)",
                    id,
                    top.id()
                )))
            }
            None => {
                return Err(Error::InvalidOperation(format!(
                    "no atomic context is open (asked to end {})",
                    id
                )))
            }
        }
        self.active
            .pop()
            .ok_or_else(|| Error::InvalidOperation("context stack is empty".to_string()))
    }

    /// Remember the final status of a popped context
    pub fn record_closed(&mut self, context: &PersistenceContext) {
        self.closed.insert(context.id(), context.status());
    }

    /// Buffer that operators enqueued now land in
    pub fn owner_buffer_mut(&mut self) -> Option<&mut OperatorBuffer> {
        let owner = self.active.last()?.buffer_owner();
        self.get_mut(owner).map(|c| c.buffer_mut())
    }

    /// Enqueue an operator into the innermost scope's buffer owner
    ///
    /// # Errors
    /// `InvalidOperation` when no scope is open; merge errors from the buffer.
    pub fn enqueue(&mut self, operator: PendingOperator) -> Result<()> {
        self.ensure_current_open()?;
        let buffer = self
            .owner_buffer_mut()
            .ok_or_else(|| Error::InvalidOperation("no atomic context is open".to_string()))?;
        buffer.enqueue_operator(operator)
    }

    /// Enqueue several operators as one step
    ///
    /// # Errors
    /// As [`ContextStack::enqueue`]; the owner buffer is unchanged on error.
    pub fn enqueue_all(&mut self, operators: Vec<PendingOperator>) -> Result<()> {
        self.ensure_current_open()?;
        let buffer = self
            .owner_buffer_mut()
            .ok_or_else(|| Error::InvalidOperation("no atomic context is open".to_string()))?;
        let mut staged = buffer.clone();
        for operator in operators {
            staged.enqueue_operator(operator)?;
        }
        *buffer = staged;
        Ok(())
    }

    /// Check that the innermost context can take operators
    ///
    /// # Errors
    /// `InvalidOperation` when no scope is open; see
    /// [`PersistenceContext::ensure_open`].
    pub fn ensure_current_open(&self) -> Result<()> {
        self.current()
            .ok_or_else(|| Error::InvalidOperation("no atomic context is open".to_string()))?
            .ensure_open()
    }

    /// Capture entry-time state of `path` in every open context
    pub fn capture(&mut self, path: &FieldPath, state: &dyn TrackedState) {
        for context in &mut self.active {
            context.snapshot_mut().capture(path, state);
        }
    }

    /// Fold committed paths into every open context
    ///
    /// Snapshots learn the committed values, so a later revert does not undo
    /// them. Pending operators on overlapping paths become replacements of
    /// the current values, in owned buffers and in joined checkpoints alike.
    ///
    /// # Errors
    /// Fails only if a refreshed buffer cannot be rebuilt.
    pub fn absorb_commit(&mut self, committed: &[FieldPath], state: &dyn TrackedState) -> Result<()> {
        for context in &mut self.active {
            for path in committed {
                context.snapshot_mut().absorb_commit(path, state);
            }
            let refreshed = context
                .buffer_mut()
                .refresh(committed, |path| state.value_at(path))?;
            let refreshed = match context.checkpoint_mut() {
                Some(checkpoint) => {
                    refreshed + checkpoint.refresh(committed, |path| state.value_at(path))?
                }
                None => refreshed,
            };
            if refreshed > 0 {
                debug!(
                    target: "docmapper::atomic",
                    context = %context.id(),
                    refreshed,
                    "Replaced pending operators overtaken by a commit"
                );
            }
        }
        Ok(())
    }

    /// Put back the owner buffer a joined context saw at entry
    pub fn restore_checkpoint(&mut self, joined: &PersistenceContext) {
        let (Some(checkpoint), true) = (joined.checkpoint(), joined.is_joined()) else {
            return;
        };
        let owner = joined.buffer_owner();
        if let Some(context) = self.get_mut(owner) {
            *context.buffer_mut() = checkpoint.clone();
        }
    }

    /// Drop pending operators overlapping `path` from every open buffer
    ///
    /// Returns how many were dropped.
    pub fn discard_overlapping(&mut self, path: &FieldPath) -> usize {
        self.active
            .iter_mut()
            .map(|context| context.buffer_mut().discard_overlapping(path))
            .sum()
    }

    /// Buffer that operators enqueued now land in
    pub fn owner_buffer(&self) -> Option<&OperatorBuffer> {
        let owner = self.active.last()?.buffer_owner();
        self.get(owner).map(|c| c.buffer())
    }

    /// Whether the owner buffer holds an operator on `path` or an ancestor
    pub fn owner_covers(&self, path: &FieldPath) -> bool {
        self.owner_buffer().map_or(false, |buffer| {
            buffer
                .iter()
                .flat_map(|op| op.touched_paths())
                .any(|touched| touched.is_ancestor_of(path))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmapper_core::{Operation, Value};

    fn op(path: &str, operation: Operation) -> PendingOperator {
        PendingOperator::new(path.parse().unwrap(), operation)
    }

    #[test]
    fn test_push_pop_lifo() {
        let mut stack = ContextStack::new();
        let outer = stack.push(false);
        let inner = stack.push(false);
        assert_eq!(stack.depth(), 2);

        let err = stack.pop(outer).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));

        let popped = stack.pop(inner).unwrap();
        assert_eq!(popped.parent(), Some(outer));
        stack.pop(outer).unwrap();
        assert!(stack.is_empty());
    }

    #[test]
    fn test_join_without_parent_owns_buffer() {
        let mut stack = ContextStack::new();
        let id = stack.push(true);
        assert!(!stack.get(id).unwrap().is_joined());
    }

    #[test]
    fn test_joined_forwards_to_nearest_owner() {
        let mut stack = ContextStack::new();
        let outer = stack.push(false);
        let _middle = stack.push(true);
        let _inner = stack.push(true);
        stack.enqueue(op("age", Operation::Inc(Value::Int(1)))).unwrap();
        assert_eq!(stack.get(outer).unwrap().buffer().len(), 1);
        assert!(stack.current().unwrap().buffer().is_empty());
    }

    #[test]
    fn test_non_joined_inner_owns_buffer() {
        let mut stack = ContextStack::new();
        let outer = stack.push(false);
        let inner = stack.push(false);
        stack.enqueue(op("age", Operation::Inc(Value::Int(1)))).unwrap();
        assert!(stack.get(outer).unwrap().buffer().is_empty());
        assert_eq!(stack.get(inner).unwrap().buffer().len(), 1);
    }

    #[test]
    fn test_restore_checkpoint() {
        let mut stack = ContextStack::new();
        let outer = stack.push(false);
        stack.enqueue(op("age", Operation::Inc(Value::Int(1)))).unwrap();
        let inner = stack.push(true);
        stack.enqueue(op("age", Operation::Inc(Value::Int(5)))).unwrap();
        stack.enqueue(op("name", Operation::Set(Value::from("Jake")))).unwrap();

        let mut joined = stack.pop(inner).unwrap();
        joined.mark_reverted().unwrap();
        stack.restore_checkpoint(&joined);

        let buffer = stack.get(outer).unwrap().buffer();
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.operators()[0].operation, Operation::Inc(Value::Int(1)));
    }

    #[test]
    fn test_ending_reverted_context_again() {
        let mut stack = ContextStack::new();
        let id = stack.push(false);
        let mut ctx = stack.pop(id).unwrap();
        ctx.mark_reverted().unwrap();
        stack.record_closed(&ctx);

        assert!(matches!(
            stack.pop(id),
            Err(Error::RevertedState { context }) if context == id
        ));
        assert_eq!(stack.status_of(id), Some(ContextStatus::Reverted));
    }

    #[test]
    fn test_enqueue_without_scope_fails() {
        let mut stack = ContextStack::new();
        assert!(stack.enqueue(op("a", Operation::Unset)).is_err());
    }

    #[test]
    fn test_enqueue_all_is_atomic() {
        let mut stack = ContextStack::new();
        let id = stack.push(false);
        stack.enqueue(op("tags", Operation::Push(Value::from("a")))).unwrap();
        let result = stack.enqueue_all(vec![
            op("name", Operation::Set(Value::from("Jake"))),
            op("tags", Operation::Pull(Value::from("a"))),
        ]);
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(stack.get(id).unwrap().buffer().len(), 1);
    }

    #[test]
    fn test_owner_covers_ancestors_only() {
        let mut stack = ContextStack::new();
        let _outer = stack.push(false);
        stack.enqueue(op("address", Operation::Set(Value::object()))).unwrap();
        assert!(stack.owner_covers(&"address.city".parse().unwrap()));
        let _inner = stack.push(false);
        assert!(!stack.owner_covers(&"address.city".parse().unwrap()));
        let _joined = stack.push(true);
        assert!(!stack.owner_covers(&"address".parse().unwrap()));
    }

    struct Current(Value);

    impl TrackedState for Current {
        fn value_at(&self, _path: &FieldPath) -> Option<Value> {
            Some(self.0.clone())
        }
        fn originals_overlapping(&self, _path: &FieldPath) -> Vec<(FieldPath, Option<Value>)> {
            Vec::new()
        }
        fn restore(&mut self, _entry: &crate::context::SnapshotEntry) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_absorb_commit_refreshes_enclosing_buffers() {
        let mut stack = ContextStack::new();
        let outer = stack.push(false);
        stack.enqueue(op("age", Operation::Inc(Value::Int(1)))).unwrap();
        let _inner = stack.push(false);

        stack
            .absorb_commit(&["age".parse().unwrap()], &Current(Value::Int(42)))
            .unwrap();
        let buffer = stack.get(outer).unwrap().buffer();
        assert_eq!(buffer.operators()[0].operation, Operation::Set(Value::Int(42)));
    }

    #[test]
    fn test_absorb_commit_refreshes_joined_checkpoint() {
        let mut stack = ContextStack::new();
        let outer = stack.push(false);
        stack.enqueue(op("age", Operation::Inc(Value::Int(1)))).unwrap();
        let joined = stack.push(true);
        let inner = stack.push(false);

        stack
            .absorb_commit(&["age".parse().unwrap()], &Current(Value::Int(100)))
            .unwrap();
        let checkpoint = stack.get(joined).unwrap().checkpoint().unwrap();
        assert_eq!(
            checkpoint.operators()[0].operation,
            Operation::Set(Value::Int(100))
        );

        stack.pop(inner).unwrap();
        let mut reverted = stack.pop(joined).unwrap();
        reverted.mark_reverted().unwrap();
        stack.restore_checkpoint(&reverted);
        let buffer = stack.get(outer).unwrap().buffer();
        assert_eq!(buffer.operators()[0].operation, Operation::Set(Value::Int(100)));
    }
}
