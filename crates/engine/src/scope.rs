//! Guard-style atomic scope
//!
//! [`AtomicScope`] ends its scope on every exit path: explicitly through
//! [`AtomicScope::commit`] or [`AtomicScope::revert`], or by being dropped,
//! which reverts.

use crate::entity::Entity;
use docmapper_core::{ContextId, Result};
use std::ops::{Deref, DerefMut};
use tracing::warn;

/// An open atomic scope on one entity
///
/// Derefs to the entity, so field writes and operators go through the guard.
#[must_use = "dropping the scope reverts it"]
pub struct AtomicScope<'a> {
    entity: &'a mut Entity,
    id: ContextId,
    finished: bool,
}

impl<'a> AtomicScope<'a> {
    pub(crate) fn new(entity: &'a mut Entity, id: ContextId) -> Self {
        Self {
            entity,
            id,
            finished: false,
        }
    }

    /// Identity of the scope's context
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// End the scope normally, writing its buffer unless it is joined
    ///
    /// # Errors
    /// See [`Entity::end_atomic`].
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.entity.end_atomic(self.id, false)
    }

    /// End the scope by reverting every field touched inside it
    ///
    /// # Errors
    /// See [`Entity::end_atomic`].
    pub fn revert(mut self) -> Result<()> {
        self.finished = true;
        self.entity.end_atomic(self.id, true)
    }
}

impl Deref for AtomicScope<'_> {
    type Target = Entity;

    fn deref(&self) -> &Entity {
        self.entity
    }
}

impl DerefMut for AtomicScope<'_> {
    fn deref_mut(&mut self) -> &mut Entity {
        self.entity
    }
}

impl Drop for AtomicScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(error) = self.entity.end_atomic(self.id, true) {
            warn!(target: "docmapper::atomic", context = %self.id, %error, "Revert on drop failed");
        }
    }
}
