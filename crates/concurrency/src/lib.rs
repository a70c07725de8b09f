//! Atomic scope machinery for docmapper
//!
//! This crate implements the buffering side of atomic scopes:
//! - OperatorBuffer: pending operators with merge rules
//! - PersistenceContext: one scope, its buffer and its entry-time snapshot
//! - ContextStack: strictly nested scopes of one entity instance
//!
//! Nothing here talks to storage; flushing a buffer is the engine's job.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod context;
pub mod stack;

pub use buffer::OperatorBuffer;
pub use context::{ContextSnapshot, ContextStatus, PersistenceContext, SnapshotEntry, TrackedState};
pub use stack::ContextStack;
