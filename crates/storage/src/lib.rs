//! Storage layer for docmapper
//!
//! This crate provides a reference implementation of the
//! [`docmapper_core::StorageClient`] trait:
//! - InMemoryStorage: thread-safe document store backed by DashMap
//! - StorageCall: log entry for every call the store receives
//!
//! A production deployment plugs a network driver in behind the same trait.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;

pub use memory::{InMemoryStorage, StorageCall};
