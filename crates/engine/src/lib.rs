//! Entity engine for docmapper
//!
//! This crate ties the lower layers together per entity instance:
//! - AttributeStore: current values plus the loaded projection
//! - ChangeTracker: originals, dirty fields, previous changes
//! - CommitCoordinator: composed updates, inserts, commit metrics
//! - Entity: the public surface (writes, operators, scopes, commit, reload)
//! - AtomicScope: guard that ends a scope on every exit path
//! - Mapper / MapperConfig / DeclaredSchema: shared handle, config, schema
//!
//! The engine is the only component that talks to a storage collaborator.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attributes;
pub mod config;
pub mod coordinator;
pub mod entity;
pub mod mapper;
pub mod schema;
pub mod scope;
pub mod state;
pub mod tracker;

pub use attributes::AttributeStore;
pub use config::{MapperConfig, CONFIG_FILE_NAME};
pub use coordinator::{CommitCoordinator, CommitStats};
pub use entity::Entity;
pub use mapper::Mapper;
pub use schema::DeclaredSchema;
pub use scope::AtomicScope;
pub use state::EntityState;
pub use tracker::{Change, ChangeTracker};
