//! Declared schema
//!
//! [`DeclaredSchema`] is a small, builder-style [`SchemaInfo`]: a collection
//! name, declared top-level fields, storage-name aliases and shard-key fields.
//! Undeclared fields are still accepted everywhere; declaration only matters
//! for aliasing and introspection.

use docmapper_core::{FieldPath, SchemaInfo};
use std::collections::{BTreeMap, BTreeSet};

/// Builder-style schema description
#[derive(Debug, Clone, Default)]
pub struct DeclaredSchema {
    collection: String,
    fields: BTreeSet<String>,
    /// Logical top-level name to storage name
    aliases: BTreeMap<String, String>,
    shard_key: Vec<FieldPath>,
    /// Paths reported as not projected regardless of the loaded projection
    projected_out: BTreeSet<FieldPath>,
}

impl DeclaredSchema {
    /// Schema for documents in `collection`
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }

    /// Declare a top-level field
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into());
        self
    }

    /// Declare a top-level field stored under a different name
    pub fn aliased(mut self, name: impl Into<String>, storage_name: impl Into<String>) -> Self {
        let name = name.into();
        self.fields.insert(name.clone());
        self.aliases.insert(name, storage_name.into());
        self
    }

    /// Add a field to the shard key
    pub fn shard_key(mut self, path: FieldPath) -> Self {
        self.shard_key.push(path);
        self
    }

    /// Report `path` (and its subtree) as not loaded
    pub fn projected_out(mut self, path: FieldPath) -> Self {
        self.projected_out.insert(path);
        self
    }

    /// Declared top-level field names
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }
}

impl SchemaInfo for DeclaredSchema {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn is_field_declared(&self, path: &FieldPath) -> bool {
        self.fields.contains(path.root())
    }

    fn storage_name(&self, path: &FieldPath) -> String {
        match self.aliases.get(path.root()) {
            Some(alias) => {
                let mut segments = vec![alias.as_str()];
                segments.extend(path.segments()[1..].iter().map(String::as_str));
                segments.join(".")
            }
            None => path.as_str(),
        }
    }

    fn field_for_storage_name(&self, name: &str) -> String {
        self.aliases
            .iter()
            .find(|(_, alias)| alias.as_str() == name)
            .map(|(field, _)| field.clone())
            .unwrap_or_else(|| name.to_string())
    }

    fn is_projected(&self, path: &FieldPath) -> bool {
        !self.projected_out.iter().any(|p| p.overlaps(path))
    }

    fn shard_key_fields(&self) -> Vec<FieldPath> {
        self.shard_key.clone()
    }
}
