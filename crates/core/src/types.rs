//! Core types for docmapper
//!
//! This module defines the foundational identity and addressing types:
//! - DocumentId: identity of a persisted (or about to be persisted) document
//! - ContextId: identity of an atomic persistence context
//! - ShardKey: routing values the store needs for key-addressed operations
//! - Projection: which fields a loaded document actually carries

use crate::error::Result;
use crate::path::FieldPath;
use crate::value::{Document, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Name of the identity field in every stored document
pub const ID_FIELD: &str = "_id";

/// Unique identifier for a document
///
/// Client-generated identifiers are UUID v4 strings. Identifiers assigned by a
/// storage collaborator may be any string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a new random DocumentId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an identifier assigned elsewhere
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Read an identifier out of a stored `_id` value
    ///
    /// Strings are taken as-is, integers are rendered in decimal.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Int(i) => Some(Self(i.to_string())),
            _ => None,
        }
    }

    /// Identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier as a document value
    pub fn to_value(&self) -> Value {
        Value::String(self.0.clone())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an atomic persistence context
///
/// Allocated per entity, monotonically increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(u64);

impl ContextId {
    /// Wrap a raw counter value
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw counter value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Routing values for a sharded collection
///
/// Field names are storage names. Values are the persisted ones: a shard key
/// must route to where the document currently lives, not where a pending
/// change would move it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardKey {
    fields: Vec<(String, Value)>,
}

impl ShardKey {
    /// Create an empty shard key
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a routing field
    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.push((field.into(), value));
        self
    }

    /// Whether no routing fields are present
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Routing fields in declaration order
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Routing fields as a filter document
    pub fn to_document(&self) -> Document {
        self.fields.iter().cloned().collect()
    }

    /// Whether `doc` carries every routing value
    pub fn matches(&self, doc: &Document) -> bool {
        self.fields.iter().all(|(field, expected)| {
            FieldPath::parse(field)
                .ok()
                .and_then(|path| crate::path::get_in(doc, &path))
                .map_or(expected.is_null(), |actual| actual == expected)
        })
    }
}

/// Field selection a document was loaded with
///
/// The identity field is always part of a projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    /// Only these paths (and their subtrees) were loaded
    Include(BTreeSet<FieldPath>),
    /// Everything except these paths (and their subtrees) was loaded
    Exclude(BTreeSet<FieldPath>),
}

impl Projection {
    /// Projection that loads only `paths`
    ///
    /// # Errors
    /// Fails if any path does not parse.
    pub fn include<I, S>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Projection::Include(parse_paths(paths)?))
    }

    /// Projection that loads everything but `paths`
    ///
    /// # Errors
    /// Fails if any path does not parse.
    pub fn exclude<I, S>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Projection::Exclude(parse_paths(paths)?))
    }

    /// Whether any part of `path` was loaded, so that reading it is meaningful
    pub fn allows_read(&self, path: &FieldPath) -> bool {
        if path.root() == ID_FIELD {
            return true;
        }
        match self {
            Projection::Include(paths) => paths.iter().any(|p| p.overlaps(path)),
            Projection::Exclude(paths) => !paths.iter().any(|p| p.is_ancestor_of(path)),
        }
    }

    /// Whether `path` was loaded completely, so that overwriting it loses nothing
    pub fn allows_write(&self, path: &FieldPath) -> bool {
        if path.root() == ID_FIELD {
            return true;
        }
        match self {
            Projection::Include(paths) => paths.iter().any(|p| p.is_ancestor_of(path)),
            Projection::Exclude(paths) => !paths.iter().any(|p| p.overlaps(path)),
        }
    }

    /// Paths named by this projection
    pub fn paths(&self) -> &BTreeSet<FieldPath> {
        match self {
            Projection::Include(paths) | Projection::Exclude(paths) => paths,
        }
    }
}

fn parse_paths<I, S>(paths: I) -> Result<BTreeSet<FieldPath>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    paths.into_iter().map(FieldPath::parse).collect()
}
