//! Field paths into documents
//!
//! A [`FieldPath`] addresses a value inside a document using dot-separated
//! segments (`address.city`, `tags.0`). Segments made of digits address array
//! elements when the value being traversed is an array, and object keys otherwise.
//!
//! The free functions in this module read and mutate nested values:
//! - [`get_in`] / [`get_at`]: read a value at a path
//! - [`set_in`] / [`set_at`]: write a value, creating intermediate objects
//! - [`remove_in`] / [`remove_at`]: remove a value (array elements become `Null`)

use crate::error::{Error, Result};
use crate::value::{Document, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error as ThisError;

/// Error type for field path parsing
#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum PathParseError {
    /// The path string was empty
    #[error("field path is empty")]
    Empty,
    /// A segment between two dots was empty
    #[error("empty segment in field path at position {0}")]
    EmptySegment(usize),
    /// A segment starts with the reserved operator prefix
    #[error("segment '{0}' starts with reserved character '$'")]
    ReservedPrefix(String),
}

/// A dot-separated path to a field inside a document
///
/// # Examples
///
/// ```
/// use docmapper_core::FieldPath;
///
/// let city: FieldPath = "address.city".parse().unwrap();
/// let address: FieldPath = "address".parse().unwrap();
///
/// assert!(address.is_strict_ancestor_of(&city));
/// assert_eq!(city.relative_to(&address).unwrap().as_str(), "city");
/// assert_eq!(city.root(), "address");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a path, returning the crate error type on failure
    pub fn parse(path: impl AsRef<str>) -> Result<Self> {
        path.as_ref().parse().map_err(Error::InvalidPath)
    }

    /// Build a path from pre-split segments
    ///
    /// # Errors
    /// Fails when `segments` is empty or contains an empty or `$`-prefixed segment.
    pub fn from_segments(segments: Vec<String>) -> std::result::Result<Self, PathParseError> {
        if segments.is_empty() {
            return Err(PathParseError::Empty);
        }
        let mut position = 0;
        for segment in &segments {
            validate_segment(segment, position)?;
            position += segment.len() + 1;
        }
        Ok(FieldPath { segments })
    }

    /// Path segments in order
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false: a field path has at least one segment
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The top-level field this path starts at
    pub fn root(&self) -> &str {
        &self.segments[0]
    }

    /// Whether this path names a top-level field
    pub fn is_top_level(&self) -> bool {
        self.segments.len() == 1
    }

    /// Parent path (None for top-level fields)
    pub fn parent(&self) -> Option<FieldPath> {
        if self.segments.len() <= 1 {
            None
        } else {
            Some(FieldPath {
                segments: self.segments[..self.segments.len() - 1].to_vec(),
            })
        }
    }

    /// Path of the top-level field this path starts at
    pub fn root_path(&self) -> FieldPath {
        FieldPath {
            segments: vec![self.segments[0].clone()],
        }
    }

    /// Append a segment (builder pattern)
    pub fn child(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Concatenate a relative path onto this one
    pub fn join(&self, relative: &FieldPath) -> FieldPath {
        let mut segments = self.segments.clone();
        segments.extend(relative.segments.iter().cloned());
        FieldPath { segments }
    }

    /// Check if this path is an ancestor of another (or equal)
    pub fn is_ancestor_of(&self, other: &FieldPath) -> bool {
        self.segments.len() <= other.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(a, b)| a == b)
    }

    /// Check if this path is a strict ancestor of another (not equal)
    pub fn is_strict_ancestor_of(&self, other: &FieldPath) -> bool {
        self.segments.len() < other.segments.len() && self.is_ancestor_of(other)
    }

    /// Check if two paths overlap (one is ancestor of the other, or equal)
    ///
    /// Two operators on overlapping paths cannot travel in one update command.
    pub fn overlaps(&self, other: &FieldPath) -> bool {
        self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }

    /// Strip `ancestor` from the front of this path
    ///
    /// Returns `None` when `ancestor` is not a strict ancestor.
    pub fn relative_to(&self, ancestor: &FieldPath) -> Option<FieldPath> {
        if ancestor.is_strict_ancestor_of(self) {
            Some(FieldPath {
                segments: self.segments[ancestor.segments.len()..].to_vec(),
            })
        } else {
            None
        }
    }

    /// Dotted string form
    pub fn as_str(&self) -> String {
        self.segments.join(".")
    }
}

fn validate_segment(segment: &str, position: usize) -> std::result::Result<(), PathParseError> {
    if segment.is_empty() {
        return Err(PathParseError::EmptySegment(position));
    }
    if segment.starts_with('$') {
        return Err(PathParseError::ReservedPrefix(segment.to_string()));
    }
    Ok(())
}

impl FromStr for FieldPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(PathParseError::Empty);
        }
        let mut segments = Vec::new();
        let mut position = 0;
        for segment in s.split('.') {
            validate_segment(segment, position)?;
            segments.push(segment.to_string());
            position += segment.len() + 1;
        }
        Ok(FieldPath { segments })
    }
}

impl TryFrom<String> for FieldPath {
    type Error = PathParseError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.as_str()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

// =============================================================================
// Nested reads
// =============================================================================

fn step<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn step_mut<'a>(value: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |i| items.get_mut(i)),
        _ => None,
    }
}

/// Read the value at `path` relative to `value`
pub fn get_at<'a>(value: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(value, |current, segment| step(current, segment))
}

/// Read the value at `path` inside a document
pub fn get_in<'a>(doc: &'a Document, path: &FieldPath) -> Option<&'a Value> {
    let (first, rest) = path.segments().split_first()?;
    rest.iter()
        .try_fold(doc.get(first)?, |current, segment| step(current, segment))
}

/// Mutable access to the value at `path` inside a document
pub fn get_in_mut<'a>(doc: &'a mut Document, path: &FieldPath) -> Option<&'a mut Value> {
    let (first, rest) = path.segments().split_first()?;
    let mut current = doc.get_mut(first)?;
    for segment in rest {
        current = step_mut(current, segment)?;
    }
    Some(current)
}

// =============================================================================
// Nested writes
// =============================================================================

fn mismatch(path: &FieldPath, found: &Value) -> Error {
    Error::InvalidOperand {
        path: path.clone(),
        reason: format!("cannot traverse into {}", found.type_name()),
    }
}

/// Most null elements a single write may pad an array with
pub const MAX_ARRAY_PADDING: usize = 1024;

/// Write `new_value` at `segments` below `current`, creating intermediate objects
fn set_below(
    current: &mut Value,
    segments: &[String],
    new_value: Value,
    full: &FieldPath,
) -> Result<Option<Value>> {
    let Some((segment, rest)) = segments.split_first() else {
        return Ok(Some(std::mem::replace(current, new_value)));
    };
    match current {
        Value::Object(map) => {
            if rest.is_empty() {
                return Ok(map.insert(segment.clone(), new_value));
            }
            let child = map.entry(segment.clone()).or_insert_with(Value::object);
            set_below(child, rest, new_value, full)
        }
        Value::Array(items) => {
            let index: usize = segment.parse().map_err(|_| Error::InvalidOperand {
                path: full.clone(),
                reason: format!("'{}' is not an array index", segment),
            })?;
            if index - index.min(items.len()) > MAX_ARRAY_PADDING {
                return Err(Error::InvalidOperand {
                    path: full.clone(),
                    reason: format!(
                        "index {} is more than {} past the end of an array of {}",
                        index,
                        MAX_ARRAY_PADDING,
                        items.len()
                    ),
                });
            }
            // Writing past the end pads with nulls
            while items.len() <= index {
                items.push(if rest.is_empty() {
                    Value::Null
                } else {
                    Value::object()
                });
            }
            if rest.is_empty() {
                Ok(Some(std::mem::replace(&mut items[index], new_value)))
            } else {
                set_below(&mut items[index], rest, new_value, full)
            }
        }
        other => Err(mismatch(full, other)),
    }
}

/// Write `new_value` at `path` relative to `value`
///
/// Returns the replaced value, if any.
pub fn set_at(value: &mut Value, path: &FieldPath, new_value: Value) -> Result<Option<Value>> {
    set_below(value, path.segments(), new_value, path)
}

/// Write `new_value` at `path` inside a document
///
/// Creates intermediate objects as needed. Returns the replaced value, if any.
pub fn set_in(doc: &mut Document, path: &FieldPath, new_value: Value) -> Result<Option<Value>> {
    let (first, rest) = path
        .segments()
        .split_first()
        .ok_or(Error::InvalidPath(PathParseError::Empty))?;
    if rest.is_empty() {
        return Ok(doc.insert(first.clone(), new_value));
    }
    let child = doc.entry(first.clone()).or_insert_with(Value::object);
    set_below(child, rest, new_value, path)
}

fn remove_below(current: &mut Value, segments: &[String]) -> Option<Value> {
    let (segment, rest) = segments.split_first()?;
    if rest.is_empty() {
        return match current {
            Value::Object(map) => map.remove(segment),
            // Removing an element keeps positions stable
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items
                    .get_mut(index)
                    .map(|slot| std::mem::replace(slot, Value::Null))
            }
            _ => None,
        };
    }
    remove_below(step_mut(current, segment)?, rest)
}

/// Remove the value at `path` relative to `value`
pub fn remove_at(value: &mut Value, path: &FieldPath) -> Option<Value> {
    remove_below(value, path.segments())
}

/// Remove the value at `path` inside a document
///
/// Object keys are removed; array elements are replaced by `Null`.
pub fn remove_in(doc: &mut Document, path: &FieldPath) -> Option<Value> {
    let (first, rest) = path.segments().split_first()?;
    if rest.is_empty() {
        return doc.remove(first);
    }
    remove_below(doc.get_mut(first)?, rest)
}

/// Write or remove a value at `path` inside a document
///
/// `Some(value)` sets, `None` removes. Returns the previous value.
pub fn put_in(doc: &mut Document, path: &FieldPath, value: Option<Value>) -> Result<Option<Value>> {
    match value {
        Some(v) => set_in(doc, path, v),
        None => Ok(remove_in(doc, path)),
    }
}
