//! Attribute store
//!
//! The raw data substrate of one entity instance: a document of current
//! values plus the projection it was loaded with. Every checked accessor
//! refuses paths the projection left out with `FieldNotLoaded`, so a partially
//! loaded document can never be read or overwritten as if it were complete.

use docmapper_core::path::{get_in, put_in, MAX_ARRAY_PADDING};
use docmapper_core::{
    Document, DocumentId, Error, FieldPath, Projection, Result, Value, ID_FIELD,
};

/// Current field values of one entity instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeStore {
    document: Document,
    projection: Option<Projection>,
}

impl AttributeStore {
    /// Create an empty, fully loaded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `document`
    pub fn from_document(document: Document) -> Self {
        Self {
            document,
            projection: None,
        }
    }

    /// Create a store holding a document loaded with `projection`
    pub fn with_projection(document: Document, projection: Option<Projection>) -> Self {
        Self {
            document,
            projection,
        }
    }

    /// Projection the document was loaded with
    pub fn projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }

    /// Fail unless `path` may be read
    ///
    /// # Errors
    /// `FieldNotLoaded` when the projection left `path` out.
    pub fn check_readable(&self, path: &FieldPath) -> Result<()> {
        match &self.projection {
            Some(projection) if !projection.allows_read(path) => Err(Error::FieldNotLoaded {
                path: path.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Fail unless `path` may be written
    ///
    /// # Errors
    /// - `FieldNotLoaded` when the projection left `path` (or part of it) out
    /// - `InvalidOperand` when an ancestor of `path` holds a scalar
    pub fn check_writable(&self, path: &FieldPath) -> Result<()> {
        if let Some(projection) = &self.projection {
            if !projection.allows_write(path) {
                return Err(Error::FieldNotLoaded { path: path.clone() });
            }
        }
        let mut ancestor = path.parent();
        while let Some(current) = ancestor {
            match get_in(&self.document, &current) {
                None | Some(Value::Object(_)) => {}
                Some(Value::Array(items)) => {
                    let segment = &path.segments()[current.len()];
                    match segment.parse::<usize>() {
                        Ok(index) if index <= items.len() + MAX_ARRAY_PADDING => {}
                        Ok(index) => {
                            return Err(Error::InvalidOperand {
                                path: path.clone(),
                                reason: format!(
                                    "index {} is too far past the end of '{}' ({} elements)",
                                    index,
                                    current,
                                    items.len()
                                ),
                            })
                        }
                        Err(_) => {
                            return Err(Error::InvalidOperand {
                                path: path.clone(),
                                reason: format!("'{}' holds array", current),
                            })
                        }
                    }
                }
                Some(other) => {
                    return Err(Error::InvalidOperand {
                        path: path.clone(),
                        reason: format!("'{}' holds {}", current, other.type_name()),
                    })
                }
            }
            ancestor = current.parent();
        }
        Ok(())
    }

    /// Read the value at `path`
    ///
    /// # Errors
    /// `FieldNotLoaded` when the projection left `path` out.
    pub fn get(&self, path: &FieldPath) -> Result<Option<&Value>> {
        self.check_readable(path)?;
        Ok(get_in(&self.document, path))
    }

    /// Write (`Some`) or remove (`None`) the value at `path`
    ///
    /// Returns the previous value.
    ///
    /// # Errors
    /// See [`AttributeStore::check_writable`].
    pub fn put(&mut self, path: &FieldPath, value: Option<Value>) -> Result<Option<Value>> {
        self.check_writable(path)?;
        put_in(&mut self.document, path, value)
    }

    /// Value at `path` without projection checks
    pub fn value_at(&self, path: &FieldPath) -> Option<Value> {
        get_in(&self.document, path).cloned()
    }

    /// Write or remove without projection checks
    ///
    /// Used when restoring a snapshot or a tracked original.
    pub fn put_unchecked(&mut self, path: &FieldPath, value: Option<Value>) -> Result<Option<Value>> {
        put_in(&mut self.document, path, value)
    }

    /// The whole document
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Top-level field names present
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.document.keys().map(String::as_str)
    }

    /// Identity stored in `_id`, if any
    pub fn id(&self) -> Option<DocumentId> {
        self.document.get(ID_FIELD).and_then(DocumentId::from_value)
    }

    /// Store the identity in `_id`
    pub fn set_id(&mut self, id: &DocumentId) {
        self.document.insert(ID_FIELD.to_string(), id.to_value());
    }

    /// Replace the document and projection wholesale
    pub fn replace(&mut self, document: Document, projection: Option<Projection>) {
        self.document = document;
        self.projection = projection;
    }
}
