//! Mapper: the shared handle entities are created from
//!
//! A [`Mapper`] bundles what every entity of an application shares: the
//! commit coordinator (and through it the storage collaborator), the loaded
//! [`MapperConfig`], and an optional association resolver. It is cheap to
//! clone; each entity keeps its own clone.

use crate::attributes::AttributeStore;
use crate::config::MapperConfig;
use crate::coordinator::{from_storage_document, CommitCoordinator, CommitStats};
use crate::entity::Entity;
use docmapper_core::{
    AssociationResolver, Document, DocumentId, Error, Projection, Result, SchemaInfo,
    StorageClient,
};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Shared entry point for creating and loading entities
#[derive(Clone)]
pub struct Mapper {
    coordinator: Arc<CommitCoordinator>,
    config: MapperConfig,
    associations: Option<Arc<dyn AssociationResolver>>,
}

impl fmt::Debug for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapper")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .field("associations", &self.associations.is_some())
            .finish()
    }
}

impl Mapper {
    /// Create a mapper writing through `storage` with default config
    pub fn new(storage: Arc<dyn StorageClient>) -> Self {
        Self {
            coordinator: Arc::new(CommitCoordinator::new(storage)),
            config: MapperConfig::default(),
            associations: None,
        }
    }

    /// Replace the config
    pub fn with_config(mut self, config: MapperConfig) -> Self {
        self.config = config;
        self
    }

    /// Consult `resolver` when writes traverse association roots
    pub fn with_associations(mut self, resolver: Arc<dyn AssociationResolver>) -> Self {
        self.associations = Some(resolver);
        self
    }

    /// Loaded config
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Coordinator shared by all entities of this mapper
    pub fn coordinator(&self) -> &CommitCoordinator {
        &self.coordinator
    }

    /// Association resolver, if one was configured
    pub fn associations(&self) -> Option<&Arc<dyn AssociationResolver>> {
        self.associations.as_ref()
    }

    /// Commit metrics of the shared coordinator
    pub fn stats(&self) -> CommitStats {
        self.coordinator.stats()
    }

    /// Create a new, never-persisted entity
    ///
    /// The entity gets a fresh identity unless `client_generated_ids` is off.
    pub fn create(&self, schema: Arc<dyn SchemaInfo>) -> Entity {
        let mut attributes = AttributeStore::new();
        if self.config.client_generated_ids {
            attributes.set_id(&DocumentId::new());
        }
        Entity::new(schema, self.clone(), attributes, false)
    }

    /// Wrap a fetched document (storage names) as a persisted entity
    pub fn instantiate(&self, schema: Arc<dyn SchemaInfo>, stored: Document) -> Entity {
        self.instantiate_projected(schema, stored, None)
    }

    /// Wrap a document fetched with `projection` as a persisted entity
    ///
    /// Fields the projection left out cannot be read or written.
    pub fn instantiate_projected(
        &self,
        schema: Arc<dyn SchemaInfo>,
        stored: Document,
        projection: Option<Projection>,
    ) -> Entity {
        let document = from_storage_document(schema.as_ref(), stored);
        let attributes = AttributeStore::with_projection(document, projection);
        Entity::new(schema, self.clone(), attributes, true)
    }

    /// Fetch the document `id` and wrap it as a persisted entity
    ///
    /// # Errors
    /// - `DocumentNotFound` when no document has that identity
    /// - `Storage` when the store fails the call
    pub fn find(
        &self,
        schema: Arc<dyn SchemaInfo>,
        id: &DocumentId,
        projection: Option<Projection>,
    ) -> Result<Entity> {
        let stored = self
            .coordinator
            .find(schema.as_ref(), id, None, projection.as_ref())?
            .ok_or_else(|| Error::DocumentNotFound {
                collection: schema.collection().to_string(),
                id: id.clone(),
            })?;
        debug!(target: "docmapper::commit", collection = schema.collection(), id = %id, "Loaded document");
        Ok(self.instantiate_projected(schema, stored, projection))
    }
}
