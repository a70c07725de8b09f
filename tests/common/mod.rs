//! Shared test utilities for the root integration suites.
//!
//! Import via `mod common;` from any test file.

#![allow(dead_code)]

use docmapper::{
    document_from_json, DeclaredSchema, DocumentId, Entity, InMemoryStorage, Mapper, MapperConfig,
    Value,
};
use proptest::prelude::*;
use std::sync::{Arc, Once};

pub const COLLECTION: &str = "people";

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output to the test writer once per binary.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing_subscriber::filter::LevelFilter::WARN)
            .try_init();
    });
}

// ============================================================================
// TestStore - storage plus mapper
// ============================================================================

/// In-memory store with a mapper writing through it.
pub struct TestStore {
    pub storage: Arc<InMemoryStorage>,
    pub mapper: Mapper,
}

impl TestStore {
    pub fn new() -> Self {
        Self::with_config(MapperConfig::default())
    }

    pub fn with_config(config: MapperConfig) -> Self {
        init_tracing();
        let storage = Arc::new(InMemoryStorage::new());
        let mapper = Mapper::new(storage.clone()).with_config(config);
        Self { storage, mapper }
    }

    pub fn schema() -> Arc<DeclaredSchema> {
        Arc::new(DeclaredSchema::new(COLLECTION))
    }

    /// Seed `json` and load it as a persisted entity.
    pub fn persisted(&self, json: serde_json::Value) -> Entity {
        let doc = document_from_json(json).unwrap();
        self.storage.seed(COLLECTION, doc.clone()).unwrap();
        self.mapper.instantiate(Self::schema(), doc)
    }

    /// A fresh entity that was never inserted.
    pub fn fresh(&self) -> Entity {
        self.mapper.create(Self::schema())
    }

    /// Stored copy of `id` as JSON.
    pub fn stored(&self, id: &DocumentId) -> serde_json::Value {
        let doc = self.storage.document(COLLECTION, id).unwrap();
        serde_json::Value::from(Value::Object(doc))
    }

    /// Stored copy of the entity's document as JSON.
    pub fn stored_of(&self, entity: &Entity) -> serde_json::Value {
        self.stored(&entity.id().unwrap())
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Scalar values (no floats, so equality is total).
pub fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        "[a-z]{0,8}".prop_map(Value::String),
    ]
}

/// Scalars, short arrays and shallow objects.
pub fn arb_value() -> impl Strategy<Value = Value> {
    arb_scalar().prop_recursive(2, 12, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4).prop_map(Value::Object),
        ]
    })
}

/// Top-level field names the property suites write to.
pub fn arb_field() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["name", "age", "tags", "address"])
}

/// A write (`Some`) or removal (`None`) of one field.
pub fn arb_write() -> impl Strategy<Value = (&'static str, Option<Value>)> {
    (arb_field(), prop::option::weighted(0.8, arb_value()))
}
