//! Entity lifecycle tests
//!
//! End-to-end flows through the public `docmapper` API:
//! - create, insert, update, reload and delete
//! - configuration loaded from `docmapper.toml`
//! - immediate operators and the retry buffer

mod common;

use common::TestStore;
use docmapper::{
    DocumentId, Error, FieldPath, MapperConfig, OperatorKind, PopEnd, StorageClient,
    StorageError, Value, CONFIG_FILE_NAME,
};
use serde_json::json;

fn path(s: &str) -> FieldPath {
    s.parse().unwrap()
}

mod insert_and_update {
    use super::*;

    #[test]
    fn new_entity_is_inserted_once() {
        let store = TestStore::new();
        let mut person = store.fresh();
        person.write("name", "Ann").unwrap();
        person.write("address.city", "Oslo").unwrap();
        assert!(!person.is_persisted());
        assert_eq!(store.storage.call_count(), 0);

        person.commit().unwrap();
        assert!(person.is_persisted());
        assert_eq!(store.storage.write_calls().len(), 1);
        let id = person.id().unwrap();
        assert_eq!(
            store.stored(&id),
            json!({"_id": id.as_str(), "name": "Ann", "address": {"city": "Oslo"}})
        );

        person.commit().unwrap();
        assert_eq!(store.storage.write_calls().len(), 1);
    }

    #[test]
    fn changes_after_insert_become_updates() {
        let store = TestStore::new();
        let mut person = store.fresh();
        person.write("name", "Ann").unwrap();
        person.commit().unwrap();

        person.write("name", "Anna").unwrap();
        person.write("age", 30).unwrap();
        assert_eq!(person.dirty_fields().len(), 2);
        person.commit().unwrap();

        let updates = store.storage.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].operand(OperatorKind::Set, "name"), Some(&Value::from("Anna")));
        assert_eq!(updates[0].operand(OperatorKind::Set, "age"), Some(&Value::Int(30)));
    }

    #[test]
    fn array_operators_write_immediately() {
        let store = TestStore::new();
        let mut person = store.persisted(json!({"_id": "p1", "tags": ["a", "b", "c"]}));

        person.pop("tags", PopEnd::First).unwrap();
        person.add_to_set("tags", "b").unwrap();
        person.pull_all("tags", vec![Value::from("c")]).unwrap();

        assert_eq!(store.storage.updates().len(), 3);
        assert_eq!(store.stored_of(&person), json!({"_id": "p1", "tags": ["b"]}));
        assert_eq!(person.get("tags").unwrap(), Some(&Value::Array(vec![Value::from("b")])));
        assert!(person.dirty_fields().is_empty());
    }

    #[test]
    fn invalid_operand_leaves_entity_untouched() {
        let store = TestStore::new();
        let mut person = store.persisted(json!({"_id": "p1", "name": "Tom"}));
        assert!(matches!(person.inc("name", 1), Err(Error::InvalidOperand { .. })));
        assert!(matches!(person.push("name", "x"), Err(Error::InvalidOperand { .. })));
        assert_eq!(person.get("name").unwrap(), Some(&Value::from("Tom")));
        assert_eq!(store.storage.call_count(), 0);
    }
}

mod retry {
    use super::*;

    #[test]
    fn failed_operator_is_resent_with_remaining_changes() {
        let store = TestStore::new();
        let mut person = store.persisted(json!({"_id": "p1", "name": "Tom", "age": 40}));

        store
            .storage
            .fail_next(1, StorageError::Connectivity("reset".to_string()));
        assert!(person.inc("age", 1).unwrap_err().is_storage());
        person.write("name", "Jake").unwrap();

        person.commit().unwrap();
        let last = store.storage.updates().pop().unwrap();
        assert_eq!(last.operand(OperatorKind::Inc, "age"), Some(&Value::Int(1)));
        assert_eq!(last.operand(OperatorKind::Set, "name"), Some(&Value::from("Jake")));
        assert_eq!(
            store.stored_of(&person),
            json!({"_id": "p1", "name": "Jake", "age": 41})
        );
    }

    #[test]
    fn failed_commit_keeps_dirty_state() {
        let store = TestStore::new();
        let mut person = store.persisted(json!({"_id": "p1", "name": "Tom"}));
        person.write("name", "Jake").unwrap();

        store
            .storage
            .fail_next(1, StorageError::Timeout("5s".to_string()));
        assert!(person.commit().unwrap_err().is_storage());
        assert!(person.dirty_fields().contains(&path("name")));

        person.commit().unwrap();
        assert_eq!(store.stored_of(&person)["name"], json!("Jake"));
        assert!(person.dirty_fields().is_empty());
    }

    #[test]
    fn failed_insert_keeps_entity_new() {
        let store = TestStore::new();
        let mut person = store.fresh();
        person.write("name", "Ann").unwrap();

        store
            .storage
            .fail_next(1, StorageError::Constraint("duplicate key".to_string()));
        assert!(matches!(
            person.commit(),
            Err(Error::Storage(StorageError::Constraint(_)))
        ));
        assert!(!person.is_persisted());
        assert!(person.dirty_fields().contains(&path("name")));

        person.commit().unwrap();
        assert!(person.is_persisted());
        assert_eq!(store.storage.len(common::COLLECTION), 1);
    }
}

mod reload_and_delete {
    use super::*;

    #[test]
    fn reload_picks_up_external_changes() {
        let store = TestStore::new();
        let mut person = store.persisted(json!({"_id": "p1", "name": "Tom"}));
        store.persisted(json!({"_id": "p1", "name": "Zed", "age": 9}));

        person.reload_from_storage().unwrap();
        assert_eq!(person.get("name").unwrap(), Some(&Value::from("Zed")));
        assert_eq!(person.get("age").unwrap(), Some(&Value::Int(9)));
        assert!(!person.has_changes());
    }

    #[test]
    fn deleted_entity_rejects_further_use() {
        let store = TestStore::new();
        let mut person = store.persisted(json!({"_id": "p1", "name": "Tom"}));
        person.delete().unwrap();

        assert!(store.storage.is_empty(common::COLLECTION));
        assert!(person.is_destroyed());
        assert!(matches!(person.inc("age", 1), Err(Error::InvalidOperation(_))));
        assert!(matches!(person.begin_atomic(None), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn deleting_a_fresh_entity_issues_nothing() {
        let store = TestStore::new();
        let mut person = store.fresh();
        person.delete().unwrap();
        assert!(person.is_destroyed());
        assert_eq!(store.storage.call_count(), 0);
    }
}

mod configuration {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_file_drives_mapper_defaults() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &file,
            "join_contexts = true\nraise_not_found_error = false\nclient_generated_ids = false\n",
        )
        .unwrap();
        let config = MapperConfig::from_file(&file).unwrap();
        let store = TestStore::with_config(config);

        assert!(store.fresh().id().is_none());

        let mut person = store.persisted(json!({"_id": "p1", "age": 1}));
        let outer = person.begin_atomic(None).unwrap();
        let inner = person.begin_atomic(None).unwrap();
        person.inc("age", 1).unwrap();
        person.end_atomic(inner, false).unwrap();
        assert_eq!(store.storage.call_count(), 0);
        person.end_atomic(outer, false).unwrap();
        assert_eq!(store.storage.updates().len(), 1);

        store
            .storage
            .delete_one(common::COLLECTION, &DocumentId::from_string("p1"), None)
            .unwrap();
        person.reload_from_storage().unwrap();
        assert_eq!(person.get("age").unwrap(), None);
        assert_eq!(person.id(), Some(DocumentId::from_string("p1")));
    }

    #[test]
    fn default_file_is_written_once() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join(CONFIG_FILE_NAME);
        MapperConfig::write_default_if_missing(&file).unwrap();
        let written = std::fs::read_to_string(&file).unwrap();
        assert_eq!(written, MapperConfig::default_toml());

        let custom = MapperConfig {
            join_contexts: true,
            ..MapperConfig::default()
        };
        custom.write_to_file(&file).unwrap();
        MapperConfig::write_default_if_missing(&file).unwrap();
        assert_eq!(MapperConfig::from_file(&file).unwrap(), custom);
    }
}
