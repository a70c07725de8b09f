//! Behavioral properties of change tracking and atomic composition
//!
//! Each section pins one property; where the property quantifies over
//! inputs it is checked with proptest.

mod common;

use common::{arb_value, arb_write, TestStore};
use docmapper::{Entity, Error, FieldPath, OperatorKind, Value};
use proptest::prelude::*;
use serde_json::json;

fn path(s: &str) -> FieldPath {
    s.parse().unwrap()
}

fn person(store: &TestStore) -> Entity {
    store.persisted(json!({
        "_id": "p1",
        "name": "Tom",
        "age": 40,
        "tags": ["a"],
        "address": {"city": "Oslo"}
    }))
}

fn apply_write(entity: &mut Entity, field: &str, value: &Option<Value>) {
    match value {
        Some(value) => entity.write(field, value.clone()).unwrap(),
        None => entity.remove(field).unwrap(),
    }
}

// ============================================================================
// Idempotent no-op save
// ============================================================================

mod noop_save {
    use super::*;

    #[test]
    fn clean_entity_commit_issues_no_calls() {
        let store = TestStore::new();
        let mut entity = person(&store);
        assert!(entity.dirty_fields().is_empty());
        entity.commit().unwrap();
        assert_eq!(store.storage.call_count(), 0);
    }

    proptest! {
        #[test]
        fn writes_undone_by_hand_commit_nothing(writes in prop::collection::vec(arb_write(), 1..8)) {
            let store = TestStore::new();
            let mut entity = person(&store);
            let original = entity.attributes().document().clone();
            for (field, value) in &writes {
                apply_write(&mut entity, field, value);
            }
            for field in ["name", "age", "tags", "address"] {
                let before = original.get(field).cloned();
                apply_write(&mut entity, field, &before);
            }
            prop_assert!(entity.dirty_fields().is_empty());
            entity.commit().unwrap();
            prop_assert_eq!(store.storage.call_count(), 0);
        }
    }
}

// ============================================================================
// Single composed write
// ============================================================================

mod single_composed_write {
    use super::*;

    proptest! {
        #[test]
        fn one_update_covers_exactly_the_dirty_fields(writes in prop::collection::vec(arb_write(), 1..12)) {
            let store = TestStore::new();
            let mut entity = person(&store);
            for (field, value) in &writes {
                apply_write(&mut entity, field, value);
            }
            let dirty = entity.dirty_fields();
            entity.commit().unwrap();

            let updates = store.storage.updates();
            if dirty.is_empty() {
                prop_assert_eq!(store.storage.call_count(), 0);
            } else {
                prop_assert_eq!(updates.len(), 1);
                prop_assert_eq!(updates[0].operator_count(), dirty.len());
                for field in &dirty {
                    let name = field.as_str();
                    let covered = updates[0].operand(OperatorKind::Set, &name).is_some()
                        || updates[0].operand(OperatorKind::Unset, &name).is_some();
                    prop_assert!(covered, "no operator for {}", name);
                }
            }
            let stored = store.storage.document(common::COLLECTION, &entity.id().unwrap()).unwrap();
            prop_assert_eq!(&stored, entity.attributes().document());
            prop_assert!(entity.dirty_fields().is_empty());
        }
    }
}

// ============================================================================
// Merge correctness
// ============================================================================

mod merge_correctness {
    use super::*;

    fn pending_after(ops: impl FnOnce(&mut Entity)) -> Vec<(FieldPath, OperatorKind, Value)> {
        let store = TestStore::new();
        let mut entity = person(&store);
        let id = entity.begin_atomic(None).unwrap();
        ops(&mut entity);
        let pending = entity
            .pending_operators()
            .iter()
            .map(|op| (op.path.clone(), op.kind(), op.operation.wire_operand()))
            .collect();
        entity.end_atomic(id, true).unwrap();
        pending
    }

    #[test]
    fn increments_add_up() {
        let pending = pending_after(|e| {
            e.inc("age", 1).unwrap();
            e.inc("age", 1).unwrap();
        });
        assert_eq!(pending, vec![(path("age"), OperatorKind::Inc, Value::Int(2))]);
    }

    #[test]
    fn unset_after_set_wins() {
        let pending = pending_after(|e| {
            e.set("name", "A").unwrap();
            e.unset("name").unwrap();
        });
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, path("name"));
        assert_eq!(pending[0].1, OperatorKind::Unset);
    }

    #[test]
    fn set_after_unset_wins() {
        let pending = pending_after(|e| {
            e.unset("name").unwrap();
            e.set("name", "B").unwrap();
        });
        assert_eq!(pending, vec![(path("name"), OperatorKind::Set, Value::from("B"))]);
    }

    proptest! {
        #[test]
        fn increments_sum_in_one_command(amounts in prop::collection::vec(-1000i64..1000, 1..10)) {
            let store = TestStore::new();
            let mut entity = person(&store);
            let id = entity.begin_atomic(None).unwrap();
            for amount in &amounts {
                entity.inc("age", *amount).unwrap();
            }
            entity.end_atomic(id, false).unwrap();

            let total: i64 = amounts.iter().sum();
            let updates = store.storage.updates();
            prop_assert_eq!(updates.len(), 1);
            prop_assert_eq!(updates[0].operand(OperatorKind::Inc, "age"), Some(&Value::Int(total)));
            prop_assert_eq!(entity.get("age").unwrap(), Some(&Value::Int(40 + total)));
            prop_assert_eq!(&store.stored_of(&entity)["age"], &json!(40 + total));
        }
    }
}

// ============================================================================
// Revert restores exactly
// ============================================================================

mod revert_restores {
    use super::*;

    #[test]
    fn failed_scope_restores_name_and_age() {
        let store = TestStore::new();
        let mut entity = person(&store);

        let result: docmapper::Result<()> = entity.atomically(None, |e| {
            e.inc("age", 1)?;
            e.set("name", "Jake")?;
            Err(Error::InvalidOperation("abort".to_string()))
        });

        assert!(matches!(result, Err(Error::InvalidOperation(_))));
        assert_eq!(entity.get("name").unwrap(), Some(&Value::from("Tom")));
        assert_eq!(entity.get("age").unwrap(), Some(&Value::Int(40)));
        assert_eq!(store.storage.call_count(), 0);
    }

    proptest! {
        #[test]
        fn revert_restores_values_and_tracking(
            before in prop::collection::vec(arb_write(), 0..4),
            inside in prop::collection::vec(arb_write(), 1..8),
        ) {
            let store = TestStore::new();
            let mut entity = person(&store);
            for (field, value) in &before {
                apply_write(&mut entity, field, value);
            }
            let document = entity.attributes().document().clone();
            let changes = entity.changes();

            let id = entity.begin_atomic(None).unwrap();
            for (field, value) in &inside {
                apply_write(&mut entity, field, value);
            }
            entity.end_atomic(id, true).unwrap();

            prop_assert_eq!(entity.attributes().document(), &document);
            prop_assert_eq!(entity.changes(), changes);
            prop_assert!(entity.pending_operators().is_empty());
            prop_assert_eq!(store.storage.call_count(), 0);
        }
    }
}

// ============================================================================
// Join-context propagation
// ============================================================================

mod join_propagation {
    use super::*;

    #[test]
    fn joined_inner_never_flushes_alone() {
        let store = TestStore::new();
        let mut entity = person(&store);

        let outer = entity.begin_atomic(Some(false)).unwrap();
        entity.set("name", "Jake").unwrap();
        let inner = entity.begin_atomic(Some(true)).unwrap();
        entity.push("tags", "b").unwrap();
        entity.inc("age", 1).unwrap();
        entity.end_atomic(inner, false).unwrap();
        assert_eq!(store.storage.call_count(), 0);
        entity.end_atomic(outer, false).unwrap();

        let updates = store.storage.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].operator_count(), 3);
        assert_eq!(updates[0].operand(OperatorKind::Push, "tags"), Some(&Value::from("b")));
    }
}

// ============================================================================
// Conflict detection
// ============================================================================

mod conflict_detection {
    use super::*;

    #[test]
    fn push_then_pull_conflicts_at_call_time() {
        let store = TestStore::new();
        let mut entity = person(&store);
        let id = entity.begin_atomic(None).unwrap();
        entity.push("tags", "a").unwrap();

        let err = entity.pull("tags", "b").unwrap_err();
        assert!(matches!(
            err,
            Error::OperatorConflict { existing: OperatorKind::Push, incoming: OperatorKind::Pull, .. }
        ));
        assert_eq!(entity.pending_operators().len(), 1);
        assert_eq!(
            entity.get("tags").unwrap(),
            Some(&Value::from(json!(["a", "a"])))
        );
        entity.end_atomic(id, true).unwrap();
    }
}

// ============================================================================
// previous_changes snapshot
// ============================================================================

mod previous_changes_snapshot {
    use super::*;

    #[test]
    fn snapshot_survives_empty_commits() {
        let store = TestStore::new();
        let mut entity = person(&store);
        entity.write("name", "Jake").unwrap();
        entity.commit().unwrap();

        let expected = (Some(Value::from("Tom")), Some(Value::from("Jake")));
        assert!(entity.changes().is_empty());
        assert_eq!(entity.previous_changes().len(), 1);
        assert_eq!(entity.previous_changes().get(&path("name")), Some(&expected));

        entity.commit().unwrap();
        assert_eq!(entity.previous_changes().get(&path("name")), Some(&expected));

        entity.write("age", 41).unwrap();
        entity.commit().unwrap();
        assert_eq!(entity.previous_changes().len(), 1);
        assert!(entity.previous_changes().contains_key(&path("age")));
    }
}

// ============================================================================
// Round trip
// ============================================================================

mod reset_round_trip {
    use super::*;

    proptest! {
        #[test]
        fn write_then_reset_restores_prior_value(
            initial in arb_value(),
            written in prop::option::of(arb_value()),
        ) {
            let store = TestStore::new();
            let mut entity = store.persisted(json!({"_id": "p1"}));
            entity.write("field", initial.clone()).unwrap();
            entity.commit().unwrap();
            store.storage.clear_calls();

            apply_write(&mut entity, "field", &written);
            entity.reset_field("field").unwrap();

            prop_assert_eq!(entity.get("field").unwrap(), Some(&initial));
            prop_assert!(entity.dirty_fields().is_empty());
            prop_assert_eq!(store.storage.call_count(), 0);
        }
    }

    #[test]
    fn reset_of_nested_path_inside_object() {
        let store = TestStore::new();
        let mut entity = person(&store);
        entity.write("address.city", "Bergen").unwrap();
        entity.reset_field("address.city").unwrap();
        assert_eq!(entity.get("address.city").unwrap(), Some(&Value::from("Oslo")));
        assert!(entity.dirty_fields().is_empty());
        assert_eq!(store.storage.call_count(), 0);
    }
}
