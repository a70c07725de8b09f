//! Property-based tests for operator buffer merging.
//!
//! The central property: whatever sequence of operators a buffer accepts,
//! applying its composed (merged) operators to a document gives the same
//! document as applying every accepted operator one after another.

use docmapper_concurrency::OperatorBuffer;
use docmapper_core::path::{get_in, put_in};
use docmapper_core::{Document, FieldPath, Operation, OperatorKind, PendingOperator, Value};
use proptest::prelude::*;

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

fn path_strategy() -> impl Strategy<Value = FieldPath> {
    prop_oneof![Just("a"), Just("b"), Just("a.x"), Just("a.y")]
        .prop_map(|s| s.parse::<FieldPath>().unwrap())
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        (-50i64..50).prop_map(|n| Operation::Set(Value::Int(n))),
        Just(Operation::Set(Value::object())),
        Just(Operation::Unset),
        (-50i64..50).prop_map(|n| Operation::Inc(Value::Int(n))),
        (0i64..3).prop_map(|n| Operation::Push(Value::Int(n))),
        (0i64..3).prop_map(|n| Operation::Pull(Value::Int(n))),
    ]
}

fn apply(doc: &mut Document, op: &PendingOperator) -> docmapper_core::Result<()> {
    let updated = op.operation.apply(&op.path, get_in(doc, &op.path))?;
    put_in(doc, &op.path, updated)?;
    Ok(())
}

// =============================================================================
// MERGE EQUIVALENCE
// =============================================================================

mod merge_equivalence {
    use super::*;

    proptest! {
        /// Composed operators reproduce sequential application
        #[test]
        fn composed_matches_sequential(
            steps in prop::collection::vec((path_strategy(), operation_strategy()), 1..12)
        ) {
            let mut buffer = OperatorBuffer::new();
            let mut sequential = Document::new();

            for (path, operation) in steps {
                let op = PendingOperator::new(path, operation);
                if buffer.enqueue_operator(op.clone()).is_ok() {
                    prop_assert!(apply(&mut sequential, &op).is_ok());
                }
            }

            let mut composed = Document::new();
            for op in buffer.operators() {
                prop_assert!(apply(&mut composed, op).is_ok());
            }
            prop_assert_eq!(composed, sequential);
        }

        /// Pending operators never overlap
        #[test]
        fn entries_never_overlap(
            steps in prop::collection::vec((path_strategy(), operation_strategy()), 1..12)
        ) {
            let mut buffer = OperatorBuffer::new();
            for (path, operation) in steps {
                let _ = buffer.enqueue(path, operation);
            }
            let ops = buffer.operators();
            for (i, a) in ops.iter().enumerate() {
                for b in &ops[i + 1..] {
                    prop_assert!(!a.path.overlaps(&b.path));
                }
            }
        }
    }
}

// =============================================================================
// INCREMENT AND CONFLICT RULES
// =============================================================================

mod operator_rules {
    use super::*;

    proptest! {
        /// Any number of increments on one path compose to their sum
        #[test]
        fn increments_sum(amounts in prop::collection::vec(-1000i64..1000, 1..20)) {
            let path: FieldPath = "age".parse().unwrap();
            let mut buffer = OperatorBuffer::new();
            for amount in &amounts {
                buffer.enqueue(path.clone(), Operation::Inc(Value::Int(*amount))).unwrap();
            }
            prop_assert_eq!(buffer.len(), 1);
            prop_assert_eq!(
                buffer.operators()[0].operation.clone(),
                Operation::Inc(Value::Int(amounts.iter().sum()))
            );
        }

        /// Two different array mutations on one path always conflict
        #[test]
        fn array_mutations_conflict(first in 0usize..4, second in 0usize..4) {
            prop_assume!(first != second);
            let make = |i: usize| match i {
                0 => Operation::Push(Value::Int(1)),
                1 => Operation::AddToSet(Value::Int(1)),
                2 => Operation::Pull(Value::Int(1)),
                _ => Operation::PullAll(vec![Value::Int(1)]),
            };
            let path: FieldPath = "tags".parse().unwrap();
            let mut buffer = OperatorBuffer::new();
            buffer.enqueue(path.clone(), make(first)).unwrap();
            let err = buffer.enqueue(path, make(second)).unwrap_err();
            prop_assert!(err.is_conflict());
        }
    }

    #[test]
    fn rename_rejects_any_overlap() {
        let mut buffer = OperatorBuffer::new();
        buffer
            .enqueue("a.x".parse().unwrap(), Operation::Inc(Value::Int(1)))
            .unwrap();
        let err = buffer
            .enqueue("a".parse().unwrap(), Operation::Rename("c".parse().unwrap()))
            .unwrap_err();
        match err {
            docmapper_core::Error::OperatorConflict { incoming, .. } => {
                assert_eq!(incoming, OperatorKind::Rename)
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
