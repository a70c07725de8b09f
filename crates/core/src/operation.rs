//! Field-level update operators
//!
//! This module defines the operators an update command can carry:
//! - OperatorKind: the wire-level operator (`$set`, `$inc`, ...)
//! - Operation: an operator together with its operand
//! - PendingOperator: an operation bound to the field path it targets
//!
//! [`Operation::apply`] computes the value a field holds after the operator
//! runs. The same function drives in-memory application on the client and
//! server-side application in the reference storage, so both sides agree on
//! what a composed command means.

use crate::error::{Error, Result};
use crate::path::FieldPath;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of a field-level update operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperatorKind {
    /// `$set`: replace the value
    Set,
    /// `$unset`: remove the field
    Unset,
    /// `$inc`: add to a numeric value
    Inc,
    /// `$push`: append to an array
    Push,
    /// `$addToSet`: append to an array unless already present
    AddToSet,
    /// `$pull`: remove every element equal to the operand
    Pull,
    /// `$pullAll`: remove every element equal to any operand element
    PullAll,
    /// `$pop`: remove the first or last element
    Pop,
    /// `$bit`: bitwise and/or/xor on an integer
    Bit,
    /// `$rename`: move the value to another path
    Rename,
}

impl OperatorKind {
    /// Every operator kind, in wire order
    pub const ALL: [OperatorKind; 10] = [
        OperatorKind::Set,
        OperatorKind::Unset,
        OperatorKind::Inc,
        OperatorKind::Push,
        OperatorKind::AddToSet,
        OperatorKind::Pull,
        OperatorKind::PullAll,
        OperatorKind::Pop,
        OperatorKind::Bit,
        OperatorKind::Rename,
    ];

    /// Top-level key of this operator in an update command
    pub fn wire_key(&self) -> &'static str {
        match self {
            OperatorKind::Set => "$set",
            OperatorKind::Unset => "$unset",
            OperatorKind::Inc => "$inc",
            OperatorKind::Push => "$push",
            OperatorKind::AddToSet => "$addToSet",
            OperatorKind::Pull => "$pull",
            OperatorKind::PullAll => "$pullAll",
            OperatorKind::Pop => "$pop",
            OperatorKind::Bit => "$bit",
            OperatorKind::Rename => "$rename",
        }
    }

    /// Parse a top-level update key
    pub fn from_wire_key(key: &str) -> Option<Self> {
        OperatorKind::ALL.into_iter().find(|k| k.wire_key() == key)
    }

    /// Whether this operator mutates an array in place
    pub fn is_array_mutation(&self) -> bool {
        matches!(
            self,
            OperatorKind::Push
                | OperatorKind::AddToSet
                | OperatorKind::Pull
                | OperatorKind::PullAll
                | OperatorKind::Pop
        )
    }

    /// Whether this operator replaces the whole value (`$set` / `$unset`)
    pub fn is_replacement(&self) -> bool {
        matches!(self, OperatorKind::Set | OperatorKind::Unset)
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_key())
    }
}

/// End of an array `$pop` removes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PopEnd {
    /// Remove the first element (wire operand `-1`)
    First,
    /// Remove the last element (wire operand `1`)
    Last,
}

/// Bitwise operation for `$bit`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitOp {
    /// Bitwise and
    And(i64),
    /// Bitwise or
    Or(i64),
    /// Bitwise xor
    Xor(i64),
}

impl BitOp {
    fn apply(&self, current: i64) -> i64 {
        match self {
            BitOp::And(mask) => current & mask,
            BitOp::Or(mask) => current | mask,
            BitOp::Xor(mask) => current ^ mask,
        }
    }

    fn wire_name(&self) -> &'static str {
        match self {
            BitOp::And(_) => "and",
            BitOp::Or(_) => "or",
            BitOp::Xor(_) => "xor",
        }
    }

    fn mask(&self) -> i64 {
        match self {
            BitOp::And(m) | BitOp::Or(m) | BitOp::Xor(m) => *m,
        }
    }
}

/// An update operator with its operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Replace the value
    Set(Value),
    /// Remove the field
    Unset,
    /// Add a number (Int or Float)
    Inc(Value),
    /// Append one element
    Push(Value),
    /// Append one element unless an equal element exists
    AddToSet(Value),
    /// Remove every element equal to the operand
    Pull(Value),
    /// Remove every element equal to any of the operands
    PullAll(Vec<Value>),
    /// Remove the first or last element
    Pop(PopEnd),
    /// Bitwise update of an integer
    Bit(BitOp),
    /// Move the value to another path
    Rename(FieldPath),
}

impl Operation {
    /// Kind of this operation
    pub fn kind(&self) -> OperatorKind {
        match self {
            Operation::Set(_) => OperatorKind::Set,
            Operation::Unset => OperatorKind::Unset,
            Operation::Inc(_) => OperatorKind::Inc,
            Operation::Push(_) => OperatorKind::Push,
            Operation::AddToSet(_) => OperatorKind::AddToSet,
            Operation::Pull(_) => OperatorKind::Pull,
            Operation::PullAll(_) => OperatorKind::PullAll,
            Operation::Pop(_) => OperatorKind::Pop,
            Operation::Bit(_) => OperatorKind::Bit,
            Operation::Rename(_) => OperatorKind::Rename,
        }
    }

    /// Replacement operation that leaves a field holding `value`
    ///
    /// `Some(v)` becomes `Set(v)`, `None` becomes `Unset`.
    pub fn replacement(value: Option<Value>) -> Self {
        match value {
            Some(v) => Operation::Set(v),
            None => Operation::Unset,
        }
    }

    /// Operand as it appears inside the operator's clause
    ///
    /// `Rename` renders its target as given; callers that alias field names
    /// rewrite it (see `ComposedUpdate::compose`).
    pub fn wire_operand(&self) -> Value {
        match self {
            Operation::Set(v)
            | Operation::Inc(v)
            | Operation::Push(v)
            | Operation::AddToSet(v)
            | Operation::Pull(v) => v.clone(),
            Operation::Unset => Value::String(String::new()),
            Operation::PullAll(values) => Value::Array(values.clone()),
            Operation::Pop(PopEnd::First) => Value::Int(-1),
            Operation::Pop(PopEnd::Last) => Value::Int(1),
            Operation::Bit(op) => {
                let mut clause = BTreeMap::new();
                clause.insert(op.wire_name().to_string(), Value::Int(op.mask()));
                Value::Object(clause)
            }
            Operation::Rename(target) => Value::String(target.as_str()),
        }
    }

    /// Rebuild an operation from its wire form
    ///
    /// # Errors
    /// `InvalidOperand` when the operand shape does not fit the operator.
    pub fn from_wire(kind: OperatorKind, path: &FieldPath, operand: Value) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidOperand {
            path: path.clone(),
            reason: format!("{} {}", kind, reason),
        };
        Ok(match kind {
            OperatorKind::Set => Operation::Set(operand),
            OperatorKind::Unset => Operation::Unset,
            OperatorKind::Inc => {
                if !operand.is_number() {
                    return Err(invalid("operand must be numeric"));
                }
                Operation::Inc(operand)
            }
            OperatorKind::Push => Operation::Push(operand),
            OperatorKind::AddToSet => Operation::AddToSet(operand),
            OperatorKind::Pull => Operation::Pull(operand),
            OperatorKind::PullAll => match operand {
                Value::Array(values) => Operation::PullAll(values),
                _ => return Err(invalid("operand must be an array")),
            },
            OperatorKind::Pop => match operand.as_int() {
                Some(-1) => Operation::Pop(PopEnd::First),
                Some(1) => Operation::Pop(PopEnd::Last),
                _ => return Err(invalid("operand must be 1 or -1")),
            },
            OperatorKind::Bit => {
                let clause = operand
                    .as_object()
                    .filter(|o| o.len() == 1)
                    .ok_or_else(|| invalid("operand must hold exactly one of and/or/xor"))?;
                let (name, mask) = clause
                    .iter()
                    .next()
                    .ok_or_else(|| invalid("operand is empty"))?;
                let mask = mask
                    .as_int()
                    .ok_or_else(|| invalid("mask must be an integer"))?;
                match name.as_str() {
                    "and" => Operation::Bit(BitOp::And(mask)),
                    "or" => Operation::Bit(BitOp::Or(mask)),
                    "xor" => Operation::Bit(BitOp::Xor(mask)),
                    _ => return Err(invalid("operand must hold and/or/xor")),
                }
            }
            OperatorKind::Rename => {
                let target = operand
                    .as_str()
                    .ok_or_else(|| invalid("target must be a string"))?;
                Operation::Rename(FieldPath::parse(target)?)
            }
        })
    }

    /// Value the field holds after this operation runs
    ///
    /// `current` is the value before (None = field absent); the result uses
    /// the same convention. `Rename` yields `None` for its source path; moving
    /// the value to the target is the caller's job.
    ///
    /// # Errors
    /// `InvalidOperand` when the operator does not fit the current value, or an
    /// integer increment overflows.
    pub fn apply(&self, path: &FieldPath, current: Option<&Value>) -> Result<Option<Value>> {
        let invalid = |reason: String| Error::InvalidOperand {
            path: path.clone(),
            reason,
        };
        match self {
            Operation::Set(v) => Ok(Some(v.clone())),
            Operation::Unset | Operation::Rename(_) => Ok(None),
            Operation::Inc(amount) => match current {
                None | Some(Value::Null) if amount.is_number() => Ok(Some(amount.clone())),
                Some(existing) => existing.checked_add(amount).map(Some).ok_or_else(|| {
                    invalid(format!(
                        "cannot add {} to {}",
                        amount.type_name(),
                        existing.type_name()
                    ))
                }),
                None => Err(invalid(format!(
                    "increment must be numeric, got {}",
                    amount.type_name()
                ))),
            },
            Operation::Push(item) => {
                let mut items = array_or_empty(current, path, self.kind())?;
                items.push(item.clone());
                Ok(Some(Value::Array(items)))
            }
            Operation::AddToSet(item) => {
                let mut items = array_or_empty(current, path, self.kind())?;
                if !items.contains(item) {
                    items.push(item.clone());
                }
                Ok(Some(Value::Array(items)))
            }
            Operation::Pull(item) => {
                if current.is_none() {
                    return Ok(None);
                }
                let mut items = array_or_empty(current, path, self.kind())?;
                items.retain(|existing| existing != item);
                Ok(Some(Value::Array(items)))
            }
            Operation::PullAll(pulled) => {
                if current.is_none() {
                    return Ok(None);
                }
                let mut items = array_or_empty(current, path, self.kind())?;
                items.retain(|existing| !pulled.contains(existing));
                Ok(Some(Value::Array(items)))
            }
            Operation::Pop(end) => {
                if current.is_none() {
                    return Ok(None);
                }
                let mut items = array_or_empty(current, path, self.kind())?;
                if !items.is_empty() {
                    match end {
                        PopEnd::First => {
                            items.remove(0);
                        }
                        PopEnd::Last => {
                            items.pop();
                        }
                    }
                }
                Ok(Some(Value::Array(items)))
            }
            Operation::Bit(op) => match current {
                None => Ok(Some(Value::Int(op.apply(0)))),
                Some(Value::Int(existing)) => Ok(Some(Value::Int(op.apply(*existing)))),
                Some(other) => Err(invalid(format!(
                    "$bit needs an integer, found {}",
                    other.type_name()
                ))),
            },
        }
    }
}

fn array_or_empty(current: Option<&Value>, path: &FieldPath, kind: OperatorKind) -> Result<Vec<Value>> {
    match current {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(other) => Err(Error::InvalidOperand {
            path: path.clone(),
            reason: format!("{} needs an array, found {}", kind, other.type_name()),
        }),
    }
}

/// An operation waiting to be flushed, bound to its target path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperator {
    /// Field the operation targets
    pub path: FieldPath,
    /// The operation itself
    pub operation: Operation,
}

impl PendingOperator {
    /// Bind an operation to a path
    pub fn new(path: FieldPath, operation: Operation) -> Self {
        Self { path, operation }
    }

    /// Kind of the bound operation
    pub fn kind(&self) -> OperatorKind {
        self.operation.kind()
    }

    /// Every path this operator writes (source, plus target for `$rename`)
    pub fn touched_paths(&self) -> Vec<&FieldPath> {
        match &self.operation {
            Operation::Rename(target) => vec![&self.path, target],
            _ => vec![&self.path],
        }
    }
}

impl fmt::Display for PendingOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.kind(), self.path, self.operation.wire_operand())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> FieldPath {
        s.parse().unwrap()
    }

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn test_wire_keys_round_trip() {
        for kind in OperatorKind::ALL {
            assert_eq!(OperatorKind::from_wire_key(kind.wire_key()), Some(kind));
        }
        assert_eq!(OperatorKind::from_wire_key("$where"), None);
    }

    #[test]
    fn test_array_mutation_classification() {
        assert!(OperatorKind::Push.is_array_mutation());
        assert!(OperatorKind::Pop.is_array_mutation());
        assert!(!OperatorKind::Inc.is_array_mutation());
        assert!(!OperatorKind::Rename.is_array_mutation());
        assert!(OperatorKind::Unset.is_replacement());
    }

    #[test]
    fn test_inc_on_missing_and_existing() {
        let p = path("age");
        let inc = Operation::Inc(Value::Int(2));
        assert_eq!(inc.apply(&p, None).unwrap(), Some(Value::Int(2)));
        assert_eq!(inc.apply(&p, Some(&Value::Int(40))).unwrap(), Some(Value::Int(42)));
        assert_eq!(
            Operation::Inc(Value::Float(0.5)).apply(&p, Some(&Value::Int(1))).unwrap(),
            Some(Value::Float(1.5))
        );
    }

    #[test]
    fn test_inc_rejects_strings_and_overflow() {
        let p = path("age");
        let err = Operation::Inc(Value::Int(1))
            .apply(&p, Some(&Value::from("x")))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperand { .. }));
        assert!(Operation::Inc(Value::Int(1))
            .apply(&p, Some(&Value::Int(i64::MAX)))
            .is_err());
        assert!(Operation::Inc(Value::from("1")).apply(&p, None).is_err());
    }

    #[test]
    fn test_array_operators() {
        let p = path("tags");
        let tags = v(json!(["a", "b", "a"]));
        assert_eq!(
            Operation::Push(Value::from("c")).apply(&p, Some(&tags)).unwrap(),
            Some(v(json!(["a", "b", "a", "c"])))
        );
        assert_eq!(
            Operation::AddToSet(Value::from("b")).apply(&p, Some(&tags)).unwrap(),
            Some(tags.clone())
        );
        assert_eq!(
            Operation::Pull(Value::from("a")).apply(&p, Some(&tags)).unwrap(),
            Some(v(json!(["b"])))
        );
        assert_eq!(
            Operation::PullAll(vec![Value::from("a"), Value::from("b")])
                .apply(&p, Some(&tags))
                .unwrap(),
            Some(v(json!([])))
        );
        assert_eq!(
            Operation::Pop(PopEnd::First).apply(&p, Some(&tags)).unwrap(),
            Some(v(json!(["b", "a"])))
        );
        assert_eq!(
            Operation::Pop(PopEnd::Last).apply(&p, Some(&tags)).unwrap(),
            Some(v(json!(["a", "b"])))
        );
    }

    #[test]
    fn test_array_operators_on_missing_field() {
        let p = path("tags");
        assert_eq!(
            Operation::Push(Value::from("a")).apply(&p, None).unwrap(),
            Some(v(json!(["a"])))
        );
        assert_eq!(Operation::Pull(Value::from("a")).apply(&p, None).unwrap(), None);
        assert_eq!(Operation::Pop(PopEnd::Last).apply(&p, None).unwrap(), None);
    }

    #[test]
    fn test_push_onto_scalar_fails() {
        let err = Operation::Push(Value::from("a"))
            .apply(&path("name"), Some(&Value::from("Tom")))
            .unwrap_err();
        assert!(err.to_string().contains("$push"));
    }

    #[test]
    fn test_bit_operations() {
        let p = path("flags");
        assert_eq!(
            Operation::Bit(BitOp::And(0b1010)).apply(&p, Some(&Value::Int(0b0110))).unwrap(),
            Some(Value::Int(0b0010))
        );
        assert_eq!(
            Operation::Bit(BitOp::Or(0b1000)).apply(&p, Some(&Value::Int(0b0001))).unwrap(),
            Some(Value::Int(0b1001))
        );
        assert_eq!(
            Operation::Bit(BitOp::Xor(0b11)).apply(&p, None).unwrap(),
            Some(Value::Int(0b11))
        );
    }

    #[test]
    fn test_wire_round_trip() {
        let p = path("field");
        let ops = vec![
            Operation::Set(Value::from("x")),
            Operation::Unset,
            Operation::Inc(Value::Int(3)),
            Operation::Push(Value::Int(1)),
            Operation::AddToSet(Value::Int(1)),
            Operation::Pull(Value::Int(1)),
            Operation::PullAll(vec![Value::Int(1), Value::Int(2)]),
            Operation::Pop(PopEnd::First),
            Operation::Bit(BitOp::Or(4)),
            Operation::Rename(path("other")),
        ];
        for op in ops {
            let rebuilt = Operation::from_wire(op.kind(), &p, op.wire_operand()).unwrap();
            assert_eq!(rebuilt, op);
        }
    }

    #[test]
    fn test_from_wire_rejects_bad_operands() {
        let p = path("field");
        assert!(Operation::from_wire(OperatorKind::Pop, &p, Value::Int(2)).is_err());
        assert!(Operation::from_wire(OperatorKind::PullAll, &p, Value::Int(2)).is_err());
        assert!(Operation::from_wire(OperatorKind::Bit, &p, v(json!({"nand": 1}))).is_err());
    }

    #[test]
    fn test_rename_touches_both_paths() {
        let op = PendingOperator::new(path("nick"), Operation::Rename(path("alias")));
        let touched: Vec<String> = op.touched_paths().iter().map(|p| p.as_str()).collect();
        assert_eq!(touched, vec!["nick", "alias"]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn sequential_increments_equal_their_sum(
                start in -1_000_000i64..1_000_000,
                amounts in prop::collection::vec(-1000i64..1000, 0..12),
            ) {
                let p = path("count");
                let mut current = Some(Value::Int(start));
                for amount in &amounts {
                    current = Operation::Inc(Value::Int(*amount))
                        .apply(&p, current.as_ref())
                        .unwrap();
                }
                let total: i64 = amounts.iter().sum();
                prop_assert_eq!(current, Some(Value::Int(start + total)));
            }

            #[test]
            fn increment_on_absent_field_starts_from_amount(amount in any::<i64>()) {
                let result = Operation::Inc(Value::Int(amount)).apply(&path("count"), None).unwrap();
                prop_assert_eq!(result, Some(Value::Int(amount)));
            }
        }
    }
}

