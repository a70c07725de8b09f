//! Composed update command
//!
//! A [`ComposedUpdate`] is the wire shape of one flush: operators grouped into
//! top-level clauses (`$set`, `$inc`, ...), each clause mapping storage field
//! names to operands. Clauses appear in the order their kind was first
//! enqueued, and fields within a clause keep enqueue order, so composing the
//! same buffer twice yields the same command.

use crate::error::Result;
use crate::operation::{Operation, OperatorKind, PendingOperator};
use crate::path::FieldPath;
use crate::value::{Document, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One top-level clause of an update command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateClause {
    /// Operator this clause carries
    pub kind: OperatorKind,
    /// Storage field name to operand, in enqueue order
    pub fields: Vec<(String, Value)>,
}

/// One update command against a single document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposedUpdate {
    clauses: Vec<UpdateClause>,
}

impl ComposedUpdate {
    /// Create an empty command
    pub fn new() -> Self {
        Self::default()
    }

    /// Compose pending operators into one command
    ///
    /// `storage_name` maps a logical field path to the name the store uses;
    /// it is applied to operator paths and to `$rename` targets.
    pub fn compose<'a, I, F>(operators: I, storage_name: F) -> Self
    where
        I: IntoIterator<Item = &'a PendingOperator>,
        F: Fn(&FieldPath) -> String,
    {
        let mut update = Self::new();
        for op in operators {
            let operand = match &op.operation {
                Operation::Rename(target) => Value::String(storage_name(target)),
                other => other.wire_operand(),
            };
            update.add(op.kind(), storage_name(&op.path), operand);
        }
        update
    }

    /// Append a field to the clause for `kind`, opening the clause if needed
    pub fn add(&mut self, kind: OperatorKind, field: impl Into<String>, operand: Value) {
        let field = field.into();
        match self.clauses.iter_mut().find(|c| c.kind == kind) {
            Some(clause) => clause.fields.push((field, operand)),
            None => self.clauses.push(UpdateClause {
                kind,
                fields: vec![(field, operand)],
            }),
        }
    }

    /// Whether the command carries no operators
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Number of field operators across all clauses
    pub fn operator_count(&self) -> usize {
        self.clauses.iter().map(|c| c.fields.len()).sum()
    }

    /// Clauses in first-appearance order
    pub fn clauses(&self) -> &[UpdateClause] {
        &self.clauses
    }

    /// Clause for one operator kind
    pub fn clause(&self, kind: OperatorKind) -> Option<&UpdateClause> {
        self.clauses.iter().find(|c| c.kind == kind)
    }

    /// Operand for `field` under `kind`, if present
    pub fn operand(&self, kind: OperatorKind, field: &str) -> Option<&Value> {
        self.clause(kind)?
            .fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, operand)| operand)
    }

    /// Decode the command back into pending operators, in clause order
    ///
    /// # Errors
    /// Fails if a field name does not parse as a path or an operand does not
    /// fit its operator.
    pub fn operators(&self) -> Result<Vec<PendingOperator>> {
        let mut operators = Vec::with_capacity(self.operator_count());
        for clause in &self.clauses {
            for (field, operand) in &clause.fields {
                let path = FieldPath::parse(field)?;
                let operation = Operation::from_wire(clause.kind, &path, operand.clone())?;
                operators.push(PendingOperator::new(path, operation));
            }
        }
        Ok(operators)
    }

    /// Command as a document: `{"$set": {...}, "$inc": {...}}`
    pub fn to_document(&self) -> Document {
        self.clauses
            .iter()
            .map(|clause| {
                let fields: BTreeMap<String, Value> = clause.fields.iter().cloned().collect();
                (clause.kind.wire_key().to_string(), Value::Object(fields))
            })
            .collect()
    }

    /// Command as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::from(Value::Object(self.to_document()))
    }
}

impl fmt::Display for ComposedUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
