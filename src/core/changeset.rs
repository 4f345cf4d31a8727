//! Change sets
//!
//! A change set batches object writes for a single commit. The standard
//! form groups inserts, updates and deletes and commits them in that fixed
//! order with per-table delete batching. The operational form preserves the
//! exact order operations were added and supports explicit compare-and-set
//! column updates for members contended across server processes.

use crate::core::error::{DatabaseError, Result};
use crate::core::object::Persistent;
use crate::core::value::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// How an explicit update changes a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    /// Replace the column with the given value
    Set,
    /// Add the given value to the expected value
    Add,
    /// Subtract the given value from the expected value
    Subtract,
}

/// One compare-and-set column change
#[derive(Debug, Clone)]
pub struct ColumnUpdate {
    /// Column being changed
    pub column: String,
    /// Value the column must currently hold for the update to apply
    pub expected: Value,
    /// Value the column is changed to
    pub new: Value,
}

/// An explicit, expectation-guarded update of one object
///
/// Each column change records the value the column is expected to hold; the
/// backend applies all changes in a single conditional write that succeeds
/// only if every expectation still holds. A failed expectation is a normal
/// outcome, not a fault.
pub struct ExplicitUpdate {
    object: Arc<dyn Persistent>,
    baseline: HashMap<String, Value>,
    updates: Vec<ColumnUpdate>,
}

impl ExplicitUpdate {
    /// Start an explicit update, capturing the object's current member
    /// values as the default expectations
    pub fn new(object: Arc<dyn Persistent>) -> Self {
        let baseline = object
            .member_bind_values(true)
            .into_iter()
            .map(|b| (b.column().to_string(), b.into_value()))
            .collect();
        Self {
            object,
            baseline,
            updates: Vec::new(),
        }
    }

    /// The object being updated
    pub fn object(&self) -> &Arc<dyn Persistent> {
        &self.object
    }

    /// The column changes, in the order they were added
    pub fn updates(&self) -> &[ColumnUpdate] {
        &self.updates
    }

    /// Add a column change expecting the value captured at construction
    pub fn apply(&mut self, column: &str, op: UpdateOp, value: impl Into<Value>) -> Result<&mut Self> {
        let expected = self
            .baseline
            .get(column)
            .cloned()
            .ok_or_else(|| DatabaseError::ColumnNotFound(column.to_string()))?;
        self.apply_from(column, op, value, expected)
    }

    /// Add a column change with an explicit expected value
    ///
    /// For `Add` and `Subtract` the new value is computed here from the
    /// expectation, so the conditional write stays a plain equality check on
    /// every backend.
    pub fn apply_from(
        &mut self,
        column: &str,
        op: UpdateOp,
        value: impl Into<Value>,
        expected: impl Into<Value>,
    ) -> Result<&mut Self> {
        if self.baseline.get(column).is_none() {
            return Err(DatabaseError::ColumnNotFound(column.to_string()));
        }
        if self.updates.iter().any(|u| u.column == column) {
            return Err(DatabaseError::prepare(format!(
                "column '{column}' already has a pending explicit update"
            )));
        }
        let value = value.into();
        let expected = expected.into();
        let new = match op {
            UpdateOp::Set => value,
            UpdateOp::Add => arith(&expected, &value, false)?,
            UpdateOp::Subtract => arith(&expected, &value, true)?,
        };
        self.updates.push(ColumnUpdate {
            column: column.to_string(),
            expected,
            new,
        });
        Ok(self)
    }
}

fn arith(expected: &Value, delta: &Value, subtract: bool) -> Result<Value> {
    let mismatch = || DatabaseError::TypeMismatch {
        expected: "numeric".to_string(),
        actual: delta.type_name().to_string(),
    };
    match expected {
        Value::Int(base) => {
            let d = delta.as_int().ok_or_else(mismatch)?;
            Ok(Value::Int(if subtract {
                base.wrapping_sub(d)
            } else {
                base.wrapping_add(d)
            }))
        }
        Value::BigInt(base) => {
            let d = delta.as_long().ok_or_else(mismatch)?;
            Ok(Value::BigInt(if subtract {
                base.wrapping_sub(d)
            } else {
                base.wrapping_add(d)
            }))
        }
        Value::Float(base) => {
            let d = delta.as_float().ok_or_else(mismatch)?;
            Ok(Value::Float(if subtract { base - d } else { base + d }))
        }
        Value::Double(base) => {
            let d = delta.as_double().ok_or_else(mismatch)?;
            Ok(Value::Double(if subtract { base - d } else { base + d }))
        }
        other => Err(DatabaseError::TypeMismatch {
            expected: "numeric".to_string(),
            actual: other.type_name().to_string(),
        }),
    }
}

/// A single operation within an operational change set
pub enum Operation {
    /// Insert a new row for the object
    Insert(Arc<dyn Persistent>),
    /// Save the object's changed members
    Update(Arc<dyn Persistent>),
    /// Delete the object's row
    Delete(Arc<dyn Persistent>),
    /// Apply an expectation-guarded column update
    Explicit(ExplicitUpdate),
}

/// A batch of object writes committed together
pub enum ChangeSet {
    /// Inserts, updates and deletes, committed in that order
    Standard(StandardChangeSet),
    /// Operations committed in exactly the order they were added
    Operational(OperationalChangeSet),
}

impl ChangeSet {
    /// New standard change set with no correlation group
    pub fn new() -> Self {
        ChangeSet::Standard(StandardChangeSet::new(Uuid::nil()))
    }

    /// New standard change set correlated to a group
    pub fn with_group(group: Uuid) -> Self {
        ChangeSet::Standard(StandardChangeSet::new(group))
    }

    /// New operational change set correlated to a group
    pub fn operational(group: Uuid) -> Self {
        ChangeSet::Operational(OperationalChangeSet::new(group))
    }

    /// The correlation group this change set queues under
    pub fn group(&self) -> Uuid {
        match self {
            ChangeSet::Standard(s) => s.group,
            ChangeSet::Operational(o) => o.group,
        }
    }

    /// Whether the change set carries no operations
    pub fn is_empty(&self) -> bool {
        match self {
            ChangeSet::Standard(s) => {
                s.inserts.is_empty() && s.updates.is_empty() && s.deletes.is_empty()
            }
            ChangeSet::Operational(o) => o.operations.is_empty(),
        }
    }

    /// Queue an insert
    pub fn insert(&mut self, object: Arc<dyn Persistent>) {
        match self {
            ChangeSet::Standard(s) => s.insert(object),
            ChangeSet::Operational(o) => o.operations.push(Operation::Insert(object)),
        }
    }

    /// Queue an update of the object's changed members
    pub fn update(&mut self, object: Arc<dyn Persistent>) {
        match self {
            ChangeSet::Standard(s) => s.update(object),
            ChangeSet::Operational(o) => o.operations.push(Operation::Update(object)),
        }
    }

    /// Queue a delete
    pub fn delete(&mut self, object: Arc<dyn Persistent>) {
        match self {
            ChangeSet::Standard(s) => s.delete(object),
            ChangeSet::Operational(o) => o.operations.push(Operation::Delete(object)),
        }
    }
}

impl Default for ChangeSet {
    fn default() -> Self {
        Self::new()
    }
}

/// The unordered change set form
pub struct StandardChangeSet {
    group: Uuid,
    pub(crate) inserts: Vec<Arc<dyn Persistent>>,
    pub(crate) updates: Vec<Arc<dyn Persistent>>,
    pub(crate) deletes: Vec<Arc<dyn Persistent>>,
}

impl StandardChangeSet {
    fn new(group: Uuid) -> Self {
        Self {
            group,
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }

    /// Queue an insert; re-adding the same instance is a no-op
    pub fn insert(&mut self, object: Arc<dyn Persistent>) {
        push_unique(&mut self.inserts, object);
    }

    /// Queue an update; re-adding the same instance is a no-op
    pub fn update(&mut self, object: Arc<dyn Persistent>) {
        push_unique(&mut self.updates, object);
    }

    /// Queue a delete; re-adding the same instance is a no-op
    pub fn delete(&mut self, object: Arc<dyn Persistent>) {
        push_unique(&mut self.deletes, object);
    }

    /// Absorb another standard set, deduplicating against existing entries
    pub fn merge_from(&mut self, other: StandardChangeSet) {
        for object in other.inserts {
            push_unique(&mut self.inserts, object);
        }
        for object in other.updates {
            push_unique(&mut self.updates, object);
        }
        for object in other.deletes {
            push_unique(&mut self.deletes, object);
        }
    }
}

fn push_unique(list: &mut Vec<Arc<dyn Persistent>>, object: Arc<dyn Persistent>) {
    if !list.iter().any(|o| Arc::ptr_eq(o, &object)) {
        list.push(object);
    }
}

/// The ordered change set form
pub struct OperationalChangeSet {
    group: Uuid,
    pub(crate) operations: Vec<Operation>,
}

impl OperationalChangeSet {
    fn new(group: Uuid) -> Self {
        Self {
            group,
            operations: Vec::new(),
        }
    }

    /// The queued operations in order
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Queue an expectation-guarded column update
    pub fn explicit(&mut self, update: ExplicitUpdate) {
        self.operations.push(Operation::Explicit(update));
    }
}
