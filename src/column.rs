/// Typed, position-indexed storage for one attribute.
///
/// A Column pairs a `Sequence` of cells with a `ValueType` and its options.
/// Columns with a derivation function are "computed": their cells come from
/// the rest of the row and are never externally settable.
///
/// Aggregates skip nulls and hand their result back through `coerce`, so a
/// max over a time column is a time, not a raw number.

use crate::error::{Result, TableError};
use crate::sequence::{ArraySequence, Sequence, TieredSequence};
use crate::types::{TypeOptions, ValueType};
use crate::value::{Row, Value};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

/// Derivation function for a computed column.
pub type ComputeFn = Rc<dyn Fn(&Row) -> Value>;

/// Scalar reduction applied by aggregates, products, and derived tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateMethod {
    Sum,
    Min,
    Max,
    Mean,
}

/// Hint for selecting the underlying storage strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageHint {
    /// Append and read heavy workloads (default): O(1) access and append,
    /// O(N) mid-table splice.
    #[default]
    FastReads,
    /// Frequent sorted inserts and removals: O(√N) splice anywhere.
    FastUpdates,
}

impl StorageHint {
    fn sequence(&self) -> Box<dyn Sequence<Value>> {
        match self {
            StorageHint::FastReads => Box::new(ArraySequence::new()),
            StorageHint::FastUpdates => Box::new(TieredSequence::new()),
        }
    }
}

pub struct Column {
    id: u64,
    name: String,
    vtype: ValueType,
    options: TypeOptions,
    data: Box<dyn Sequence<Value>>,
    compute: Option<ComputeFn>,
    /// Skip the type test on incoming values; coercion still applies.
    force: bool,
    hint: StorageHint,
}

impl Column {
    pub fn new(id: u64, name: impl Into<String>, vtype: ValueType, hint: StorageHint) -> Self {
        Column {
            id,
            name: name.into(),
            vtype,
            options: TypeOptions::default(),
            data: hint.sequence(),
            compute: None,
            force: false,
            hint,
        }
    }

    pub fn with_options(mut self, options: TypeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_compute(mut self, compute: ComputeFn) -> Self {
        self.compute = Some(compute);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// A same-shaped column with no data; views materialize through this.
    pub fn fresh_copy(&self) -> Column {
        Column {
            id: self.id,
            name: self.name.clone(),
            vtype: self.vtype,
            options: self.options.clone(),
            data: self.hint.sequence(),
            compute: self.compute.clone(),
            force: self.force,
            hint: self.hint,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vtype(&self) -> ValueType {
        self.vtype
    }

    pub fn options(&self) -> &TypeOptions {
        &self.options
    }

    pub fn is_computed(&self) -> bool {
        self.compute.is_some()
    }

    pub fn is_forced(&self) -> bool {
        self.force
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.data.get(index)
    }

    /// Cell at `index`, cloned; `Null` out of bounds.
    pub fn value(&self, index: usize) -> Value {
        self.data.get(index).cloned().unwrap_or(Value::Null)
    }

    pub fn set(&mut self, index: usize, value: Value) -> bool {
        self.data.set(index, value)
    }

    pub fn insert(&mut self, index: usize, value: Value) -> bool {
        self.data.insert(index, value)
    }

    pub fn remove(&mut self, index: usize) -> Option<Value> {
        self.data.remove(index)
    }

    pub fn push(&mut self, value: Value) {
        self.data.push(value);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn swap(&mut self, a: usize, b: usize) {
        self.data.swap(a, b);
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        self.data.iter()
    }

    pub fn values(&self) -> Vec<Value> {
        self.data.iter().cloned().collect()
    }

    /// Test-then-coerce one incoming value.
    pub fn admit(&self, value: Value) -> Result<Value> {
        if !self.force && !self.vtype.test(&value, &self.options) {
            return Err(TableError::TypeMismatch {
                column: self.name.clone(),
                value: value.to_string(),
            });
        }
        Ok(self.vtype.coerce(value, &self.options))
    }

    /// Rewrite every stored cell through the type's coercion.
    pub fn coerce_all(&mut self) {
        let rewritten: Vec<Value> = self
            .data
            .iter()
            .map(|v| self.vtype.coerce(v.clone(), &self.options))
            .collect();
        for (i, v) in rewritten.into_iter().enumerate() {
            self.data.set(i, v);
        }
    }

    /// Evaluate the derivation function against a row, writing at `index`
    /// when given, appending otherwise. No-op for plain columns.
    pub fn compute(&mut self, row: &Row, index: Option<usize>) {
        let Some(compute) = self.compute.clone() else {
            return;
        };
        let value = self.vtype.coerce(compute(row), &self.options);
        match index {
            Some(i) => {
                self.data.set(i, value);
            }
            None => self.data.push(value),
        }
    }

    /// The cell at `index` projected onto the number line.
    pub fn numeric_at(&self, index: usize) -> Option<f64> {
        self.data.get(index).and_then(|v| self.vtype.numeric(v))
    }

    fn numerics(&self) -> Vec<f64> {
        self.data
            .iter()
            .filter_map(|v| self.vtype.numeric(v))
            .collect()
    }

    /// Re-coerce a numeric aggregate back into the column's type.
    fn renumber(&self, n: f64) -> Value {
        self.vtype.coerce(Value::Number(n), &self.options)
    }

    pub fn sum(&self) -> Result<Value> {
        if self.vtype == ValueType::Time {
            return Err(TableError::AggregationType {
                column: self.name.clone(),
                reason: "time values are not additive",
            });
        }
        Ok(self.renumber(self.numerics().iter().sum()))
    }

    pub fn mean(&self) -> Result<Value> {
        let nums = self.numerics();
        if nums.is_empty() {
            return Ok(Value::Null);
        }
        Ok(self.renumber(nums.iter().sum::<f64>() / nums.len() as f64))
    }

    pub fn median(&self) -> Result<Value> {
        let mut nums = self.numerics();
        if nums.is_empty() {
            return Ok(Value::Null);
        }
        nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let mid = nums.len() / 2;
        let median = if nums.len() % 2 == 1 {
            nums[mid]
        } else {
            (nums[mid - 1] + nums[mid]) / 2.0
        };
        Ok(self.renumber(median))
    }

    pub fn max(&self) -> Result<Value> {
        Ok(self.extreme(Ordering::Greater))
    }

    pub fn min(&self) -> Result<Value> {
        Ok(self.extreme(Ordering::Less))
    }

    /// Running extreme under the type's comparator, nulls skipped.
    fn extreme(&self, keep: Ordering) -> Value {
        let mut best: Option<&Value> = None;
        for v in self.data.iter() {
            if v.is_null() {
                continue;
            }
            match best {
                None => best = Some(v),
                Some(b) if self.vtype.compare(v, b) == keep => best = Some(v),
                _ => {}
            }
        }
        best.cloned().unwrap_or(Value::Null)
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Column {{ name: '{}', type: {}, len: {}, computed: {} }}",
            self.name,
            self.vtype.name(),
            self.len(),
            self.is_computed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number_column(values: &[f64]) -> Column {
        let mut col = Column::new(1, "n", ValueType::Number, StorageHint::FastReads);
        for v in values {
            col.push(Value::Number(*v));
        }
        col
    }

    #[test]
    fn test_admit_checks_type() {
        let col = number_column(&[]);
        assert_eq!(col.admit(Value::Number(3.0)).unwrap(), Value::Number(3.0));
        assert_eq!(
            col.admit(Value::Str("4.5".to_string())).unwrap(),
            Value::Number(4.5)
        );
        assert!(matches!(
            col.admit(Value::Str("abc".to_string())),
            Err(TableError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_admit_forced_skips_test() {
        let col = Column::new(1, "n", ValueType::Number, StorageHint::FastReads).with_force(true);
        // The test is skipped; coercion still runs and lands on Null.
        assert_eq!(col.admit(Value::Str("abc".to_string())).unwrap(), Value::Null);
    }

    #[test]
    fn test_aggregates() {
        let mut col = number_column(&[3.0, 1.0, 2.0]);
        col.push(Value::Null);
        assert_eq!(col.sum().unwrap(), Value::Number(6.0));
        assert_eq!(col.mean().unwrap(), Value::Number(2.0));
        assert_eq!(col.median().unwrap(), Value::Number(2.0));
        assert_eq!(col.min().unwrap(), Value::Number(1.0));
        assert_eq!(col.max().unwrap(), Value::Number(3.0));
    }

    #[test]
    fn test_aggregates_empty() {
        let col = number_column(&[]);
        assert_eq!(col.sum().unwrap(), Value::Number(0.0));
        assert_eq!(col.mean().unwrap(), Value::Null);
        assert_eq!(col.max().unwrap(), Value::Null);
    }

    #[test]
    fn test_time_max_is_a_time() {
        let mut col = Column::new(1, "when", ValueType::Time, StorageHint::FastReads);
        col.push(Value::Time(500));
        col.push(Value::Time(1500));
        assert_eq!(col.max().unwrap(), Value::Time(1500));
        assert_eq!(col.mean().unwrap(), Value::Time(1000));
        assert!(matches!(
            col.sum(),
            Err(TableError::AggregationType { .. })
        ));
    }

    #[test]
    fn test_coerce_all() {
        let mut col = Column::new(1, "n", ValueType::Number, StorageHint::FastReads).with_force(true);
        col.push(Value::Str("10".to_string()));
        col.push(Value::Number(2.0));
        col.coerce_all();
        assert_eq!(col.value(0), Value::Number(10.0));
        assert_eq!(col.value(1), Value::Number(2.0));
    }

    #[test]
    fn test_computed_column() {
        let mut col = Column::new(2, "total", ValueType::Number, StorageHint::FastReads)
            .with_compute(Rc::new(|row: &Row| {
                let a = row.get("a").and_then(Value::as_f64).unwrap_or(0.0);
                let b = row.get("b").and_then(Value::as_f64).unwrap_or(0.0);
                Value::Number(a + b)
            }));

        let mut row = Row::new();
        row.insert("a".to_string(), Value::Number(2.0));
        row.insert("b".to_string(), Value::Number(3.0));

        col.compute(&row, None);
        assert_eq!(col.value(0), Value::Number(5.0));

        row.insert("b".to_string(), Value::Number(10.0));
        col.compute(&row, Some(0));
        assert_eq!(col.value(0), Value::Number(12.0));
        assert_eq!(col.len(), 1);
    }

    #[test]
    fn test_fresh_copy_is_empty_same_shape() {
        let col = number_column(&[1.0, 2.0]);
        let copy = col.fresh_copy();
        assert_eq!(copy.id(), col.id());
        assert_eq!(copy.name(), col.name());
        assert_eq!(copy.vtype(), col.vtype());
        assert!(copy.is_empty());
    }
}
