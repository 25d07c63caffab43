/// The table core and the shared query surface.
///
/// `Table` owns columns, the length, and the three index caches:
/// column-position-by-name, row-position-by-id, and row-id-by-position.
/// Indices are never left stale across a public operation boundary; the
/// callers that permute or splice rows rebuild them eagerly.
///
/// `Dataset`, `View`, and `Derived` all wrap a `Table` and share the
/// read-only query surface through the `TableOps` trait; event plumbing is
/// the `EventSource` trait. A "row" is never stored: it is materialized on
/// demand by reading one position across every column.

use crate::column::{AggregateMethod, Column, StorageHint};
use crate::delta::Event;
use crate::error::{Result, TableError};
use crate::events::Hub;
use crate::types::ValueType;
use crate::value::{Row, RowId, Value};
use std::cell::{Cell, Ref};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Default identity column name.
pub const DEFAULT_ID_ATTRIBUTE: &str = "_id";

/// Reserved provenance column carried by derived tables.
pub const OIDS_COLUMN: &str = "_oids";

/// Per-table identity generator. Injected at dataset construction; no global
/// state.
#[derive(Debug)]
pub struct IdSequence {
    next: Cell<u64>,
}

impl Default for IdSequence {
    fn default() -> Self {
        IdSequence::starting_at(1)
    }
}

impl IdSequence {
    pub fn starting_at(first: u64) -> Self {
        IdSequence {
            next: Cell::new(first),
        }
    }

    pub fn next_id(&self) -> u64 {
        let id = self.next.get();
        self.next.set(id + 1);
        id
    }
}

pub struct Table {
    id_attribute: String,
    columns: Vec<Column>,
    length: usize,
    col_by_name: HashMap<String, usize>,
    pos_by_id: HashMap<RowId, usize>,
    id_by_pos: Vec<RowId>,
    hint: StorageHint,
    next_column_id: u64,
}

impl Table {
    pub fn new(id_attribute: impl Into<String>, hint: StorageHint) -> Self {
        Table {
            id_attribute: id_attribute.into(),
            columns: Vec::new(),
            length: 0,
            col_by_name: HashMap::new(),
            pos_by_id: HashMap::new(),
            id_by_pos: Vec::new(),
            hint,
            next_column_id: 1,
        }
    }

    pub fn id_attribute(&self) -> &str {
        &self.id_attribute
    }

    pub fn hint(&self) -> StorageHint {
        self.hint
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn next_column_id(&mut self) -> u64 {
        let id = self.next_column_id;
        self.next_column_id += 1;
        id
    }

    // ==================== Columns ====================

    /// Add a column. A duplicate name is a no-op signaled by `false`. The
    /// identity column is repositioned to index 0 after every insertion.
    pub fn add_column(&mut self, column: Column) -> bool {
        if self.col_by_name.contains_key(column.name()) {
            return false;
        }
        self.columns.push(column);
        self.place_identity_first();
        true
    }

    fn place_identity_first(&mut self) {
        if let Some(at) = self.columns.iter().position(|c| c.name() == self.id_attribute) {
            if at != 0 {
                let identity = self.columns.remove(at);
                self.columns.insert(0, identity);
            }
        }
        self.rebuild_column_index();
    }

    fn rebuild_column_index(&mut self) {
        self.col_by_name = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name().to_string(), i))
            .collect();
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.col_by_name.get(name).copied()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        let i = self.column_index(name)?;
        Some(&mut self.columns[i])
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.col_by_name.contains_key(name)
    }

    /// Column names, identity and provenance columns excluded.
    pub fn column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| c.name().to_string())
            .filter(|n| n != &self.id_attribute && n != OIDS_COLUMN)
            .collect()
    }

    // ==================== Rows ====================

    pub fn id_at(&self, pos: usize) -> Option<&RowId> {
        self.id_by_pos.get(pos)
    }

    pub fn position_of(&self, id: &RowId) -> Option<usize> {
        self.pos_by_id.get(id).copied()
    }

    /// Materialize the row at a position across every column.
    pub fn row_at(&self, pos: usize) -> Option<Row> {
        if pos >= self.length {
            return None;
        }
        Some(
            self.columns
                .iter()
                .map(|c| (c.name().to_string(), c.value(pos)))
                .collect(),
        )
    }

    pub fn get_value(&self, pos: usize, name: &str) -> Option<Value> {
        if pos >= self.length {
            return None;
        }
        self.column(name).map(|c| c.value(pos))
    }

    pub fn set_cell(&mut self, pos: usize, name: &str, value: Value) -> bool {
        if pos >= self.length {
            return false;
        }
        match self.column_mut(name) {
            Some(col) => col.set(pos, value),
            None => false,
        }
    }

    /// Append a normalized row. The identity value must be present under the
    /// table's id attribute; computed columns are evaluated, plain columns
    /// read their value from the row (absent fields become null).
    pub fn append_row(&mut self, row: &Row) -> Result<()> {
        let id = self.row_identity(row)?;
        for col in self.columns.iter_mut() {
            if col.is_computed() {
                col.compute(row, None);
            } else {
                col.push(row.get(col.name()).cloned().unwrap_or(Value::Null));
            }
        }
        self.pos_by_id.insert(id.clone(), self.length);
        self.id_by_pos.push(id);
        self.length += 1;
        Ok(())
    }

    /// Splice a normalized row in at `pos`; both row-index caches are fully
    /// rebuilt afterwards.
    pub fn insert_row(&mut self, pos: usize, row: &Row) -> Result<()> {
        self.row_identity(row)?;
        for col in self.columns.iter_mut() {
            if col.is_computed() {
                // Reserve the slot, then evaluate in place.
                col.insert(pos, Value::Null);
                col.compute(row, Some(pos));
            } else {
                col.insert(pos, row.get(col.name()).cloned().unwrap_or(Value::Null));
            }
        }
        self.length += 1;
        self.rebuild_row_index();
        Ok(())
    }

    fn row_identity(&self, row: &Row) -> Result<RowId> {
        let value = row
            .get(&self.id_attribute)
            .filter(|v| !v.is_null())
            .ok_or_else(|| TableError::UnknownColumn(self.id_attribute.clone()))?;
        Ok(value.key())
    }

    /// Splice out the row at `pos`, returning its full pre-image.
    pub fn remove_row(&mut self, pos: usize) -> Option<Row> {
        if pos >= self.length {
            return None;
        }
        let mut row = Row::new();
        for col in self.columns.iter_mut() {
            if let Some(v) = col.remove(pos) {
                row.insert(col.name().to_string(), v);
            }
        }
        let id = self.id_by_pos.remove(pos);
        self.pos_by_id.remove(&id);
        for p in self.pos_by_id.values_mut() {
            if *p > pos {
                *p -= 1;
            }
        }
        self.length -= 1;
        Some(row)
    }

    /// Drop every row; columns and schema stay.
    pub fn clear_rows(&mut self) {
        for col in self.columns.iter_mut() {
            col.clear();
        }
        self.pos_by_id.clear();
        self.id_by_pos.clear();
        self.length = 0;
    }

    /// Exchange two row positions across every column.
    pub fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        for col in self.columns.iter_mut() {
            col.swap(a, b);
        }
        self.id_by_pos.swap(a, b);
    }

    /// Rebuild both row-index caches from the identity column.
    pub fn rebuild_row_index(&mut self) {
        let Some(identity) = self.column(&self.id_attribute) else {
            self.pos_by_id.clear();
            self.id_by_pos.clear();
            return;
        };
        self.id_by_pos = (0..self.length).map(|p| identity.value(p).key()).collect();
        self.pos_by_id = self
            .id_by_pos
            .iter()
            .enumerate()
            .map(|(p, id)| (id.clone(), p))
            .collect();
    }

    /// Verify the length invariant across every column.
    pub fn check_lengths(&self) -> Result<()> {
        for col in &self.columns {
            if col.len() != self.length {
                return Err(TableError::RowLengthMismatch {
                    column: col.name().to_string(),
                    expected: self.length,
                    actual: col.len(),
                });
            }
        }
        Ok(())
    }

    // ==================== Sort ====================

    /// In-place max-heap sort through column-wide position swaps: heapify
    /// the row set under the comparator, then repeatedly swap the root to
    /// the tail and sift down. Rebuilds both row-index caches afterwards.
    pub fn sort_rows(&mut self, cmp: &dyn Fn(&Row, &Row) -> Ordering) {
        let n = self.length;
        if n <= 1 {
            return;
        }
        for i in (0..n / 2).rev() {
            self.sift_down(i, n, cmp);
        }
        for end in (1..n).rev() {
            self.swap_rows(0, end);
            self.sift_down(0, end, cmp);
        }
        self.rebuild_row_index();
    }

    fn sift_down(&mut self, mut root: usize, end: usize, cmp: &dyn Fn(&Row, &Row) -> Ordering) {
        loop {
            let left = 2 * root + 1;
            if left >= end {
                return;
            }
            let mut child = left;
            let right = left + 1;
            if right < end {
                let keep_right = {
                    let r = self.row_at(right).expect("position in range");
                    let l = self.row_at(left).expect("position in range");
                    cmp(&r, &l) == Ordering::Greater
                };
                if keep_right {
                    child = right;
                }
            }
            let rises = {
                let c = self.row_at(child).expect("position in range");
                let p = self.row_at(root).expect("position in range");
                cmp(&c, &p) == Ordering::Greater
            };
            if !rises {
                return;
            }
            self.swap_rows(root, child);
            root = child;
        }
    }

    // ==================== Aggregates ====================

    /// Reduce one or more columns to a scalar, coerced to the first column's
    /// type.
    pub fn aggregate(&self, columns: &[&str], method: AggregateMethod) -> Result<Value> {
        if columns.is_empty() {
            return Ok(Value::Null);
        }
        let mut nums: Vec<f64> = Vec::new();
        let mut dominant: Option<&Column> = None;
        for name in columns {
            let col = self
                .column(name)
                .ok_or_else(|| TableError::UnknownColumn(name.to_string()))?;
            if method == AggregateMethod::Sum && col.vtype() == ValueType::Time {
                return Err(TableError::AggregationType {
                    column: name.to_string(),
                    reason: "time values are not additive",
                });
            }
            if dominant.is_none() {
                dominant = Some(col);
            }
            for pos in 0..self.length {
                if let Some(n) = col.numeric_at(pos) {
                    nums.push(n);
                }
            }
        }
        let dominant = dominant.expect("at least one column");
        let reduced = match method {
            AggregateMethod::Sum => Some(nums.iter().sum()),
            AggregateMethod::Mean => {
                if nums.is_empty() {
                    None
                } else {
                    Some(nums.iter().sum::<f64>() / nums.len() as f64)
                }
            }
            AggregateMethod::Min => nums.iter().copied().reduce(f64::min),
            AggregateMethod::Max => nums.iter().copied().reduce(f64::max),
        };
        Ok(match reduced {
            Some(n) => dominant
                .vtype()
                .coerce(Value::Number(n), dominant.options()),
            None => Value::Null,
        })
    }
}

// ============================================================================
// Shared surfaces
// ============================================================================

/// Read-only query surface shared by datasets, views, and derived tables.
pub trait TableOps {
    /// Borrow the underlying table core.
    fn table(&self) -> Ref<'_, Table>;

    fn len(&self) -> usize {
        self.table().len()
    }

    fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    /// Column names, identity and provenance columns excluded.
    fn column_names(&self) -> Vec<String> {
        self.table().column_names()
    }

    fn has_column(&self, name: &str) -> bool {
        self.table().has_column(name)
    }

    /// Borrow one column.
    fn column(&self, name: &str) -> Option<Ref<'_, Column>> {
        Ref::filter_map(self.table(), |t| t.column(name)).ok()
    }

    fn column_type(&self, name: &str) -> Option<ValueType> {
        self.table().column(name).map(|c| c.vtype())
    }

    /// All values of one column, in row order.
    fn column_values(&self, name: &str) -> Result<Vec<Value>> {
        let t = self.table();
        t.column(name)
            .map(|c| c.values())
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))
    }

    fn row_by_position(&self, pos: usize) -> Option<Row> {
        self.table().row_at(pos)
    }

    fn row_by_id(&self, id: &RowId) -> Option<Row> {
        let t = self.table();
        t.position_of(id).and_then(|pos| t.row_at(pos))
    }

    fn position_of(&self, id: &RowId) -> Option<usize> {
        self.table().position_of(id)
    }

    fn get_value(&self, pos: usize, name: &str) -> Option<Value> {
        self.table().get_value(pos, name)
    }

    /// Visit every row in order.
    fn each(&self, mut f: impl FnMut(&Row, usize))
    where
        Self: Sized,
    {
        let t = self.table();
        for pos in 0..t.len() {
            if let Some(row) = t.row_at(pos) {
                f(&row, pos);
            }
        }
    }

    /// Visit every column.
    fn each_column(&self, mut f: impl FnMut(&Column))
    where
        Self: Sized,
    {
        let t = self.table();
        for col in t.columns() {
            f(col);
        }
    }

    /// Reduce one or more columns to a scalar.
    fn aggregate(&self, columns: &[&str], method: AggregateMethod) -> Result<Value> {
        self.table().aggregate(columns, method)
    }

    /// The object wire shape: one JSON object per row, in row order.
    fn to_json(&self) -> serde_json::Value {
        let t = self.table();
        let rows: Vec<serde_json::Value> = (0..t.len())
            .map(|pos| {
                let fields: serde_json::Map<String, serde_json::Value> = t
                    .columns()
                    .iter()
                    .map(|c| (c.name().to_string(), c.value(pos).to_json()))
                    .collect();
                serde_json::Value::Object(fields)
            })
            .collect();
        serde_json::Value::Array(rows)
    }
}

/// Event plumbing shared by anything that can sit upstream of a view,
/// derived table, or product.
pub trait EventSource {
    fn hub(&self) -> &Hub<Event>;

    /// Whether event propagation is enabled for this table's subtree.
    fn syncable(&self) -> bool;

    /// Name used as the `source` of published events.
    fn source_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::StorageHint;

    fn table_with(values: &[(f64, f64)]) -> Table {
        let mut t = Table::new(DEFAULT_ID_ATTRIBUTE, StorageHint::FastReads);
        let id = t.next_column_id();
        t.add_column(Column::new(id, DEFAULT_ID_ATTRIBUTE, ValueType::Number, t.hint()));
        let id = t.next_column_id();
        t.add_column(Column::new(id, "a", ValueType::Number, t.hint()));
        let id = t.next_column_id();
        t.add_column(Column::new(id, "b", ValueType::Number, t.hint()));
        for (i, (a, b)) in values.iter().enumerate() {
            let mut row = Row::new();
            row.insert(DEFAULT_ID_ATTRIBUTE.to_string(), Value::Number((i + 1) as f64));
            row.insert("a".to_string(), Value::Number(*a));
            row.insert("b".to_string(), Value::Number(*b));
            t.append_row(&row).unwrap();
        }
        t
    }

    #[test]
    fn test_identity_column_stays_first() {
        let mut t = Table::new(DEFAULT_ID_ATTRIBUTE, StorageHint::FastReads);
        let id = t.next_column_id();
        t.add_column(Column::new(id, "x", ValueType::Number, t.hint()));
        let id = t.next_column_id();
        t.add_column(Column::new(id, DEFAULT_ID_ATTRIBUTE, ValueType::Number, t.hint()));
        assert_eq!(t.columns()[0].name(), DEFAULT_ID_ATTRIBUTE);
        assert_eq!(t.column_index("x"), Some(1));

        // Duplicate names are rejected without touching the layout.
        let id = t.next_column_id();
        assert!(!t.add_column(Column::new(id, "x", ValueType::Str, t.hint())));
        assert_eq!(t.columns().len(), 2);
    }

    #[test]
    fn test_row_round_trip_and_indices() {
        let t = table_with(&[(1.0, 5.0), (3.0, 2.0)]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.position_of(&RowId::Num(2)), Some(1));
        assert_eq!(t.id_at(0), Some(&RowId::Num(1)));

        let row = t.row_at(1).unwrap();
        assert_eq!(row.get("a"), Some(&Value::Number(3.0)));
        assert_eq!(row.get(DEFAULT_ID_ATTRIBUTE), Some(&Value::Number(2.0)));

        t.check_lengths().unwrap();
    }

    #[test]
    fn test_remove_row_shifts_positions() {
        let mut t = table_with(&[(1.0, 5.0), (3.0, 2.0), (2.0, 8.0)]);
        let removed = t.remove_row(0).unwrap();
        assert_eq!(removed.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(t.len(), 2);
        assert_eq!(t.position_of(&RowId::Num(1)), None);
        assert_eq!(t.position_of(&RowId::Num(2)), Some(0));
        assert_eq!(t.position_of(&RowId::Num(3)), Some(1));
        t.check_lengths().unwrap();
    }

    #[test]
    fn test_sort_rows_heapsort() {
        let mut t = table_with(&[(1.0, 5.0), (3.0, 2.0), (2.0, 8.0)]);
        let ids_before: Vec<RowId> = (0..3).map(|p| t.id_at(p).unwrap().clone()).collect();

        t.sort_rows(&|x: &Row, y: &Row| {
            x.get("a")
                .and_then(Value::as_f64)
                .partial_cmp(&y.get("a").and_then(Value::as_f64))
                .unwrap_or(Ordering::Equal)
        });

        let a: Vec<f64> = (0..3)
            .map(|p| t.get_value(p, "a").unwrap().as_f64().unwrap())
            .collect();
        assert_eq!(a, vec![1.0, 2.0, 3.0]);

        // Sort is a permutation: same id set, indices rebuilt.
        let mut ids_after: Vec<RowId> = (0..3).map(|p| t.id_at(p).unwrap().clone()).collect();
        let mut expected = ids_before;
        ids_after.sort();
        expected.sort();
        assert_eq!(ids_after, expected);
        for pos in 0..3 {
            let id = t.id_at(pos).unwrap().clone();
            assert_eq!(t.position_of(&id), Some(pos));
        }
    }

    #[test]
    fn test_length_invariant_violation() {
        let mut t = table_with(&[(1.0, 2.0)]);
        t.column_mut("b").unwrap().push(Value::Number(9.0));
        assert!(matches!(
            t.check_lengths(),
            Err(TableError::RowLengthMismatch { .. })
        ));
    }

    #[test]
    fn test_aggregate_multi_column() {
        let t = table_with(&[(1.0, 5.0), (3.0, 2.0)]);
        assert_eq!(
            t.aggregate(&["a", "b"], AggregateMethod::Sum).unwrap(),
            Value::Number(11.0)
        );
        assert_eq!(
            t.aggregate(&["a"], AggregateMethod::Max).unwrap(),
            Value::Number(3.0)
        );
        assert!(matches!(
            t.aggregate(&["nope"], AggregateMethod::Sum),
            Err(TableError::UnknownColumn(_))
        ));
    }
}
