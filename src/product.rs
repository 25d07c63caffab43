/// Reactive scalar aggregates.
///
/// A product reduces one or more columns of a table to a single value,
/// coerced to the dominant (first) column's type. Against a syncable table
/// the result is a live handle: it re-evaluates on every parent `change` and
/// republishes its own `change` only when the value actually moved. Against
/// a non-syncable table the aggregate evaluates once and the bare value
/// comes back.

use crate::column::AggregateMethod;
use crate::delta::{topic, Event};
use crate::error::{Result, TableError};
use crate::events::{Hub, Token};
use crate::table::{EventSource, TableOps};
use crate::types::ValueType;
use crate::value::Value;
use log::warn;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::rc::Rc;

/// Old and new value of a product that moved.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub old: Value,
    pub new: Value,
}

/// What a product derivation hands back.
pub enum ProductKind {
    /// Live handle on a syncable table.
    Live(Rc<Product>),
    /// Bare eager value on a non-syncable table.
    Value(Value),
}

impl ProductKind {
    /// The current scalar either way.
    pub fn value(&self) -> Value {
        match self {
            ProductKind::Live(product) => product.val(),
            ProductKind::Value(value) => value.clone(),
        }
    }

    pub fn live(self) -> Option<Rc<Product>> {
        match self {
            ProductKind::Live(product) => Some(product),
            ProductKind::Value(_) => None,
        }
    }
}

pub struct Product {
    value: RefCell<Value>,
    vtype: ValueType,
    hub: Hub<ValueChange>,
    parent_token: Cell<Option<Token>>,
}

impl Product {
    pub fn sum<P>(parent: &Rc<P>, columns: &[&str]) -> Result<ProductKind>
    where
        P: TableOps + EventSource + 'static,
    {
        Self::derive(parent, columns, AggregateMethod::Sum)
    }

    pub fn min<P>(parent: &Rc<P>, columns: &[&str]) -> Result<ProductKind>
    where
        P: TableOps + EventSource + 'static,
    {
        Self::derive(parent, columns, AggregateMethod::Min)
    }

    pub fn max<P>(parent: &Rc<P>, columns: &[&str]) -> Result<ProductKind>
    where
        P: TableOps + EventSource + 'static,
    {
        Self::derive(parent, columns, AggregateMethod::Max)
    }

    pub fn mean<P>(parent: &Rc<P>, columns: &[&str]) -> Result<ProductKind>
    where
        P: TableOps + EventSource + 'static,
    {
        Self::derive(parent, columns, AggregateMethod::Mean)
    }

    pub fn derive<P>(parent: &Rc<P>, columns: &[&str], method: AggregateMethod) -> Result<ProductKind>
    where
        P: TableOps + EventSource + 'static,
    {
        // Validates column existence and aggregability up front.
        let initial = parent.aggregate(columns, method)?;
        if !parent.syncable() {
            return Ok(ProductKind::Value(initial));
        }

        let vtype = columns
            .first()
            .and_then(|name| parent.column_type(name))
            .unwrap_or(ValueType::Mixed);
        let product = Rc::new(Product {
            value: RefCell::new(initial),
            vtype,
            hub: Hub::new(),
            parent_token: Cell::new(None),
        });

        let weak_parent = Rc::downgrade(parent);
        let weak_product = Rc::downgrade(&product);
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let token = parent.hub().subscribe(topic::CHANGE, move |_event: &Event| {
            let (Some(parent), Some(product)) = (weak_parent.upgrade(), weak_product.upgrade())
            else {
                warn!("product re-evaluation skipped: {}", TableError::MissingParent);
                return;
            };
            let names: Vec<&str> = columns.iter().map(String::as_str).collect();
            match parent.aggregate(&names, method) {
                Ok(next) => product.accept(next),
                Err(err) => warn!("product re-evaluation failed: {}", err),
            }
        });
        product.parent_token.set(Some(token));

        Ok(ProductKind::Live(product))
    }

    /// The current value.
    pub fn val(&self) -> Value {
        self.value.borrow().clone()
    }

    pub fn value_type(&self) -> ValueType {
        self.vtype
    }

    /// Subscribe to value movements.
    pub fn on_change(&self, callback: impl Fn(&ValueChange) + 'static) -> Token {
        self.hub.subscribe(topic::CHANGE, callback)
    }

    /// Store a re-evaluated value, publishing only when it differs from the
    /// prior one under the product's type order.
    fn accept(&self, next: Value) {
        let old = self.value.borrow().clone();
        let same = match (old.is_null(), next.is_null()) {
            (true, true) => true,
            (false, false) => self.vtype.compare(&old, &next) == Ordering::Equal,
            _ => false,
        };
        if same {
            return;
        }
        *self.value.borrow_mut() = next.clone();
        self.hub.publish(topic::CHANGE, &ValueChange { old, new: next });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ColumnSpec, Dataset, DatasetOptions, MutationOptions};
    use crate::value::Row;

    fn num_row(pairs: &[(&str, f64)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::Number(*v)))
            .collect()
    }

    fn dataset(syncable: bool) -> Rc<Dataset> {
        let ds = Dataset::new(DatasetOptions {
            syncable,
            ..DatasetOptions::default()
                .with_columns(vec![ColumnSpec::typed("v", ValueType::Number)])
        });
        ds.add(
            vec![num_row(&[("v", 1.0)]), num_row(&[("v", 2.0)])],
            MutationOptions::default(),
        )
        .unwrap();
        ds
    }

    #[test]
    fn test_eager_value_on_plain_table() {
        let ds = dataset(false);
        let sum = Product::sum(&ds, &["v"]).unwrap();
        assert!(matches!(sum, ProductKind::Value(_)));
        assert_eq!(sum.value(), Value::Number(3.0));

        // Later mutations leave the bare value behind.
        ds.add(vec![num_row(&[("v", 10.0)])], MutationOptions::default()).unwrap();
        assert_eq!(sum.value(), Value::Number(3.0));
    }

    #[test]
    fn test_live_handle_tracks_changes() {
        let ds = dataset(true);
        let sum = Product::sum(&ds, &["v"]).unwrap().live().unwrap();
        assert_eq!(sum.val(), Value::Number(3.0));
        assert_eq!(sum.value_type(), ValueType::Number);

        ds.add(vec![num_row(&[("v", 4.0)])], MutationOptions::default()).unwrap();
        assert_eq!(sum.val(), Value::Number(7.0));
    }

    #[test]
    fn test_republishes_only_on_movement() {
        let ds = dataset(true);
        let max = Product::max(&ds, &["v"]).unwrap().live().unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        max.on_change(move |change| s.borrow_mut().push(change.clone()));

        // A smaller value: max unchanged, no publish.
        ds.add(vec![num_row(&[("v", 0.5)])], MutationOptions::default()).unwrap();
        assert!(seen.borrow().is_empty());

        ds.add(vec![num_row(&[("v", 9.0)])], MutationOptions::default()).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![ValueChange {
                old: Value::Number(2.0),
                new: Value::Number(9.0)
            }]
        );
    }

    #[test]
    fn test_sum_over_time_is_error() {
        let ds = Dataset::new(DatasetOptions {
            syncable: true,
            ..DatasetOptions::default()
                .with_columns(vec![ColumnSpec::typed("when", ValueType::Time)])
        });
        assert!(matches!(
            Product::sum(&ds, &["when"]),
            Err(TableError::AggregationType { .. })
        ));
        // Non-additive reductions over time stay typed.
        ds.add(
            vec![
                [("when".to_string(), Value::Time(100))].into_iter().collect(),
                [("when".to_string(), Value::Time(300))].into_iter().collect(),
            ],
            MutationOptions::default(),
        )
        .unwrap();
        let max = Product::max(&ds, &["when"]).unwrap();
        assert_eq!(max.value(), Value::Time(300));
    }

    #[test]
    fn test_unknown_column_is_error() {
        let ds = dataset(false);
        assert!(matches!(
            Product::mean(&ds, &["nope"]),
            Err(TableError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_multi_column_product() {
        let ds = Dataset::new(DatasetOptions::default().with_columns(vec![
            ColumnSpec::typed("a", ValueType::Number),
            ColumnSpec::typed("b", ValueType::Number),
        ]));
        ds.add(
            vec![num_row(&[("a", 1.0), ("b", 10.0)]), num_row(&[("a", 2.0), ("b", 20.0)])],
            MutationOptions::default(),
        )
        .unwrap();
        assert_eq!(Product::sum(&ds, &["a", "b"]).unwrap().value(), Value::Number(33.0));
        assert_eq!(Product::min(&ds, &["a", "b"]).unwrap().value(), Value::Number(1.0));
    }
}
