/// DeltaTable - Typed Columnar Store with Reactive Views
///
/// An in-process columnar data store: typed columns behind a pluggable type
/// layer, root datasets with row identity, filtered views kept consistent
/// through delta propagation, and derived tables and scalar products
/// recomputed on change.

pub mod column;
pub mod dataset;
pub mod delta;
pub mod derived;
pub mod error;
pub mod events;
pub mod formats;
pub mod product;
pub mod sequence;
pub mod table;
pub mod types;
pub mod value;
pub mod view;

pub use column::{AggregateMethod, Column, ComputeFn, StorageHint};
pub use dataset::{ColumnSpec, Comparator, Dataset, DatasetOptions, MutationOptions};
pub use delta::{topic, Delta, Event};
pub use derived::{Derived, GroupBy};
pub use error::{Result, TableError};
pub use events::{Hub, Token, ANY};
pub use formats::{parse_delimited, parse_objects, parse_strict, ParsedPayload};
pub use product::{Product, ProductKind, ValueChange};
pub use sequence::{ArraySequence, Sequence, TieredSequence};
pub use table::{EventSource, IdSequence, Table, TableOps, DEFAULT_ID_ATTRIBUTE, OIDS_COLUMN};
pub use types::{DetectPolicy, TypeOptions, TypeRegistry, ValueType};
pub use value::{Row, RowId, Value};
pub use view::{ColumnFilter, RowFilter, View, ViewExt, ViewSpec};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn num_row(pairs: &[(&str, f64)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::Number(*v)))
            .collect()
    }

    #[test]
    fn test_complete_workflow() {
        // A sales dataset with a computed revenue column.
        let sales = Dataset::new(DatasetOptions {
            syncable: true,
            ..DatasetOptions::default().with_columns(vec![
                ColumnSpec::typed("region", ValueType::Number),
                ColumnSpec::typed("quantity", ValueType::Number),
                ColumnSpec::typed("price", ValueType::Number),
                ColumnSpec::typed("revenue", ValueType::Number).computed(|row| {
                    let q = row.get("quantity").and_then(Value::as_f64).unwrap_or(0.0);
                    let p = row.get("price").and_then(Value::as_f64).unwrap_or(0.0);
                    Value::Number(q * p)
                }),
            ])
        });

        sales
            .add(
                vec![
                    num_row(&[("region", 1.0), ("quantity", 10.0), ("price", 9.99)]),
                    num_row(&[("region", 2.0), ("quantity", 5.0), ("price", 19.99)]),
                    num_row(&[("region", 1.0), ("quantity", 15.0), ("price", 4.99)]),
                ],
                MutationOptions::default(),
            )
            .unwrap();

        assert_eq!(sales.get_value(0, "revenue"), Some(Value::Number(99.9)));

        // A view over the big orders, a group-by over regions, a live total.
        let big = sales
            .select_rows(RowFilter::predicate(|row| {
                row.get("quantity").and_then(Value::as_f64).unwrap_or(0.0) >= 10.0
            }))
            .unwrap();
        let by_region =
            Derived::group_by(&sales, GroupBy::new("region", &["revenue"])).unwrap();
        let total = Product::sum(&sales, &["revenue"]).unwrap().live().unwrap();

        assert_eq!(big.len(), 2);
        assert_eq!(by_region.len(), 2);
        let expected_total = 10.0 * 9.99 + 5.0 * 19.99 + 15.0 * 4.99;
        assert_eq!(total.val(), Value::Number(expected_total));

        // One more order cascades everywhere in a single synchronous call.
        sales
            .add_row(
                num_row(&[("region", 2.0), ("quantity", 20.0), ("price", 1.0)]),
                MutationOptions::default(),
            )
            .unwrap();

        assert_eq!(big.len(), 3);
        assert_eq!(by_region.len(), 2);
        assert_eq!(
            by_region.get_value(1, "revenue"),
            Some(Value::Number(5.0 * 19.99 + 20.0))
        );
        assert_eq!(total.val(), Value::Number(expected_total + 20.0));
    }

    #[test]
    fn test_payload_to_dataset_to_views() {
        let text = "name,score,joined\nada,92,2020-01-01\ngrace,85,2021-06-15\nalan,77,2019-11-30\n";
        let payload = parse_delimited(text, ',').unwrap();
        let ds = Dataset::from_payload(
            payload,
            DatasetOptions {
                syncable: true,
                ..DatasetOptions::default()
            },
        )
        .unwrap();

        assert_eq!(ds.len(), 3);
        assert_eq!(ds.column_type("name"), Some(ValueType::Str));
        assert_eq!(ds.column_type("score"), Some(ValueType::Number));
        assert_eq!(ds.column_type("joined"), Some(ValueType::Time));
        assert_eq!(ds.get_value(0, "score"), Some(Value::Number(92.0)));

        let high = ds
            .select_rows(RowFilter::predicate(|row| {
                row.get("score").and_then(Value::as_f64).unwrap_or(0.0) >= 85.0
            }))
            .unwrap();
        assert_eq!(high.len(), 2);

        // The latest join date is a time value, not a raw number.
        let latest = Product::max(&ds, &["joined"]).unwrap();
        let ProductKind::Live(latest) = latest else {
            panic!("syncable table yields a live product");
        };
        assert_eq!(latest.value_type(), ValueType::Time);
        assert!(matches!(latest.val(), Value::Time(_)));
    }

    #[test]
    fn test_strict_payload_round_trip() {
        let wire = serde_json::json!({
            "columns": [
                {"name": "city", "type": "string", "data": ["berlin", "lagos"]},
                {"name": "heat", "data": [30.5, 33.0]}
            ]
        });
        let (payload, declared) = parse_strict(&wire).unwrap();
        let mut options = DatasetOptions::default();
        options.columns = declared
            .into_iter()
            .map(|(name, vtype)| ColumnSpec::typed(name, vtype))
            .collect();
        let ds = Dataset::from_payload(payload, options).unwrap();

        assert_eq!(ds.column_type("city"), Some(ValueType::Str));
        assert_eq!(ds.column_type("heat"), Some(ValueType::Number));

        let json = ds.to_json();
        assert_eq!(json[0]["city"], serde_json::json!("berlin"));
        assert_eq!(json[1]["heat"], serde_json::json!(33.0));
    }

    #[test]
    fn test_view_chain_cascade_depth_two() {
        let ds = Dataset::new(DatasetOptions {
            syncable: true,
            ..DatasetOptions::default()
                .with_columns(vec![ColumnSpec::typed("v", ValueType::Number)])
        });
        let level1 = ds
            .select_rows(RowFilter::predicate(|r| {
                r.get("v").and_then(Value::as_f64).unwrap_or(0.0) > 0.0
            }))
            .unwrap();
        let level2 = level1
            .select_rows(RowFilter::predicate(|r| {
                r.get("v").and_then(Value::as_f64).unwrap_or(0.0) > 10.0
            }))
            .unwrap();

        ds.add(
            vec![num_row(&[("v", 5.0)]), num_row(&[("v", 50.0)]), num_row(&[("v", -2.0)])],
            MutationOptions::default(),
        )
        .unwrap();

        assert_eq!(ds.len(), 3);
        assert_eq!(level1.len(), 2);
        assert_eq!(level2.len(), 1);
        assert_eq!(level2.get_value(0, "v"), Some(Value::Number(50.0)));
    }

    #[test]
    fn test_mutations_run_to_completion_before_returning() {
        // Every cascaded subscriber observes the mutation before the call
        // returns: single-threaded, synchronous, cooperative.
        let ds = Dataset::new(DatasetOptions {
            syncable: true,
            ..DatasetOptions::default()
                .with_columns(vec![ColumnSpec::typed("v", ValueType::Number)])
        });
        let observed = Rc::new(RefCell::new(Vec::new()));
        let obs = observed.clone();
        let inner = ds.clone();
        ds.hub().subscribe(topic::CHANGE, move |_e: &Event| {
            // Reading the dataset from inside a subscriber is fine: the
            // mutating borrow is released before publish.
            obs.borrow_mut().push(inner.len());
        });

        ds.add_row(num_row(&[("v", 1.0)]), MutationOptions::default()).unwrap();
        ds.add_row(num_row(&[("v", 2.0)]), MutationOptions::default()).unwrap();
        assert_eq!(*observed.borrow(), vec![1, 2]);
    }
}
