/// Derived tables: group-by, moving average, count-by.
///
/// A derived table is a dataset recomputed wholesale from its parent's
/// current, complete state — on construction and again on every parent
/// `change`. No incremental delta application happens here; simplicity wins
/// over efficiency. The derived table always uses the default identity
/// column (never the parent's) and carries a reserved `_oids` column
/// recording, per derived row, the parent ids that produced it.

use crate::column::AggregateMethod;
use crate::dataset::{ColumnSpec, Dataset, DatasetOptions, MutationOptions};
use crate::delta::{topic, Delta, Event};
use crate::error::{Result, TableError};
use crate::events::Token;
use crate::table::{EventSource, Table, TableOps, OIDS_COLUMN};
use crate::types::ValueType;
use crate::value::{Row, RowId, Value};
use indexmap::IndexMap;
use log::{debug, warn};
use std::cell::{Cell, Ref};
use std::rc::Rc;

/// Configuration for a group-by derivation.
#[derive(Clone)]
pub struct GroupBy {
    /// Column whose values partition the parent rows, in first-seen order.
    pub by: String,
    /// Columns to reduce per bucket. The grouping column itself always
    /// carries the bucket key and is never reduced.
    pub columns: Vec<String>,
    pub method: AggregateMethod,
    /// Optional key preprocessing applied before bucketing.
    pub preprocess: Option<Rc<dyn Fn(&Value) -> Value>>,
}

impl GroupBy {
    pub fn new(by: impl Into<String>, columns: &[&str]) -> Self {
        GroupBy {
            by: by.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            method: AggregateMethod::Sum,
            preprocess: None,
        }
    }

    pub fn with_method(mut self, method: AggregateMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_preprocess(mut self, f: impl Fn(&Value) -> Value + 'static) -> Self {
        self.preprocess = Some(Rc::new(f));
        self
    }
}

/// A wholesale-recomputed table bound to a parent.
pub struct Derived {
    output: Rc<Dataset>,
    parent_token: Cell<Option<Token>>,
}

impl Derived {
    /// Group parent rows into buckets by a column's (optionally preprocessed)
    /// value and reduce the listed columns per bucket.
    pub fn group_by<P>(parent: &Rc<P>, cfg: GroupBy) -> Result<Rc<Derived>>
    where
        P: TableOps + EventSource + 'static,
    {
        let mut specs = vec![group_key_spec(parent, &cfg)?];
        for name in &cfg.columns {
            if name == &cfg.by {
                continue;
            }
            let vtype = parent
                .column_type(name)
                .ok_or_else(|| TableError::UnknownColumn(name.clone()))?;
            if cfg.method == AggregateMethod::Sum && vtype == ValueType::Time {
                return Err(TableError::AggregationType {
                    column: name.clone(),
                    reason: "time values are not additive",
                });
            }
            specs.push(ColumnSpec::typed(name, vtype));
        }
        specs.push(ColumnSpec::typed(OIDS_COLUMN, ValueType::Mixed));

        let name = format!("{}.groupby({})", parent.source_name(), cfg.by);
        Self::wire(parent, name, specs, Rc::new(move |t: &Table| compute_group_by(t, &cfg)))
    }

    /// Per-distinct-value occurrence counts of one column.
    pub fn count_by<P>(parent: &Rc<P>, by: &str) -> Result<Rc<Derived>>
    where
        P: TableOps + EventSource + 'static,
    {
        let cfg = GroupBy::new(by, &[]);
        let specs = vec![
            group_key_spec(parent, &cfg)?,
            ColumnSpec::typed("count", ValueType::Number),
            ColumnSpec::typed(OIDS_COLUMN, ValueType::Mixed),
        ];
        let name = format!("{}.countby({})", parent.source_name(), by);
        Self::wire(parent, name, specs, Rc::new(move |t: &Table| compute_count_by(t, &cfg)))
    }

    /// Slide a window of `window` consecutive parent rows; the listed
    /// columns carry the window reduction, every other column the
    /// right-aligned slice. Derived length is `parent_len - window + 1`.
    pub fn moving_average<P>(
        parent: &Rc<P>,
        columns: &[&str],
        window: usize,
        method: AggregateMethod,
    ) -> Result<Rc<Derived>>
    where
        P: TableOps + EventSource + 'static,
    {
        if window == 0 {
            return Err(TableError::Parse("window must hold at least one row".to_string()));
        }
        let averaged: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let mut specs = Vec::new();
        {
            let t = parent.table();
            for name in &averaged {
                if !t.has_column(name) {
                    return Err(TableError::UnknownColumn(name.clone()));
                }
            }
            for col in t.columns() {
                if col.name() == t.id_attribute() || col.name() == OIDS_COLUMN {
                    continue;
                }
                specs.push(ColumnSpec::typed(col.name(), col.vtype()));
            }
        }
        specs.push(ColumnSpec::typed(OIDS_COLUMN, ValueType::Mixed));

        let name = format!("{}.movingavg", parent.source_name());
        Self::wire(
            parent,
            name,
            specs,
            Rc::new(move |t: &Table| compute_moving(t, &averaged, window, method)),
        )
    }

    /// Common wiring: build the output dataset, compute once, and when the
    /// parent is syncable, recompute on every parent `change`.
    fn wire<P>(
        parent: &Rc<P>,
        name: String,
        specs: Vec<ColumnSpec>,
        compute: Rc<dyn Fn(&Table) -> Result<Vec<Row>>>,
    ) -> Result<Rc<Derived>>
    where
        P: TableOps + EventSource + 'static,
    {
        let output = Dataset::new(DatasetOptions {
            name,
            syncable: parent.syncable(),
            columns: specs,
            ..DatasetOptions::default()
        });

        let rows = compute(&parent.table())?;
        output.add(rows, MutationOptions::SILENT)?;

        let derived = Rc::new(Derived {
            output: output.clone(),
            parent_token: Cell::new(None),
        });

        if parent.syncable() {
            let weak_parent = Rc::downgrade(parent);
            let weak_output = Rc::downgrade(&output);
            let token = parent.hub().subscribe(topic::CHANGE, move |_event: &Event| {
                let (Some(parent), Some(output)) = (weak_parent.upgrade(), weak_output.upgrade())
                else {
                    warn!("derived recompute skipped: {}", TableError::MissingParent);
                    return;
                };
                let result = compute(&parent.table());
                match result {
                    Ok(rows) => reload(&output, rows),
                    Err(err) => warn!("derived recompute failed: {}", err),
                }
            });
            derived.parent_token.set(Some(token));
        }

        Ok(derived)
    }

    /// The underlying dataset holding the derived rows.
    pub fn dataset(&self) -> &Rc<Dataset> {
        &self.output
    }

    /// Parent ids that produced the derived row at `pos`.
    pub fn origin_ids(&self, pos: usize) -> Vec<RowId> {
        self.get_value(pos, OIDS_COLUMN)
            .and_then(|v| v.as_list().map(|items| items.iter().map(Value::key).collect()))
            .unwrap_or_default()
    }
}

/// Replace the derived rows wholesale, then announce the swap as one batch:
/// a Remove per prior row followed by an Add per current row, so anything
/// chained below the derived table tracks the reload through normal sync.
fn reload(output: &Rc<Dataset>, rows: Vec<Row>) {
    let mut deltas: Vec<Delta> = {
        let t = output.table();
        (0..t.len())
            .map(|pos| {
                let id = t.id_at(pos).expect("position in range").clone();
                Delta::remove(id, t.row_at(pos).expect("position in range"))
            })
            .collect()
    };
    output.reset(MutationOptions::SILENT);
    if let Err(err) = output.add(rows, MutationOptions::SILENT) {
        warn!("derived reload failed: {}", err);
        return;
    }
    {
        let t = output.table();
        for pos in 0..t.len() {
            let id = t.id_at(pos).expect("position in range").clone();
            deltas.push(Delta::add(id, t.row_at(pos).expect("position in range")));
        }
    }
    debug!("derived '{}' recomputed", output.name());
    let event = Event::new(output.name().to_string(), deltas);
    output.hub().publish(topic::CHANGE, &event);
}

fn group_key_spec<P: TableOps>(parent: &Rc<P>, cfg: &GroupBy) -> Result<ColumnSpec> {
    let vtype = parent
        .column_type(&cfg.by)
        .ok_or_else(|| TableError::UnknownColumn(cfg.by.clone()))?;
    // Preprocessing may move keys out of the source type.
    let vtype = if cfg.preprocess.is_some() { ValueType::Mixed } else { vtype };
    Ok(ColumnSpec::typed(&cfg.by, vtype))
}

struct Bucket {
    key: Value,
    ids: Vec<RowId>,
    samples: IndexMap<String, Vec<f64>>,
}

fn partition(table: &Table, cfg: &GroupBy) -> Result<IndexMap<RowId, Bucket>> {
    if !table.has_column(&cfg.by) {
        return Err(TableError::UnknownColumn(cfg.by.clone()));
    }
    let mut buckets: IndexMap<RowId, Bucket> = IndexMap::new();
    for pos in 0..table.len() {
        let raw = table.get_value(pos, &cfg.by).expect("column exists");
        let key = match &cfg.preprocess {
            Some(f) => f(&raw),
            None => raw,
        };
        let id = table.id_at(pos).expect("position in range").clone();
        let bucket = buckets.entry(key.key()).or_insert_with(|| Bucket {
            key,
            ids: Vec::new(),
            samples: IndexMap::new(),
        });
        bucket.ids.push(id);
        for name in &cfg.columns {
            if name == &cfg.by {
                continue;
            }
            let col = table
                .column(name)
                .ok_or_else(|| TableError::UnknownColumn(name.clone()))?;
            if let Some(n) = col.numeric_at(pos) {
                bucket.samples.entry(name.clone()).or_default().push(n);
            }
        }
    }
    Ok(buckets)
}

fn reduce(samples: &[f64], method: AggregateMethod) -> Option<f64> {
    match method {
        AggregateMethod::Sum => Some(samples.iter().sum()),
        AggregateMethod::Mean => {
            if samples.is_empty() {
                None
            } else {
                Some(samples.iter().sum::<f64>() / samples.len() as f64)
            }
        }
        AggregateMethod::Min => samples.iter().copied().reduce(f64::min),
        AggregateMethod::Max => samples.iter().copied().reduce(f64::max),
    }
}

fn oids_value(ids: &[RowId]) -> Value {
    Value::List(ids.iter().map(RowId::to_value).collect())
}

fn compute_group_by(table: &Table, cfg: &GroupBy) -> Result<Vec<Row>> {
    let buckets = partition(table, cfg)?;
    let mut rows = Vec::with_capacity(buckets.len());
    for bucket in buckets.values() {
        let mut row = Row::new();
        row.insert(cfg.by.clone(), bucket.key.clone());
        for name in &cfg.columns {
            if name == &cfg.by {
                continue;
            }
            let col = table.column(name).expect("validated in partition");
            let empty = Vec::new();
            let samples = bucket.samples.get(name).unwrap_or(&empty);
            let value = match reduce(samples, cfg.method) {
                Some(n) => col.vtype().coerce(Value::Number(n), col.options()),
                None => Value::Null,
            };
            row.insert(name.clone(), value);
        }
        row.insert(OIDS_COLUMN.to_string(), oids_value(&bucket.ids));
        rows.push(row);
    }
    Ok(rows)
}

fn compute_count_by(table: &Table, cfg: &GroupBy) -> Result<Vec<Row>> {
    let buckets = partition(table, cfg)?;
    let mut rows = Vec::with_capacity(buckets.len());
    for bucket in buckets.values() {
        let mut row = Row::new();
        row.insert(cfg.by.clone(), bucket.key.clone());
        row.insert("count".to_string(), Value::Number(bucket.ids.len() as f64));
        row.insert(OIDS_COLUMN.to_string(), oids_value(&bucket.ids));
        rows.push(row);
    }
    Ok(rows)
}

fn compute_moving(
    table: &Table,
    averaged: &[String],
    window: usize,
    method: AggregateMethod,
) -> Result<Vec<Row>> {
    for name in averaged {
        if !table.has_column(name) {
            return Err(TableError::UnknownColumn(name.clone()));
        }
    }
    if table.len() < window {
        return Ok(Vec::new());
    }
    let mut rows = Vec::with_capacity(table.len() - window + 1);
    for start in 0..=(table.len() - window) {
        let end = start + window;
        let mut row = Row::new();
        for col in table.columns() {
            let name = col.name();
            if name == table.id_attribute() || name == OIDS_COLUMN {
                continue;
            }
            if averaged.iter().any(|a| a == name) {
                let samples: Vec<f64> =
                    (start..end).filter_map(|pos| col.numeric_at(pos)).collect();
                let value = match reduce(&samples, method) {
                    Some(n) => col.vtype().coerce(Value::Number(n), col.options()),
                    None => Value::Null,
                };
                row.insert(name.to_string(), value);
            } else {
                // Untouched columns carry the right-aligned slice.
                row.insert(name.to_string(), col.value(end - 1));
            }
        }
        let ids: Vec<RowId> = (start..end)
            .map(|pos| table.id_at(pos).expect("position in range").clone())
            .collect();
        row.insert(OIDS_COLUMN.to_string(), oids_value(&ids));
        rows.push(row);
    }
    Ok(rows)
}

impl TableOps for Derived {
    fn table(&self) -> Ref<'_, Table> {
        self.output.table()
    }
}

impl EventSource for Derived {
    fn hub(&self) -> &crate::events::Hub<Event> {
        self.output.hub()
    }

    fn syncable(&self) -> bool {
        EventSource::syncable(&*self.output)
    }

    fn source_name(&self) -> &str {
        self.output.source_name()
    }
}
