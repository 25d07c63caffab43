/// Root mutable tables.
///
/// A `Dataset` owns its columns and is the only place rows enter, change, or
/// leave the system directly; views are maintained exclusively through the
/// sync protocol. Every mutation validates fully before touching a column
/// (a failed call leaves the table in its pre-call state), builds one
/// batched event, and publishes it after the mutating borrow is released so
/// subscribers may read the dataset while handling the event.
///
/// Datasets are shared as `Rc<Dataset>`; interior state lives behind
/// `RefCell`s. Everything is single-threaded and synchronous: a mutation
/// returns only after every cascaded subscriber has run.

use crate::column::{Column, ComputeFn, StorageHint};
use crate::delta::{topic, Delta, Event};
use crate::error::{Result, TableError};
use crate::events::Hub;
use crate::formats::ParsedPayload;
use crate::table::{EventSource, IdSequence, Table, TableOps, DEFAULT_ID_ATTRIBUTE};
use crate::types::{DetectPolicy, TypeOptions, TypeRegistry, ValueType};
use crate::value::{Row, RowId, Value};
use crate::view::RowFilter;
use log::{debug, warn};
use std::cell::{Ref, RefCell};
use std::cmp::Ordering;
use std::rc::Rc;

/// Row ordering used by `sort` and sorted insert.
pub type Comparator = Rc<dyn Fn(&Row, &Row) -> Ordering>;

/// Declaration of one column.
#[derive(Clone, Default)]
pub struct ColumnSpec {
    pub name: String,
    /// `None` means: detect from data on load, `mixed` otherwise.
    pub vtype: Option<ValueType>,
    pub options: TypeOptions,
    /// Skip the type test on incoming values.
    pub force: bool,
    pub compute: Option<ComputeFn>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>) -> Self {
        ColumnSpec {
            name: name.into(),
            ..ColumnSpec::default()
        }
    }

    pub fn typed(name: impl Into<String>, vtype: ValueType) -> Self {
        ColumnSpec {
            name: name.into(),
            vtype: Some(vtype),
            ..ColumnSpec::default()
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.options.format = Some(format.into());
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn computed(mut self, compute: impl Fn(&Row) -> Value + 'static) -> Self {
        self.compute = Some(Rc::new(compute));
        self
    }
}

/// Construction options for a dataset.
pub struct DatasetOptions {
    pub name: String,
    /// Identity column name.
    pub id_attribute: String,
    /// Opt into event propagation for this table and its descendants.
    pub syncable: bool,
    pub comparator: Option<Comparator>,
    /// Explicit schema. An entry named like the identity column overrides
    /// the default numeric identity column.
    pub columns: Vec<ColumnSpec>,
    /// What to do when type detection meets a mixed sample.
    pub policy: DetectPolicy,
    pub hint: StorageHint,
    /// Identity generator; injectable for tests and id-space partitioning.
    pub ids: IdSequence,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        DatasetOptions {
            name: "dataset".to_string(),
            id_attribute: DEFAULT_ID_ATTRIBUTE.to_string(),
            syncable: false,
            comparator: None,
            columns: Vec::new(),
            policy: DetectPolicy::default(),
            hint: StorageHint::default(),
            ids: IdSequence::default(),
        }
    }
}

impl DatasetOptions {
    pub fn syncable() -> Self {
        DatasetOptions {
            syncable: true,
            ..DatasetOptions::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_columns(mut self, columns: Vec<ColumnSpec>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_comparator(mut self, cmp: impl Fn(&Row, &Row) -> Ordering + 'static) -> Self {
        self.comparator = Some(Rc::new(cmp));
        self
    }
}

/// Options accepted by the mutating calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct MutationOptions {
    /// Suppress event emission. Errors are never suppressed.
    pub silent: bool,
}

impl MutationOptions {
    pub const SILENT: MutationOptions = MutationOptions { silent: true };
}

pub struct Dataset {
    core: RefCell<Table>,
    hub: Hub<Event>,
    syncable: bool,
    comparator: RefCell<Option<Comparator>>,
    ids: IdSequence,
    name: String,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.name)
            .field("syncable", &self.syncable)
            .field("has_comparator", &self.comparator.borrow().is_some())
            .finish()
    }
}

impl Dataset {
    pub fn new(options: DatasetOptions) -> Rc<Dataset> {
        let mut core = Table::new(options.id_attribute.clone(), options.hint);

        // The identity column always exists; an explicit spec may retype it.
        let identity_spec = options
            .columns
            .iter()
            .find(|s| s.name == options.id_attribute)
            .cloned()
            .unwrap_or_else(|| ColumnSpec::typed(&options.id_attribute, ValueType::Number));
        Self::install_column(&mut core, &identity_spec);
        for spec in &options.columns {
            if spec.name != options.id_attribute {
                Self::install_column(&mut core, spec);
            }
        }

        Rc::new(Dataset {
            core: RefCell::new(core),
            hub: Hub::new(),
            syncable: options.syncable,
            comparator: RefCell::new(options.comparator),
            ids: options.ids,
            name: options.name,
        })
    }

    /// Build a dataset from a normalized payload: explicit column specs win,
    /// everything else type-detects from up to five leading non-null values,
    /// then the rows bulk-load silently.
    pub fn from_payload(payload: ParsedPayload, mut options: DatasetOptions) -> Result<Rc<Dataset>> {
        let registry = TypeRegistry::new();
        let mut specs: Vec<ColumnSpec> = Vec::new();
        let mut length: Option<usize> = None;

        for name in &payload.columns {
            let values = payload
                .data
                .get(name)
                .ok_or_else(|| TableError::Parse(format!("no data for column '{}'", name)))?;
            match length {
                None => length = Some(values.len()),
                Some(expected) if expected != values.len() => {
                    return Err(TableError::RowLengthMismatch {
                        column: name.clone(),
                        expected,
                        actual: values.len(),
                    });
                }
                Some(_) => {}
            }

            let mut spec = options
                .columns
                .iter()
                .find(|s| &s.name == name)
                .cloned()
                .unwrap_or_else(|| ColumnSpec::new(name));
            if spec.vtype.is_none() {
                spec.vtype = Some(registry.detect(name, values, &spec.options, options.policy)?);
            }
            specs.push(spec);
        }

        let length = length.unwrap_or(0);
        options.columns = specs;
        let dataset = Dataset::new(options);

        let rows: Vec<Row> = (0..length)
            .map(|pos| {
                payload
                    .columns
                    .iter()
                    .map(|name| (name.clone(), payload.data[name][pos].clone()))
                    .collect()
            })
            .collect();
        // Detected types already vouch for the sample; later outliers coerce
        // to null rather than failing the whole load.
        dataset.add_rows_internal(rows, true, MutationOptions::SILENT)?;
        Ok(dataset)
    }

    fn install_column(core: &mut Table, spec: &ColumnSpec) -> bool {
        let id = core.next_column_id();
        let mut column = Column::new(
            id,
            &spec.name,
            spec.vtype.unwrap_or(ValueType::Mixed),
            core.hint(),
        )
        .with_options(spec.options.clone())
        .with_force(spec.force);
        if let Some(compute) = &spec.compute {
            column = column.with_compute(compute.clone());
        }
        core.add_column(column)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id_attribute(&self) -> String {
        self.core.borrow().id_attribute().to_string()
    }

    pub fn set_comparator(&self, cmp: impl Fn(&Row, &Row) -> Ordering + 'static) {
        *self.comparator.borrow_mut() = Some(Rc::new(cmp));
    }

    // ==================== Schema ====================

    /// Add a column to a table holding no data yet. A duplicate name is a
    /// no-op signaled by `Ok(false)`.
    pub fn add_column(&self, spec: ColumnSpec) -> Result<bool> {
        let mut core = self.core.borrow_mut();
        if core.has_column(&spec.name) {
            return Ok(false);
        }
        if !core.is_empty() {
            // Schema migration stops at empty tables; a late column would
            // diverge from the table length.
            return Err(TableError::RowLengthMismatch {
                column: spec.name.clone(),
                expected: core.len(),
                actual: 0,
            });
        }
        Ok(Self::install_column(&mut core, &spec))
    }

    pub fn add_columns(&self, specs: Vec<ColumnSpec>) -> Result<bool> {
        let mut all = true;
        for spec in specs {
            all &= self.add_column(spec)?;
        }
        Ok(all)
    }

    /// Rewrite one column's stored values through its type's coercion.
    pub fn coerce_column(&self, name: &str) -> Result<()> {
        let mut core = self.core.borrow_mut();
        match core.column_mut(name) {
            Some(col) => {
                col.coerce_all();
                Ok(())
            }
            None => Err(TableError::UnknownColumn(name.to_string())),
        }
    }

    // ==================== Add ====================

    pub fn add_row(&self, row: Row, options: MutationOptions) -> Result<RowId> {
        let mut ids = self.add(vec![row], options)?;
        Ok(ids.remove(0))
    }

    /// Add rows. Ids are assigned where absent; every supplied field is
    /// type-checked (unless the column is forced) and coerced; computed
    /// columns are evaluated for each new row. Validation of the whole batch
    /// precedes any mutation. With a comparator configured, each row splices
    /// into its sorted position and both row-index caches are rebuilt; plain
    /// appends extend the caches incrementally.
    pub fn add(&self, rows: Vec<Row>, options: MutationOptions) -> Result<Vec<RowId>> {
        self.add_rows_internal(rows, false, options)
    }

    fn add_rows_internal(
        &self,
        rows: Vec<Row>,
        force_all: bool,
        options: MutationOptions,
    ) -> Result<Vec<RowId>> {
        let mut deltas: Vec<Delta> = Vec::with_capacity(rows.len());
        let mut out_ids: Vec<RowId> = Vec::with_capacity(rows.len());
        {
            let mut core = self.core.borrow_mut();
            let id_attribute = core.id_attribute().to_string();

            // Validate every row before touching any column.
            let mut batch_ids: Vec<RowId> = Vec::with_capacity(rows.len());
            let mut normalized: Vec<Row> = Vec::with_capacity(rows.len());
            for row in &rows {
                let (id, norm) =
                    self.normalize_row(&core, &id_attribute, row, &batch_ids, force_all)?;
                batch_ids.push(id);
                normalized.push(norm);
            }

            let comparator = self.comparator.borrow().clone();
            for (id, row) in batch_ids.iter().zip(normalized.into_iter()) {
                match &comparator {
                    Some(cmp) => {
                        let mut at = core.len();
                        for pos in 0..core.len() {
                            let existing = core.row_at(pos).expect("position in range");
                            if cmp(&row, &existing) == Ordering::Less {
                                at = pos;
                                break;
                            }
                        }
                        core.insert_row(at, &row)?;
                    }
                    None => core.append_row(&row)?,
                }
                let pos = core.position_of(id).expect("row just inserted");
                let stored = core.row_at(pos).expect("row just inserted");
                deltas.push(Delta::add(id.clone(), stored));
                out_ids.push(id.clone());
            }
            core.check_lengths()?;
        }

        debug!("dataset '{}' added {} rows", self.name, out_ids.len());
        if !options.silent && !deltas.is_empty() {
            let event = Event::new(self.name.clone(), deltas);
            self.hub.publish(topic::ADD, &event);
            self.hub.publish(topic::CHANGE, &event);
        }
        Ok(out_ids)
    }

    /// Check and coerce one incoming row against the schema: resolve or
    /// generate its identity, reject computed-column writes and identity
    /// collisions, ignore fields no column claims.
    fn normalize_row(
        &self,
        core: &Table,
        id_attribute: &str,
        row: &Row,
        batch_ids: &[RowId],
        force_all: bool,
    ) -> Result<(RowId, Row)> {
        let mut normalized = Row::new();

        let id = match row.get(id_attribute).filter(|v| !v.is_null()) {
            Some(value) => {
                let identity = core
                    .column(id_attribute)
                    .expect("identity column always exists");
                let coerced = identity.admit(value.clone())?;
                coerced.key()
            }
            None => loop {
                let candidate = RowId::Num(self.ids.next_id() as i64);
                if core.position_of(&candidate).is_none() && !batch_ids.contains(&candidate) {
                    break candidate;
                }
            },
        };
        if core.position_of(&id).is_some() || batch_ids.contains(&id) {
            return Err(TableError::DuplicateId(id.to_string()));
        }
        normalized.insert(id_attribute.to_string(), id.to_value());

        for (name, value) in row {
            if name == id_attribute {
                continue;
            }
            match core.column(name) {
                Some(col) if col.is_computed() => {
                    return Err(TableError::ComputedColumn(name.clone()));
                }
                Some(col) => {
                    let admitted = if force_all {
                        col.vtype().coerce(value.clone(), col.options())
                    } else {
                        col.admit(value.clone())?
                    };
                    normalized.insert(name.clone(), admitted);
                }
                None => {
                    debug!("dataset '{}' ignoring unknown field '{}'", self.name, name);
                }
            }
        }
        Ok((id, normalized))
    }

    // ==================== Remove ====================

    /// Remove every row the filter matches. Matches are collected in a first
    /// pass over the current state, then deleted; one Remove delta with the
    /// full pre-image is built per match.
    pub fn remove(&self, filter: RowFilter, options: MutationOptions) -> Result<usize> {
        let mut deltas: Vec<Delta> = Vec::new();
        {
            let mut core = self.core.borrow_mut();
            let id_attribute = core.id_attribute().to_string();

            let mut doomed: Vec<RowId> = Vec::new();
            for pos in 0..core.len() {
                let row = core.row_at(pos).expect("position in range");
                if filter.matches(&row, &id_attribute) {
                    doomed.push(core.id_at(pos).expect("position in range").clone());
                }
            }

            for id in doomed {
                let pos = core.position_of(&id).expect("collected from index");
                let row = core.remove_row(pos).expect("position in range");
                deltas.push(Delta::remove(id, row));
            }
            core.check_lengths()?;
        }

        let removed = deltas.len();
        debug!("dataset '{}' removed {} rows", self.name, removed);
        if !options.silent && removed > 0 {
            let event = Event::new(self.name.clone(), deltas);
            self.hub.publish(topic::REMOVE, &event);
            self.hub.publish(topic::CHANGE, &event);
        }
        Ok(removed)
    }

    pub fn remove_by_id(&self, id: RowId, options: MutationOptions) -> Result<usize> {
        self.remove(RowFilter::Id(id), options)
    }

    // ==================== Update ====================

    /// Update one row carrying its identity. Only fields that actually
    /// differ enter the delta; dependent computed columns are re-evaluated.
    /// Returns false when nothing changed (or the id is unknown).
    pub fn update(&self, row: Row, options: MutationOptions) -> Result<bool> {
        let id_attribute = self.id_attribute();
        let Some(id) = row.get(&id_attribute).filter(|v| !v.is_null()).map(Value::key) else {
            return Err(TableError::UnknownColumn(id_attribute));
        };
        let mut props = row;
        props.remove(&id_attribute);
        Ok(self.apply_updates(vec![(id, props)], options)? > 0)
    }

    /// Update several rows, each carrying its identity.
    pub fn update_many(&self, rows: Vec<Row>, options: MutationOptions) -> Result<usize> {
        let id_attribute = self.id_attribute();
        let mut targets: Vec<(RowId, Row)> = Vec::with_capacity(rows.len());
        for mut row in rows {
            let Some(id) = row.get(&id_attribute).filter(|v| !v.is_null()).map(Value::key) else {
                return Err(TableError::UnknownColumn(id_attribute));
            };
            row.remove(&id_attribute);
            targets.push((id, row));
        }
        self.apply_updates(targets, options)
    }

    /// Apply a transform to every row. Returning `None` skips the row;
    /// returned properties become that row's update.
    pub fn update_where(
        &self,
        transform: impl Fn(&Row) -> Option<Row>,
        options: MutationOptions,
    ) -> Result<usize> {
        let targets: Vec<(RowId, Row)> = {
            let core = self.core.borrow();
            let id_attribute = core.id_attribute().to_string();
            (0..core.len())
                .filter_map(|pos| {
                    let row = core.row_at(pos)?;
                    let props = transform(&row)?;
                    let id = row.get(&id_attribute).map(Value::key)?;
                    Some((id, props))
                })
                .collect()
        };
        self.apply_updates(targets, options)
    }

    fn apply_updates(&self, targets: Vec<(RowId, Row)>, options: MutationOptions) -> Result<usize> {
        let mut deltas: Vec<Delta> = Vec::new();
        {
            let mut core = self.core.borrow_mut();
            let id_attribute = core.id_attribute().to_string();

            // Validate and diff against the current state before writing.
            let mut staged: Vec<(RowId, usize, Row, Row)> = Vec::new();
            for (id, props) in &targets {
                let Some(pos) = core.position_of(id) else {
                    warn!("dataset '{}' skipping update of unknown id {}", self.name, id);
                    continue;
                };
                let mut old = Row::new();
                let mut changed = Row::new();
                for (name, value) in props {
                    if name == &id_attribute {
                        continue;
                    }
                    match core.column(name) {
                        Some(col) if col.is_computed() => {
                            return Err(TableError::ComputedColumn(name.clone()));
                        }
                        Some(col) => {
                            let admitted = col.admit(value.clone())?;
                            let current = col.value(pos);
                            if col.vtype().compare(&current, &admitted) != Ordering::Equal {
                                old.insert(name.clone(), current);
                                changed.insert(name.clone(), admitted);
                            }
                        }
                        None => {
                            debug!("dataset '{}' ignoring unknown field '{}'", self.name, name);
                        }
                    }
                }
                if !changed.is_empty() {
                    staged.push((id.clone(), pos, old, changed));
                }
            }

            for (id, pos, mut old, mut changed) in staged {
                for (name, value) in &changed {
                    core.set_cell(pos, name, value.clone());
                }
                // Re-derive computed columns from the updated row.
                let current = core.row_at(pos).expect("position in range");
                let computed: Vec<String> = core
                    .columns()
                    .iter()
                    .filter(|c| c.is_computed())
                    .map(|c| c.name().to_string())
                    .collect();
                for name in computed {
                    let before = core.get_value(pos, &name).expect("column exists");
                    if let Some(col) = core.column_mut(&name) {
                        col.compute(&current, Some(pos));
                    }
                    let after = core.get_value(pos, &name).expect("column exists");
                    if before != after {
                        old.insert(name.clone(), before);
                        changed.insert(name, after);
                    }
                }
                deltas.push(Delta::update(id, old, changed));
            }
            core.check_lengths()?;
        }

        let updated = deltas.len();
        debug!("dataset '{}' updated {} rows", self.name, updated);
        if !options.silent && updated > 0 {
            let event = Event::new(self.name.clone(), deltas);
            self.hub.publish(topic::UPDATE, &event);
            self.hub.publish(topic::CHANGE, &event);
        }
        Ok(updated)
    }

    // ==================== Reset and sort ====================

    /// Truncate every column to empty.
    pub fn reset(&self, options: MutationOptions) {
        self.core.borrow_mut().clear_rows();
        debug!("dataset '{}' reset", self.name);
        if !options.silent {
            self.hub.publish(topic::RESET, &Event::empty(self.name.clone()));
        }
    }

    /// Sort rows in place under a comparator: freshly supplied (and kept as
    /// the configured comparator) or previously configured. Publishes `sort`,
    /// not `change` — a sort permutes order and touches nothing else.
    pub fn sort(&self, comparator: Option<Comparator>) -> Result<()> {
        if let Some(cmp) = comparator {
            *self.comparator.borrow_mut() = Some(cmp);
        }
        let cmp = self
            .comparator
            .borrow()
            .clone()
            .ok_or(TableError::NoComparator)?;
        self.core.borrow_mut().sort_rows(&*cmp);
        debug!("dataset '{}' sorted", self.name);
        self.hub.publish(topic::SORT, &Event::empty(self.name.clone()));
        Ok(())
    }
}

impl TableOps for Dataset {
    fn table(&self) -> Ref<'_, Table> {
        self.core.borrow()
    }
}

impl EventSource for Dataset {
    fn hub(&self) -> &Hub<Event> {
        &self.hub
    }

    fn syncable(&self) -> bool {
        self.syncable
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}
