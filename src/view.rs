/// Filtered projections over a parent table.
///
/// A view selects columns × rows from its parent at construction time and
/// holds materialized copies, not aliases: parent mutation can only reach it
/// through the sync protocol. When the parent is syncable, the view
/// subscribes to its `change` channel and applies each delta in order,
/// re-publishing a fresh event of its own to cascade down a view tree.
///
/// Sync cost is proportional to the deltas in the event, never to the view's
/// size; the row filter is re-evaluated only for rows a delta touched.

use crate::delta::{topic, Delta, Event};
use crate::error::{Result, TableError};
use crate::events::{Hub, Token};
use crate::table::{EventSource, Table, TableOps};
use crate::value::{Row, RowId, Value};
use log::trace;
use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;

/// Which parent columns a view keeps. The identity column is always kept:
/// the row-index caches require it.
#[derive(Clone, Default)]
pub enum ColumnFilter {
    #[default]
    All,
    Names(Vec<String>),
}

impl ColumnFilter {
    pub fn names(names: &[&str]) -> Self {
        ColumnFilter::Names(names.iter().map(|n| n.to_string()).collect())
    }

    fn keeps(&self, name: &str, id_attribute: &str) -> bool {
        match self {
            ColumnFilter::All => true,
            ColumnFilter::Names(names) => {
                name == id_attribute || names.iter().any(|n| n == name)
            }
        }
    }
}

/// Which parent rows a view keeps.
#[derive(Clone, Default)]
pub enum RowFilter {
    #[default]
    All,
    Id(RowId),
    Ids(Vec<RowId>),
    Where(Rc<dyn Fn(&Row) -> bool>),
}

impl RowFilter {
    pub fn predicate(f: impl Fn(&Row) -> bool + 'static) -> Self {
        RowFilter::Where(Rc::new(f))
    }

    pub fn matches(&self, row: &Row, id_attribute: &str) -> bool {
        match self {
            RowFilter::All => true,
            RowFilter::Id(id) => row.get(id_attribute).map(Value::key).as_ref() == Some(id),
            RowFilter::Ids(ids) => row
                .get(id_attribute)
                .map(Value::key)
                .map_or(false, |key| ids.contains(&key)),
            RowFilter::Where(f) => f(row),
        }
    }
}

/// Column and row selection for a view.
#[derive(Clone, Default)]
pub struct ViewSpec {
    pub columns: ColumnFilter,
    pub rows: RowFilter,
    pub name: Option<String>,
}

impl ViewSpec {
    pub fn all() -> Self {
        ViewSpec::default()
    }

    pub fn with_columns(mut self, names: &[&str]) -> Self {
        self.columns = ColumnFilter::names(names);
        self
    }

    pub fn with_rows(mut self, rows: RowFilter) -> Self {
        self.rows = rows;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

pub struct View {
    core: RefCell<Table>,
    spec: ViewSpec,
    hub: Hub<Event>,
    syncable: bool,
    name: String,
    /// Token of the subscription on the parent hub, when syncable.
    parent_token: Cell<Option<Token>>,
}

impl View {
    /// Materialize a view of `parent`. O(parent rows × selected columns),
    /// once. When the parent is syncable, the view subscribes to its
    /// `change` channel through a weak handle.
    pub fn select<P>(parent: &Rc<P>, spec: ViewSpec) -> Result<Rc<View>>
    where
        P: TableOps + EventSource + 'static,
    {
        let core = {
            let source = parent.table();
            if let ColumnFilter::Names(names) = &spec.columns {
                for name in names {
                    if !source.has_column(name) {
                        return Err(TableError::UnknownColumn(name.clone()));
                    }
                }
            }

            let mut core = Table::new(source.id_attribute(), source.hint());
            for col in source.columns() {
                if spec.columns.keeps(col.name(), source.id_attribute()) {
                    core.add_column(col.fresh_copy());
                }
            }
            for pos in 0..source.len() {
                let row = source.row_at(pos).expect("position in range");
                if spec.rows.matches(&row, source.id_attribute()) {
                    core.append_row(&row)?;
                }
            }
            core
        };

        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("{}.view", parent.source_name()));
        let view = Rc::new(View {
            core: RefCell::new(core),
            spec,
            hub: Hub::new(),
            syncable: parent.syncable(),
            name,
            parent_token: Cell::new(None),
        });

        if parent.syncable() {
            let weak = Rc::downgrade(&view);
            let token = parent.hub().subscribe(topic::CHANGE, move |event: &Event| {
                if let Some(view) = weak.upgrade() {
                    view.sync(event);
                }
            });
            // Kept for introspection; the subscription dies with the parent.
            view.parent_token.set(Some(token));
        }

        Ok(view)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Token of the subscription this view holds on its parent, when the
    /// parent chain is syncable.
    pub fn parent_token(&self) -> Option<Token> {
        self.parent_token.get()
    }

    /// Apply a parent change event delta by delta, then publish the view's
    /// own rewritten event: applied adds and updates pass through restricted
    /// to the view's columns, and parent removes or filter failures become
    /// canonical Remove deltas carrying the full dropped row.
    pub fn sync(&self, event: &Event) {
        let mut out: Vec<Delta> = Vec::new();
        let mut kinds: Vec<&'static str> = Vec::new();
        let note = |kinds: &mut Vec<&'static str>, kind: &'static str| {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        };

        {
            let mut t = self.core.borrow_mut();
            let id_attribute = t.id_attribute().to_string();

            for delta in &event.deltas {
                match t.position_of(&delta.id) {
                    None => {
                        // Unknown row: only a filter-passing Add grows the view.
                        if delta.is_add() && self.spec.rows.matches(&delta.changed, &id_attribute) {
                            if t.append_row(&delta.changed).is_ok() {
                                let projected = restrict(&delta.changed, &t);
                                out.push(Delta::add(delta.id.clone(), projected));
                                note(&mut kinds, topic::ADD);
                            }
                        }
                    }
                    Some(pos) => {
                        for (name, value) in &delta.changed {
                            if name != &id_attribute && t.has_column(name) {
                                t.set_cell(pos, name, value.clone());
                            }
                        }
                        let current = t.row_at(pos).expect("position in range");
                        if delta.is_remove() || !self.spec.rows.matches(&current, &id_attribute) {
                            let dropped = t.remove_row(pos).expect("position in range");
                            out.push(Delta::remove(delta.id.clone(), dropped));
                            note(&mut kinds, topic::DELETE);
                        } else {
                            let changed = restrict(&delta.changed, &t);
                            if !changed.is_empty() {
                                let old = restrict(&delta.old, &t);
                                out.push(Delta::update(delta.id.clone(), old, changed));
                                note(&mut kinds, topic::UPDATE);
                            }
                        }
                    }
                }
            }
        }

        if out.is_empty() {
            return;
        }
        trace!(
            "view '{}' applied {} of {} deltas from '{}'",
            self.name,
            out.len(),
            event.deltas.len(),
            event.source
        );
        let outgoing = Event::new(self.name.clone(), out);
        for kind in kinds {
            self.hub.publish(kind, &outgoing);
        }
        self.hub.publish(topic::CHANGE, &outgoing);
    }
}

/// A partial row cut down to the columns a table actually holds.
fn restrict(row: &Row, table: &Table) -> Row {
    row.iter()
        .filter(|(name, _)| table.has_column(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

impl TableOps for View {
    fn table(&self) -> Ref<'_, Table> {
        self.core.borrow()
    }
}

impl EventSource for View {
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

/// Sub-view construction for every table-like type.
pub trait ViewExt: TableOps + EventSource + Sized + 'static {
    /// A view keeping only the named columns.
    fn select_columns(self: &Rc<Self>, names: &[&str]) -> Result<Rc<View>> {
        View::select(self, ViewSpec::all().with_columns(names))
    }

    /// A view keeping only the rows the filter admits.
    fn select_rows(self: &Rc<Self>, rows: RowFilter) -> Result<Rc<View>> {
        View::select(self, ViewSpec::all().with_rows(rows))
    }

    /// A view from a full spec.
    fn view(self: &Rc<Self>, spec: ViewSpec) -> Result<Rc<View>> {
        View::select(self, spec)
    }
}

impl<T: TableOps + EventSource + 'static> ViewExt for T {}
