/// Change records exchanged between a table and its dependents.
///
/// A `Delta` describes one row's transition as a pair of partial rows: the
/// pre-image of the fields that changed and their post-image. Classification
/// falls out of which side is empty. An `Event` batches the deltas of one
/// mutating operation; each propagation hop constructs a fresh event for its
/// own subscribers rather than rewriting the incoming one.

use crate::value::{Row, RowId};

/// Channel names published by tables and their dependents.
pub mod topic {
    pub const ADD: &str = "add";
    pub const UPDATE: &str = "update";
    pub const REMOVE: &str = "remove";
    /// A view drops a row: the parent removed it or it no longer passes the
    /// view's row filter.
    pub const DELETE: &str = "delete";
    pub const RESET: &str = "reset";
    pub const SORT: &str = "sort";
    pub const CHANGE: &str = "change";
}

/// One row's pre/post field-change record.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub id: RowId,
    /// Pre-image of only the fields that changed. Empty for an Add.
    pub old: Row,
    /// Post-image of the changed fields. Empty for a Remove.
    pub changed: Row,
}

impl Delta {
    pub fn add(id: RowId, row: Row) -> Self {
        Delta {
            id,
            old: Row::new(),
            changed: row,
        }
    }

    pub fn remove(id: RowId, row: Row) -> Self {
        Delta {
            id,
            old: row,
            changed: Row::new(),
        }
    }

    pub fn update(id: RowId, old: Row, changed: Row) -> Self {
        Delta { id, old, changed }
    }

    pub fn is_add(&self) -> bool {
        self.old.is_empty() && !self.changed.is_empty()
    }

    pub fn is_remove(&self) -> bool {
        self.changed.is_empty() && !self.old.is_empty()
    }

    pub fn is_update(&self) -> bool {
        !self.old.is_empty() && !self.changed.is_empty()
    }
}

/// An ordered batch of deltas from one operation on one table.
#[derive(Debug, Clone)]
pub struct Event {
    pub deltas: Vec<Delta>,
    /// Name of the table the batch came from.
    pub source: String,
}

impl Event {
    pub fn new(source: impl Into<String>, deltas: Vec<Delta>) -> Self {
        Event {
            deltas,
            source: source.into(),
        }
    }

    pub fn empty(source: impl Into<String>) -> Self {
        Event::new(source, Vec::new())
    }
}
