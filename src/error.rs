/// Error taxonomy for table operations.
///
/// Every fallible operation reports one of these variants synchronously from
/// the offending call. A failed `add`/`update` leaves the table in its
/// pre-call state; validation runs before any column is touched.

use std::fmt;

/// Canonical error type for the crate.
#[derive(Debug, Clone, PartialEq)]
pub enum TableError {
    /// A value failed its column's type test on add/update.
    TypeMismatch { column: String, value: String },
    /// An added row's identity collides with an existing row.
    DuplicateId(String),
    /// A filter, sort, aggregate, or group referenced a column that does not exist.
    UnknownColumn(String),
    /// A reactive dependent fired against a parent table that no longer exists.
    MissingParent,
    /// An aggregate was asked for a type that does not support it.
    AggregationType { column: String, reason: &'static str },
    /// Columns diverged in length — an integrity violation.
    RowLengthMismatch { column: String, expected: usize, actual: usize },
    /// Malformed wire input (wrong field count, duplicate headers, bad JSON shape).
    Parse(String),
    /// `sort` was called with no comparator configured or supplied.
    NoComparator,
    /// A value was supplied for a computed column.
    ComputedColumn(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TableError>;

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::TypeMismatch { column, value } => {
                write!(f, "value '{}' fails the type test of column '{}'", value, column)
            }
            TableError::DuplicateId(id) => {
                write!(f, "a row with id '{}' already exists", id)
            }
            TableError::UnknownColumn(name) => {
                write!(f, "column '{}' not found", name)
            }
            TableError::MissingParent => {
                write!(f, "parent table is gone")
            }
            TableError::AggregationType { column, reason } => {
                write!(f, "cannot aggregate column '{}': {}", column, reason)
            }
            TableError::RowLengthMismatch { column, expected, actual } => {
                write!(
                    f,
                    "column '{}' holds {} values but the table length is {}",
                    column, actual, expected
                )
            }
            TableError::Parse(msg) => write!(f, "parse error: {}", msg),
            TableError::NoComparator => write!(f, "sort requires a comparator"),
            TableError::ComputedColumn(name) => {
                write!(f, "column '{}' is computed and cannot be set", name)
            }
        }
    }
}

impl std::error::Error for TableError {}
