/// Value cells and row identity.
///
/// A `Value` is a single cell in a column. Cells are dynamically tagged; the
/// column's `ValueType` decides which tags are admissible and how they
/// compare. `RowId` is the hashable identity key derived from whatever value
/// lives in a table's identity column.

use std::collections::HashMap;
use std::fmt;

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    /// An instant as milliseconds since the Unix epoch.
    Time(i64),
    /// A list of values; used by provenance columns and `mixed` columns.
    List(Vec<Value>),
}

/// A materialized row: column name to cell value, identity column included.
pub type Row = HashMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<i64> {
        match self {
            Value::Time(ms) => Some(*ms),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// The identity key for this value. Integral numbers and times key
    /// numerically; everything else keys through its string form.
    pub fn key(&self) -> RowId {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => RowId::Num(*n as i64),
            Value::Time(ms) => RowId::Num(*ms),
            Value::Str(s) => RowId::Str(s.clone()),
            Value::Bool(b) => RowId::Str(b.to_string()),
            other => RowId::Str(format!("{}", other)),
        }
    }

    /// Convert to a JSON value for the object wire shape.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Time(ms) => serde_json::Value::Number((*ms).into()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }

    /// Convert from a JSON value. Numbers arrive as `Number`, never `Time`;
    /// time detection is the type layer's job.
    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(_) => Value::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Time(ms) => write!(f, "{}", ms),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Hashable identity key for a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowId {
    Num(i64),
    Str(String),
}

impl RowId {
    /// The identity value as stored in the identity column.
    pub fn to_value(&self) -> Value {
        match self {
            RowId::Num(n) => Value::Number(*n as f64),
            RowId::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Num(n) => write!(f, "{}", n),
            RowId::Str(s) => write!(f, "{}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        assert_eq!(Value::Number(4.5).as_f64(), Some(4.5));
        assert_eq!(Value::Str("hi".to_string()).as_str(), Some("hi"));
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Time(1_000).as_time(), Some(1_000));
        assert!(Value::Null.is_null());
        assert_eq!(Value::Null.as_f64(), None);
    }

    #[test]
    fn test_identity_keys() {
        assert_eq!(Value::Number(7.0).key(), RowId::Num(7));
        assert_eq!(Value::Str("a1".to_string()).key(), RowId::Str("a1".to_string()));
        assert_eq!(Value::Time(500).key(), RowId::Num(500));
        // Fractional ids fall back to string keys.
        assert_eq!(Value::Number(1.5).key(), RowId::Str("1.5".to_string()));
    }

    #[test]
    fn test_json_round_trip() {
        let v = Value::from_json(&serde_json::json!(3.25));
        assert_eq!(v, Value::Number(3.25));
        assert_eq!(v.to_json(), serde_json::json!(3.25));

        let v = Value::from_json(&serde_json::json!(["a", 1]));
        assert_eq!(
            v,
            Value::List(vec![Value::Str("a".to_string()), Value::Number(1.0)])
        );
    }
}
