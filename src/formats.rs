/// Wire formats.
///
/// Parsers normalize raw input into a `ParsedPayload`: an ordered list of
/// column names plus per-column value vectors, the shape `Dataset::from_payload`
/// consumes. Three formats are supported:
///
/// - delimited text (header row + records, quote-aware),
/// - plain object records (a JSON array of flat objects),
/// - the strict columnar shape `{ "columns": [ { name, type?, data } ] }`.
///
/// Malformed input surfaces as `TableError::Parse`: duplicate header names,
/// per-record field-count mismatches, wrong JSON shapes.

use crate::error::{Result, TableError};
use crate::types::ValueType;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Normalized parser output.
#[derive(Debug, Clone, Default)]
pub struct ParsedPayload {
    /// Column names in wire order.
    pub columns: Vec<String>,
    /// Per-column values, aligned by position.
    pub data: HashMap<String, Vec<Value>>,
}

impl ParsedPayload {
    pub fn row_count(&self) -> usize {
        self.columns
            .first()
            .and_then(|c| self.data.get(c))
            .map_or(0, Vec::len)
    }
}

// ==================== Delimited ====================

/// Parse delimited text. The first record is the header. Fields may be
/// double-quoted; embedded quotes double up; delimiters and newlines inside
/// quotes are literal.
pub fn parse_delimited(text: &str, delimiter: char) -> Result<ParsedPayload> {
    let records = split_records(text, delimiter);
    let mut records = records.into_iter();
    let header = records
        .next()
        .ok_or_else(|| TableError::Parse("input is empty".to_string()))?;
    if header.iter().all(|h| h.is_empty()) {
        return Err(TableError::Parse("header row is empty".to_string()));
    }
    for (i, name) in header.iter().enumerate() {
        if header[..i].contains(name) {
            return Err(TableError::Parse(format!("duplicate header '{}'", name)));
        }
    }

    let mut data: HashMap<String, Vec<Value>> =
        header.iter().map(|h| (h.clone(), Vec::new())).collect();
    for (line, record) in records.enumerate() {
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        if record.len() != header.len() {
            return Err(TableError::Parse(format!(
                "record {} holds {} fields, header has {}",
                line + 1,
                record.len(),
                header.len()
            )));
        }
        for (name, field) in header.iter().zip(record) {
            let value = if field.is_empty() {
                Value::Null
            } else {
                Value::Str(field)
            };
            data.get_mut(name).expect("header key").push(value);
        }
    }

    Ok(ParsedPayload {
        columns: header,
        data,
    })
}

fn split_records(text: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    quoted = false;
                }
            }
            '"' => quoted = true,
            '\r' if !quoted => {}
            '\n' if !quoted => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            c if c == delimiter && !quoted => {
                record.push(std::mem::take(&mut field));
            }
            c => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}

// ==================== Object records ====================

/// Parse a JSON array of flat objects. Column order follows first
/// appearance; records missing a field get null there.
pub fn parse_objects(json: &serde_json::Value) -> Result<ParsedPayload> {
    let records = json
        .as_array()
        .ok_or_else(|| TableError::Parse("expected an array of records".to_string()))?;

    let mut columns: Vec<String> = Vec::new();
    for record in records {
        let fields = record
            .as_object()
            .ok_or_else(|| TableError::Parse("expected flat record objects".to_string()))?;
        for name in fields.keys() {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }
    }

    let mut data: HashMap<String, Vec<Value>> =
        columns.iter().map(|c| (c.clone(), Vec::new())).collect();
    for record in records {
        let fields = record.as_object().expect("checked above");
        for name in &columns {
            let value = fields.get(name).map(Value::from_json).unwrap_or(Value::Null);
            data.get_mut(name).expect("column key").push(value);
        }
    }

    Ok(ParsedPayload { columns, data })
}

// ==================== Strict columnar shape ====================

#[derive(Debug, Serialize, Deserialize)]
pub struct StrictColumn {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub vtype: Option<String>,
    pub data: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StrictPayload {
    pub columns: Vec<StrictColumn>,
}

/// Parse the strict columnar shape. Returns the payload plus any declared
/// column types.
pub fn parse_strict(json: &serde_json::Value) -> Result<(ParsedPayload, HashMap<String, ValueType>)> {
    let strict: StrictPayload = serde_json::from_value(json.clone())
        .map_err(|e| TableError::Parse(format!("strict shape: {}", e)))?;

    let mut columns = Vec::new();
    let mut data = HashMap::new();
    let mut declared = HashMap::new();
    for col in strict.columns {
        if columns.contains(&col.name) {
            return Err(TableError::Parse(format!("duplicate column '{}'", col.name)));
        }
        if let Some(tag) = &col.vtype {
            declared.insert(col.name.clone(), type_by_name(tag)?);
        }
        data.insert(col.name.clone(), col.data.iter().map(Value::from_json).collect());
        columns.push(col.name);
    }
    Ok((ParsedPayload { columns, data }, declared))
}

fn type_by_name(tag: &str) -> Result<ValueType> {
    match tag {
        "mixed" => Ok(ValueType::Mixed),
        "string" => Ok(ValueType::Str),
        "boolean" => Ok(ValueType::Boolean),
        "number" => Ok(ValueType::Number),
        "time" => Ok(ValueType::Time),
        other => Err(TableError::Parse(format!("unknown type tag '{}'", other))),
    }
}
