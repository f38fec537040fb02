//! Client table - immutable in-memory copy of the client CSV
//!
//! Loaded once at startup and indexed by the unique client identifier.
//! Column types are inferred the way a dataframe reader does it, so that
//! the model sees the same values it was trained on.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

/// Tokens read as a missing value
const NA_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan",
    "1.#IND", "1.#QNAN", "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a",
    "nan", "null",
];

#[derive(Debug, Error)]
pub enum TableError {
    #[error("client file not found at {0}")]
    NotFound(String),

    #[error("failed to read client file: {0}")]
    Csv(#[from] csv::Error),

    #[error("id column {0} missing from client file")]
    MissingIdColumn(String),

    #[error("id column {column} has non-integer value {value:?} on line {line}")]
    InvalidId { column: String, value: String, line: usize },

    #[error("duplicate client id {0}")]
    DuplicateId(i64),
}

/// A single cell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Int32(i32),
    Float(f64),
    Float32(f32),
    Text(String),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(v) => v.is_nan(),
            Value::Float32(v) => v.is_nan(),
            _ => false,
        }
    }

    /// Numeric view; missing cells read as NaN, text has none
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Null => Some(f64::NAN),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(v) => Some(*v as f64),
            Value::Int32(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Float32(v) => Some(*v as f64),
            Value::Text(_) => None,
        }
    }

    /// Truthiness of an indicator cell
    pub fn is_set(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Text(s) => !s.is_empty(),
            other => other.as_f64().map(|v| !v.is_nan() && v != 0.0).unwrap_or(false),
        }
    }
}

/// Inferred column type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int,
    Float,
    Text,
}

fn is_na(raw: &str) -> bool {
    NA_TOKENS.contains(&raw)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "True" | "TRUE" | "true" => Some(true),
        "False" | "FALSE" | "false" => Some(false),
        _ => None,
    }
}

/// Client id; integral floats such as `100001.0` are accepted
fn parse_id(raw: &str) -> Option<i64> {
    if let Ok(id) = raw.parse::<i64>() {
        return Some(id);
    }
    let value = raw.parse::<f64>().ok()?;
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

fn infer_kind(cells: &[&str]) -> ColumnKind {
    let present: Vec<&str> = cells.iter().copied().filter(|c| !is_na(c)).collect();
    let has_missing = present.len() < cells.len();

    if present.is_empty() {
        return ColumnKind::Float;
    }
    // Boolean holes stay Null
    if present.iter().all(|c| parse_bool(c).is_some()) {
        return ColumnKind::Bool;
    }
    if present.iter().all(|c| c.parse::<i64>().is_ok()) {
        // Integers with holes are promoted so the holes can be NaN
        return if has_missing { ColumnKind::Float } else { ColumnKind::Int };
    }
    if present.iter().all(|c| c.parse::<f64>().is_ok()) {
        return ColumnKind::Float;
    }
    ColumnKind::Text
}

fn parse_cell(raw: &str, kind: ColumnKind) -> Value {
    if is_na(raw) {
        return match kind {
            ColumnKind::Float => Value::Float(f64::NAN),
            _ => Value::Null,
        };
    }
    match kind {
        ColumnKind::Bool => parse_bool(raw).map(Value::Bool).unwrap_or(Value::Null),
        ColumnKind::Int => raw.parse().map(Value::Int).unwrap_or(Value::Null),
        ColumnKind::Float => raw.parse().map(Value::Float).unwrap_or(Value::Float(f64::NAN)),
        ColumnKind::Text => Value::Text(raw.to_string()),
    }
}

/// Named column of a frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameColumn {
    pub name: String,
    pub values: Vec<Value>,
}

/// Column-major selection of client rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub columns: Vec<FrameColumn>,
}

impl Frame {
    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn column(&self, name: &str) -> Option<&FrameColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut FrameColumn> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Cell lookup; `None` for unknown column or row
    pub fn value(&self, row: usize, name: &str) -> Option<&Value> {
        self.column(name).and_then(|c| c.values.get(row))
    }

    /// One row as an ordered name -> value map
    pub fn row_map(&self, row: usize) -> serde_json::Map<String, serde_json::Value> {
        self.columns
            .iter()
            .filter_map(|c| {
                let cell = c.values.get(row)?;
                let json = serde_json::to_value(cell).unwrap_or(serde_json::Value::Null);
                Some((c.name.clone(), json))
            })
            .collect()
    }
}

/// Immutable client table
#[derive(Debug)]
pub struct ClientTable {
    id_column: String,
    ids: Vec<i64>,
    positions: HashMap<i64, usize>,
    columns: Vec<FrameColumn>,
}

impl ClientTable {
    /// Load the client CSV from disk
    pub fn load(path: &Path, id_column: &str) -> Result<Self, TableError> {
        if !path.exists() {
            return Err(TableError::NotFound(path.display().to_string()));
        }
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;
        let table = Self::from_reader(reader, id_column)?;

        tracing::info!(
            "Loaded {} clients ({} columns) from {}",
            table.len(),
            table.columns.len(),
            path.display()
        );
        Ok(table)
    }

    /// Parse a client table from any CSV source
    pub fn from_reader<R: std::io::Read>(
        mut reader: csv::Reader<R>,
        id_column: &str,
    ) -> Result<Self, TableError> {
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let id_idx = headers
            .iter()
            .position(|h| h == id_column)
            .ok_or_else(|| TableError::MissingIdColumn(id_column.to_string()))?;

        let records: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>()?;

        let mut ids = Vec::with_capacity(records.len());
        let mut positions = HashMap::with_capacity(records.len());
        for (row, record) in records.iter().enumerate() {
            let raw = record.get(id_idx).unwrap_or("");
            let id = parse_id(raw).ok_or_else(|| TableError::InvalidId {
                column: id_column.to_string(),
                value: raw.to_string(),
                line: row + 2,
            })?;
            if positions.insert(id, row).is_some() {
                return Err(TableError::DuplicateId(id));
            }
            ids.push(id);
        }

        let columns = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != id_idx)
            .map(|(idx, name)| {
                let cells: Vec<&str> = records.iter().map(|r| r.get(idx).unwrap_or("")).collect();
                let kind = infer_kind(&cells);
                FrameColumn {
                    name: name.clone(),
                    values: cells.iter().map(|c| parse_cell(c, kind)).collect(),
                }
            })
            .collect();

        Ok(Self {
            id_column: id_column.to_string(),
            ids,
            positions,
            columns,
        })
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// All client ids in file order
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, client_id: i64) -> bool {
        self.positions.contains_key(&client_id)
    }

    /// Data columns, excluding the id column
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Non-missing values of a column, in row order
    pub fn column_values(&self, name: &str) -> Option<Vec<Value>> {
        let column = self.columns.iter().find(|c| c.name == name)?;
        Some(column.values.iter().filter(|v| !v.is_missing()).cloned().collect())
    }

    /// Raw stored cell of one client
    pub fn cell(&self, client_id: i64, name: &str) -> Option<&Value> {
        let row = *self.positions.get(&client_id)?;
        self.columns
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.values.get(row))
    }

    /// Single-row frame for one client, id column first
    pub fn client_frame(&self, client_id: i64) -> Option<Frame> {
        let row = *self.positions.get(&client_id)?;
        Some(self.select(&[row]))
    }

    /// Frame of the first `n` rows, id column first
    pub fn head(&self, n: usize) -> Frame {
        let rows: Vec<usize> = (0..n.min(self.len())).collect();
        self.select(&rows)
    }

    fn select(&self, rows: &[usize]) -> Frame {
        let mut columns = Vec::with_capacity(self.columns.len() + 1);
        columns.push(FrameColumn {
            name: self.id_column.clone(),
            values: rows.iter().map(|&r| Value::Int(self.ids[r])).collect(),
        });
        for column in &self.columns {
            columns.push(FrameColumn {
                name: column.name.clone(),
                values: rows.iter().map(|&r| column.values[r].clone()).collect(),
            });
        }
        Frame { columns }
    }
}
