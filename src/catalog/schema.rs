//! Schema objects: columns, indexes and tables.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result, Value};

/// Name of the index every table gets on its primary key.
pub const PRIMARY_INDEX: &str = "PRIMARY";

/// Column types supported by tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int,
    Float,
    /// Fixed-width text of at most this many bytes.
    Char(usize),
}

impl ColumnType {
    /// Packed-format fragment for this type.
    pub fn fmt(&self) -> String {
        match self {
            ColumnType::Int => "i".to_string(),
            ColumnType::Float => "d".to_string(),
            ColumnType::Char(n) => format!("{}s", n),
        }
    }

    /// Does `value` have a shape this column can store?
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ColumnType::Int, Value::Int(_)) => true,
            (ColumnType::Int, Value::BigInt(v)) => i32::try_from(*v).is_ok(),
            (ColumnType::Float, v) => v.as_f64().is_some(),
            (ColumnType::Char(n), Value::Str(s)) => s.len() <= *n,
            _ => false,
        }
    }

    /// Can `value` be compared against this column? Numbers compare with
    /// numeric columns and strings with text, regardless of width.
    pub fn compares_with(&self, value: &Value) -> bool {
        match self {
            ColumnType::Int | ColumnType::Float => value.as_f64().is_some(),
            ColumnType::Char(_) => value.as_str().is_some(),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Int => f.write_str("int"),
            ColumnType::Float => f.write_str("float"),
            ColumnType::Char(n) => write!(f, "char({})", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub primary_key: bool,
    pub unique: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            unique: false,
        }
    }

    /// Mark as (part of) the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Packed-format fragment of this column.
    pub fn fmt(&self) -> String {
        self.column_type.fmt()
    }
}

/// A named index over an ordered list of a table's columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    /// In record order.
    pub columns: Vec<Column>,
    pub indexes: BTreeMap<String, Index>,
}

impl Table {
    /// Full record format, e.g. `<i5s` for `(id int, name char(5))`.
    pub fn fmt(&self) -> String {
        let mut fmt = String::from("<");
        for column in &self.columns {
            fmt.push_str(&column.fmt());
        }
        fmt
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::Catalog(format!("no column {} on table {}", name, self.name)))
    }

    /// Position of a column within a record.
    pub fn column_position(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::Catalog(format!("no column {} on table {}", name, self.name)))
    }

    pub fn index(&self, name: &str) -> Result<&Index> {
        self.indexes
            .get(name)
            .ok_or_else(|| Error::Catalog(format!("no index {} on table {}", name, self.name)))
    }

    /// Record positions of an index's key columns, in key order.
    pub fn key_positions(&self, index: &Index) -> Result<Vec<usize>> {
        index
            .columns
            .iter()
            .map(|c| self.column_position(c))
            .collect()
    }

    /// Key format of an index, e.g. `<i` for `PRIMARY` on `id`.
    pub fn key_format(&self, index: &Index) -> Result<String> {
        let mut fmt = String::from("<");
        for name in &index.columns {
            fmt.push_str(&self.column(name)?.fmt());
        }
        Ok(fmt)
    }

    /// Check a row's arity and value types against the columns.
    pub fn check_row(&self, row: &[Value]) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::Format(format!(
                "table {} has {} columns, got {} values",
                self.name,
                self.columns.len(),
                row.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(row) {
            if !column.column_type.accepts(value) {
                return Err(Error::Format(format!(
                    "value {} does not fit column {} {}",
                    value, column.name, column.column_type
                )));
            }
        }
        Ok(())
    }
}
