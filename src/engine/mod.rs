//! Database Executor Trait and Core Types
//!
//! This module defines the executor abstraction the pipeline depends on, plus
//! the data it exchanges: captured schema layouts and dynamically-shaped
//! result sets.
//!
//! # Executor Contract
//! - `introspect_schema` returns every user table (internal/system tables
//!   excluded) with ordered column name and declared type pairs.
//! - `execute` runs a single statement that the guard has already approved.
//!   Passing anything the guard would reject is the caller's bug.

use std::future::Future;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[cfg(feature = "sqlite")]
pub mod sqlite;

/// A single column as declared in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,

    /// Declared type, verbatim from the catalog (may be empty in `SQLite`)
    pub declared_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self { name: name.into(), declared_type: declared_type.into() }
    }
}

/// A user table and its columns in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self { name: name.into(), columns }
    }
}

/// Snapshot of the database's table/column layout
///
/// Immutable once captured. The pipeline shares it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Tables in introspection order
    pub tables: Vec<TableSchema>,

    /// When the snapshot was taken
    pub captured_at: DateTime<Utc>,
}

impl SchemaDefinition {
    /// Capture a snapshot stamped with the current time
    #[must_use]
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables, captured_at: Utc::now() }
    }

    /// Look up a table by exact name
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Render the schema as the text handed to the generator.
    ///
    /// One line per table: `Products (Id INTEGER, Name TEXT)`.
    #[must_use]
    pub fn to_prompt_text(&self) -> String {
        let mut text = String::new();
        for table in &self.tables {
            let columns = table
                .columns
                .iter()
                .map(|c| format!("{} {}", c.name, c.declared_type).trim_end().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            text.push_str(&format!("{} ({columns})\n", table.name));
        }
        text
    }
}

/// Numeric cell value, keeping the integer/real distinction of the driver
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Real(f64),
}

/// A single cell in a result row
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Number(Number),
    Boolean(bool),
    Null,
    Binary(Vec<u8>),
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Text(s) => serializer.serialize_str(s),
            Self::Number(Number::Integer(i)) => serializer.serialize_i64(*i),
            // NaN/Infinity have no JSON form
            Self::Number(Number::Real(f)) if !f.is_finite() => serializer.serialize_none(),
            Self::Number(Number::Real(f)) => serializer.serialize_f64(*f),
            Self::Boolean(b) => serializer.serialize_bool(*b),
            Self::Null => serializer.serialize_none(),
            Self::Binary(bytes) => serializer
                .serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes)),
        }
    }
}

/// One result row: ordered `(column name, value)` pairs
///
/// Serializes as a JSON object whose keys keep column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    cells: Vec<(String, Value)>,
}

impl Row {
    #[must_use]
    pub const fn new(cells: Vec<(String, Value)>) -> Self {
        Self { cells }
    }

    /// Value of the first column with this name
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells.iter().find(|(name, _)| name == column).map(|(_, value)| value)
    }

    #[must_use]
    pub fn cells(&self) -> &[(String, Value)] {
        &self.cells
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, value) in &self.cells {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Materialized query result
///
/// Owned by the caller once returned. Serializes as the array of row objects.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    /// Column names in select-list order
    pub columns: Vec<String>,

    pub rows: Vec<Row>,
}

impl ResultSet {
    #[must_use]
    pub const fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.rows)
    }
}

/// Database executor trait
///
/// Implementations must be shareable across concurrently handled requests.
pub trait Executor: Send + Sync {
    /// Capture the current table/column layout
    fn introspect_schema(&self) -> impl Future<Output = Result<SchemaDefinition>> + Send;

    /// Execute one guard-approved read-only statement and materialize its rows
    fn execute(&self, sql: &str) -> impl Future<Output = Result<ResultSet>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_schema() -> SchemaDefinition {
        SchemaDefinition::new(vec![
            TableSchema::new(
                "Products",
                vec![Column::new("Id", "INTEGER"), Column::new("Name", "TEXT")],
            ),
            TableSchema::new("Orders", vec![Column::new("Id", "INTEGER"), Column::new("Note", "")]),
        ])
    }

    #[test]
    fn test_prompt_text_one_line_per_table() {
        let text = sample_schema().to_prompt_text();
        assert_eq!(text, "Products (Id INTEGER, Name TEXT)\nOrders (Id INTEGER, Note)\n");
    }

    #[test]
    fn test_table_lookup() {
        let schema = sample_schema();
        assert_eq!(schema.table("Orders").map(|t| t.columns.len()), Some(2));
        assert!(schema.table("orders").is_none());
    }

    #[test]
    fn test_row_serializes_in_column_order() {
        let row = Row::new(vec![
            ("zeta".to_string(), Value::Number(Number::Integer(1))),
            ("alpha".to_string(), Value::Text("a".to_string())),
            ("mid".to_string(), Value::Null),
        ]);
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"zeta":1,"alpha":"a","mid":null}"#);
    }

    #[test]
    fn test_value_variants_to_json() {
        let row = Row::new(vec![
            ("b".to_string(), Value::Boolean(true)),
            ("r".to_string(), Value::Number(Number::Real(1.5))),
            ("nan".to_string(), Value::Number(Number::Real(f64::NAN))),
            ("blob".to_string(), Value::Binary(vec![0x01, 0x02, 0x03])),
        ]);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["b"], true);
        assert_eq!(json["r"], 1.5);
        assert!(json["nan"].is_null());
        assert_eq!(json["blob"], "AQID");
    }

    #[test]
    fn test_result_set_serializes_as_row_array() {
        let rows = ResultSet::new(
            vec!["Name".to_string()],
            vec![
                Row::new(vec![("Name".to_string(), Value::Text("Tea".to_string()))]),
                Row::new(vec![("Name".to_string(), Value::Text("Coffee".to_string()))]),
            ],
        );
        assert_eq!(rows.len(), 2);
        let json = serde_json::to_value(&rows).unwrap();
        assert_eq!(json, serde_json::json!([{"Name": "Tea"}, {"Name": "Coffee"}]));
    }

    #[test]
    fn test_row_get() {
        let row = Row::new(vec![("Name".to_string(), Value::Text("Tea".to_string()))]);
        assert_eq!(row.get("Name"), Some(&Value::Text("Tea".to_string())));
        assert_eq!(row.get("Price"), None);
        assert_eq!(row.len(), 1);
    }
}
