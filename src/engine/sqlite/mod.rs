//! `SQLite` Executor Implementation
//!
//! This module implements the `Executor` trait for `SQLite` database files.
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver); calls run on the blocking pool so a
//!   slow query never stalls the async runtime
//! - Introspection and execution open the file read-only, and a statement the
//!   driver does not report as read-only is refused before it runs
//! - Internal `sqlite_%` tables are excluded from introspection
//! - Row limits enforced in application code
//! - Seeding (`seed_database`) is the only read-write path and is never
//!   reachable from the pipeline

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row as SqliteRow};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::engine::{Column, Executor, Number, ResultSet, Row, SchemaDefinition, TableSchema, Value};
use crate::error::{Result, SentryError};

/// `SQLite` executor bound to one database file
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    file: PathBuf,
    busy_timeout: Option<Duration>,
    max_rows: Option<usize>,
}

impl SqliteExecutor {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into(), busy_timeout: None, max_rows: None }
    }

    #[must_use]
    pub const fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }

    fn open_read_only(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(&self.file, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| {
                SentryError::connection_failed(format!("Failed to open SQLite database: {e}"))
            })?;

        if let Some(timeout) = self.busy_timeout {
            conn.busy_timeout(timeout).map_err(|e| {
                SentryError::connection_failed(format!("Failed to set busy timeout: {e}"))
            })?;
        }

        Ok(conn)
    }
}

impl Executor for SqliteExecutor {
    async fn introspect_schema(&self) -> Result<SchemaDefinition> {
        let this = self.clone();
        let schema = tokio::task::spawn_blocking(move || {
            let conn = this.open_read_only()?;
            introspect(&conn)
        })
        .await
        .map_err(|e| SentryError::execution_failed(format!("Introspection task failed: {e}")))??;

        let names: Vec<&str> = schema.tables.iter().map(|t| t.name.as_str()).collect();
        info!(count = names.len(), tables = %names.join(", "), "Schema discovery complete");
        Ok(schema)
    }

    async fn execute(&self, sql: &str) -> Result<ResultSet> {
        let this = self.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = this.open_read_only()?;
            execute_query(&conn, &sql, this.max_rows)
        })
        .await
        .map_err(|e| SentryError::execution_failed(format!("Execution task failed: {e}")))?
    }
}

/// Read every user table and its columns
fn introspect(conn: &Connection) -> Result<SchemaDefinition> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table'
             AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .map_err(|e| SentryError::execution_failed(format!("Failed to query tables: {e}")))?;

    let table_names: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| SentryError::execution_failed(format!("Failed to fetch table names: {e}")))?
        .collect::<std::result::Result<Vec<String>, _>>()
        .map_err(|e| SentryError::execution_failed(format!("Failed to collect table names: {e}")))?;

    let mut tables = Vec::with_capacity(table_names.len());
    for name in table_names {
        let columns = introspect_columns(conn, &name)?;
        tables.push(TableSchema::new(name, columns));
    }

    Ok(SchemaDefinition::new(tables))
}

/// Columns of one table in declaration order
fn introspect_columns(conn: &Connection, table_name: &str) -> Result<Vec<Column>> {
    let mut stmt = conn
        .prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(|e| {
            SentryError::execution_failed(format!("Failed to prepare table_info for {table_name}: {e}"))
        })?;

    let columns = stmt
        .query_map([table_name], |row| {
            Ok(Column { name: row.get::<_, String>(0)?, declared_type: row.get::<_, String>(1)? })
        })
        .map_err(|e| {
            SentryError::execution_failed(format!("Failed to query columns for {table_name}: {e}"))
        })?
        .collect::<std::result::Result<Vec<Column>, _>>()
        .map_err(|e| {
            SentryError::execution_failed(format!("Failed to collect columns for {table_name}: {e}"))
        });
    columns
}

/// Execute query and materialize every row
fn execute_query(conn: &Connection, sql: &str, max_rows: Option<usize>) -> Result<ResultSet> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| SentryError::execution_failed(format!("Failed to prepare query: {e}")))?;

    if !stmt.readonly() {
        return Err(SentryError::execution_failed("Statement is not read-only"));
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();

    let mut rows = stmt
        .query([])
        .map_err(|e| SentryError::execution_failed(format!("Failed to execute query: {e}")))?;

    let mut materialized = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| SentryError::execution_failed(format!("Failed to fetch row: {e}")))?
    {
        if max_rows.is_some_and(|max| materialized.len() >= max) {
            debug!(max_rows = ?max_rows, "Row limit reached, truncating result");
            break;
        }
        let row = convert_row(&columns, row)
            .map_err(|e| SentryError::execution_failed(format!("Failed to read row: {e}")))?;
        materialized.push(row);
    }

    Ok(ResultSet::new(columns, materialized))
}

fn convert_row(columns: &[String], row: &SqliteRow) -> rusqlite::Result<Row> {
    let mut cells = Vec::with_capacity(columns.len());
    for (idx, name) in columns.iter().enumerate() {
        cells.push((name.clone(), convert_value(row.get_ref(idx)?, idx)?));
    }
    Ok(Row::new(cells))
}

fn convert_value(value: ValueRef<'_>, idx: usize) -> rusqlite::Result<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(Number::Integer(i)),
        ValueRef::Real(f) => Value::Number(Number::Real(f)),
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
            })?;
            Value::Text(text.to_string())
        }
        ValueRef::Blob(bytes) => Value::Binary(bytes.to_vec()),
    })
}

/// Run an initialization script against a database file, creating it if needed
///
/// Administrative only: this opens the file read-write.
pub fn seed_database(file: &Path, script: &str) -> Result<()> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let conn = Connection::open_with_flags(file, flags).map_err(|e| {
        SentryError::connection_failed(format!("Failed to open SQLite database: {e}"))
    })?;

    conn.execute_batch(script)
        .map_err(|e| SentryError::execution_failed(format!("Initialization script failed: {e}")))?;

    info!(file = %file.display(), "Database initialized");
    Ok(())
}
