//! DuckDB access for asksql
//!
//! Owns the process-wide database handle and provides the two database
//! operations the question pipeline needs: catalog introspection and
//! execution of validated, read-only SQL.

use asksql_guard::ValidatedSql;
use duckdb::{AccessMode, Config, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

mod convert;
pub mod demo;

/// One result row: column name to JSON value, in select-list order
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Path value that selects an in-memory database
pub const IN_MEMORY: &str = ":memory:";

#[derive(Debug, Error)]
pub enum DuckError {
    #[error("Error fetching schema: {0}")]
    Introspection(String),

    #[error("{0}")]
    Query(#[from] duckdb::Error),

    #[error("database handle is unavailable after a panic in another query")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

/// Shared DuckDB database.
///
/// Keeps a root connection open for the life of the process. Every operation
/// works on its own connection cloned from the root and dropped when the
/// operation returns, whichever way it returns.
pub struct Database {
    root: Mutex<Connection>,
    location: String,
}

impl Database {
    /// Open a database file, or an in-memory database for [`IN_MEMORY`]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DuckError> {
        let location = path.as_ref().to_string_lossy().to_string();
        let conn = if location == IN_MEMORY {
            Connection::open_in_memory()?
        } else {
            Connection::open(&path)?
        };
        Ok(Self::from_connection(conn, location))
    }

    /// Open an existing database file in DuckDB's read-only access mode
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self, DuckError> {
        let location = path.as_ref().to_string_lossy().to_string();
        let config = Config::default().access_mode(AccessMode::ReadOnly)?;
        let conn = Connection::open_with_flags(&path, config)?;
        Ok(Self::from_connection(conn, location))
    }

    pub fn in_memory() -> Result<Self, DuckError> {
        Self::open(IN_MEMORY)
    }

    fn from_connection(conn: Connection, location: String) -> Self {
        Self {
            root: Mutex::new(conn),
            location,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Scoped connection to the shared database
    pub fn connect(&self) -> Result<Connection, DuckError> {
        let root = self.root.lock().map_err(|_| DuckError::Poisoned)?;
        Ok(root.try_clone()?)
    }

    /// List every base table of the `main` schema with its columns and
    /// declared types
    pub fn introspect(&self) -> Result<Vec<TableSchema>, DuckError> {
        let introspection = |e: duckdb::Error| DuckError::Introspection(e.to_string());
        let conn = self.connect()?;

        let mut stmt = conn
            .prepare(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = 'main' AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
            )
            .map_err(introspection)?;
        let table_names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .map_err(introspection)?
            .collect::<duckdb::Result<Vec<_>>>()
            .map_err(introspection)?;

        let mut column_stmt = conn
            .prepare(
                "SELECT column_name, data_type FROM information_schema.columns \
                 WHERE table_schema = 'main' AND table_name = ? \
                 ORDER BY ordinal_position",
            )
            .map_err(introspection)?;

        let mut tables = Vec::with_capacity(table_names.len());
        for name in table_names {
            let columns = column_stmt
                .query_map([name.as_str()], |row| {
                    Ok(ColumnSchema {
                        name: row.get(0)?,
                        data_type: row.get(1)?,
                    })
                })
                .map_err(introspection)?
                .collect::<duckdb::Result<Vec<_>>>()
                .map_err(introspection)?;
            tables.push(TableSchema { name, columns });
        }

        tracing::debug!(database = %self.location, tables = tables.len(), "Introspected catalog");
        Ok(tables)
    }

    /// Run a validated statement and materialize every row as a [`Record`].
    ///
    /// Temporal values come back as text, so the records serialize to JSON
    /// without further conversion.
    pub fn execute(&self, sql: &ValidatedSql) -> Result<Vec<Record>, DuckError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql.as_str())?;
        let mut rows = stmt.query([])?;

        let mut columns: Vec<String> = Vec::new();
        let mut records = Vec::new();

        while let Some(row) = rows.next()? {
            if columns.is_empty() {
                let statement = row.as_ref();
                for i in 0..statement.column_count() {
                    columns.push(statement.column_name(i)?.to_string());
                }
            }

            let mut record = Record::new();
            for (i, name) in columns.iter().enumerate() {
                record.insert(name.clone(), convert::to_json(row.get_ref(i)?));
            }
            records.push(record);
        }

        Ok(records)
    }
}
