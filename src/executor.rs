//! Database execution boundary
//!
//! The recovery loop only ever sees a driver's error text, so the boundary
//! error is a plain message. `SqliteExecutor` is the bundled implementation.

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Error raised by a database driver. `message` is the only structured data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExecutionError {}

impl From<rusqlite::Error> for ExecutionError {
    fn from(err: rusqlite::Error) -> Self {
        ExecutionError::new(err.to_string())
    }
}

/// A single column value in a result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Integer(v) => write!(f, "{}", v),
            CellValue::Real(v) => write!(f, "{}", v),
            CellValue::Text(v) => write!(f, "{}", v),
            CellValue::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<ValueRef<'_>> for CellValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(v) => CellValue::Integer(v),
            ValueRef::Real(v) => CellValue::Real(v),
            ValueRef::Text(v) => CellValue::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => CellValue::Blob(v.to_vec()),
        }
    }
}

/// Fully drained result of a successful execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl ResultSet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Something that can run one SQL statement and drain its rows.
pub trait QueryExecutor {
    fn run(&mut self, sql: &str) -> std::result::Result<ResultSet, ExecutionError>;
}

impl<F> QueryExecutor for F
where
    F: FnMut(&str) -> std::result::Result<ResultSet, ExecutionError>,
{
    fn run(&mut self, sql: &str) -> std::result::Result<ResultSet, ExecutionError> {
        self(sql)
    }
}

/// Executes statements against a SQLite database.
pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn open(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        Ok(Self::new(Connection::open(path)?))
    }

    pub fn open_in_memory() -> crate::error::Result<Self> {
        Ok(Self::new(Connection::open_in_memory()?))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl QueryExecutor for SqliteExecutor {
    fn run(&mut self, sql: &str) -> std::result::Result<ResultSet, ExecutionError> {
        debug!("Executing SQL: {}", sql);
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(CellValue::from(row.get_ref(idx)?));
            }
            rows.push(values);
        }

        Ok(ResultSet { columns, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_executor_drains_rows() {
        let mut exec = SqliteExecutor::open_in_memory().unwrap();
        exec.connection()
            .execute_batch(
                "CREATE TABLE t (id INTEGER, name TEXT, price REAL);
                 INSERT INTO t VALUES (1, 'a', 1.5), (2, NULL, 2.0);",
            )
            .unwrap();

        let result = exec.run("SELECT id, name, price FROM t ORDER BY id").unwrap();
        assert_eq!(result.columns, vec!["id", "name", "price"]);
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.rows[0][0], CellValue::Integer(1));
        assert_eq!(result.rows[1][1], CellValue::Null);
        assert_eq!(result.rows[1][2], CellValue::Real(2.0));
    }

    #[test]
    fn test_sqlite_error_message_is_preserved() {
        let mut exec = SqliteExecutor::open_in_memory().unwrap();
        exec.connection()
            .execute_batch("CREATE TABLE t (id INTEGER);")
            .unwrap();

        let err = exec.run("SELECT t.missing FROM t").unwrap_err();
        assert!(err.message.contains("no such column: t.missing"), "{}", err.message);
    }

    #[test]
    fn test_closure_executor() {
        let mut calls = 0;
        let mut exec = |_sql: &str| {
            calls += 1;
            Ok::<_, ExecutionError>(ResultSet {
                columns: vec!["x".to_string()],
                rows: vec![],
            })
        };
        assert!(exec.run("SELECT 1").unwrap().is_empty());
        drop(exec);
        assert_eq!(calls, 1);
    }
}
