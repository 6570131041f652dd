//! Schema context: tables and their columns, read-only.

use crate::error::{MendError, Result};
use itertools::Itertools;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
}

impl TableSchema {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub tables: Vec<TableSchema>,
}

impl SchemaInfo {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| MendError::Schema(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| MendError::Schema(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Introspect every user table of a SQLite database.
    pub fn from_sqlite(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let mut info = conn.prepare(&format!("PRAGMA table_info(\"{}\")", name.replace('"', "\"\"")))?;
            let columns = info
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            tables.push(TableSchema { name, columns });
        }
        Ok(Self { tables })
    }

    /// Case-insensitive; a `schema.` prefix on `name` is ignored.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        let bare = name.rsplit('.').next().unwrap_or(name);
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(bare))
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Compact text form used in LLM prompts.
    pub fn describe(&self) -> String {
        self.tables
            .iter()
            .map(|t| format!("{}({})", t.name, t.columns.join(", ")))
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_sqlite_lists_tables_and_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE dim_product (product_code TEXT, product TEXT);
             CREATE TABLE dim_customer (customer_code TEXT, customer TEXT, market TEXT);",
        )
        .unwrap();
        let schema = SchemaInfo::from_sqlite(&conn).unwrap();
        assert_eq!(schema.tables.len(), 2);
        assert_eq!(schema.tables[0].name, "dim_customer");
        assert!(schema.table("gdb041.DIM_PRODUCT").unwrap().has_column("Product"));
        assert_eq!(
            schema.describe(),
            "dim_customer(customer_code, customer, market)\ndim_product(product_code, product)"
        );
    }

    #[test]
    fn test_json_round() {
        let json = r#"{"tables":[{"name":"fact_sales_monthly","columns":["sold_quantity"]}]}"#;
        let schema: SchemaInfo = serde_json::from_str(json).unwrap();
        assert!(schema.table("fact_sales_monthly").is_some());
        assert!(schema.table("missing").is_none());
    }

    #[test]
    fn test_load_missing_file_is_schema_error() {
        let err = SchemaInfo::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, MendError::Schema(_)));
    }
}
