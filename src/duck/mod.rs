//! DuckDB-backed store. One `Store` owns one connection; every writer
//! in the pipeline goes through it, so table replacement stays atomic
//! and callers never assemble row values into SQL text themselves.

use anyhow::{bail, Context, Result};
use duckdb::types::Value;
use duckdb::{appender_params_from_iter, params, Connection};
use std::path::Path;
use tracing::debug;

/// Staging tables carry this prefix while a replace is in flight.
/// Canonical table names start with a letter, so they can never collide.
const STAGING_PREFIX: &str = "_stg_";

/// Storage type a coerced column lands as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
}

impl ColumnType {
    pub fn sql(self) -> &'static str {
        match self {
            ColumnType::Integer => "BIGINT",
            ColumnType::Float => "DOUBLE",
            ColumnType::Text => "VARCHAR",
        }
    }
}

/// A single typed cell. `Null` is the missing-value sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    fn to_value(&self) -> Value {
        match self {
            CellValue::Null => Value::Null,
            CellValue::Int(v) => Value::BigInt(*v),
            CellValue::Float(v) => Value::Double(*v),
            CellValue::Text(s) => Value::Text(s.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TypedColumn {
    pub name: String,
    pub ty: ColumnType,
}

/// Fully coerced table ready to persist: column order is row cell order.
#[derive(Debug, Clone)]
pub struct TypedTable {
    pub columns: Vec<TypedColumn>,
    pub rows: Vec<Vec<CellValue>>,
}

impl TypedTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Insert a column at `at` (clamped) holding the same value in every row.
    pub fn insert_const_column(&mut self, at: usize, name: &str, ty: ColumnType, value: CellValue) {
        let at = at.min(self.columns.len());
        self.columns.insert(
            at,
            TypedColumn {
                name: name.to_string(),
                ty,
            },
        );
        for row in &mut self.rows {
            row.insert(at, value.clone());
        }
    }
}

/// Double-quote an identifier for DuckDB, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Session handle over a single DuckDB database.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) a database file on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("opening duckdb database at {}", path.display()))?;
        Ok(Store { conn })
    }

    /// In-memory database, used by tests and one-off inspections.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory duckdb database")?;
        Ok(Store { conn })
    }

    /// Raw connection escape hatch for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_name = ? AND table_type = 'BASE TABLE'",
                params![name],
                |r| r.get(0),
            )
            .with_context(|| format!("checking for table {name}"))?;
        Ok(count > 0)
    }

    /// Names of all base tables, staging leftovers excluded.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_type = 'BASE TABLE' ORDER BY table_name",
            )
            .context("listing tables")?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()
            .context("reading table names")?;
        Ok(names
            .into_iter()
            .filter(|n| !n.starts_with(STAGING_PREFIX))
            .collect())
    }

    /// `(column_name, declared_type)` pairs in ordinal position order.
    /// Works for views as well as tables.
    pub fn table_columns(&self, name: &str) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT column_name, data_type FROM information_schema.columns \
                 WHERE table_name = ? ORDER BY ordinal_position",
            )
            .with_context(|| format!("describing {name}"))?;
        let cols = stmt
            .query_map(params![name], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("reading columns of {name}"))?;
        Ok(cols)
    }

    pub fn row_count(&self, name: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(name));
        let count: i64 = self
            .conn
            .query_row(&sql, [], |r| r.get(0))
            .with_context(|| format!("counting rows of {name}"))?;
        Ok(count)
    }

    /// Persist `table` under `name`, fully replacing any prior content.
    ///
    /// Rows land in a staging table first; the final drop + rename runs
    /// in one transaction, so readers never observe a half-written table.
    pub fn replace_table(&self, name: &str, table: &TypedTable) -> Result<()> {
        if table.columns.is_empty() {
            bail!("refusing to create {name} with no columns");
        }
        let staging = format!("{STAGING_PREFIX}{name}");

        // 1) Fresh staging table with the coerced column types.
        let col_defs = table
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.ty.sql()))
            .collect::<Vec<_>>()
            .join(", ");
        let create = format!(
            "CREATE OR REPLACE TABLE {} ({})",
            quote_ident(&staging),
            col_defs
        );
        self.conn
            .execute(&create, [])
            .with_context(|| format!("creating staging table for {name}"))?;

        // 2) Bulk-append all rows.
        {
            let mut appender = self
                .conn
                .appender(&staging)
                .with_context(|| format!("opening appender for {name}"))?;
            for row in &table.rows {
                appender
                    .append_row(appender_params_from_iter(
                        row.iter().map(CellValue::to_value),
                    ))
                    .with_context(|| format!("appending row to {name}"))?;
            }
            appender
                .flush()
                .with_context(|| format!("flushing rows to {name}"))?;
        }

        // 3) Atomic swap.
        let swap = format!(
            "BEGIN; DROP TABLE IF EXISTS {target}; ALTER TABLE {stg} RENAME TO {target}; COMMIT;",
            target = quote_ident(name),
            stg = quote_ident(&staging),
        );
        self.conn
            .execute_batch(&swap)
            .with_context(|| format!("swapping staging table into {name}"))?;

        debug!(table = %name, rows = table.rows.len(), "replaced table");
        Ok(())
    }

    /// `CREATE OR REPLACE VIEW <name> AS <body>`.
    pub fn create_or_replace_view(&self, name: &str, body: &str) -> Result<()> {
        let sql = format!("CREATE OR REPLACE VIEW {} AS {}", quote_ident(name), body);
        self.conn
            .execute_batch(&sql)
            .with_context(|| format!("creating view {name}"))?;
        debug!(view = %name, "created view");
        Ok(())
    }
}
