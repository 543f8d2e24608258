//! Tabular interchange through DuckDB.
//!
//! Source tables are read with every column as text so cells pass through a
//! run unchanged. Sinks are written from typed rows with `COPY ... TO`.

use std::path::Path;

use duckdb::types::{ToSql, ToSqlOutput, Value as DbValue};
use duckdb::{params_from_iter, Connection};
use replay_core::{Error, Result};
use tracing::debug;

fn db_err(err: duckdb::Error) -> Error {
    Error::database(err.to_string())
}

fn sql_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A table held as text cells, in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    /// Read a CSV file with a header row.
    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )));
        }

        let source = format!(
            "read_csv_auto({}, header = true, all_varchar = true, delim = ',', quote = '\"', escape = '\"')",
            sql_literal(&path.to_string_lossy())
        );
        let conn = Connection::open_in_memory().map_err(db_err)?;

        let mut columns = Vec::new();
        {
            let mut stmt = conn
                .prepare(&format!("DESCRIBE SELECT * FROM {source}"))
                .map_err(db_err)?;
            let mut rows = stmt.query([]).map_err(db_err)?;
            while let Some(row) = rows.next().map_err(db_err)? {
                let name: String = row.get(0).map_err(db_err)?;
                columns.push(name);
            }
        }

        let mut rows_out = Vec::new();
        {
            let mut stmt = conn
                .prepare(&format!("SELECT * FROM {source}"))
                .map_err(db_err)?;
            let mut rows = stmt.query([]).map_err(db_err)?;
            while let Some(row) = rows.next().map_err(db_err)? {
                let mut cells = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    let cell: Option<String> = row.get(i).map_err(db_err)?;
                    cells.push(cell);
                }
                rows_out.push(cells);
            }
        }

        debug!(path = %path.display(), columns = columns.len(), rows = rows_out.len(), "Read table");
        Ok(Self::new(columns, rows_out))
    }

    /// Position of a column by exact name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Position of a required column.
    pub fn require_column(&self, name: &str, role: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| Error::schema(format!("{role} column '{name}' not found in the data")))
    }

    /// Text of one cell, `None` for nulls and out-of-range positions.
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(|c| c.as_deref())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Column type of a written table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    BigInt,
    Double,
}

impl ColumnType {
    fn sql(self) -> &'static str {
        match self {
            ColumnType::Text => "VARCHAR",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE",
        }
    }
}

/// One written cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(Option<String>),
    BigInt(Option<i64>),
    Double(Option<f64>),
}

impl ToSql for Cell {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        let value = match self {
            Cell::Text(Some(s)) => DbValue::Text(s.clone()),
            Cell::BigInt(Some(i)) => DbValue::BigInt(*i),
            Cell::Double(Some(f)) if f.is_finite() => DbValue::Double(*f),
            _ => DbValue::Null,
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

/// Writes typed rows to a CSV file.
#[derive(Debug, Clone)]
pub struct TableWriter {
    columns: Vec<(String, ColumnType)>,
}

impl TableWriter {
    pub fn new(columns: Vec<(String, ColumnType)>) -> Self {
        Self { columns }
    }

    /// Write all rows with a header. Returns the number of rows written.
    pub fn write_csv<I>(&self, path: impl AsRef<Path>, rows: I) -> Result<usize>
    where
        I: IntoIterator<Item = Vec<Cell>>,
    {
        if self.columns.is_empty() {
            return Err(Error::data("cannot write a table without columns"));
        }

        let conn = Connection::open_in_memory().map_err(db_err)?;
        let definition = self
            .columns
            .iter()
            .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.sql()))
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute_batch(&format!("CREATE TABLE sink ({definition})"))
            .map_err(db_err)?;

        let mut written = 0;
        conn.execute_batch("BEGIN TRANSACTION").map_err(db_err)?;
        {
            let placeholders = vec!["?"; self.columns.len()].join(", ");
            let mut stmt = conn
                .prepare(&format!("INSERT INTO sink VALUES ({placeholders})"))
                .map_err(db_err)?;
            for row in rows {
                if row.len() != self.columns.len() {
                    return Err(Error::data(format!(
                        "row has {} cells, table has {} columns",
                        row.len(),
                        self.columns.len()
                    )));
                }
                stmt.execute(params_from_iter(row.iter())).map_err(db_err)?;
                written += 1;
            }
        }
        conn.execute_batch("COMMIT").map_err(db_err)?;

        let path = path.as_ref();
        conn.execute_batch(&format!(
            "COPY sink TO {} (HEADER, DELIMITER ',')",
            sql_literal(&path.to_string_lossy())
        ))
        .map_err(db_err)?;

        debug!(path = %path.display(), rows = written, "Wrote table");
        Ok(written)
    }
}
