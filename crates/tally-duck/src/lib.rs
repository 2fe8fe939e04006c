//! DuckDB-backed tabular reader
//!
//! Loads CSV, TSV, Parquet and Excel files into a [`Table`] through an
//! in-memory DuckDB connection. DuckDB sniffs delimiters and column types;
//! exotic types are cast to text or double before conversion.

use chrono::{DateTime, Days, NaiveDate};
use duckdb::types::{TimeUnit, ValueRef};
use duckdb::Connection;
use std::collections::HashSet;
use std::path::Path;
use tally_ir::{IrError, Table, Value};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid table: {0}")]
    Table(#[from] IrError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Tsv,
    Parquet,
    Xlsx,
}

impl FileFormat {
    /// Pick the format from the file extension
    pub fn from_path(path: &Path) -> Result<Self, ReadError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" | "txt" => Ok(FileFormat::Csv),
            "tsv" | "tab" => Ok(FileFormat::Tsv),
            "parquet" | "pq" => Ok(FileFormat::Parquet),
            "xlsx" => Ok(FileFormat::Xlsx),
            _ => Err(ReadError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

const STAGING_TABLE: &str = "tally_source";

pub struct TableReader {
    conn: Connection,
}

impl TableReader {
    pub fn new() -> Result<Self, ReadError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Read a file into a table; `sheet` selects an Excel worksheet (first sheet otherwise)
    pub fn read(&self, path: &Path, sheet: Option<&str>) -> Result<Table, ReadError> {
        if !path.exists() {
            return Err(ReadError::NotFound(path.display().to_string()));
        }
        let format = FileFormat::from_path(path)?;
        if format == FileFormat::Xlsx {
            // Excel support ships as an extension, fetched on first use
            self.conn.execute_batch("INSTALL excel; LOAD excel;")?;
        }

        let source = source_sql(format, &path.to_string_lossy(), sheet);
        debug!(%source, "Staging file");
        self.conn.execute_batch(&format!(
            "CREATE OR REPLACE TEMP TABLE {} AS SELECT * FROM {}",
            STAGING_TABLE, source
        ))?;

        let table = self.read_staged();
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", STAGING_TABLE))?;
        let table = table?;

        info!(
            path = %path.display(),
            rows = table.row_count(),
            columns = table.columns().len(),
            "Loaded table"
        );
        Ok(table)
    }

    fn read_staged(&self) -> Result<Table, ReadError> {
        let mut stmt = self.conn.prepare(&format!("DESCRIBE {}", STAGING_TABLE))?;
        let described: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<duckdb::Result<Vec<_>>>()?;

        if described.is_empty() {
            return Ok(Table::empty());
        }

        let projections: Vec<String> = described
            .iter()
            .map(|(name, column_type)| projection(name, column_type))
            .collect();
        let query = format!("SELECT {} FROM {}", projections.join(", "), STAGING_TABLE);

        let mut stmt = self.conn.prepare(&query)?;
        let mut rows = stmt.query([])?;
        let mut table_rows = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(described.len());
            for i in 0..described.len() {
                values.push(convert(row.get_ref(i)?));
            }
            table_rows.push(values);
        }

        let raw: Vec<String> = described.into_iter().map(|(name, _)| name).collect();
        Ok(Table::new(normalize_headers(&raw), table_rows)?)
    }
}

fn source_sql(format: FileFormat, path: &str, sheet: Option<&str>) -> String {
    let path = quote_literal(path);
    match format {
        FileFormat::Csv => format!("read_csv_auto({}, header = true)", path),
        FileFormat::Tsv => format!("read_csv_auto({}, header = true, delim = '\\t')", path),
        FileFormat::Parquet => format!("read_parquet({})", path),
        FileFormat::Xlsx => match sheet {
            Some(sheet) => format!("read_xlsx({}, sheet = {}, header = true)", path, quote_literal(sheet)),
            None => format!("read_xlsx({}, header = true)", path),
        },
    }
}

/// Select expression that leaves only types `convert` understands
fn projection(name: &str, column_type: &str) -> String {
    let ident = format!("\"{}\"", name.replace('"', "\"\""));
    let upper = column_type.to_uppercase();
    let keep = matches!(
        upper.as_str(),
        "BOOLEAN"
            | "TINYINT"
            | "SMALLINT"
            | "INTEGER"
            | "BIGINT"
            | "HUGEINT"
            | "UTINYINT"
            | "USMALLINT"
            | "UINTEGER"
            | "UBIGINT"
            | "FLOAT"
            | "DOUBLE"
            | "VARCHAR"
            | "DATE"
            | "TIMESTAMP"
    );

    if keep {
        ident
    } else if upper.starts_with("DECIMAL") {
        format!("CAST({} AS DOUBLE)", ident)
    } else if upper.starts_with("TIMESTAMP") {
        format!("CAST({} AS TIMESTAMP)", ident)
    } else {
        format!("CAST({} AS VARCHAR)", ident)
    }
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Convert a DuckDB cell into a table value
fn convert(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::Int(i64::from(i)),
        ValueRef::SmallInt(i) => Value::Int(i64::from(i)),
        ValueRef::Int(i) => Value::Int(i64::from(i)),
        ValueRef::BigInt(i) => Value::Int(i),
        ValueRef::HugeInt(i) => i64::try_from(i).map_or(Value::Float(i as f64), Value::Int),
        ValueRef::UTinyInt(i) => Value::Int(i64::from(i)),
        ValueRef::USmallInt(i) => Value::Int(i64::from(i)),
        ValueRef::UInt(i) => Value::Int(i64::from(i)),
        ValueRef::UBigInt(i) => i64::try_from(i).map_or(Value::Float(i as f64), Value::Int),
        ValueRef::Float(f) => Value::Float(f64::from(f)),
        ValueRef::Double(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Date32(days) => date_from_epoch_days(days).map_or(Value::Null, Value::Date),
        ValueRef::Timestamp(unit, ticks) => {
            let micros = match unit {
                TimeUnit::Second => ticks.saturating_mul(1_000_000),
                TimeUnit::Millisecond => ticks.saturating_mul(1_000),
                TimeUnit::Microsecond => ticks,
                TimeUnit::Nanosecond => ticks / 1_000,
            };
            DateTime::from_timestamp_micros(micros)
                .map_or(Value::Null, |dt| Value::DateTime(dt.naive_utc()))
        }
        _ => Value::Null,
    }
}

fn date_from_epoch_days(days: i32) -> Option<NaiveDate> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    if days >= 0 {
        epoch.checked_add_days(Days::new(days.unsigned_abs().into()))
    } else {
        epoch.checked_sub_days(Days::new(days.unsigned_abs().into()))
    }
}

/// Normalise one header: lowercase, trimmed, spaces and dashes to underscores, no parentheses
pub fn normalize_header(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace(' ', "_")
        .replace(['(', ')'], "")
        .replace('-', "_")
}

/// Normalise every header, suffixing collisions (`total`, `total_2`, ...)
pub fn normalize_headers(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .enumerate()
        .map(|(idx, raw)| {
            let mut base = normalize_header(raw);
            if base.is_empty() {
                base = format!("column_{}", idx + 1);
            }
            let mut name = base.clone();
            let mut n = 2;
            while !seen.insert(name.clone()) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
            name
        })
        .collect()
}
