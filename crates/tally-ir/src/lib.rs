//! Tally Intermediate Representation (IR)
//!
//! Tables, column descriptors, aggregation query specifications and results.
//! Query specifications are deterministically serializable for caching and provenance.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

mod result;
mod types;
mod value;

pub use result::*;
pub use types::*;
pub use value::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IrError {
    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("Row {row} has {actual} values, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// In-memory table: ordered headers and row-major typed values
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, IrError> {
        let mut seen = HashSet::new();
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(IrError::DuplicateColumn(name.clone()));
            }
        }

        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(IrError::RowWidth {
                    row: idx,
                    expected: columns.len(),
                    actual: row.len(),
                });
            }
        }

        Ok(Self { columns, rows })
    }

    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of one column, in row order
    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(move |row| &row[idx])
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }
}

/// Time-bucketing resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGrain {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

impl TimeGrain {
    pub const ALL: [TimeGrain; 5] = [
        TimeGrain::None,
        TimeGrain::Daily,
        TimeGrain::Weekly,
        TimeGrain::Monthly,
        TimeGrain::Quarterly,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TimeGrain::None => "none",
            TimeGrain::Daily => "daily",
            TimeGrain::Weekly => "weekly",
            TimeGrain::Monthly => "monthly",
            TimeGrain::Quarterly => "quarterly",
        }
    }

    /// Header of the bucket column in results
    pub fn bucket_column(&self) -> &'static str {
        match self {
            TimeGrain::None => "bucket",
            TimeGrain::Daily => "day",
            TimeGrain::Weekly => "week",
            TimeGrain::Monthly => "month",
            TimeGrain::Quarterly => "quarter",
        }
    }

    pub fn is_bucketed(&self) -> bool {
        !matches!(self, TimeGrain::None)
    }
}

impl fmt::Display for TimeGrain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Aggregation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    Sum,
    Mean,
    Count,
    Min,
    Max,
}

impl AggFunc {
    pub const ALL: [AggFunc; 5] = [AggFunc::Sum, AggFunc::Mean, AggFunc::Count, AggFunc::Min, AggFunc::Max];

    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::Mean => "mean",
            AggFunc::Count => "count",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One requested aggregate: function applied to a column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Measure {
    pub column: String,
    pub func: AggFunc,
}

impl Measure {
    pub fn new(column: impl Into<String>, func: AggFunc) -> Self {
        Self {
            column: column.into(),
            func,
        }
    }

    /// Result header, e.g. `sum_revenue`
    pub fn label(&self) -> String {
        format!("{}_{}", self.func, self.column)
    }
}

/// Inclusive date filter on the temporal column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Aggregation query specification
///
/// Candidates arrive from the builder, the HTTP API or the translator; only the
/// validator turns one into something the executor accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    #[serde(default)]
    pub time_grain: TimeGrain,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_column: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,

    #[serde(default)]
    pub measures: Vec<Measure>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
}

impl QuerySpec {
    /// Calculate fingerprint (SHA-256) for deterministic caching
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).expect("query spec should always serialize");
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> QuerySpec {
        QuerySpec {
            time_grain: TimeGrain::Monthly,
            temporal_column: Some("date".to_string()),
            group_by: vec!["region".to_string()],
            measures: vec![Measure::new("revenue", AggFunc::Sum)],
            date_range: None,
        }
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let spec1 = spec();
        let spec2 = spec1.clone();

        assert_eq!(spec1.fingerprint(), spec2.fingerprint());

        let mut spec3 = spec1.clone();
        spec3.time_grain = TimeGrain::Quarterly;
        assert_ne!(spec1.fingerprint(), spec3.fingerprint());
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(spec()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "time_grain": "monthly",
                "temporal_column": "date",
                "group_by": ["region"],
                "measures": [{"column": "revenue", "func": "sum"}]
            })
        );

        let parsed: QuerySpec = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, spec());
    }

    #[test]
    fn test_missing_fields_default() {
        let parsed: QuerySpec = serde_json::from_str(r#"{"measures": []}"#).unwrap();
        assert_eq!(parsed.time_grain, TimeGrain::None);
        assert!(parsed.group_by.is_empty());
    }

    #[test]
    fn test_table_rejects_duplicate_headers() {
        let err = Table::new(vec!["a".into(), "a".into()], vec![]).unwrap_err();
        assert_eq!(err, IrError::DuplicateColumn("a".to_string()));
    }

    #[test]
    fn test_table_rejects_ragged_rows() {
        let err = Table::new(
            vec!["a".into(), "b".into()],
            vec![vec![Value::Int(1), Value::Int(2)], vec![Value::Int(3)]],
        )
        .unwrap_err();
        assert_eq!(
            err,
            IrError::RowWidth {
                row: 1,
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_table_lookup() {
        let table = Table::new(
            vec!["region".into(), "revenue".into()],
            vec![vec![Value::from("US"), Value::Int(100)]],
        )
        .unwrap();
        assert_eq!(table.value(0, "revenue"), Some(&Value::Int(100)));
        assert_eq!(table.value(0, "profit"), None);
        assert_eq!(table.value(1, "region"), None);
    }
}
