//! Aggregation results

use chrono::{Datelike, NaiveDate};
use serde::{Serialize, Serializer};
use std::fmt;

use crate::{TimeGrain, Value};

/// A time-grain partition, identified by the first day it covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeBucket {
    pub start: NaiveDate,
    pub grain: TimeGrain,
}

impl TimeBucket {
    pub fn new(grain: TimeGrain, start: NaiveDate) -> Self {
        Self { start, grain }
    }

    /// Display label: `2024-01-15`, `2024-W03`, `2024-01` or `2024Q1`
    pub fn label(&self) -> String {
        match self.grain {
            TimeGrain::Daily | TimeGrain::None => self.start.format("%Y-%m-%d").to_string(),
            TimeGrain::Weekly => {
                let week = self.start.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            TimeGrain::Monthly => self.start.format("%Y-%m").to_string(),
            TimeGrain::Quarterly => {
                format!("{}Q{}", self.start.year(), self.start.month0() / 3 + 1)
            }
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl Serialize for TimeBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

/// One aggregated value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    Int(i64),
    Float(f64),
    /// No non-missing input for mean/min/max
    Undefined,
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            Cell::Undefined => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Cell::Undefined)
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Int(i) => serializer.serialize_i64(*i),
            Cell::Float(f) => serializer.serialize_f64(*f),
            Cell::Undefined => serializer.serialize_str("undefined"),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Int(i) => write!(f, "{}", i),
            Cell::Float(x) => write!(f, "{}", x),
            Cell::Undefined => f.write_str("undefined"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<TimeBucket>,
    pub groups: Vec<Value>,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationResult {
    /// Output headers: bucket (when bucketed), group-by columns, measure labels
    pub columns: Vec<String>,

    /// Measure labels, in cell order
    pub measures: Vec<String>,
    pub rows: Vec<ResultRow>,

    /// Rows dropped because the temporal value was missing or unparseable
    pub excluded_missing_temporal: usize,

    /// Rows dropped by the date range filter
    pub excluded_out_of_range: usize,
}

impl AggregationResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a measure label among the row cells
    pub fn measure_index(&self, label: &str) -> Option<usize> {
        self.measures.iter().position(|m| m == label)
    }

    /// The `n` rows with the largest values of a measure, largest first
    ///
    /// Ties keep result order; undefined cells sort last.
    pub fn top_n(&self, measure: &str, n: usize) -> Option<Vec<&ResultRow>> {
        let idx = self.measure_index(measure)?;
        let mut ranked: Vec<&ResultRow> = self.rows.iter().collect();
        ranked.sort_by(|a, b| {
            match (a.cells[idx].as_f64(), b.cells[idx].as_f64()) {
                (Some(x), Some(y)) => y.total_cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });
        ranked.truncate(n);
        Some(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_bucket_labels() {
        assert_eq!(TimeBucket::new(TimeGrain::Monthly, date(2024, 1, 1)).label(), "2024-01");
        assert_eq!(TimeBucket::new(TimeGrain::Quarterly, date(2024, 7, 1)).label(), "2024Q3");
        assert_eq!(TimeBucket::new(TimeGrain::Weekly, date(2024, 1, 15)).label(), "2024-W03");
        assert_eq!(TimeBucket::new(TimeGrain::Daily, date(2024, 2, 29)).label(), "2024-02-29");
    }

    #[test]
    fn test_weekly_label_uses_iso_year() {
        // Monday 2024-12-30 belongs to ISO week 1 of 2025
        assert_eq!(TimeBucket::new(TimeGrain::Weekly, date(2024, 12, 30)).label(), "2025-W01");
    }

    #[test]
    fn test_top_n() {
        let row = |region: &str, total: Cell| ResultRow {
            bucket: None,
            groups: vec![Value::from(region)],
            cells: vec![total],
        };
        let result = AggregationResult {
            columns: vec!["region".to_string(), "sum_revenue".to_string()],
            measures: vec!["sum_revenue".to_string()],
            rows: vec![
                row("APAC", Cell::Undefined),
                row("EU", Cell::Int(30)),
                row("US", Cell::Int(150)),
                row("LATAM", Cell::Int(30)),
            ],
            excluded_missing_temporal: 0,
            excluded_out_of_range: 0,
        };

        let top = result.top_n("sum_revenue", 3).unwrap();
        let regions: Vec<String> = top.iter().map(|r| r.groups[0].to_string()).collect();
        assert_eq!(regions, vec!["US", "EU", "LATAM"]);

        assert!(result.top_n("region", 1).is_none());
        assert!(result.top_n("mean_revenue", 1).is_none());
    }

    #[test]
    fn test_undefined_serializes_as_sentinel() {
        let json = serde_json::to_string(&vec![Cell::Int(1), Cell::Undefined]).unwrap();
        assert_eq!(json, r#"[1,"undefined"]"#);
    }
}
