//! Period-over-period comparison of a bucketed result

use serde::Serialize;
use tally_ir::AggregationResult;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompareError {
    #[error("Measure '{0}' is not part of the result")]
    UnknownMeasure(String),

    #[error("Result is not bucketed by time")]
    NotBucketed,
}

/// Measure total across every group of one bucket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodTotal {
    pub label: String,

    /// None when the bucket is absent or every cell is undefined
    pub total: Option<f64>,
    pub groups: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodComparison {
    pub measure: String,
    pub first: PeriodTotal,
    pub second: PeriodTotal,

    /// Change from first to second, in percent
    pub percent_change: Option<f64>,
}

/// Compare the totals of `measure` between two bucket labels (e.g. `2024Q1`, `2024Q2`)
pub fn compare_periods(
    result: &AggregationResult,
    measure: &str,
    first: &str,
    second: &str,
) -> Result<PeriodComparison, CompareError> {
    let idx = result
        .measure_index(measure)
        .ok_or_else(|| CompareError::UnknownMeasure(measure.to_string()))?;
    if result.rows.iter().any(|row| row.bucket.is_none()) {
        return Err(CompareError::NotBucketed);
    }

    let period_total = |label: &str| {
        let mut total = None;
        let mut groups = 0;
        for row in &result.rows {
            if row.bucket.map(|b| b.label()).as_deref() != Some(label) {
                continue;
            }
            groups += 1;
            if let Some(v) = row.cells[idx].as_f64() {
                *total.get_or_insert(0.0) += v;
            }
        }
        PeriodTotal {
            label: label.to_string(),
            total,
            groups,
        }
    };

    let first = period_total(first);
    let second = period_total(second);
    let percent_change = match (first.total, second.total) {
        (Some(a), Some(b)) if a != 0.0 => Some((b - a) / a * 100.0),
        _ => None,
    };

    Ok(PeriodComparison {
        measure: measure.to_string(),
        first,
        second,
        percent_change,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tally_ir::{Cell, ResultRow, TimeBucket, TimeGrain, Value};

    fn row(month: u32, region: &str, cell: Cell) -> ResultRow {
        ResultRow {
            bucket: Some(TimeBucket::new(
                TimeGrain::Monthly,
                NaiveDate::from_ymd_opt(2024, month, 1).unwrap(),
            )),
            groups: vec![Value::from(region)],
            cells: vec![cell],
        }
    }

    fn result(rows: Vec<ResultRow>) -> AggregationResult {
        AggregationResult {
            columns: vec!["month".into(), "region".into(), "sum_revenue".into()],
            measures: vec!["sum_revenue".into()],
            rows,
            excluded_missing_temporal: 0,
            excluded_out_of_range: 0,
        }
    }

    #[test]
    fn test_month_over_month() {
        let r = result(vec![
            row(1, "EU", Cell::Int(50)),
            row(1, "US", Cell::Int(150)),
            row(2, "US", Cell::Float(250.0)),
        ]);
        let cmp = compare_periods(&r, "sum_revenue", "2024-01", "2024-02").unwrap();
        assert_eq!(cmp.first.total, Some(200.0));
        assert_eq!(cmp.first.groups, 2);
        assert_eq!(cmp.second.total, Some(250.0));
        assert_eq!(cmp.percent_change, Some(25.0));
    }

    #[test]
    fn test_missing_period_has_no_change() {
        let r = result(vec![row(1, "US", Cell::Int(10))]);
        let cmp = compare_periods(&r, "sum_revenue", "2024-01", "2024-03").unwrap();
        assert_eq!(cmp.second.total, None);
        assert_eq!(cmp.second.groups, 0);
        assert_eq!(cmp.percent_change, None);
    }

    #[test]
    fn test_zero_base_has_no_change() {
        let r = result(vec![row(1, "US", Cell::Int(0)), row(2, "US", Cell::Int(5))]);
        let cmp = compare_periods(&r, "sum_revenue", "2024-01", "2024-02").unwrap();
        assert_eq!(cmp.percent_change, None);
    }

    #[test]
    fn test_undefined_cells_are_skipped() {
        let r = result(vec![row(1, "US", Cell::Undefined), row(1, "EU", Cell::Int(4))]);
        let cmp = compare_periods(&r, "sum_revenue", "2024-01", "2024-02").unwrap();
        assert_eq!(cmp.first.total, Some(4.0));
    }

    #[test]
    fn test_errors() {
        let r = result(vec![row(1, "US", Cell::Int(1))]);
        assert_eq!(
            compare_periods(&r, "mean_revenue", "2024-01", "2024-02"),
            Err(CompareError::UnknownMeasure("mean_revenue".into()))
        );

        let mut flat = r.clone();
        flat.rows[0].bucket = None;
        assert_eq!(
            compare_periods(&flat, "sum_revenue", "2024-01", "2024-02"),
            Err(CompareError::NotBucketed)
        );
    }
}
