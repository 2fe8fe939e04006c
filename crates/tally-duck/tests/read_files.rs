//! Reader tests against temporary files

use std::fs;
use std::path::PathBuf;
use tally_duck::{ReadError, TableReader};
use tally_engine::{Dataset, InferenceConfig};
use tally_ir::{AggFunc, Cell, ColumnRole, Measure, QuerySpec, TimeGrain, Value};

/// Write `contents` to a uniquely named file in the temp dir
fn temp_file(name: &str, contents: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tally-duck-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_read_csv_normalises_headers() {
    let path = temp_file(
        "headers.csv",
        "Order Date,Region,Revenue (USD)\n2024-01-15,US,100\n2024-02-01,EU,30\n",
    );
    let table = TableReader::new().unwrap().read(&path, None).unwrap();

    assert_eq!(table.columns(), ["order_date", "region", "revenue_usd"]);
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.value(0, "revenue_usd"), Some(&Value::Int(100)));
}

#[test]
fn test_csv_to_monthly_aggregate() {
    let path = temp_file(
        "sales.csv",
        "date,region,revenue\n2024-01-15,US,100\n2024-01-20,US,50\n2024-02-01,EU,30\n",
    );
    let table = TableReader::new().unwrap().read(&path, None).unwrap();
    let dataset = Dataset::load(table, &InferenceConfig::default());
    assert_eq!(dataset.schema.find("date").unwrap().role, ColumnRole::Temporal);

    let result = dataset
        .aggregate(&QuerySpec {
            time_grain: TimeGrain::Monthly,
            temporal_column: Some("date".into()),
            group_by: vec!["region".into()],
            measures: vec![Measure::new("revenue", AggFunc::Sum)],
            date_range: None,
        })
        .unwrap();

    assert_eq!(result.row_count(), 2);
    assert_eq!(result.rows[0].bucket.unwrap().label(), "2024-01");
    assert_eq!(result.rows[0].cells, vec![Cell::Int(150)]);
    assert_eq!(result.rows[1].groups, vec![Value::from("EU")]);
}

#[test]
fn test_read_tsv_with_missing_cells() {
    let path = temp_file("gaps.tsv", "day\tunits\n2024-03-01\t5\n2024-03-02\t\n");
    let table = TableReader::new().unwrap().read(&path, None).unwrap();
    assert_eq!(table.columns(), ["day", "units"]);
    assert_eq!(table.value(1, "units"), Some(&Value::Null));
}

#[test]
fn test_missing_file() {
    let result = TableReader::new()
        .unwrap()
        .read(&std::env::temp_dir().join("tally-does-not-exist.csv"), None);
    assert!(matches!(result, Err(ReadError::NotFound(_))));
}

#[test]
fn test_unsupported_extension() {
    let path = temp_file("data.json", "[]");
    let result = TableReader::new().unwrap().read(&path, None);
    assert!(matches!(result, Err(ReadError::UnsupportedFormat(_))));
}
