//! Schema inference - classifies every column of a table by semantic role
//!
//! Pure function of the sampled values and the header name:
//! temporal > measure > categorical.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tally_ir::{ColumnDescriptor, ColumnRole, DataType, Schema, Table, Value};
use tracing::debug;

use crate::temporal::{self, DEFAULT_DATE_FORMATS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Maximum number of non-missing values sampled per column
    pub sample_size: usize,

    /// Distinct/sampled ratio below which non-numeric columns are categorical
    pub categorical_threshold: f64,

    /// Share of sampled values a date format must parse to win
    pub temporal_match_ratio: f64,

    /// Candidate chrono formats, tried in order
    pub date_formats: Vec<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            sample_size: 1000,
            categorical_threshold: 0.5,
            temporal_match_ratio: 0.9,
            date_formats: DEFAULT_DATE_FORMATS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Infer a descriptor for every column, in header order
pub fn infer_schema(table: &Table, config: &InferenceConfig) -> Schema {
    if table.columns().is_empty() {
        debug!("Schema inference on a table without columns, returning empty schema");
        return Schema::default();
    }

    let columns = table
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let sample: Vec<&Value> = table
                .column_values(idx)
                .filter(|v| !v.is_missing())
                .take(config.sample_size)
                .collect();
            let descriptor = infer_column(name, &sample, config);
            debug!(
                column = %descriptor.name,
                role = %descriptor.role,
                data_type = %descriptor.data_type,
                sampled = sample.len(),
                "Inferred column"
            );
            descriptor
        })
        .collect();

    Schema::new(columns)
}

/// Classify one column from its sampled non-missing values
pub fn infer_column(name: &str, sample: &[&Value], config: &InferenceConfig) -> ColumnDescriptor {
    if sample.is_empty() {
        return ColumnDescriptor::new(name, ColumnRole::Categorical, DataType::String);
    }

    // Natively typed dates need no format
    if sample.iter().all(|v| matches!(v, Value::Date(_) | Value::DateTime(_))) {
        let data_type = if sample.iter().all(|v| matches!(v, Value::Date(_))) {
            DataType::Date
        } else {
            DataType::DateTime
        };
        return ColumnDescriptor::new(name, ColumnRole::Temporal, data_type);
    }

    if let Some(format) = detect_date_format(name, sample, config) {
        let data_type = if temporal::format_has_time(&format) {
            DataType::DateTime
        } else {
            DataType::Date
        };
        return ColumnDescriptor::new(name, ColumnRole::Temporal, data_type).with_date_format(format);
    }

    let numeric = sample.iter().all(|v| v.as_f64().is_some());
    let distinct: BTreeSet<&Value> = sample.iter().copied().collect();
    let distinct_ratio = distinct.len() as f64 / sample.len() as f64;

    if !numeric && distinct_ratio < config.categorical_threshold {
        return ColumnDescriptor::new(name, ColumnRole::Categorical, categorical_type(sample));
    }

    if numeric {
        let integral = sample.iter().all(|v| v.as_i64().is_some());
        if is_identifier_name(name) {
            let data_type = if integral { DataType::Integer } else { DataType::String };
            return ColumnDescriptor::new(name, ColumnRole::Categorical, data_type);
        }
        let data_type = if integral { DataType::Integer } else { DataType::Float };
        return ColumnDescriptor::new(name, ColumnRole::Measure, data_type);
    }

    ColumnDescriptor::new(name, ColumnRole::Categorical, categorical_type(sample))
}

fn detect_date_format(name: &str, sample: &[&Value], config: &InferenceConfig) -> Option<String> {
    let hinted = is_temporal_name(name);
    let required = (sample.len() as f64 * config.temporal_match_ratio).ceil() as usize;

    config
        .date_formats
        .iter()
        .filter(|format| hinted || !temporal::is_compact_format(format))
        .find(|format| {
            let parsed = sample
                .iter()
                .filter(|v| {
                    temporal::temporal_text(v)
                        .and_then(|text| temporal::parse_text(&text, format))
                        .is_some()
                })
                .count();
            parsed > 0 && parsed >= required
        })
        .cloned()
}

fn categorical_type(sample: &[&Value]) -> DataType {
    if sample.iter().all(|v| matches!(v, Value::Bool(_))) {
        DataType::Boolean
    } else {
        DataType::String
    }
}

fn is_temporal_name(name: &str) -> bool {
    let name = name.trim().to_lowercase();
    matches!(
        name.as_str(),
        "date" | "time" | "day" | "timestamp" | "datetime" | "period"
    ) || name.ends_with("_date")
        || name.ends_with("_at")
        || name.ends_with("_on")
        || name.ends_with("_time")
        || name.starts_with("date_")
}

fn is_identifier_name(name: &str) -> bool {
    let name = name.trim().to_lowercase();
    name == "id" || name.ends_with("_id")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn table(columns: &[&str], rows: Vec<Vec<Value>>) -> Table {
        Table::new(columns.iter().map(|c| c.to_string()).collect(), rows).unwrap()
    }

    fn role_of(schema: &Schema, name: &str) -> ColumnRole {
        schema.find(name).unwrap().role
    }

    #[test]
    fn test_scenario_schema() {
        let t = table(
            &["date", "region", "revenue"],
            vec![
                vec!["2024-01-15".into(), "US".into(), Value::Int(100)],
                vec!["2024-01-20".into(), "US".into(), Value::Int(50)],
                vec!["2024-02-01".into(), "EU".into(), Value::Int(30)],
                vec!["2024-02-03".into(), "EU".into(), Value::Int(70)],
            ],
        );
        let schema = infer_schema(&t, &InferenceConfig::default());

        let date = schema.find("date").unwrap();
        assert_eq!(date.role, ColumnRole::Temporal);
        assert_eq!(date.data_type, DataType::Date);
        assert_eq!(date.date_format.as_deref(), Some("%Y-%m-%d"));

        assert_eq!(role_of(&schema, "region"), ColumnRole::Categorical);

        let revenue = schema.find("revenue").unwrap();
        assert_eq!(revenue.role, ColumnRole::Measure);
        assert_eq!(revenue.data_type, DataType::Integer);
    }

    #[test]
    fn test_empty_table_yields_empty_schema() {
        let schema = infer_schema(&Table::empty(), &InferenceConfig::default());
        assert!(schema.is_empty());
    }

    #[test]
    fn test_headers_without_rows_still_get_descriptors() {
        let t = table(&["a", "b"], vec![]);
        let schema = infer_schema(&t, &InferenceConfig::default());
        assert_eq!(schema.len(), 2);
        assert_eq!(role_of(&schema, "a"), ColumnRole::Categorical);
    }

    #[test]
    fn test_temporal_needs_ninety_percent() {
        let mut rows: Vec<Vec<Value>> = (1..=9)
            .map(|d| vec![Value::from(format!("2024-03-0{}", d))])
            .collect();
        rows.push(vec!["not a date".into()]);
        let schema = infer_schema(&table(&["when"], rows.clone()), &InferenceConfig::default());
        assert_eq!(role_of(&schema, "when"), ColumnRole::Temporal);

        rows.push(vec!["still not".into()]);
        let schema = infer_schema(&table(&["when"], rows), &InferenceConfig::default());
        assert_ne!(role_of(&schema, "when"), ColumnRole::Temporal);
    }

    #[test]
    fn test_datetime_format() {
        let t = table(
            &["created_at"],
            vec![
                vec!["2024-01-15 08:30:00".into()],
                vec!["2024-01-16 09:00:00".into()],
            ],
        );
        let schema = infer_schema(&t, &InferenceConfig::default());
        let col = schema.find("created_at").unwrap();
        assert_eq!(col.role, ColumnRole::Temporal);
        assert_eq!(col.data_type, DataType::DateTime);
    }

    #[test]
    fn test_native_dates() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let t = table(&["day"], vec![vec![Value::Date(d)], vec![Value::Null]]);
        let schema = infer_schema(&t, &InferenceConfig::default());
        let col = schema.find("day").unwrap();
        assert_eq!(col.role, ColumnRole::Temporal);
        assert_eq!(col.date_format, None);
    }

    #[test]
    fn test_compact_dates_need_a_temporal_header() {
        let rows = vec![vec![Value::Int(20240115)], vec![Value::Int(20240116)]];

        let schema = infer_schema(&table(&["order_date"], rows.clone()), &InferenceConfig::default());
        assert_eq!(role_of(&schema, "order_date"), ColumnRole::Temporal);

        let schema = infer_schema(&table(&["amount"], rows), &InferenceConfig::default());
        assert_eq!(role_of(&schema, "amount"), ColumnRole::Measure);
    }

    #[test]
    fn test_numeric_text_is_measure() {
        let t = table(&["price"], vec![vec!["1.5".into()], vec!["2".into()], vec!["2".into()]]);
        let schema = infer_schema(&t, &InferenceConfig::default());
        let col = schema.find("price").unwrap();
        assert_eq!(col.role, ColumnRole::Measure);
        assert_eq!(col.data_type, DataType::Float);
    }

    #[test]
    fn test_identifier_columns_are_categorical() {
        let t = table(&["customer_id"], vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
        let schema = infer_schema(&t, &InferenceConfig::default());
        let col = schema.find("customer_id").unwrap();
        assert_eq!(col.role, ColumnRole::Categorical);
        assert_eq!(col.data_type, DataType::Integer);
    }

    #[test]
    fn test_high_cardinality_text_falls_back_to_categorical() {
        let t = table(
            &["note"],
            vec![vec!["alpha".into()], vec!["beta".into()], vec!["gamma".into()]],
        );
        let schema = infer_schema(&t, &InferenceConfig::default());
        assert_eq!(role_of(&schema, "note"), ColumnRole::Categorical);
    }

    #[test]
    fn test_boolean_columns() {
        let t = table(
            &["active"],
            vec![vec![Value::Bool(true)], vec![Value::Bool(false)], vec![Value::Bool(true)]],
        );
        let schema = infer_schema(&t, &InferenceConfig::default());
        let col = schema.find("active").unwrap();
        assert_eq!(col.role, ColumnRole::Categorical);
        assert_eq!(col.data_type, DataType::Boolean);
    }

    #[test]
    fn test_sample_size_bounds_inspection() {
        let mut rows: Vec<Vec<Value>> = (0..5).map(|i| vec![Value::Int(i)]).collect();
        rows.push(vec!["oops".into()]);
        let config = InferenceConfig {
            sample_size: 5,
            ..InferenceConfig::default()
        };
        let schema = infer_schema(&table(&["qty"], rows), &config);
        assert_eq!(role_of(&schema, "qty"), ColumnRole::Measure);
    }

    #[test]
    fn test_inference_is_deterministic() {
        let t = table(
            &["date", "region"],
            vec![
                vec!["01/15/2024".into(), "US".into()],
                vec!["01/20/2024".into(), "US".into()],
            ],
        );
        let config = InferenceConfig::default();
        assert_eq!(infer_schema(&t, &config), infer_schema(&t, &config));
        assert_eq!(
            infer_schema(&t, &config).find("date").unwrap().date_format.as_deref(),
            Some("%m/%d/%Y")
        );
    }
}
