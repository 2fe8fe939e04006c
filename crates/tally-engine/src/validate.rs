//! Validation layer for aggregation queries
//!
//! Validates:
//! - Column references against the inferred schema
//! - Column roles per slot (temporal column, group-by, measure)
//! - Measure list shape (non-empty, no duplicates)
//! - Grain and date range requirements
//!
//! Every violation is collected; nothing short-circuits.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tally_ast::ParseError;
use tally_ir::{AggFunc, ColumnRole, QuerySpec, Schema, TimeGrain};
use tally_registry::FunctionRegistry;
use thiserror::Error;

/// Slot of the query a column is referenced from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Usage {
    TemporalColumn,
    GroupBy,
    Measure(AggFunc),
    /// A measure whose function name did not resolve
    UnresolvedMeasure(String),
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Usage::TemporalColumn => f.write_str("temporal_column"),
            Usage::GroupBy => f.write_str("group_by"),
            Usage::Measure(func) => write!(f, "measure {}()", func),
            Usage::UnresolvedMeasure(name) => write!(f, "measure {}()", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    #[error("Unknown column '{column}' referenced in {usage}")]
    UnknownColumn { column: String, usage: Usage },

    #[error("Column '{column}' is {role} but {usage} requires {expected}")]
    RoleMismatch {
        column: String,
        role: ColumnRole,
        usage: Usage,
        expected: &'static str,
    },

    #[error("No measures requested; add at least one (column, function) pair")]
    EmptyMeasures,

    #[error("Time grain '{grain}' requires a temporal_column but none was supplied")]
    MissingTemporalColumn { grain: TimeGrain },

    #[error("Measure {func}({column}) is requested more than once")]
    DuplicateMeasure { column: String, func: AggFunc },

    #[error("Column '{column}' appears more than once in group_by")]
    DuplicateGroupBy { column: String },

    #[error("Date range start {start} is after its end {end}")]
    InvertedDateRange { start: NaiveDate, end: NaiveDate },

    #[error("A date range requires a temporal_column but none was supplied")]
    DateRangeWithoutTemporal,

    #[error("Unknown aggregation function '{name}'; expected one of sum, mean, count, min, max")]
    UnknownFunction { name: String },

    #[error("Unknown time grain '{name}'; expected one of none, daily, weekly, monthly, quarterly")]
    UnknownGrain { name: String },

    #[error("Malformed query: {reason}")]
    Malformed { reason: String },
}

impl Violation {
    /// Column the violation is about, if any
    pub fn column(&self) -> Option<&str> {
        match self {
            Violation::UnknownColumn { column, .. }
            | Violation::RoleMismatch { column, .. }
            | Violation::DuplicateMeasure { column, .. }
            | Violation::DuplicateGroupBy { column } => Some(column),
            _ => None,
        }
    }
}

/// One or more violations, reported together
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<Violation>);

impl ValidationErrors {
    pub fn new(violations: Vec<Violation>) -> Self {
        Self(violations)
    }

    pub fn single(violation: Violation) -> Self {
        Self(vec![violation])
    }

    pub fn violations(&self) -> &[Violation] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether any violation names the given column
    pub fn mentions(&self, column: &str) -> bool {
        self.0.iter().any(|v| v.column() == Some(column))
    }

    /// One line per violation, for prompts and logs
    pub fn bullet_list(&self) -> String {
        self.0
            .iter()
            .map(|v| format!("- {}", v))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Shorthand naming errors keep their named violation; the rest are malformed input
impl From<ParseError> for ValidationErrors {
    fn from(error: ParseError) -> Self {
        let violation = match error {
            ParseError::UnknownFunction(name) => Violation::UnknownFunction { name },
            ParseError::UnknownGrain(name) => Violation::UnknownGrain { name },
            other => Violation::Malformed {
                reason: other.to_string(),
            },
        };
        Self::single(violation)
    }
}

impl IntoIterator for ValidationErrors {
    type Item = Violation;
    type IntoIter = std::vec::IntoIter<Violation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A spec that passed validation against a schema; only the validator builds one
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidatedQuery {
    spec: QuerySpec,
}

impl ValidatedQuery {
    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }
}

pub struct Validator<'a> {
    schema: &'a Schema,
    registry: &'a FunctionRegistry,
}

impl<'a> Validator<'a> {
    pub fn new(schema: &'a Schema, registry: &'a FunctionRegistry) -> Self {
        Self { schema, registry }
    }

    /// Validate a candidate spec, collecting every violation
    pub fn validate(&self, spec: &QuerySpec) -> Result<ValidatedQuery, ValidationErrors> {
        let mut violations = Vec::new();

        self.check_temporal(spec, &mut violations);
        self.check_group_by(spec, &mut violations);
        self.check_measures(spec, &mut violations);

        if violations.is_empty() {
            Ok(ValidatedQuery { spec: spec.clone() })
        } else {
            Err(ValidationErrors(violations))
        }
    }

    fn check_temporal(&self, spec: &QuerySpec, violations: &mut Vec<Violation>) {
        match &spec.temporal_column {
            Some(column) => match self.schema.find(column) {
                None => violations.push(Violation::UnknownColumn {
                    column: column.clone(),
                    usage: Usage::TemporalColumn,
                }),
                Some(desc) if desc.role != ColumnRole::Temporal => {
                    violations.push(Violation::RoleMismatch {
                        column: column.clone(),
                        role: desc.role,
                        usage: Usage::TemporalColumn,
                        expected: "a temporal column",
                    })
                }
                Some(_) => {}
            },
            None => {
                if spec.time_grain.is_bucketed() {
                    violations.push(Violation::MissingTemporalColumn {
                        grain: spec.time_grain,
                    });
                }
                if spec.date_range.is_some() {
                    violations.push(Violation::DateRangeWithoutTemporal);
                }
            }
        }

        if let Some(range) = &spec.date_range {
            if range.start > range.end {
                violations.push(Violation::InvertedDateRange {
                    start: range.start,
                    end: range.end,
                });
            }
        }
    }

    fn check_group_by(&self, spec: &QuerySpec, violations: &mut Vec<Violation>) {
        let mut seen = HashSet::new();
        for column in &spec.group_by {
            if !seen.insert(column.as_str()) {
                violations.push(Violation::DuplicateGroupBy {
                    column: column.clone(),
                });
                continue;
            }

            match self.schema.find(column) {
                None => violations.push(Violation::UnknownColumn {
                    column: column.clone(),
                    usage: Usage::GroupBy,
                }),
                Some(desc) if desc.role == ColumnRole::Measure => {
                    violations.push(Violation::RoleMismatch {
                        column: column.clone(),
                        role: desc.role,
                        usage: Usage::GroupBy,
                        expected: "a categorical or temporal column",
                    })
                }
                Some(_) => {}
            }
        }
    }

    fn check_measures(&self, spec: &QuerySpec, violations: &mut Vec<Violation>) {
        if spec.measures.is_empty() {
            violations.push(Violation::EmptyMeasures);
            return;
        }

        let mut seen = HashSet::new();
        for measure in &spec.measures {
            if !seen.insert((measure.column.as_str(), measure.func)) {
                violations.push(Violation::DuplicateMeasure {
                    column: measure.column.clone(),
                    func: measure.func,
                });
                continue;
            }

            let usage = Usage::Measure(measure.func);
            match self.schema.find(&measure.column) {
                None => violations.push(Violation::UnknownColumn {
                    column: measure.column.clone(),
                    usage,
                }),
                Some(desc) => {
                    if self
                        .registry
                        .check_role(measure.func, &measure.column, desc.role)
                        .is_err()
                    {
                        violations.push(Violation::RoleMismatch {
                            column: measure.column.clone(),
                            role: desc.role,
                            usage,
                            expected: "a measure column (only count accepts any column)",
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_ir::{ColumnDescriptor, DataType, DateRange, Measure};

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDescriptor::new("date", ColumnRole::Temporal, DataType::Date).with_date_format("%Y-%m-%d"),
            ColumnDescriptor::new("region", ColumnRole::Categorical, DataType::String),
            ColumnDescriptor::new("revenue", ColumnRole::Measure, DataType::Integer),
        ])
    }

    fn valid_spec() -> QuerySpec {
        QuerySpec {
            time_grain: TimeGrain::Monthly,
            temporal_column: Some("date".into()),
            group_by: vec!["region".into()],
            measures: vec![Measure::new("revenue", AggFunc::Sum)],
            date_range: None,
        }
    }

    fn validate(spec: &QuerySpec) -> Result<ValidatedQuery, ValidationErrors> {
        let schema = schema();
        let registry = FunctionRegistry::default();
        Validator::new(&schema, &registry).validate(spec)
    }

    #[test]
    fn test_valid_spec_passes_unchanged() {
        let validated = validate(&valid_spec()).unwrap();
        assert_eq!(validated.spec(), &valid_spec());
    }

    #[test]
    fn test_unknown_column_is_named() {
        let mut spec = valid_spec();
        spec.measures = vec![Measure::new("profit", AggFunc::Sum)];

        let errors = validate(&spec).unwrap_err();
        assert!(errors.mentions("profit"));
        assert_eq!(
            errors.violations(),
            &[Violation::UnknownColumn {
                column: "profit".into(),
                usage: Usage::Measure(AggFunc::Sum),
            }]
        );
        assert!(errors.to_string().contains("'profit'"));
    }

    #[test]
    fn test_violations_are_collected() {
        let spec = QuerySpec {
            time_grain: TimeGrain::Weekly,
            temporal_column: None,
            group_by: vec!["revenue".into(), "country".into()],
            measures: vec![],
            date_range: None,
        };

        let errors = validate(&spec).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.violations().contains(&Violation::MissingTemporalColumn {
            grain: TimeGrain::Weekly
        }));
        assert!(errors.violations().contains(&Violation::EmptyMeasures));
        assert!(errors.mentions("revenue"));
        assert!(errors.mentions("country"));
    }

    #[test]
    fn test_role_mismatch_on_measure() {
        let mut spec = valid_spec();
        spec.measures = vec![Measure::new("region", AggFunc::Mean)];

        let errors = validate(&spec).unwrap_err();
        assert!(matches!(
            &errors.violations()[0],
            Violation::RoleMismatch { column, role: ColumnRole::Categorical, .. } if column == "region"
        ));
    }

    #[test]
    fn test_count_accepts_any_column() {
        let mut spec = valid_spec();
        spec.measures = vec![Measure::new("region", AggFunc::Count), Measure::new("date", AggFunc::Count)];
        assert!(validate(&spec).is_ok());
    }

    #[test]
    fn test_temporal_column_must_be_temporal() {
        let mut spec = valid_spec();
        spec.temporal_column = Some("region".into());
        let errors = validate(&spec).unwrap_err();
        assert!(errors.mentions("region"));
    }

    #[test]
    fn test_group_by_temporal_is_allowed() {
        let mut spec = valid_spec();
        spec.time_grain = TimeGrain::None;
        spec.group_by = vec!["date".into()];
        assert!(validate(&spec).is_ok());
    }

    #[test]
    fn test_duplicates() {
        let mut spec = valid_spec();
        spec.group_by = vec!["region".into(), "region".into()];
        spec.measures.push(Measure::new("revenue", AggFunc::Sum));

        let errors = validate(&spec).unwrap_err();
        assert_eq!(
            errors.violations(),
            &[
                Violation::DuplicateGroupBy { column: "region".into() },
                Violation::DuplicateMeasure {
                    column: "revenue".into(),
                    func: AggFunc::Sum
                },
            ]
        );
    }

    #[test]
    fn test_same_column_different_functions_is_fine() {
        let mut spec = valid_spec();
        spec.measures.push(Measure::new("revenue", AggFunc::Mean));
        assert!(validate(&spec).is_ok());
    }

    #[test]
    fn test_date_range_checks() {
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        let mut spec = valid_spec();
        spec.date_range = Some(DateRange { start: d(3, 1), end: d(1, 1) });
        assert_eq!(
            validate(&spec).unwrap_err().violations(),
            &[Violation::InvertedDateRange { start: d(3, 1), end: d(1, 1) }]
        );

        spec.time_grain = TimeGrain::None;
        spec.temporal_column = None;
        spec.date_range = Some(DateRange { start: d(1, 1), end: d(3, 1) });
        assert_eq!(
            validate(&spec).unwrap_err().violations(),
            &[Violation::DateRangeWithoutTemporal]
        );
    }

    #[test]
    fn test_violations_serialize_with_kind() {
        let errors = ValidationErrors::single(Violation::EmptyMeasures);
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json, serde_json::json!([{"kind": "empty_measures"}]));
    }

    #[test]
    fn test_shorthand_errors_become_violations() {
        let registry = FunctionRegistry::default();
        let errors = ValidationErrors::from(tally_ast::parse_spec("hourly on date sum(revenue)", &registry).unwrap_err());
        assert_eq!(errors.violations(), [Violation::UnknownGrain { name: "hourly".into() }]);

        let errors = ValidationErrors::from(tally_ast::parse_spec("sum(revenue", &registry).unwrap_err());
        assert!(matches!(errors.violations()[0], Violation::Malformed { .. }));
    }
}
