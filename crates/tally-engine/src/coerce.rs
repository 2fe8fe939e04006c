//! Coerce raw model output into a candidate query spec
//!
//! Lenient about shape (fences, wrappers, key spellings, name aliases) but
//! never about meaning: nothing is guessed or filled in.

use chrono::NaiveDate;
use serde_json::{Map, Value as Json};
use tally_ast::ParseError;
use tally_ir::{DateRange, Measure, QuerySpec, Schema, TimeGrain};
use tally_registry::FunctionRegistry;

use crate::validate::{Usage, ValidatedQuery, ValidationErrors, Validator, Violation};

/// A model response read as far as its names allow
///
/// Parts that failed to resolve are left out of `spec` and recorded in
/// `violations`, so schema validation can still run on the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub spec: QuerySpec,
    pub violations: Vec<Violation>,
    /// (column, function name) of measures whose function did not resolve
    pub unresolved_measures: Vec<(String, String)>,
}

impl Candidate {
    fn resolved(spec: QuerySpec) -> Self {
        Self {
            spec,
            violations: Vec::new(),
            unresolved_measures: Vec::new(),
        }
    }

    /// Validate against a schema, reporting naming and schema violations together
    pub fn validate(&self, schema: &Schema, registry: &FunctionRegistry) -> Result<ValidatedQuery, ValidationErrors> {
        let mut violations = self.violations.clone();
        for (column, func) in &self.unresolved_measures {
            if schema.find(column).is_none() {
                violations.push(Violation::UnknownColumn {
                    column: column.clone(),
                    usage: Usage::UnresolvedMeasure(func.clone()),
                });
            }
        }

        match Validator::new(schema, registry).validate(&self.spec) {
            Ok(query) if violations.is_empty() => return Ok(query),
            Ok(_) => {}
            Err(errors) => {
                // Measures were asked for, they just did not resolve
                let dropped_measures = !self.unresolved_measures.is_empty();
                violations.extend(
                    errors
                        .into_iter()
                        .filter(|v| !(dropped_measures && *v == Violation::EmptyMeasures)),
                );
            }
        }
        Err(ValidationErrors::new(violations))
    }
}

/// Turn a model response into a candidate spec
///
/// Fails only when no spec can be read at all: invalid JSON, or text that is
/// neither a JSON object nor query shorthand.
pub fn coerce(candidate: &str, registry: &FunctionRegistry) -> Result<Candidate, ValidationErrors> {
    let text = strip_fences(candidate);

    match extract_object(text) {
        Some(object) => {
            let json: Json = serde_json::from_str(object).map_err(|e| malformed(format!("invalid JSON: {}", e)))?;
            from_json(&json, registry)
        }
        None => tally_ast::parse_spec(text.trim(), registry)
            .map(Candidate::resolved)
            .map_err(|e| match e {
                naming @ (ParseError::UnknownFunction(_) | ParseError::UnknownGrain(_)) => ValidationErrors::from(naming),
                other => malformed(format!("expected a JSON object or query shorthand ({})", other)),
            }),
    }
}

/// Convert a JSON candidate, collecting every naming problem
pub fn from_json(json: &Json, registry: &FunctionRegistry) -> Result<Candidate, ValidationErrors> {
    let object = unwrap_object(json).ok_or_else(|| malformed("expected a JSON object"))?;
    let mut violations = Vec::new();
    let mut unresolved_measures = Vec::new();

    let time_grain = match field(object, &["time_grain", "grain", "granularity"]) {
        None | Some(Json::Null) => TimeGrain::None,
        Some(Json::String(name)) => registry.grain(name).unwrap_or_else(|_| {
            violations.push(Violation::UnknownGrain { name: name.clone() });
            TimeGrain::None
        }),
        Some(other) => {
            violations.push(Violation::Malformed {
                reason: format!("time_grain must be a string, got {}", other),
            });
            TimeGrain::None
        }
    };

    let temporal_column = match field(object, &["temporal_column", "date_column", "time_column"]) {
        None | Some(Json::Null) => None,
        Some(Json::String(name)) => Some(name.clone()),
        Some(other) => {
            violations.push(Violation::Malformed {
                reason: format!("temporal_column must be a string, got {}", other),
            });
            None
        }
    };

    let group_by = match field(object, &["group_by", "groupby", "dimensions"]) {
        None | Some(Json::Null) => Vec::new(),
        Some(Json::String(name)) => vec![name.clone()],
        Some(Json::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Json::String(name) => Some(name.clone()),
                other => {
                    violations.push(Violation::Malformed {
                        reason: format!("group_by entries must be strings, got {}", other),
                    });
                    None
                }
            })
            .collect(),
        Some(other) => {
            violations.push(Violation::Malformed {
                reason: format!("group_by must be a list of column names, got {}", other),
            });
            Vec::new()
        }
    };

    let measures = match field(object, &["measures", "metrics", "aggregations"]) {
        None | Some(Json::Null) => Vec::new(),
        Some(Json::Array(items)) => items
            .iter()
            .filter_map(|item| measure(item, registry, &mut violations, &mut unresolved_measures))
            .collect(),
        Some(single @ Json::Object(_)) => measure(single, registry, &mut violations, &mut unresolved_measures)
            .into_iter()
            .collect(),
        Some(other) => {
            violations.push(Violation::Malformed {
                reason: format!("measures must be a list, got {}", other),
            });
            Vec::new()
        }
    };

    let date_range = match field(object, &["date_range", "range"]) {
        None | Some(Json::Null) => None,
        Some(range) => date_range(range, &mut violations),
    };

    Ok(Candidate {
        spec: QuerySpec {
            time_grain,
            temporal_column,
            group_by,
            measures,
            date_range,
        },
        violations,
        unresolved_measures,
    })
}

fn measure(
    item: &Json,
    registry: &FunctionRegistry,
    violations: &mut Vec<Violation>,
    unresolved: &mut Vec<(String, String)>,
) -> Option<Measure> {
    let Some(object) = item.as_object() else {
        violations.push(Violation::Malformed {
            reason: format!("measure must be an object with column and func, got {}", item),
        });
        return None;
    };

    let column = field(object, &["column", "col", "field"]).and_then(Json::as_str);
    let func = field(object, &["func", "function", "aggregation", "agg"]).and_then(Json::as_str);
    let (Some(column), Some(func)) = (column, func) else {
        violations.push(Violation::Malformed {
            reason: format!("measure needs string 'column' and 'func' fields, got {}", item),
        });
        return None;
    };

    match registry.lookup(func) {
        Ok(sig) => Some(Measure::new(column, sig.func)),
        Err(_) => {
            violations.push(Violation::UnknownFunction { name: func.to_string() });
            unresolved.push((column.to_string(), func.to_string()));
            None
        }
    }
}

fn date_range(range: &Json, violations: &mut Vec<Violation>) -> Option<DateRange> {
    let bound = |keys: &[&str]| {
        range
            .as_object()
            .and_then(|o| field(o, keys))
            .and_then(Json::as_str)
            .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
    };

    match (bound(&["start", "from"]), bound(&["end", "to"])) {
        (Some(start), Some(end)) => Some(DateRange { start, end }),
        _ => {
            violations.push(Violation::Malformed {
                reason: format!("date_range needs 'start' and 'end' dates as YYYY-MM-DD, got {}", range),
            });
            None
        }
    }
}

/// Accept `{"query": {...}}`, `{"spec": {...}}` or the bare object
fn unwrap_object(json: &Json) -> Option<&Map<String, Json>> {
    let object = json.as_object()?;
    for wrapper in ["query", "spec"] {
        if let Some(inner @ Json::Object(_)) = object.get(wrapper) {
            return inner.as_object();
        }
    }
    Some(object)
}

/// First present key, compared case-insensitively
fn field<'j>(object: &'j Map<String, Json>, keys: &[&str]) -> Option<&'j Json> {
    object
        .iter()
        .find(|(k, _)| keys.iter().any(|key| k.eq_ignore_ascii_case(key)))
        .map(|(_, v)| v)
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json) up to the first newline
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Slice from the first `{` to the last `}`
fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn malformed(reason: impl Into<String>) -> ValidationErrors {
    ValidationErrors::single(Violation::Malformed { reason: reason.into() })
}
