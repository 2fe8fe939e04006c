//! Executor - runs validated aggregation queries
//!
//! Manages:
//! - Time bucketing and date range filtering
//! - Grouping by (bucket, group-by tuple) in sorted order
//! - Per-measure accumulation with missing-value rules
//! - Cancellation between groups

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tally_ir::{
    AggFunc, AggregationResult, Cell, ColumnDescriptor, DataType, ResultRow, Schema, Table, TimeBucket,
    Value,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bucket;
use crate::temporal;
use crate::validate::{ValidatedQuery, ValidationErrors};

/// Shared cancellation switch, checked at group boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Aggregation cancelled")]
pub struct Cancelled;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("Invalid query: {0}")]
    Invalid(#[from] ValidationErrors),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Consulted before each group is emitted
trait Checkpoint {
    type Error;

    fn check(&self) -> Result<(), Self::Error>;
}

struct NeverCancel;

impl Checkpoint for NeverCancel {
    type Error = Infallible;

    fn check(&self) -> Result<(), Infallible> {
        Ok(())
    }
}

impl Checkpoint for CancelFlag {
    type Error = Cancelled;

    fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A numeric measure input
#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(Number::Int(*i)),
            Value::Float(f) if f.is_finite() => Some(Number::Float(*f)),
            Value::String(_) => value
                .as_i64()
                .map(Number::Int)
                .or_else(|| value.as_f64().map(Number::Float)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    fn into_cell(self) -> Cell {
        match self {
            Number::Int(i) => Cell::Int(i),
            Number::Float(f) => Cell::Float(f),
        }
    }
}

/// Exact integer part plus floating part of a running total
#[derive(Debug, Clone, Copy, Default)]
struct Total {
    ints: i128,
    floats: f64,
    saw_float: bool,
    n: u64,
}

impl Total {
    fn add(&mut self, number: Number) {
        match number {
            Number::Int(i) => self.ints += i128::from(i),
            Number::Float(f) => {
                self.floats += f;
                self.saw_float = true;
            }
        }
        self.n += 1;
    }

    fn as_f64(&self) -> f64 {
        self.ints as f64 + self.floats
    }

    fn sum_cell(&self, declared: DataType) -> Cell {
        if self.n == 0 {
            return match declared {
                DataType::Integer => Cell::Int(0),
                _ => Cell::Float(0.0),
            };
        }
        if self.saw_float {
            return Cell::Float(self.as_f64());
        }
        match i64::try_from(self.ints) {
            Ok(i) => Cell::Int(i),
            Err(_) => Cell::Float(self.ints as f64),
        }
    }
}

/// Running state of one aggregate in one group
#[derive(Debug, Clone)]
enum Accumulator {
    Count { rows: u64 },
    Sum { total: Total, declared: DataType },
    Mean { total: Total },
    Min { best: Option<Number> },
    Max { best: Option<Number> },
}

impl Accumulator {
    fn new(func: AggFunc, column: &ColumnDescriptor) -> Self {
        match func {
            AggFunc::Count => Accumulator::Count { rows: 0 },
            AggFunc::Sum => Accumulator::Sum {
                total: Total::default(),
                declared: column.data_type,
            },
            AggFunc::Mean => Accumulator::Mean { total: Total::default() },
            AggFunc::Min => Accumulator::Min { best: None },
            AggFunc::Max => Accumulator::Max { best: None },
        }
    }

    fn update(&mut self, value: &Value) {
        // count sees every row, the others only non-missing numbers
        if let Accumulator::Count { rows } = self {
            *rows += 1;
            return;
        }
        if value.is_missing() {
            return;
        }
        let Some(number) = Number::from_value(value) else {
            return;
        };

        match self {
            Accumulator::Count { .. } => {}
            Accumulator::Sum { total, .. } | Accumulator::Mean { total } => total.add(number),
            Accumulator::Min { best } => {
                if best.map_or(true, |b| number.as_f64() < b.as_f64()) {
                    *best = Some(number);
                }
            }
            Accumulator::Max { best } => {
                if best.map_or(true, |b| number.as_f64() > b.as_f64()) {
                    *best = Some(number);
                }
            }
        }
    }

    fn finish(&self) -> Cell {
        match self {
            Accumulator::Count { rows } => Cell::Int(i64::try_from(*rows).unwrap_or(i64::MAX)),
            Accumulator::Sum { total, declared } => total.sum_cell(*declared),
            Accumulator::Mean { total } if total.n == 0 => Cell::Undefined,
            Accumulator::Mean { total } => Cell::Float(total.as_f64() / total.n as f64),
            Accumulator::Min { best } | Accumulator::Max { best } => {
                best.map_or(Cell::Undefined, Number::into_cell)
            }
        }
    }
}

type GroupKey = (Option<TimeBucket>, Vec<Value>);

pub struct Executor<'a> {
    table: &'a Table,
    schema: &'a Schema,
}

impl<'a> Executor<'a> {
    pub fn new(table: &'a Table, schema: &'a Schema) -> Self {
        Self { table, schema }
    }

    /// Execute a validated query to completion
    pub fn execute(&self, query: &ValidatedQuery) -> AggregationResult {
        match self.run(query, &NeverCancel) {
            Ok(result) => result,
            Err(never) => match never {},
        }
    }

    /// Execute, giving up between groups once `cancel` is set
    pub fn execute_cancellable(
        &self,
        query: &ValidatedQuery,
        cancel: &CancelFlag,
    ) -> Result<AggregationResult, Cancelled> {
        self.run(query, cancel)
    }

    fn run<C: Checkpoint>(&self, query: &ValidatedQuery, checkpoint: &C) -> Result<AggregationResult, C::Error> {
        let spec = query.spec();
        let grain = spec.time_grain;

        // The validator guarantees every referenced column resolves
        let temporal = spec
            .temporal_column
            .as_deref()
            .and_then(|name| self.locate(name));
        let needs_date = grain.is_bucketed() || spec.date_range.is_some();
        let group_columns: Vec<(usize, &ColumnDescriptor)> =
            spec.group_by.iter().filter_map(|name| self.locate(name)).collect();
        let measures: Vec<(usize, &ColumnDescriptor, AggFunc)> = spec
            .measures
            .iter()
            .filter_map(|m| self.locate(&m.column).map(|(idx, desc)| (idx, desc, m.func)))
            .collect();

        checkpoint.check()?;

        let mut groups: BTreeMap<GroupKey, Vec<Accumulator>> = BTreeMap::new();
        let mut excluded_missing_temporal = 0;
        let mut excluded_out_of_range = 0;

        for row in self.table.rows() {
            let mut bucket = None;
            if needs_date {
                let date = temporal.and_then(|(idx, desc)| temporal::resolve_date(&row[idx], desc));
                let Some(date) = date else {
                    excluded_missing_temporal += 1;
                    continue;
                };
                if let Some(range) = &spec.date_range {
                    if !range.contains(date) {
                        excluded_out_of_range += 1;
                        continue;
                    }
                }
                if grain.is_bucketed() {
                    bucket = Some(bucket::bucket_of(date, grain));
                }
            }

            let key_values: Vec<Value> = group_columns
                .iter()
                .map(|&(idx, desc)| group_value(&row[idx], desc))
                .collect();
            let accumulators = groups.entry((bucket, key_values)).or_insert_with(|| {
                measures
                    .iter()
                    .map(|(_, desc, func)| Accumulator::new(*func, desc))
                    .collect()
            });
            for (acc, (idx, _, _)) in accumulators.iter_mut().zip(&measures) {
                acc.update(&row[*idx]);
            }
        }

        let mut rows = Vec::with_capacity(groups.len());
        for ((bucket, group_values), accumulators) in groups {
            checkpoint.check()?;
            rows.push(ResultRow {
                bucket,
                groups: group_values,
                cells: accumulators.iter().map(Accumulator::finish).collect(),
            });
        }

        if excluded_missing_temporal > 0 {
            warn!(
                excluded = excluded_missing_temporal,
                column = spec.temporal_column.as_deref().unwrap_or_default(),
                "Rows with missing or unparseable temporal values were excluded"
            );
        }
        if excluded_out_of_range > 0 {
            debug!(excluded = excluded_out_of_range, "Rows outside the date range were excluded");
        }

        let measure_labels: Vec<String> = spec.measures.iter().map(|m| m.label()).collect();
        let mut columns = Vec::new();
        if grain.is_bucketed() {
            columns.push(grain.bucket_column().to_string());
        }
        columns.extend(spec.group_by.iter().cloned());
        columns.extend(measure_labels.iter().cloned());

        info!(
            grain = %grain,
            input_rows = self.table.row_count(),
            groups = rows.len(),
            "Aggregation complete"
        );

        Ok(AggregationResult {
            columns,
            measures: measure_labels,
            rows,
            excluded_missing_temporal,
            excluded_out_of_range,
        })
    }

    fn locate(&self, name: &str) -> Option<(usize, &'a ColumnDescriptor)> {
        let idx = self.table.column_index(name)?;
        let desc = self.schema.find(name)?;
        Some((idx, desc))
    }
}

/// Group key in the column's declared type, so keys order naturally.
/// Blank text groups together with null; unparseable text stays as is.
fn group_value(value: &Value, column: &ColumnDescriptor) -> Value {
    if value.is_missing() {
        return Value::Null;
    }
    let typed = match column.data_type {
        DataType::Date | DataType::DateTime => {
            temporal::parse_temporal(value, column.date_format.as_deref()).map(|dt| {
                if column.data_type == DataType::DateTime {
                    Value::DateTime(dt)
                } else {
                    Value::Date(dt.date())
                }
            })
        }
        DataType::Integer => value.as_i64().map(Value::Int),
        DataType::Float | DataType::Boolean | DataType::String => None,
    };
    typed.unwrap_or_else(|| value.clone())
}
