//! UI-driven query construction
//!
//! Each step only accepts columns the schema offers for that slot, so a built
//! spec always passes the validator.

use chrono::NaiveDate;
use tally_ir::{AggFunc, ColumnDescriptor, ColumnRole, DateRange, Measure, QuerySpec, Schema, TimeGrain};
use tally_registry::FunctionRegistry;

use crate::validate::{Usage, Violation};

pub struct QueryBuilder<'a> {
    schema: &'a Schema,
    registry: &'a FunctionRegistry,
    spec: QuerySpec,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(schema: &'a Schema, registry: &'a FunctionRegistry) -> Self {
        Self {
            schema,
            registry,
            spec: QuerySpec::default(),
        }
    }

    /// Columns offered for the temporal slot
    pub fn temporal_options(&self) -> Vec<&'a ColumnDescriptor> {
        self.schema.with_role(ColumnRole::Temporal).collect()
    }

    /// Columns offered for grouping
    pub fn group_by_options(&self) -> Vec<&'a ColumnDescriptor> {
        self.schema
            .columns
            .iter()
            .filter(|c| c.role != ColumnRole::Measure)
            .collect()
    }

    /// Columns offered as targets of `func`
    pub fn measure_options(&self, func: AggFunc) -> Vec<&'a ColumnDescriptor> {
        let sig = self.registry.signature(func);
        self.schema.columns.iter().filter(|c| sig.accepts(c.role)).collect()
    }

    /// Set the grain; a bucketed grain picks the first temporal column if none is set yet
    pub fn grain(mut self, grain: TimeGrain) -> Result<Self, Violation> {
        if grain.is_bucketed() {
            self.ensure_temporal_column(Violation::MissingTemporalColumn { grain })?;
        }
        self.spec.time_grain = grain;
        Ok(self)
    }

    pub fn temporal_column(mut self, column: &str) -> Result<Self, Violation> {
        let desc = self.resolve(column, Usage::TemporalColumn)?;
        if desc.role != ColumnRole::Temporal {
            return Err(Violation::RoleMismatch {
                column: column.to_string(),
                role: desc.role,
                usage: Usage::TemporalColumn,
                expected: "a temporal column",
            });
        }
        self.spec.temporal_column = Some(column.to_string());
        Ok(self)
    }

    pub fn group_by(mut self, column: &str) -> Result<Self, Violation> {
        let desc = self.resolve(column, Usage::GroupBy)?;
        if desc.role == ColumnRole::Measure {
            return Err(Violation::RoleMismatch {
                column: column.to_string(),
                role: desc.role,
                usage: Usage::GroupBy,
                expected: "a categorical or temporal column",
            });
        }
        if self.spec.group_by.iter().any(|c| c == column) {
            return Err(Violation::DuplicateGroupBy {
                column: column.to_string(),
            });
        }
        self.spec.group_by.push(column.to_string());
        Ok(self)
    }

    pub fn measure(mut self, column: &str, func: AggFunc) -> Result<Self, Violation> {
        let desc = self.resolve(column, Usage::Measure(func))?;
        if self.registry.check_role(func, column, desc.role).is_err() {
            return Err(Violation::RoleMismatch {
                column: column.to_string(),
                role: desc.role,
                usage: Usage::Measure(func),
                expected: "a measure column (only count accepts any column)",
            });
        }
        let measure = Measure::new(column, func);
        if self.spec.measures.contains(&measure) {
            return Err(Violation::DuplicateMeasure {
                column: column.to_string(),
                func,
            });
        }
        self.spec.measures.push(measure);
        Ok(self)
    }

    pub fn date_range(mut self, start: NaiveDate, end: NaiveDate) -> Result<Self, Violation> {
        if start > end {
            return Err(Violation::InvertedDateRange { start, end });
        }
        self.ensure_temporal_column(Violation::DateRangeWithoutTemporal)?;
        self.spec.date_range = Some(DateRange { start, end });
        Ok(self)
    }

    pub fn build(self) -> Result<QuerySpec, Violation> {
        if self.spec.measures.is_empty() {
            return Err(Violation::EmptyMeasures);
        }
        Ok(self.spec)
    }

    fn resolve(&self, column: &str, usage: Usage) -> Result<&'a ColumnDescriptor, Violation> {
        self.schema.find(column).ok_or_else(|| Violation::UnknownColumn {
            column: column.to_string(),
            usage,
        })
    }

    fn ensure_temporal_column(&mut self, missing: Violation) -> Result<(), Violation> {
        if self.spec.temporal_column.is_some() {
            return Ok(());
        }
        let first = self.schema.with_role(ColumnRole::Temporal).next().ok_or(missing)?;
        self.spec.temporal_column = Some(first.name.clone());
        Ok(())
    }
}
