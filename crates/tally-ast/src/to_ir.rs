//! Convert the shorthand AST to a candidate query spec

use chrono::NaiveDate;
use tally_ir::{self as ir, DateRange, QuerySpec, TimeGrain};
use tally_registry::FunctionRegistry;

use crate::ast::*;
use crate::parser::{parse, ParseError};

impl QueryText {
    /// Resolve function and grain names against the registry
    ///
    /// Column names are left untouched; checking them is the validator's job.
    pub fn to_ir(self, registry: &FunctionRegistry) -> Result<QuerySpec, ParseError> {
        let time_grain = match self.grain {
            Some(name) => registry
                .grain(&name)
                .map_err(|_| ParseError::UnknownGrain(name))?,
            None => TimeGrain::None,
        };

        let measures = self
            .measures
            .into_iter()
            .map(|m| m.to_ir(registry))
            .collect::<Result<Vec<_>, _>>()?;

        let date_range = self.range.map(|r| r.to_ir()).transpose()?;

        Ok(QuerySpec {
            time_grain,
            temporal_column: self.temporal_column,
            group_by: self.group_by,
            measures,
            date_range,
        })
    }
}

impl MeasureCall {
    fn to_ir(self, registry: &FunctionRegistry) -> Result<ir::Measure, ParseError> {
        let sig = registry
            .lookup(&self.func)
            .map_err(|_| ParseError::UnknownFunction(self.func.clone()))?;
        Ok(ir::Measure::new(self.column, sig.func))
    }
}

impl RangeText {
    fn to_ir(self) -> Result<DateRange, ParseError> {
        let parse_date = |s: &str| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| ParseError::InvalidDate(s.to_string()))
        };
        Ok(DateRange {
            start: parse_date(&self.start)?,
            end: parse_date(&self.end)?,
        })
    }
}

/// Parse shorthand text straight into a candidate spec
pub fn parse_spec(source: &str, registry: &FunctionRegistry) -> Result<QuerySpec, ParseError> {
    parse(source)?.to_ir(registry)
}
