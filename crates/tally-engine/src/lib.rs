//! Tally engine - schema inference, validation, aggregation and translation
//!
//! ```text
//! Table ──infer_schema──▶ Schema
//!                           │
//! QuerySpec ──Validator──▶ ValidatedQuery ──Executor──▶ AggregationResult
//!     ▲
//!     └── QueryBuilder / shorthand / Translator(ModelCall)
//! ```

pub mod bucket;
pub mod builder;
pub mod coerce;
pub mod compare;
pub mod exec;
pub mod prompt;
pub mod schema;
pub mod temporal;
pub mod translate;
pub mod validate;

use std::sync::OnceLock;
use tally_ir::{AggregationResult, QuerySpec, Schema, Table};
use tally_registry::FunctionRegistry;
use tracing::info;

pub use builder::QueryBuilder;
pub use compare::{compare_periods, CompareError, PeriodComparison, PeriodTotal};
pub use exec::{AggregateError, CancelFlag, Cancelled, Executor};
pub use prompt::Prompt;
pub use schema::{infer_schema, InferenceConfig};
pub use translate::{
    translate, AttemptError, ModelCall, ModelCallError, Translation, TranslationFailure, Translator, TranslatorConfig,
};
pub use validate::{ValidatedQuery, ValidationErrors, Validator, Violation};

/// Process-wide registry with the built-in functions and grain names
pub fn default_registry() -> &'static FunctionRegistry {
    static REGISTRY: OnceLock<FunctionRegistry> = OnceLock::new();
    REGISTRY.get_or_init(FunctionRegistry::default)
}

/// Validate against `schema` and run to completion
pub fn aggregate(table: &Table, schema: &Schema, spec: &QuerySpec) -> Result<AggregationResult, ValidationErrors> {
    let query = Validator::new(schema, default_registry()).validate(spec)?;
    Ok(Executor::new(table, schema).execute(&query))
}

/// Like [`aggregate`], but stops between groups once `cancel` is set
pub fn aggregate_with_cancel(
    table: &Table,
    schema: &Schema,
    spec: &QuerySpec,
    cancel: &CancelFlag,
) -> Result<AggregationResult, AggregateError> {
    let query = Validator::new(schema, default_registry()).validate(spec)?;
    Ok(Executor::new(table, schema).execute_cancellable(&query, cancel)?)
}

/// A loaded table together with its inferred schema
#[derive(Debug, Clone)]
pub struct Dataset {
    pub table: Table,
    pub schema: Schema,
}

impl Dataset {
    pub fn load(table: Table, config: &InferenceConfig) -> Self {
        let schema = infer_schema(&table, config);
        info!(
            rows = table.row_count(),
            columns = schema.len(),
            "Dataset loaded"
        );
        Self { table, schema }
    }

    pub fn validate(&self, spec: &QuerySpec) -> Result<ValidatedQuery, ValidationErrors> {
        Validator::new(&self.schema, default_registry()).validate(spec)
    }

    pub fn aggregate(&self, spec: &QuerySpec) -> Result<AggregationResult, ValidationErrors> {
        aggregate(&self.table, &self.schema, spec)
    }

    pub fn aggregate_with_cancel(
        &self,
        spec: &QuerySpec,
        cancel: &CancelFlag,
    ) -> Result<AggregationResult, AggregateError> {
        aggregate_with_cancel(&self.table, &self.schema, spec, cancel)
    }

    /// Run a query already validated against this dataset's schema
    pub fn execute(&self, query: &ValidatedQuery) -> AggregationResult {
        Executor::new(&self.table, &self.schema).execute(query)
    }

    pub fn builder(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(&self.schema, default_registry())
    }

    pub async fn translate(
        &self,
        text: &str,
        model: &dyn ModelCall,
        config: TranslatorConfig,
    ) -> Result<Translation, TranslationFailure> {
        Translator::new(&self.schema, default_registry(), model)
            .with_config(config)
            .translate(text)
            .await
    }
}
