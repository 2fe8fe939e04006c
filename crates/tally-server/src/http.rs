//! HTTP API
//!
//! Provides REST API endpoints for:
//! - Dataset loading and schema introspection
//! - Aggregation from a spec or query shorthand
//! - Natural language translation
//! - Period comparison
//! - Prometheus metrics

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tally_engine::{
    compare_periods, default_registry, AggregateError, CancelFlag, Dataset, ModelCall, PeriodComparison,
    TranslationFailure, ValidatedQuery, ValidationErrors, Violation,
};
use tally_duck::{ReadError, TableReader};
use tally_ir::{AggregationResult, QuerySpec, ResultRow, Schema, TimeGrain};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    dataset: Arc<RwLock<Option<Arc<Dataset>>>>,
    model: Option<Arc<dyn ModelCall>>,
    config: Arc<Config>,
    metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(config: Config, model: Option<Arc<dyn ModelCall>>, metrics: Metrics) -> Self {
        Self {
            dataset: Arc::new(RwLock::new(None)),
            model,
            config: Arc::new(config),
            metrics: Arc::new(metrics),
        }
    }

    async fn current(&self) -> Result<Arc<Dataset>, ApiError> {
        self.dataset
            .read()
            .await
            .clone()
            .ok_or_else(|| error(StatusCode::NOT_FOUND, "No dataset loaded; POST /dataset first"))
    }

    #[cfg(test)]
    async fn install(&self, dataset: Dataset) {
        *self.dataset.write().await = Some(Arc::new(dataset));
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    violations: Vec<Violation>,

    #[serde(skip_serializing_if = "Option::is_none")]
    attempts: Option<u32>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            violations: Vec::new(),
            attempts: None,
        }),
    )
}

fn rejected(errors: ValidationErrors) -> ApiError {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ErrorResponse {
            error: errors.to_string(),
            violations: errors.into_iter().collect(),
            attempts: None,
        }),
    )
}

fn translation_failed(failure: TranslationFailure) -> ApiError {
    (
        StatusCode::BAD_GATEWAY,
        Json(ErrorResponse {
            error: failure.to_string(),
            violations: failure.violations().to_vec(),
            attempts: Some(failure.attempts),
        }),
    )
}

fn internal(err: impl std::fmt::Display) -> ApiError {
    error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

#[derive(Debug, Deserialize)]
struct LoadRequest {
    path: PathBuf,
    sheet: Option<String>,
}

#[derive(Debug, Serialize)]
struct SchemaResponse {
    rows: usize,
    schema: Schema,
    functions: serde_json::Value,
    grains: Vec<&'static str>,
}

impl SchemaResponse {
    fn of(dataset: &Dataset) -> Self {
        Self {
            rows: dataset.table.row_count(),
            schema: dataset.schema.clone(),
            functions: default_registry().catalog_json(),
            grains: TimeGrain::ALL.iter().map(|g| g.name()).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TopRequest {
    measure: String,
    n: usize,
}

#[derive(Debug, Deserialize)]
struct AggregateRequest {
    spec: Option<QuerySpec>,
    /// Shorthand alternative to `spec`
    query: Option<String>,
    top: Option<TopRequest>,
}

#[derive(Debug, Serialize)]
struct AggregateResponse {
    spec: QuerySpec,
    fingerprint: String,
    result: AggregationResult,
}

#[derive(Debug, Deserialize)]
struct TranslateRequest {
    text: String,
    #[serde(default)]
    execute: bool,
}

#[derive(Debug, Serialize)]
struct TranslateResponse {
    spec: QuerySpec,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<AggregationResult>,
}

#[derive(Debug, Deserialize)]
struct CompareRequest {
    spec: QuerySpec,
    measure: String,
    first: String,
    second: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/dataset", post(load_dataset))
        .route("/schema", get(get_schema))
        .route("/aggregate", post(aggregate))
        .route("/translate", post(translate))
        .route("/compare", post(compare))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.server.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Tally server listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn load_dataset(
    State(state): State<AppState>,
    Json(req): Json<LoadRequest>,
) -> Result<Json<SchemaResponse>, ApiError> {
    let inference = state.config.inference.clone();
    let loaded = tokio::task::spawn_blocking(move || -> Result<Dataset, ReadError> {
        let table = TableReader::new()?.read(&req.path, req.sheet.as_deref())?;
        Ok(Dataset::load(table, &inference))
    })
    .await
    .map_err(internal)?;

    let dataset = loaded.map_err(|e| match e {
        ReadError::NotFound(_) => error(StatusCode::NOT_FOUND, e.to_string()),
        ReadError::UnsupportedFormat(_) => error(StatusCode::UNSUPPORTED_MEDIA_TYPE, e.to_string()),
        _ => error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    })?;

    let response = SchemaResponse::of(&dataset);
    *state.dataset.write().await = Some(Arc::new(dataset));
    Ok(Json(response))
}

async fn get_schema(State(state): State<AppState>) -> Result<Json<SchemaResponse>, ApiError> {
    let dataset = state.current().await?;
    Ok(Json(SchemaResponse::of(&dataset)))
}

async fn aggregate(
    State(state): State<AppState>,
    Json(req): Json<AggregateRequest>,
) -> Result<Json<AggregateResponse>, ApiError> {
    let dataset = state.current().await?;

    let spec = match (req.spec, req.query) {
        (Some(spec), None) => spec,
        (None, Some(query)) => tally_ast::parse_spec(&query, default_registry())
            .map_err(|e| rejected(ValidationErrors::from(e)))?,
        _ => {
            return Err(error(
                StatusCode::BAD_REQUEST,
                "Provide exactly one of 'spec' or 'query'",
            ))
        }
    };

    let query = dataset.validate(&spec).map_err(rejected)?;
    let mut result = run(&state, dataset, query).await?;

    if let Some(top) = req.top {
        let ranked: Vec<ResultRow> = result
            .top_n(&top.measure, top.n)
            .ok_or_else(|| error(StatusCode::UNPROCESSABLE_ENTITY, format!("Unknown measure '{}'", top.measure)))?
            .into_iter()
            .cloned()
            .collect();
        result.rows = ranked;
    }

    Ok(Json(AggregateResponse {
        fingerprint: spec.fingerprint(),
        spec,
        result,
    }))
}

async fn translate(
    State(state): State<AppState>,
    Json(req): Json<TranslateRequest>,
) -> Result<Json<TranslateResponse>, ApiError> {
    let dataset = state.current().await?;
    let model = state
        .model
        .clone()
        .ok_or_else(|| error(StatusCode::SERVICE_UNAVAILABLE, "No model configured; set OPENAI_API_KEY"))?;

    let outcome = dataset
        .translate(&req.text, model.as_ref(), state.config.translator.clone())
        .await;
    let translation = match outcome {
        Ok(translation) => {
            state.metrics.record_translation(true, translation.attempts);
            translation
        }
        Err(failure) => {
            state.metrics.record_translation(false, failure.attempts);
            warn!(text = %req.text, error = %failure, "Translation failed");
            return Err(translation_failed(failure));
        }
    };

    let spec = translation.query.spec().clone();
    let result = if req.execute {
        Some(run(&state, dataset, translation.query).await?)
    } else {
        None
    };

    Ok(Json(TranslateResponse {
        spec,
        attempts: translation.attempts,
        result,
    }))
}

async fn compare(
    State(state): State<AppState>,
    Json(req): Json<CompareRequest>,
) -> Result<Json<PeriodComparison>, ApiError> {
    let dataset = state.current().await?;
    let query = dataset.validate(&req.spec).map_err(rejected)?;
    let result = run(&state, dataset, query).await?;

    compare_periods(&result, &req.measure, &req.first, &req.second)
        .map(Json)
        .map_err(|e| error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))
}

async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state.metrics.render().map_err(internal)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

/// Execute off the async runtime, cancelling if the request goes away
async fn run(state: &AppState, dataset: Arc<Dataset>, query: ValidatedQuery) -> Result<AggregationResult, ApiError> {
    let cancel = CancelFlag::new();
    let _guard = CancelOnDrop(cancel.clone());
    let started = Instant::now();

    let outcome = tokio::task::spawn_blocking(move || {
        tally_engine::Executor::new(&dataset.table, &dataset.schema).execute_cancellable(&query, &cancel)
    })
    .await
    .map_err(internal)?;

    let result = outcome.map_err(|e| internal(AggregateError::from(e)))?;
    let elapsed = started.elapsed();
    state.metrics.aggregations.inc();
    state.metrics.aggregation_seconds.observe(elapsed.as_secs_f64());
    crate::log_event!(
        level: tracing::Level::INFO,
        event: "aggregation_executed",
        groups: result.row_count(),
        duration_ms: elapsed.as_millis()
    );
    Ok(result)
}

/// Sets the flag when the handler future is dropped, so an abandoned request stops between groups
struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
