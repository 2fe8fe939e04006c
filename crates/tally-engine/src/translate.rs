//! Natural language to query spec translation with a bounded retry loop
//!
//! The model sits behind [`ModelCall`]; every candidate goes through coercion
//! and the validator, and rejected candidates are fed back as corrective
//! turns until the attempt budget runs out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tally_ir::Schema;
use tally_registry::FunctionRegistry;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::coerce::coerce;
use crate::prompt::Prompt;
use crate::validate::{ValidatedQuery, ValidationErrors, Violation};

/// Failure of a single model call; both kinds are retried
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelCallError {
    #[error("Model call failed: {0}")]
    Network(String),

    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),
}

/// A text-completion backend
#[async_trait]
pub trait ModelCall: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, ModelCallError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    #[serde(rename = "attempt_timeout_ms", with = "millis")]
    pub attempt_timeout: Duration,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Why the last attempt did not produce a query
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    #[error(transparent)]
    ModelCall(#[from] ModelCallError),

    #[error("Candidate rejected: {0}")]
    Rejected(#[from] ValidationErrors),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Translation failed after {attempts} attempt(s): {last_error}")]
pub struct TranslationFailure {
    pub attempts: u32,
    pub last_error: AttemptError,
}

impl TranslationFailure {
    /// Violations of the last rejected candidate; empty when the last attempt was a call failure
    pub fn violations(&self) -> &[Violation] {
        match &self.last_error {
            AttemptError::Rejected(errors) => errors.violations(),
            AttemptError::ModelCall(_) => &[],
        }
    }
}

/// A successful translation and the attempts it took
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Translation {
    pub query: ValidatedQuery,
    pub attempts: u32,
}

/// Retry loop states
enum State {
    Attempt { number: u32 },
    Retry { number: u32, error: AttemptError },
    Succeeded { attempts: u32, query: ValidatedQuery },
    Exhausted { attempts: u32, error: AttemptError },
}

pub struct Translator<'a> {
    schema: &'a Schema,
    registry: &'a FunctionRegistry,
    model: &'a dyn ModelCall,
    config: TranslatorConfig,
}

impl<'a> Translator<'a> {
    pub fn new(schema: &'a Schema, registry: &'a FunctionRegistry, model: &'a dyn ModelCall) -> Self {
        Self {
            schema,
            registry,
            model,
            config: TranslatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TranslatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Translate a question into a query valid against the schema
    pub async fn translate(&self, text: &str) -> Result<Translation, TranslationFailure> {
        let max_attempts = self.config.max_retries + 1;
        let mut prompt = Prompt::for_question(text, self.schema, self.registry);
        debug!(prompt = %prompt.render(), "Translation prompt");

        let mut state = State::Attempt { number: 1 };
        loop {
            state = match state {
                State::Attempt { number } => match self.attempt(&mut prompt).await {
                    Ok(query) => State::Succeeded { attempts: number, query },
                    Err(error) if number < max_attempts => State::Retry { number, error },
                    Err(error) => State::Exhausted { attempts: number, error },
                },
                State::Retry { number, error } => {
                    warn!(attempt = number, max_attempts, error = %error, "Translation attempt failed, retrying");
                    State::Attempt { number: number + 1 }
                }
                State::Succeeded { attempts, query } => {
                    info!(attempts, fingerprint = %query.spec().fingerprint(), "Translation succeeded");
                    return Ok(Translation { query, attempts });
                }
                State::Exhausted { attempts, error } => {
                    warn!(attempts, error = %error, "Translation failed");
                    return Err(TranslationFailure {
                        attempts,
                        last_error: error,
                    });
                }
            };
        }
    }

    /// One model call plus coercion and validation; rejections extend the prompt
    async fn attempt(&self, prompt: &mut Prompt) -> Result<ValidatedQuery, AttemptError> {
        let timeout = self.config.attempt_timeout;
        let candidate = match tokio::time::timeout(timeout, self.model.complete(prompt)).await {
            Ok(result) => result?,
            Err(_) => return Err(ModelCallError::Timeout(timeout).into()),
        };
        debug!(candidate = %candidate, "Model candidate");

        let checked = coerce(&candidate, self.registry)
            .and_then(|coerced| coerced.validate(self.schema, self.registry));
        checked.map_err(|errors| {
            prompt.push_violations(&candidate, &errors);
            AttemptError::Rejected(errors)
        })
    }
}

/// Translate with the default retry budget and timeout
pub async fn translate(
    text: &str,
    schema: &Schema,
    model: &dyn ModelCall,
) -> Result<ValidatedQuery, TranslationFailure> {
    Translator::new(schema, crate::default_registry(), model)
        .translate(text)
        .await
        .map(|translation| translation.query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tally_ir::{AggFunc, ColumnDescriptor, ColumnRole, DataType, Measure, TimeGrain};

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDescriptor::new("date", ColumnRole::Temporal, DataType::Date),
            ColumnDescriptor::new("region", ColumnRole::Categorical, DataType::String),
            ColumnDescriptor::new("revenue", ColumnRole::Measure, DataType::Integer),
        ])
    }

    /// Replays canned responses and records every prompt it sees
    struct Scripted {
        replies: Mutex<Vec<Result<String, ModelCallError>>>,
        prompts: Mutex<Vec<Prompt>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<&str, ModelCallError>>) -> Self {
            let mut replies: Vec<_> = replies.into_iter().map(|r| r.map(str::to_string)).collect();
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelCall for Scripted {
        async fn complete(&self, prompt: &Prompt) -> Result<String, ModelCallError> {
            self.prompts.lock().unwrap().push(prompt.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ModelCallError::Network("script exhausted".into())))
        }
    }

    struct Sleeper;

    #[async_trait]
    impl ModelCall for Sleeper {
        async fn complete(&self, _prompt: &Prompt) -> Result<String, ModelCallError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("{}".into())
        }
    }

    const QUARTERLY: &str = r#"{"time_grain": "quarterly", "temporal_column": "date", "group_by": ["region"], "measures": [{"column": "revenue", "func": "sum"}]}"#;

    #[tokio::test]
    async fn test_translate_total_revenue_by_region_per_quarter() {
        let model = Scripted::new(vec![Ok(QUARTERLY)]);
        let query = translate("total revenue by region per quarter", &schema(), &model)
            .await
            .unwrap();

        let spec = query.spec();
        assert_eq!(spec.time_grain, TimeGrain::Quarterly);
        assert_eq!(spec.group_by, vec!["region"]);
        assert_eq!(spec.measures, vec![Measure::new("revenue", AggFunc::Sum)]);
    }

    #[tokio::test]
    async fn test_retry_feeds_violations_back() {
        let bad = r#"{"time_grain": "none", "measures": [{"column": "profit", "func": "sum"}]}"#;
        let model = Scripted::new(vec![Ok(bad), Ok(QUARTERLY)]);
        let registry = FunctionRegistry::default();
        let schema = schema();

        let translation = Translator::new(&schema, &registry, &model)
            .translate("total profit")
            .await
            .unwrap();
        assert_eq!(translation.attempts, 2);
        assert_eq!(translation.query.spec().time_grain, TimeGrain::Quarterly);

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        let feedback = &prompts[1].messages[2].content;
        assert!(feedback.contains("profit"));
        assert_eq!(prompts[1].messages[1].content, bad);
    }

    #[tokio::test]
    async fn test_feedback_lists_naming_and_schema_problems() {
        let bad = r#"{"group_by": ["country"], "measures": [{"column": "profit", "func": "median"}]}"#;
        let model = Scripted::new(vec![Ok(bad), Ok(QUARTERLY)]);
        let registry = FunctionRegistry::default();
        let schema = schema();

        let translation = Translator::new(&schema, &registry, &model)
            .translate("median profit by country")
            .await
            .unwrap();
        assert_eq!(translation.attempts, 2);

        let prompts = model.prompts.lock().unwrap();
        let feedback = &prompts[1].messages[2].content;
        for name in ["median", "profit", "country"] {
            assert!(feedback.contains(name), "{} missing from {}", name, feedback);
        }
    }

    #[tokio::test]
    async fn test_unknown_column_exhausts_and_names_it() {
        let bad = r#"{"measures": [{"column": "profit", "func": "sum"}]}"#;
        let model = Scripted::new(vec![Ok(bad), Ok(bad), Ok(bad)]);

        let failure = translate("profit", &schema(), &model).await.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert!(failure
            .violations()
            .iter()
            .any(|v| matches!(v, Violation::UnknownColumn { column, .. } if column == "profit")));
    }

    #[tokio::test]
    async fn test_network_errors_are_retried() {
        let model = Scripted::new(vec![
            Err(ModelCallError::Network("connection reset".into())),
            Ok(QUARTERLY),
        ]);
        let query = translate("q", &schema(), &model).await;
        assert!(query.is_ok());
    }

    #[tokio::test]
    async fn test_timeouts_on_every_attempt() {
        let registry = FunctionRegistry::default();
        let schema = schema();
        let config = TranslatorConfig {
            max_retries: 2,
            attempt_timeout: Duration::from_millis(20),
        };

        let failure = Translator::new(&schema, &registry, &Sleeper)
            .with_config(config)
            .translate("total revenue")
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(
            failure.last_error,
            AttemptError::ModelCall(ModelCallError::Timeout(Duration::from_millis(20)))
        );
        assert!(failure.violations().is_empty());
    }

    #[tokio::test]
    async fn test_zero_retries_means_one_attempt() {
        let model = Scripted::new(vec![Ok("nonsense"), Ok(QUARTERLY)]);
        let registry = FunctionRegistry::default();
        let schema = schema();
        let failure = Translator::new(&schema, &registry, &model)
            .with_config(TranslatorConfig {
                max_retries: 0,
                ..TranslatorConfig::default()
            })
            .translate("q")
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 1);
    }

    #[test]
    fn test_config_from_json() {
        let config: TranslatorConfig = serde_json::from_str(r#"{"attempt_timeout_ms": 1500}"#).unwrap();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.attempt_timeout, Duration::from_millis(1500));
    }
}
