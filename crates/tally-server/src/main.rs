//! Tally HTTP server
//!
//! Loads a tabular file, infers its schema and answers time-bucketed
//! aggregation queries given as specs, shorthand or natural language.

use std::sync::Arc;
use tally_engine::ModelCall;
use tracing::{info, warn};

mod config;
mod http;
mod llm;
mod logging;
mod metrics;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config_path = std::env::var("TALLY_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load_or_default(&config_path)?;
    config.apply_logging_env();
    logging::init();
    info!(path = %config_path, "Configuration loaded");

    let model: Option<Arc<dyn ModelCall>> = match Config::get_openai_api_key() {
        Ok(api_key) => {
            info!(model = %config.model.name, "OpenAI translation enabled");
            Some(Arc::new(llm::OpenAiModel::new(api_key, config.model.clone())))
        }
        Err(e) => {
            warn!("{}; /translate is disabled", e);
            None
        }
    };

    let metrics = metrics::Metrics::new()?;
    let state = http::AppState::new(config, model, metrics);
    http::serve(state).await
}
