//! NLQ server: natural-language questions to validated Elasticsearch queries

use anyhow::Context;
use nlq_core::QueryGenerator;
use nlq_elastic::ElasticClient;
use nlq_server::{config::Config, llm::OpenAiGenerator, logging, metrics::Metrics, router, AppState};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Secrets live in .env
    dotenvy::dotenv().ok();

    let config_path = std::env::var("NLQ_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load(&config_path).with_context(|| format!("loading {}", config_path))?;
    config.apply_logging_env();
    logging::init();

    let api_key = Config::get_openai_api_key()?;
    let generator = OpenAiGenerator::new(&api_key, &config.llm);
    info!(model = generator.model(), max_attempts = config.repair.max_attempts, "Generator configured");

    let backend = ElasticClient::new(config.elasticsearch.request_timeout()).context("building cluster client")?;
    let metrics = Metrics::new().context("registering metrics")?;
    let llm = config.llm.clone();
    let state = AppState::new(backend, Arc::new(generator), config.repair_options(), metrics).with_keyed_generator(
        Arc::new(move |key: &str| -> Arc<dyn QueryGenerator> { Arc::new(OpenAiGenerator::new(key, &llm)) }),
    );

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("NLQ server listening on {}", addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}
