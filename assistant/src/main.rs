use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use campus_assistant::api::{self, AppState};
use campus_assistant::config::Config;
use campus_assistant::db::RelationalStore;
use campus_assistant::health::{HealthChecker, SysinfoProbe};
use campus_assistant::llm::OpenAiClient;
use campus_assistant::metrics::Metrics;
use campus_assistant::middleware;
use campus_assistant::rag::{
    HttpVectorStore, OrchestratorSettings, PromptAssembler, QueryOrchestrator, Retriever,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!("Starting campus assistant API");
    info!(
        model = %config.model_name,
        k = config.retriever_k,
        multi_query = config.multi_query,
        workers = config.workers,
        "Configuration loaded"
    );

    let api_key = config
        .openai_api_key
        .clone()
        .context("OPENAI_API_KEY must be set")?;

    // Outbound calls are bounded by the orchestrator's own timeout; the
    // client-level one only catches stalled connections.
    let http = reqwest::Client::builder()
        .timeout(config.request_timeout() + Duration::from_secs(5))
        .build()?;

    let store = HttpVectorStore::new(
        http.clone(),
        &config.embedding_service_url,
        &config.vector_db_service_url,
        &config.embedding_model_name,
    );
    let llm = OpenAiClient::new(http, &config.openai_base_url, api_key, &config.model_name);

    // Check OpenAI connectivity (warn only)
    match llm.check_connection().await {
        Ok(()) => info!("OpenAI connectivity verified"),
        Err(e) => warn!("OpenAI connectivity check failed: {}", e),
    }

    // Initialize relational store
    let relational = RelationalStore::open(&config.database_url, config.workers as u32).await;

    let metrics = Metrics::new()?;
    let orchestrator = QueryOrchestrator::new(
        Retriever::new(Arc::new(store)),
        Arc::new(llm),
        PromptAssembler::new(&config.system_prompt, config.prompt_token_budget),
        OrchestratorSettings::from(&config),
        config.workers,
        metrics.clone(),
    );
    let health = HealthChecker::new(&config, Arc::new(SysinfoProbe), relational.clone());

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        health: Arc::new(health),
        metrics,
        consultations: relational.log(),
        limiter: middleware::rate_limiter(config.rate_limit_per_minute),
    };

    let routes = api::routes(state);

    // Start server
    let addr = ([0, 0, 0, 0], config.port);
    info!("Server listening on {}", config.port);

    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
    });
    server.await;

    Ok(())
}
