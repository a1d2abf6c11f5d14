//! # Pipeline Module
//!
//! Builds the research loop's collaborators once at process start and hands
//! them to whoever needs them. Nothing here is global: the orchestrator and
//! the results store are plain values passed down from `main`.
//!
//! It demonstrates:
//! - Rig's client and agent builders
//! - Trait objects (`Arc<dyn Trait>`) for swappable services
//! - Constructor injection instead of singletons

use anyhow::{Context, Result};
use rig::client::{CompletionClient, ProviderClient};
use rig::providers::ollama;
use std::sync::Arc;
use tracing::{debug, info};

use research_loop::store::create_store;
use research_loop::{
    GradeStage, LLMConfig, LLMProvider, Orchestrator, PlanStage, ResearchStage, ResultsStore,
    Retriever, RigAgentAdapter, RunLauncher, StageSet, TavilyRetriever, WriteStage,
    DEFAULT_RETENTION,
};

use crate::config::AppConfig;

/// Grades are a bare integer; a handful of tokens is plenty
const GRADE_MAX_TOKENS: u64 = 8;

/// Build the orchestrator with Ollama-backed stages and Tavily retrieval.
///
/// # Rust Concept: Trait Objects
///
/// `Arc<dyn LLMProvider>` erases the concrete Rig model type, so every stage
/// only knows it has "something that completes prompts". Tests swap in a
/// scripted provider through the same seam.
pub fn build_orchestrator(config: &AppConfig) -> Result<Arc<Orchestrator>> {
    let llm = build_llm(config);
    let retriever = build_retriever(config)?;

    let creative = LLMConfig::new(&config.model).with_temperature(config.temperature);
    let strict = LLMConfig::new(&config.model)
        .with_temperature(0.0)
        .with_max_tokens(GRADE_MAX_TOKENS);

    let stages = StageSet::new(
        Arc::new(PlanStage::new(llm.clone()).with_config(creative.clone())),
        Arc::new(ResearchStage::new(retriever).with_results_per_step(config.results_per_step)),
        Arc::new(WriteStage::new(llm.clone()).with_config(creative)),
        Arc::new(GradeStage::new(llm).with_config(strict)),
    )?;

    let engine_config = config.engine_config();
    info!(
        threshold = engine_config.router.threshold,
        max_loops = engine_config.router.max_loops,
        stage_timeout = ?engine_config.stage_timeout,
        "Research loop configured"
    );

    let orchestrator =
        Orchestrator::new(stages, engine_config).context("Invalid research loop settings")?;
    Ok(Arc::new(orchestrator))
}

/// Open the configured results store
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn ResultsStore>> {
    let store_config = config.store_config()?;
    debug!(store = ?store_config, "Opening results store");
    create_store(&store_config, DEFAULT_RETENTION)
        .await
        .context("Failed to open results store")
}

/// Orchestrator plus store, ready to accept background runs
pub async fn build_launcher(config: &AppConfig) -> Result<RunLauncher> {
    let orchestrator = build_orchestrator(config)?;
    let store = open_store(config).await?;
    Ok(RunLauncher::with_concurrency(
        orchestrator,
        store,
        config.max_concurrent_runs,
    ))
}

fn build_llm(config: &AppConfig) -> Arc<dyn LLMProvider> {
    // ollama::Client::from_env() reads OLLAMA_API_BASE_URL, or defaults to
    // http://localhost:11434
    std::env::set_var("OLLAMA_API_BASE_URL", &config.ollama_host);
    let client = ollama::Client::from_env();
    let agent = client.agent(&config.model).build();

    debug!(host = %config.ollama_host, model = %config.model, "Connected to Ollama");
    Arc::new(RigAgentAdapter::with_names(agent, "ollama", config.model.clone()))
}

fn build_retriever(config: &AppConfig) -> Result<Arc<dyn Retriever>> {
    let api_key = config.tavily_api_key.clone().context(
        "TAVILY_API_KEY is not set; research needs a search API key (https://tavily.com)",
    )?;
    Ok(Arc::new(
        TavilyRetriever::new(api_key).with_topic(config.search_topic),
    ))
}
