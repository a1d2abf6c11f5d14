//! # Configuration Module
//!
//! This module loads the agent's settings from environment variables (and an
//! optional `.env` file) and turns them into the library's typed configs.
//! It demonstrates:
//! - The Default trait for sensible defaults
//! - Fail-fast validation with `anyhow::bail!`
//! - Converting between application and library config types

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use research_loop::retrieval::Topic;
use research_loop::router::{DEFAULT_MAX_LOOPS, DEFAULT_THRESHOLD};
use research_loop::stages::DEFAULT_RESULTS_PER_STEP;
use research_loop::{EngineConfig, RetryPolicy, RouterConfig, StoreConfig};

// =============================================================================
// CONFIGURATION STRUCT
// =============================================================================
/// Main configuration for the financial research agent.
///
/// # Rust Concept: Owned Fields
/// Every field is owned (`String`, not `&str`), so the config can be moved
/// into the pipeline and live as long as the process without lifetimes.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// The Ollama model to use (e.g., "llama3.2", "qwen2.5")
    pub model: String,

    /// Ollama server URL (default: http://localhost:11434)
    pub ollama_host: String,

    /// Temperature for planning and writing; grading always runs at 0
    pub temperature: f64,

    /// Tavily API key for news and filings search
    pub tavily_api_key: Option<String>,

    /// Tavily topic filter: `news` (dated articles) or `general`
    pub search_topic: Topic,

    /// Fragments requested per plan step
    pub results_per_step: u32,

    /// Minimum grade that ends the loop (1-100)
    pub score_threshold: u8,

    /// Maximum research iterations per run
    pub max_loops: u32,

    /// Upper bound on one stage invocation
    pub stage_timeout: Duration,

    /// Retries after a failed stage invocation
    pub max_retries: u32,

    /// Where run records go: `memory`, `file:<dir>`, `file+zstd:<dir>` or `redis://...`
    pub results_store: String,

    /// How many background runs may execute at once
    pub max_concurrent_runs: usize,

    /// Log level for the application
    pub log_level: String,
}

// =============================================================================
// DEFAULT IMPLEMENTATION
// =============================================================================
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: "llama3.2".to_string(),
            ollama_host: "http://localhost:11434".to_string(),
            // Low temperature keeps financial writing factual
            temperature: 0.3,
            tavily_api_key: None,
            search_topic: Topic::News,
            results_per_step: DEFAULT_RESULTS_PER_STEP,
            score_threshold: DEFAULT_THRESHOLD,
            max_loops: DEFAULT_MAX_LOOPS,
            stage_timeout: Duration::from_secs(120),
            max_retries: 2,
            results_store: "file:.research-runs".to_string(),
            max_concurrent_runs: 4,
            log_level: "info".to_string(),
        }
    }
}

// =============================================================================
// CONFIGURATION LOADING
// =============================================================================
impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// # Rust Concept: The ? Operator with Context
    ///
    /// `.context()` wraps a parse error with a message naming the variable,
    /// so a typo in `.env` points straight at the offending line.
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (silently ignore if not found)
        let _ = dotenvy::dotenv();

        let mut config = AppConfig::default();

        if let Ok(val) = env::var("OLLAMA_MODEL") {
            config.model = val;
        }

        if let Ok(val) = env::var("OLLAMA_API_BASE_URL") {
            config.ollama_host = val;
        }

        if let Ok(val) = env::var("TEMPERATURE") {
            config.temperature = val
                .parse()
                .context("TEMPERATURE must be a valid floating-point number (e.g., 0.3)")?;
        }

        if let Ok(val) = env::var("TAVILY_API_KEY") {
            if !val.trim().is_empty() {
                config.tavily_api_key = Some(val);
            }
        }

        if let Ok(val) = env::var("TAVILY_TOPIC") {
            config.search_topic = parse_topic(&val)?;
        }

        if let Ok(val) = env::var("RESULTS_PER_STEP") {
            config.results_per_step = val
                .parse()
                .context("RESULTS_PER_STEP must be a positive integer")?;
        }

        if let Ok(val) = env::var("SCORE_THRESHOLD") {
            config.score_threshold = val
                .parse()
                .context("SCORE_THRESHOLD must be an integer between 1 and 100")?;
        }

        if let Ok(val) = env::var("MAX_LOOPS") {
            config.max_loops = val
                .parse()
                .context("MAX_LOOPS must be a positive integer")?;
        }

        if let Ok(val) = env::var("STAGE_TIMEOUT_SECS") {
            let secs: u64 = val
                .parse()
                .context("STAGE_TIMEOUT_SECS must be a positive integer")?;
            config.stage_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = env::var("MAX_RETRIES") {
            config.max_retries = val
                .parse()
                .context("MAX_RETRIES must be a non-negative integer")?;
        }

        if let Ok(val) = env::var("RESULTS_STORE") {
            config.results_store = val;
        }

        if let Ok(val) = env::var("MAX_CONCURRENT_RUNS") {
            config.max_concurrent_runs = val
                .parse()
                .context("MAX_CONCURRENT_RUNS must be a positive integer")?;
        }

        if let Ok(val) = env::var("RUST_LOG") {
            config.log_level = val;
        }

        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Fails fast with a clear message instead of failing mid-run.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            anyhow::bail!(
                "Temperature must be between 0.0 and 2.0, got: {}",
                self.temperature
            );
        }

        if self.model.is_empty() {
            anyhow::bail!("OLLAMA_MODEL cannot be empty");
        }

        if self.results_per_step == 0 {
            anyhow::bail!("RESULTS_PER_STEP must be at least 1");
        }

        if self.max_concurrent_runs == 0 {
            anyhow::bail!("MAX_CONCURRENT_RUNS must be at least 1");
        }

        self.engine_config()
            .validate()
            .context("Invalid research loop settings")?;

        self.store_config()?;

        Ok(())
    }

    /// Orchestrator settings derived from this config
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new()
            .with_router(RouterConfig {
                threshold: self.score_threshold,
                max_loops: self.max_loops,
            })
            .with_stage_timeout(self.stage_timeout)
            .with_retry_policy(RetryPolicy::new(self.max_retries))
    }

    /// Results store backend named by `results_store`
    pub fn store_config(&self) -> Result<StoreConfig> {
        self.results_store
            .parse()
            .with_context(|| format!("RESULTS_STORE `{}` is not usable", self.results_store))
    }
}

fn parse_topic(value: &str) -> Result<Topic> {
    match value.trim().to_lowercase().as_str() {
        "news" => Ok(Topic::News),
        "general" => Ok(Topic::General),
        other => anyhow::bail!("TAVILY_TOPIC must be `news` or `general`, got: {}", other),
    }
}
