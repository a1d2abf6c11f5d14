//! Tavily search as a retrieval service
//!
//! # Production Features
//!
//! - Type-safe enums for search_depth and topic
//! - HTTP timeout and retry with exponential backoff
//! - Typed error handling for rate limits and timeouts

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{Fragment, RetrievalQuery, Retriever};
use crate::error::ServiceError;

/// Default Tavily API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.tavily.com";

/// Default timeout for Tavily API requests
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum retry attempts for transient failures
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds)
const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Upper bound on a single backoff sleep
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Tavily caps results per query
const MAX_RESULTS_LIMIT: u32 = 20;

/// Search depth for Tavily API
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    /// Fast search with basic results
    #[default]
    Basic,
    /// More thorough search with detailed results
    Advanced,
}

impl SearchDepth {
    fn as_str(&self) -> &'static str {
        match self {
            SearchDepth::Basic => "basic",
            SearchDepth::Advanced => "advanced",
        }
    }
}

/// Topic filter for Tavily API
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    /// General web search
    General,
    /// Recent news articles (carries publication dates)
    #[default]
    News,
}

impl Topic {
    fn as_str(&self) -> &'static str {
        match self {
            Topic::General => "general",
            Topic::News => "news",
        }
    }
}

/// Retriever backed by the Tavily Search API
///
/// # Example
/// ```ignore
/// let retriever = TavilyRetriever::from_env()?.with_search_depth(SearchDepth::Advanced);
/// let fragments = retriever
///     .retrieve(&RetrievalQuery::new("NVDA data center revenue", 5))
///     .await?;
/// ```
pub struct TavilyRetriever {
    api_key: String,
    client: Client,
    base_url: String,
    search_depth: SearchDepth,
    topic: Topic,
    timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl TavilyRetriever {
    /// Create a new retriever with the given API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            search_depth: SearchDepth::default(),
            topic: Topic::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: MAX_RETRIES,
            retry_base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
        }
    }

    /// Create from environment variable TAVILY_API_KEY
    pub fn from_env() -> Result<Self, TavilyError> {
        let api_key = std::env::var("TAVILY_API_KEY").map_err(|_| TavilyError::Unauthorized)?;
        Ok(Self::new(api_key))
    }

    /// Point at a different endpoint (proxies, test servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_search_depth(mut self, depth: SearchDepth) -> Self {
        self.search_depth = depth;
        self
    }

    pub fn with_topic(mut self, topic: Topic) -> Self {
        self.topic = topic;
        self
    }

    /// Set custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set custom max retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Sleep before retry `attempt` (1-based): base * 2^(attempt-1), capped
    fn retry_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base_delay
            .saturating_mul(multiplier)
            .min(MAX_RETRY_DELAY)
    }

    /// Execute HTTP request with retry and backoff
    async fn execute_with_retry(
        &self,
        request: &TavilyRequest,
    ) -> Result<TavilyResponse, TavilyError> {
        let mut last_error = TavilyError::Unknown("No attempts made".to_string());

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis(), "Retrying Tavily request");
                tokio::time::sleep(delay).await;
            }

            match self.execute_single_request(request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    // Only retry on transient errors
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    warn!(attempt, error = %e, "Tavily request failed, will retry");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Execute a single HTTP request
    async fn execute_single_request(
        &self,
        request: &TavilyRequest,
    ) -> Result<TavilyResponse, TavilyError> {
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TavilyError::Timeout
                } else if e.is_connect() {
                    TavilyError::Connection(e.to_string())
                } else {
                    TavilyError::Network(e.to_string())
                }
            })?;

        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| TavilyError::ParseError(e.to_string()));
        }

        let error_text = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 => Err(TavilyError::Unauthorized),
            429 => Err(TavilyError::RateLimited),
            400 => Err(TavilyError::BadRequest(error_text)),
            500..=599 => Err(TavilyError::ServerError(status.as_u16(), error_text)),
            _ => Err(TavilyError::HttpError(status.as_u16(), error_text)),
        }
    }
}

#[async_trait]
impl Retriever for TavilyRetriever {
    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<Fragment>, ServiceError> {
        if query.text.trim().is_empty() {
            return Err(ServiceError::Rejected("empty query".to_string()));
        }

        let request = TavilyRequest {
            query: query.text.chars().take(400).collect(),
            max_results: query.max_results.clamp(1, MAX_RESULTS_LIMIT),
            search_depth: self.search_depth.as_str().to_string(),
            topic: self.topic.as_str().to_string(),
            include_answer: false,
            include_raw_content: false,
        };

        let response = self.execute_with_retry(&request).await?;
        debug!(query = %query.text, results = response.results.len(), "Tavily search completed");

        Ok(response.results.into_iter().map(Fragment::from).collect())
    }

    fn name(&self) -> &str {
        "tavily"
    }
}

/// Typed errors for Tavily API
#[derive(Debug, thiserror::Error)]
pub enum TavilyError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized - check API key")]
    Unauthorized,

    #[error("Rate limited - too many requests")]
    RateLimited,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("HTTP error ({0}): {1}")]
    HttpError(u16, String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl TavilyError {
    /// Check if this error is retryable
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            TavilyError::Timeout
                | TavilyError::Connection(_)
                | TavilyError::RateLimited
                | TavilyError::ServerError(_, _)
        )
    }
}

impl From<TavilyError> for ServiceError {
    fn from(e: TavilyError) -> Self {
        match e {
            TavilyError::Timeout => ServiceError::Timeout,
            TavilyError::RateLimited => ServiceError::RateLimited,
            TavilyError::Unauthorized => ServiceError::Unauthorized,
            TavilyError::ParseError(msg) => ServiceError::Malformed(msg),
            TavilyError::BadRequest(msg) => ServiceError::Rejected(msg),
            other => ServiceError::Unavailable(format!("Tavily API error: {}", other)),
        }
    }
}

/// Request body for Tavily API
#[derive(Debug, Serialize)]
struct TavilyRequest {
    query: String,
    max_results: u32,
    search_depth: String,
    topic: String,
    include_answer: bool,
    include_raw_content: bool,
}

/// Response from Tavily API
#[derive(Debug, Deserialize)]
struct TavilyResponse {
    /// Search results
    #[serde(default)]
    results: Vec<TavilyResult>,
}

/// Individual search result
#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    content: String,
    /// Relevance score (0-1)
    #[serde(default)]
    score: Option<f64>,
    /// Only present for the news topic
    #[serde(default)]
    published_date: Option<String>,
}

impl From<TavilyResult> for Fragment {
    fn from(result: TavilyResult) -> Self {
        let text = if result.title.is_empty() {
            result.content
        } else {
            format!("{}: {}", result.title, result.content)
        };
        Fragment {
            text,
            source: result.url,
            published: result.published_date,
            relevance: result.score,
        }
    }
}
