//! Orchestrator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ResearchError;
use crate::router::RouterConfig;

/// Settings shared by every run an orchestrator drives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Threshold and loop cap
    pub router: RouterConfig,

    /// Upper bound on a single stage invocation
    #[serde(with = "humantime_serde")]
    pub stage_timeout: Duration,

    /// Retry behaviour for failed stages
    pub retry_policy: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            stage_timeout: Duration::from_secs(120),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.router.threshold = threshold;
        self
    }

    pub fn with_max_loops(mut self, max_loops: u32) -> Self {
        self.router.max_loops = max_loops;
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), ResearchError> {
        self.router.validate()?;
        if self.stage_timeout.is_zero() {
            return Err(ResearchError::configuration("stage timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Retry policy for failed stage invocations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the first failure
    pub max_retries: u32,

    /// Base delay for exponential backoff
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,

    /// Maximum delay between retries
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Fail on the first error
    pub fn no_retry() -> Self {
        Self::new(0)
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    /// Calculate delay for a given retry attempt (exponential backoff)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        let delay = self.backoff_base.saturating_mul(multiplier);
        delay.min(self.backoff_max)
    }

    /// Whether another attempt is allowed after `attempts` retries
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }
}
