//! Post-grade routing decision
//!
//! Rules are evaluated in order and the first match wins:
//! 1. `score >= threshold` halts with [`HaltReason::ScoreThreshold`]
//! 2. `loop_count >= max_loops` halts with [`HaltReason::Exhausted`]
//! 3. otherwise the loop continues at Research

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ResearchError;
use crate::state::{ResearchState, MAX_SCORE};

/// Default minimum acceptable score
pub const DEFAULT_THRESHOLD: u8 = 85;

/// Default research iterations per run
pub const DEFAULT_MAX_LOOPS: u32 = 3;

/// Router settings, fixed for the lifetime of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Minimum score that ends the run as a success
    pub threshold: u8,
    /// Research iterations after which the run ends regardless of score
    pub max_loops: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_loops: DEFAULT_MAX_LOOPS,
        }
    }
}

impl RouterConfig {
    pub fn new(threshold: u8, max_loops: u32) -> Result<Self, ResearchError> {
        let config = Self {
            threshold,
            max_loops,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ResearchError> {
        if self.threshold == 0 || self.threshold > MAX_SCORE {
            return Err(ResearchError::configuration(format!(
                "score threshold must be in 1..={}, got {}",
                MAX_SCORE, self.threshold
            )));
        }
        if self.max_loops == 0 {
            return Err(ResearchError::configuration(
                "max_loops must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Why a run stopped looping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// The report met the quality threshold
    ScoreThreshold,
    /// The iteration cap was reached below threshold
    Exhausted,
}

impl HaltReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaltReason::ScoreThreshold => "score_threshold",
            HaltReason::Exhausted => "exhausted",
        }
    }
}

/// Router outcome at the post-grade checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    /// Re-enter Research, keeping accumulated notes
    Continue,
    /// Stop; the current state is final
    Halt(HaltReason),
}

impl RouteDecision {
    /// Name of the rule that produced this decision
    pub fn rule(&self) -> &'static str {
        match self {
            RouteDecision::Continue => "continue",
            RouteDecision::Halt(reason) => reason.as_str(),
        }
    }

    pub fn is_halt(&self) -> bool {
        matches!(self, RouteDecision::Halt(_))
    }
}

/// Decides whether a graded run loops again
#[derive(Debug, Clone)]
pub struct Router {
    config: RouterConfig,
}

impl Router {
    pub fn new(config: RouterConfig) -> Result<Self, ResearchError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Apply the routing rules to a graded state.
    ///
    /// The score rule only applies once a grade has been merged.
    pub fn decide(&self, state: &ResearchState) -> RouteDecision {
        let decision = match state.grade() {
            Some(score) if score >= self.config.threshold => {
                RouteDecision::Halt(HaltReason::ScoreThreshold)
            }
            _ if state.loop_count >= self.config.max_loops => {
                RouteDecision::Halt(HaltReason::Exhausted)
            }
            _ => RouteDecision::Continue,
        };

        info!(
            rule = decision.rule(),
            score = state.score,
            loop_count = state.loop_count,
            threshold = self.config.threshold,
            max_loops = self.config.max_loops,
            "Routing decision"
        );

        decision
    }
}
