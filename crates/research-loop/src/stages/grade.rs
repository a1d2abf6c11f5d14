use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{Stage, StageKind};
use crate::error::ResearchError;
use crate::llm::{LLMConfig, LLMProvider, Message};
use crate::prompts;
use crate::state::{ResearchState, StateUpdate, MAX_SCORE};

/// Scores the current report
pub struct GradeStage {
    llm: Arc<dyn LLMProvider>,
    config: Option<LLMConfig>,
}

impl GradeStage {
    pub fn new(llm: Arc<dyn LLMProvider>) -> Self {
        Self { llm, config: None }
    }

    pub fn with_config(mut self, config: LLMConfig) -> Self {
        self.config = Some(config);
        self
    }
}

#[async_trait]
impl Stage for GradeStage {
    fn kind(&self) -> StageKind {
        StageKind::Grade
    }

    async fn run(&self, state: &ResearchState) -> Result<StateUpdate, ResearchError> {
        let report = state
            .report
            .as_deref()
            .ok_or_else(|| ResearchError::stage_failure(StageKind::Grade, "no report to grade"))?;

        let messages = [
            Message::system(prompts::GRADER_SYSTEM),
            Message::user(prompts::grade_prompt(report)),
        ];
        let response = self
            .llm
            .complete(&messages, self.config.as_ref())
            .await
            .map_err(|e| {
                ResearchError::stage_failure_with_source(StageKind::Grade, "grader unavailable", e)
            })?;

        let score = parse_score(response.text())
            .map_err(|reason| ResearchError::stage_failure(StageKind::Grade, reason))?;
        debug!(score, "Report graded");
        Ok(StateUpdate::new().score(u32::from(score)))
    }
}

/// Parse a grader reply that must be a bare integer in `0..=100`.
///
/// Surrounding whitespace is tolerated. Anything else is rejected so that
/// commentary never reaches the router.
pub fn parse_score(text: &str) -> Result<u8, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.len() > 3 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let preview: String = trimmed.chars().take(40).collect();
        return Err(format!("grader reply {:?} is not a bare integer", preview));
    }
    let score: u16 = trimmed
        .parse()
        .map_err(|_| format!("grader reply {:?} is not a bare integer", trimmed))?;
    u8::try_from(score)
        .ok()
        .filter(|s| *s <= MAX_SCORE)
        .ok_or_else(|| format!("score {} outside 0..={}", score, MAX_SCORE))
}
