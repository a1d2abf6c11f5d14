use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use super::{Stage, StageKind};
use crate::error::ResearchError;
use crate::llm::{LLMConfig, LLMProvider, Message};
use crate::prompts;
use crate::state::{ResearchState, StateUpdate};

/// Default cap on plan length
pub const DEFAULT_MAX_STEPS: usize = 6;

/// Asks the model for a numbered research plan
pub struct PlanStage {
    llm: Arc<dyn LLMProvider>,
    config: Option<LLMConfig>,
    max_steps: usize,
}

impl PlanStage {
    pub fn new(llm: Arc<dyn LLMProvider>) -> Self {
        Self {
            llm,
            config: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_config(mut self, config: LLMConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }
}

#[async_trait]
impl Stage for PlanStage {
    fn kind(&self) -> StageKind {
        StageKind::Plan
    }

    async fn run(&self, state: &ResearchState) -> Result<StateUpdate, ResearchError> {
        let messages = [
            Message::system(prompts::PLANNER_SYSTEM),
            Message::user(prompts::plan_prompt(&state.task, self.max_steps)),
        ];
        let response = self
            .llm
            .complete(&messages, self.config.as_ref())
            .await
            .map_err(|e| {
                ResearchError::stage_failure_with_source(StageKind::Plan, "planner unavailable", e)
            })?;

        let mut steps = parse_plan(response.text());
        steps.truncate(self.max_steps);
        if steps.is_empty() {
            return Err(ResearchError::stage_failure(
                StageKind::Plan,
                "planner returned no steps",
            ));
        }

        debug!(steps = steps.len(), "Plan produced");
        Ok(StateUpdate::new().plan(steps))
    }
}

static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+(.+?)\s*$").expect("list item pattern is valid")
});

/// Extract plan steps from model output.
///
/// Numbered (`1.` / `1)`) and bulleted (`-`, `*`) lines are taken as steps.
/// If the output has no list markers at all, each non-empty line is a step.
pub fn parse_plan(text: &str) -> Vec<String> {
    let items: Vec<String> = text
        .lines()
        .filter_map(|line| LIST_ITEM.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|step| !step.is_empty())
        .collect();

    if !items.is_empty() {
        return items;
    }

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
