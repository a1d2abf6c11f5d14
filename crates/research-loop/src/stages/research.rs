use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Stage, StageKind};
use crate::error::ResearchError;
use crate::retrieval::{RetrievalQuery, Retriever};
use crate::state::{ResearchState, StateUpdate};

/// Default number of fragments requested per plan step
pub const DEFAULT_RESULTS_PER_STEP: u32 = 3;

/// Queries the retriever once per plan step and appends what it returns
pub struct ResearchStage {
    retriever: Arc<dyn Retriever>,
    results_per_step: u32,
}

impl ResearchStage {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self {
            retriever,
            results_per_step: DEFAULT_RESULTS_PER_STEP,
        }
    }

    pub fn with_results_per_step(mut self, results: u32) -> Self {
        self.results_per_step = results.max(1);
        self
    }

    fn queries(&self, state: &ResearchState) -> Vec<RetrievalQuery> {
        if state.plan.is_empty() {
            return vec![RetrievalQuery::new(state.task.clone(), self.results_per_step)];
        }
        state
            .plan
            .iter()
            .map(|step| {
                RetrievalQuery::new(format!("{}: {}", state.task, step), self.results_per_step)
            })
            .collect()
    }
}

#[async_trait]
impl Stage for ResearchStage {
    fn kind(&self) -> StageKind {
        StageKind::Research
    }

    async fn run(&self, state: &ResearchState) -> Result<StateUpdate, ResearchError> {
        let mut notes = Vec::new();

        for query in self.queries(state) {
            let fragments = self.retriever.retrieve(&query).await.map_err(|e| {
                ResearchError::stage_failure_with_source(
                    StageKind::Research,
                    format!("retrieval via {} failed", self.retriever.name()),
                    e,
                )
            })?;
            debug!(query = %query.text, fragments = fragments.len(), "Retrieved fragments");
            notes.extend(fragments.iter().map(|f| f.to_note()));
        }

        if notes.is_empty() {
            warn!(task = %state.task, "Research iteration found nothing new");
        }

        Ok(StateUpdate::new().notes(notes))
    }
}
