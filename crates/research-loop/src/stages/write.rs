use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{Stage, StageKind};
use crate::error::ResearchError;
use crate::llm::{LLMConfig, LLMProvider, Message};
use crate::prompts;
use crate::state::{ResearchState, StateUpdate};

/// Sections every report must carry
pub const REPORT_SECTIONS: [&str; 7] = [
    "Executive Summary",
    "Financial Performance",
    "Valuation Analysis",
    "Competitive Position",
    "Risk Factors",
    "Investment Thesis",
    "Sources",
];

/// Marker written under a section the notes cannot support
pub const DATA_UNAVAILABLE: &str = "Data not available.";

/// Drafts the report from the accumulated research notes
pub struct WriteStage {
    llm: Arc<dyn LLMProvider>,
    config: Option<LLMConfig>,
}

impl WriteStage {
    pub fn new(llm: Arc<dyn LLMProvider>) -> Self {
        Self {
            llm,
            config: None,
        }
    }

    pub fn with_config(mut self, config: LLMConfig) -> Self {
        self.config = Some(config);
        self
    }
}

#[async_trait]
impl Stage for WriteStage {
    fn kind(&self) -> StageKind {
        StageKind::Write
    }

    async fn run(&self, state: &ResearchState) -> Result<StateUpdate, ResearchError> {
        let messages = [
            Message::system(prompts::WRITER_SYSTEM),
            Message::user(prompts::write_prompt(&state.task, &state.research_notes)),
        ];
        let response = self
            .llm
            .complete(&messages, self.config.as_ref())
            .await
            .map_err(|e| {
                ResearchError::stage_failure_with_source(StageKind::Write, "writer unavailable", e)
            })?;

        let draft = response.text().trim();
        if draft.is_empty() {
            return Err(ResearchError::stage_failure(
                StageKind::Write,
                "writer returned an empty report",
            ));
        }

        let report = complete_sections(draft, &REPORT_SECTIONS);
        debug!(chars = report.len(), notes = state.research_notes.len(), "Report drafted");
        Ok(StateUpdate::new().report(report))
    }
}

fn has_section(report: &str, section: &str) -> bool {
    let section = section.to_lowercase();
    report.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with('#') && line.trim_start_matches('#').trim().to_lowercase() == section
    })
}

/// Append every missing section with an explicit data-unavailable marker
fn complete_sections(draft: &str, sections: &[&str]) -> String {
    let mut report = draft.to_string();
    for section in sections {
        if !has_section(&report, section) {
            report.push_str(&format!("\n\n## {}\n\n{}", section, DATA_UNAVAILABLE));
        }
    }
    report
}
