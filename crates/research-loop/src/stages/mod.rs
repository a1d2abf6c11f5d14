//! The four research stages
//!
//! Every stage reads the current `ResearchState` and returns a partial
//! `StateUpdate`. Stages never call each other; the orchestrator merges their
//! output and decides what runs next.

mod grade;
mod plan;
mod research;
mod write;

pub use grade::{parse_score, GradeStage};
pub use plan::{parse_plan, PlanStage};
pub use research::{ResearchStage, DEFAULT_RESULTS_PER_STEP};
pub use write::{WriteStage, DATA_UNAVAILABLE, REPORT_SECTIONS};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::ResearchError;
use crate::llm::LLMProvider;
use crate::retrieval::Retriever;
use crate::state::{Field, FieldValue, ResearchState, StateUpdate};

/// Identifies one of the four stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Plan,
    Research,
    Write,
    Grade,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Plan => "plan",
            StageKind::Research => "research",
            StageKind::Write => "write",
            StageKind::Grade => "grade",
        }
    }

    /// Fields this stage is allowed to write
    pub fn output_fields(&self) -> &'static [Field] {
        match self {
            StageKind::Plan => &[Field::Plan],
            StageKind::Research => &[Field::ResearchNotes],
            StageKind::Write => &[Field::Report],
            StageKind::Grade => &[Field::Score],
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single transformation step of the research loop
#[async_trait]
pub trait Stage: Send + Sync {
    /// Which slot this stage fills
    fn kind(&self) -> StageKind;

    /// Produce a partial update from the current state
    async fn run(&self, state: &ResearchState) -> Result<StateUpdate, ResearchError>;
}

/// Check a stage's update against what the stage may produce.
///
/// Stages only write their own fields, Plan must produce a non-empty plan,
/// Write a non-empty report and Grade a score.
pub fn check_output(kind: StageKind, update: &StateUpdate) -> Result<(), ResearchError> {
    if let Some(entry) = update
        .entries()
        .iter()
        .find(|e| !kind.output_fields().contains(&e.field))
    {
        return Err(ResearchError::stage_failure(
            kind,
            format!("stage may not write field `{}`", entry.field),
        ));
    }

    match kind {
        StageKind::Plan => match update.get(Field::Plan) {
            Some(FieldValue::Lines(steps)) if !steps.is_empty() => Ok(()),
            _ => Err(ResearchError::stage_failure(kind, "plan is empty")),
        },
        StageKind::Write => match update.get(Field::Report) {
            Some(FieldValue::Text(report)) if !report.trim().is_empty() => Ok(()),
            _ => Err(ResearchError::stage_failure(kind, "report is empty")),
        },
        StageKind::Grade => match update.get(Field::Score) {
            Some(FieldValue::Integer(_)) => Ok(()),
            _ => Err(ResearchError::stage_failure(kind, "no score produced")),
        },
        StageKind::Research => Ok(()),
    }
}

/// One registered stage per kind
#[derive(Clone)]
pub struct StageSet {
    plan: Arc<dyn Stage>,
    research: Arc<dyn Stage>,
    write: Arc<dyn Stage>,
    grade: Arc<dyn Stage>,
}

impl StageSet {
    /// Register the four stages; each must report the kind of its slot
    pub fn new(
        plan: Arc<dyn Stage>,
        research: Arc<dyn Stage>,
        write: Arc<dyn Stage>,
        grade: Arc<dyn Stage>,
    ) -> Result<Self, ResearchError> {
        for (expected, stage) in [
            (StageKind::Plan, &plan),
            (StageKind::Research, &research),
            (StageKind::Write, &write),
            (StageKind::Grade, &grade),
        ] {
            if stage.kind() != expected {
                return Err(ResearchError::configuration(format!(
                    "stage registered as {} reports kind {}",
                    expected,
                    stage.kind()
                )));
            }
        }
        Ok(Self {
            plan,
            research,
            write,
            grade,
        })
    }

    /// Build the default LLM and retrieval backed stages
    pub fn from_services(llm: Arc<dyn LLMProvider>, retriever: Arc<dyn Retriever>) -> Self {
        Self {
            plan: Arc::new(PlanStage::new(llm.clone())),
            research: Arc::new(ResearchStage::new(retriever)),
            write: Arc::new(WriteStage::new(llm.clone())),
            grade: Arc::new(GradeStage::new(llm)),
        }
    }

    pub fn get(&self, kind: StageKind) -> &Arc<dyn Stage> {
        match kind {
            StageKind::Plan => &self.plan,
            StageKind::Research => &self.research,
            StageKind::Write => &self.write,
            StageKind::Grade => &self.grade,
        }
    }
}

impl fmt::Debug for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSet").finish_non_exhaustive()
    }
}
