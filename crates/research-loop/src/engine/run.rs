//! Run identity, cancellation and results

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ResearchError;
use crate::router::HaltReason;
use crate::stages::StageKind;
use crate::state::ResearchState;
use crate::store::RunStatus;

/// Longest accepted run identifier
const MAX_RUN_ID_LEN: usize = 64;

/// Identifier distinguishing one run from every other
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    /// Accept a caller-supplied identifier.
    ///
    /// Identifiers are 1-64 characters of ASCII letters, digits, `-` or `_`.
    pub fn new(id: impl Into<String>) -> Result<Self, ResearchError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ResearchError::validation("run id is required"));
        }
        if id.len() > MAX_RUN_ID_LEN
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ResearchError::validation(format!(
                "run id {:?} must be 1-{} characters of [A-Za-z0-9_-]",
                id, MAX_RUN_ID_LEN
            )));
        }
        Ok(Self(id))
    }

    /// Fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RunId {
    type Error = ResearchError;

    fn try_from(id: String) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cooperative cancellation flag, checked before every stage
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Score reached the threshold
    Converged,
    /// Loop cap reached below threshold; best-effort result
    Exhausted,
    /// A stage could not produce a valid update
    Failed {
        stage: Option<StageKind>,
        message: String,
    },
    /// Cancelled before `stage` started
    Cancelled { stage: StageKind },
}

impl RunOutcome {
    pub fn from_halt(reason: HaltReason) -> Self {
        match reason {
            HaltReason::ScoreThreshold => RunOutcome::Converged,
            HaltReason::Exhausted => RunOutcome::Exhausted,
        }
    }

    pub fn from_error(error: &ResearchError) -> Self {
        match error {
            ResearchError::Cancelled { stage, .. } => RunOutcome::Cancelled { stage: *stage },
            other => RunOutcome::Failed {
                stage: other.stage(),
                message: other.to_string(),
            },
        }
    }

    /// Below-threshold result that still counts as a normal termination
    pub fn is_best_effort(&self) -> bool {
        matches!(self, RunOutcome::Exhausted)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Converged | RunOutcome::Exhausted)
    }

    /// Results store status this outcome maps to
    pub fn status(&self) -> RunStatus {
        if self.is_success() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        }
    }

    /// Error message to record, if any
    pub fn error_message(&self) -> Option<String> {
        match self {
            RunOutcome::Failed { message, .. } => Some(message.clone()),
            RunOutcome::Cancelled { stage } => Some(format!("cancelled before stage {}", stage)),
            _ => None,
        }
    }
}

/// Final (or last good) state of a run and how it ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub state: ResearchState,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn is_best_effort(&self) -> bool {
        self.outcome.is_best_effort()
    }
}
