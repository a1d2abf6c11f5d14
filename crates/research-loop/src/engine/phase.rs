//! Run phases and the transition table between them

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ResearchError;
use crate::router::RouteDecision;
use crate::stages::StageKind;

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Plan,
    Research,
    Write,
    Grade,
    Halted,
    Failed,
}

/// Event that moves a run between phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The current stage merged its update
    Completed,
    /// The router decided after Grade
    Routed(RouteDecision),
    /// The current stage failed or the run was cancelled
    Aborted,
}

impl Phase {
    /// Stage executed in this phase, `None` for terminal phases
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            Phase::Plan => Some(StageKind::Plan),
            Phase::Research => Some(StageKind::Research),
            Phase::Write => Some(StageKind::Write),
            Phase::Grade => Some(StageKind::Grade),
            Phase::Halted | Phase::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Halted | Phase::Failed)
    }

    /// Apply a transition.
    ///
    /// | from     | event            | to       |
    /// |----------|------------------|----------|
    /// | Plan     | Completed        | Research |
    /// | Research | Completed        | Write    |
    /// | Write    | Completed        | Grade    |
    /// | Grade    | Routed(Continue) | Research |
    /// | Grade    | Routed(Halt)     | Halted   |
    /// | any live | Aborted          | Failed   |
    pub fn next(self, transition: Transition) -> Result<Phase, ResearchError> {
        let next = match (self, transition) {
            (Phase::Plan, Transition::Completed) => Phase::Research,
            (Phase::Research, Transition::Completed) => Phase::Write,
            (Phase::Write, Transition::Completed) => Phase::Grade,
            (Phase::Grade, Transition::Routed(RouteDecision::Continue)) => Phase::Research,
            (Phase::Grade, Transition::Routed(RouteDecision::Halt(_))) => Phase::Halted,
            (from, Transition::Aborted) if !from.is_terminal() => Phase::Failed,
            (from, transition) => {
                return Err(ResearchError::configuration(format!(
                    "invalid transition {:?} from phase {}",
                    transition, from
                )))
            }
        };
        Ok(next)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Plan => "plan",
            Phase::Research => "research",
            Phase::Write => "write",
            Phase::Grade => "grade",
            Phase::Halted => "halted",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}
