//! Orchestrator driving the plan, research, write and grade loop
//!
//! A run starts in [`Phase::Plan`], executes Plan once, then cycles
//! Research → Write → Grade until the router halts. Each stage invocation is
//! bounded by the configured timeout and retried per the [`RetryPolicy`].
//! Updates are merged only after a stage succeeds, so a failing stage leaves
//! the last good state intact.

mod config;
mod events;
mod phase;
mod run;

pub use config::{EngineConfig, RetryPolicy};
pub use events::{RunEvent, RunEventStream};
pub use phase::{Phase, Transition};
pub use run::{CancelToken, RunId, RunOutcome, RunReport};

use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

use events::EventSink;
use crate::error::ResearchError;
use crate::router::{RouteDecision, Router};
use crate::stages::{check_output, StageKind, StageSet};
use crate::state::{ResearchState, StateUpdate};

/// Runs research loops; one instance serves any number of concurrent runs
#[derive(Debug, Clone)]
pub struct Orchestrator {
    stages: StageSet,
    router: Router,
    config: EngineConfig,
}

impl Orchestrator {
    /// Create an orchestrator, rejecting invalid router or engine settings
    pub fn new(stages: StageSet, config: EngineConfig) -> Result<Self, ResearchError> {
        config.validate()?;
        let router = Router::new(config.router)?;
        Ok(Self {
            stages,
            router,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run to completion and return the final state
    pub async fn run(&self, run_id: RunId, task: impl Into<String>) -> RunReport {
        self.execute(run_id, task.into(), &CancelToken::new(), &EventSink::none())
            .await
    }

    /// Run to completion, stopping early if `cancel` fires between stages
    pub async fn run_with_cancel(
        &self,
        run_id: RunId,
        task: impl Into<String>,
        cancel: &CancelToken,
    ) -> RunReport {
        self.execute(run_id, task.into(), cancel, &EventSink::none())
            .await
    }

    /// Start a run in the background and observe it as a stream of events.
    ///
    /// The stream ends with [`RunEvent::Finished`] carrying the same report
    /// `run` would have returned.
    pub fn stream(
        self: &Arc<Self>,
        run_id: RunId,
        task: impl Into<String>,
        cancel: CancelToken,
    ) -> RunEventStream {
        let (sink, receiver) = EventSink::channel();
        let orchestrator = Arc::clone(self);
        let task = task.into();
        tokio::spawn(async move {
            let report = orchestrator.execute(run_id, task, &cancel, &sink).await;
            sink.emit(RunEvent::Finished { report });
        });
        RunEventStream::from_receiver(receiver)
    }

    #[instrument(skip_all, fields(run_id = %run_id))]
    async fn execute(
        &self,
        run_id: RunId,
        task: String,
        cancel: &CancelToken,
        events: &EventSink,
    ) -> RunReport {
        info!(task = %task, "Starting research run");
        events.emit(RunEvent::Started {
            run_id: run_id.clone(),
            task: task.clone(),
        });

        let mut state = ResearchState::new(task);
        let mut phase = Phase::Plan;

        let outcome = loop {
            let Some(stage) = phase.stage() else {
                // Terminal phases are only reached by breaking out below
                break RunOutcome::Failed {
                    stage: None,
                    message: format!("run entered terminal phase {} unexpectedly", phase),
                };
            };

            if cancel.is_cancelled() {
                let err = ResearchError::Cancelled {
                    run_id: run_id.to_string(),
                    stage,
                };
                warn!(stage = %stage, loop_count = state.loop_count, "Run cancelled");
                phase = phase.next(Transition::Aborted).unwrap_or(Phase::Failed);
                break RunOutcome::from_error(&err);
            }

            match self.step(&run_id, stage, &state, events).await {
                Ok(next) => state = next,
                Err(err) => {
                    error!(stage = %stage, error = %err, "Run failed");
                    phase = phase.next(Transition::Aborted).unwrap_or(Phase::Failed);
                    break RunOutcome::from_error(&err);
                }
            }

            let transition = if stage == StageKind::Grade {
                let decision = self.router.decide(&state);
                events.emit(RunEvent::Routed {
                    run_id: run_id.clone(),
                    decision,
                });
                Transition::Routed(decision)
            } else {
                Transition::Completed
            };

            phase = match phase.next(transition) {
                Ok(next) => next,
                Err(err) => {
                    phase = Phase::Failed;
                    break RunOutcome::from_error(&err);
                }
            };

            if let (Phase::Halted, Transition::Routed(RouteDecision::Halt(reason))) =
                (phase, transition)
            {
                break RunOutcome::from_halt(reason);
            }
        };

        info!(
            phase = %phase,
            outcome = ?outcome,
            score = state.score,
            loop_count = state.loop_count,
            notes = state.research_notes.len(),
            "Research run finished"
        );

        RunReport {
            run_id,
            state,
            outcome,
        }
    }

    /// Invoke one stage and merge its update into a new state
    async fn step(
        &self,
        run_id: &RunId,
        stage: StageKind,
        state: &ResearchState,
        events: &EventSink,
    ) -> Result<ResearchState, ResearchError> {
        let iteration = match stage {
            StageKind::Plan => 0,
            StageKind::Research => state.loop_count + 1,
            StageKind::Write | StageKind::Grade => state.loop_count,
        };
        events.emit(RunEvent::StageStarted {
            run_id: run_id.clone(),
            stage,
            iteration,
        });

        let mut update = self.invoke_with_retry(run_id, stage, state, events).await?;
        if stage == StageKind::Research {
            // The loop counter is owned here, not by the stage
            update = update.loop_count(state.loop_count + 1);
        }

        let next = state.apply_update(&update)?;
        debug!(stage = %stage, iteration, appended = update.appended_notes(), "Stage merged");
        events.emit(RunEvent::StageCompleted {
            run_id: run_id.clone(),
            stage,
            iteration,
            update,
        });
        Ok(next)
    }

    async fn invoke_with_retry(
        &self,
        run_id: &RunId,
        stage: StageKind,
        state: &ResearchState,
        events: &EventSink,
    ) -> Result<StateUpdate, ResearchError> {
        let policy = &self.config.retry_policy;
        let mut retries = 0u32;

        loop {
            match self.invoke_once(stage, state).await {
                Ok(update) => return Ok(update),
                Err(err) if err.is_recoverable() && policy.should_retry(retries) => {
                    let delay = policy.delay_for_attempt(retries);
                    retries += 1;
                    warn!(
                        stage = %stage,
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Stage failed, retrying"
                    );
                    events.emit(RunEvent::StageRetrying {
                        run_id: run_id.clone(),
                        stage,
                        attempt: retries,
                        error: err.to_string(),
                    });
                    sleep(delay).await;
                }
                Err(err) if retries > 0 && err.is_recoverable() => {
                    return Err(ResearchError::RetriesExhausted {
                        stage,
                        attempts: retries + 1,
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn invoke_once(
        &self,
        stage: StageKind,
        state: &ResearchState,
    ) -> Result<StateUpdate, ResearchError> {
        let handler = self.stages.get(stage);
        let update = timeout(self.config.stage_timeout, handler.run(state))
            .await
            .map_err(|_| ResearchError::StageTimeout {
                stage,
                timeout: self.config.stage_timeout,
            })??;
        check_output(stage, &update)?;
        Ok(update)
    }
}
