//! Background execution of research runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::ResearchRequest;
use crate::engine::{CancelToken, Orchestrator, RunId, RunReport};
use crate::error::ResearchError;
use crate::store::{RecordUpdate, ResultsStore, RunRecord, RunStatus};

/// Immediate acknowledgement of a queued run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub run_id: RunId,
    pub status: RunStatus,
    pub task: String,
    pub queued_at: DateTime<Utc>,
    pub message: String,
}

struct ActiveRun {
    cancel: CancelToken,
    /// Taken by the first `join`
    handle: Option<JoinHandle<()>>,
}

/// Final record fields for a finished run.
///
/// The whole report is stored as the result, so a failed run still exposes
/// the last good state.
pub fn report_update(report: &RunReport) -> Result<RecordUpdate, ResearchError> {
    let result = serde_json::to_value(report)
        .map_err(|e| ResearchError::store(format!("Serialization failed: {}", e)))?;

    let mut update = RecordUpdate::status(report.outcome.status())
        .with_result(result)
        .with_best_effort(report.is_best_effort())
        .with_metadata("score", json!(report.state.score))
        .with_metadata("loop_count", json!(report.state.loop_count))
        .with_metadata("notes", json!(report.state.research_notes.len()));
    if let Some(message) = report.outcome.error_message() {
        update = update.with_error(message);
    }
    Ok(update)
}

/// Queues runs in a results store and executes them in the background.
///
/// Each run is isolated: a failing run records `failed` in the store and
/// never affects its neighbours. A semaphore bounds how many execute at once.
pub struct RunLauncher {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn ResultsStore>,
    active: Arc<Mutex<HashMap<RunId, ActiveRun>>>,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for RunLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLauncher")
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl RunLauncher {
    /// Launcher allowing one concurrent run per CPU
    pub fn new(orchestrator: Arc<Orchestrator>, store: Arc<dyn ResultsStore>) -> Self {
        Self::with_concurrency(orchestrator, store, num_cpus::get())
    }

    pub fn with_concurrency(
        orchestrator: Arc<Orchestrator>,
        store: Arc<dyn ResultsStore>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            orchestrator,
            store,
            active: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn store(&self) -> &Arc<dyn ResultsStore> {
        &self.store
    }

    /// Validate `request`, queue it under a fresh run id and start it
    pub async fn submit(&self, request: ResearchRequest) -> Result<Submission, ResearchError> {
        self.submit_with_id(RunId::generate(), request).await
    }

    /// Like `submit`, with a caller-chosen run id.
    ///
    /// Validation and store errors are returned before anything is spawned.
    pub async fn submit_with_id(
        &self,
        run_id: RunId,
        request: ResearchRequest,
    ) -> Result<Submission, ResearchError> {
        let label = request.label();
        let task = request.into_task()?;

        let cancel = CancelToken::new();
        {
            let mut active = self.active.lock().await;
            if active.contains_key(&run_id) {
                return Err(ResearchError::validation(format!(
                    "run {} is already active",
                    run_id
                )));
            }
            // Reserve the id; the handle is attached once the queued record exists
            active.insert(
                run_id.clone(),
                ActiveRun {
                    cancel: cancel.clone(),
                    handle: None,
                },
            );
        }

        let queued = self
            .store
            .store(
                &run_id,
                RecordUpdate::status(RunStatus::Queued).with_metadata("task", json!(task)),
            )
            .await;
        let record = match queued {
            Ok(record) => record,
            Err(e) => {
                self.active.lock().await.remove(&run_id);
                return Err(e);
            }
        };

        let mut active = self.active.lock().await;
        let handle = tokio::spawn(execute_run(
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.store),
            Arc::clone(&self.permits),
            Arc::clone(&self.active),
            run_id.clone(),
            task.clone(),
            cancel,
        ));
        // The map lock is held, so the run cannot deregister before the handle lands
        if let Some(run) = active.get_mut(&run_id) {
            run.handle = Some(handle);
        }
        drop(active);

        info!(run_id = %run_id, request = %label, "Research run queued");
        Ok(Submission {
            run_id,
            status: RunStatus::Queued,
            task,
            queued_at: record.created_at,
            message: format!("Research task queued for {}", label),
        })
    }

    /// Ask an active run to stop before its next stage
    pub async fn cancel(&self, run_id: &RunId) -> bool {
        match self.active.lock().await.get(run_id) {
            Some(run) => {
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every active run
    pub async fn cancel_all(&self) {
        for run in self.active.lock().await.values() {
            run.cancel.cancel();
        }
    }

    /// Wait for a run to finish and return its stored record
    pub async fn join(&self, run_id: &RunId) -> Result<Option<RunRecord>, ResearchError> {
        let handle = self
            .active
            .lock()
            .await
            .get_mut(run_id)
            .and_then(|run| run.handle.take());

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(run_id = %run_id, error = %e, "Run task ended abnormally");
            }
        }
        self.store.get(run_id).await
    }

    /// Wait for every active run to finish
    pub async fn join_all(&self) {
        let ids: Vec<RunId> = self.active.lock().await.keys().cloned().collect();
        for run_id in ids {
            if let Err(e) = self.join(&run_id).await {
                warn!(run_id = %run_id, error = %e, "Failed to read final record");
            }
        }
    }

    pub async fn status(&self, run_id: &RunId) -> Result<Option<RunRecord>, ResearchError> {
        self.store.get(run_id).await
    }

    pub async fn active_runs(&self) -> usize {
        self.active.lock().await.len()
    }
}

async fn execute_run(
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn ResultsStore>,
    permits: Arc<Semaphore>,
    active: Arc<Mutex<HashMap<RunId, ActiveRun>>>,
    run_id: RunId,
    task: String,
    cancel: CancelToken,
) {
    let permit = match permits.acquire_owned().await {
        Ok(permit) => Some(permit),
        Err(e) => {
            warn!(run_id = %run_id, error = %e, "Running without a concurrency permit");
            None
        }
    };

    match store.update_status(&run_id, RunStatus::Running).await {
        Ok(_) => {
            let report = orchestrator.run_with_cancel(run_id.clone(), task, &cancel).await;
            record_report(store.as_ref(), &report).await;
        }
        Err(e) => {
            error!(run_id = %run_id, error = %e, "Failed to mark run as running");
            let update = RecordUpdate::status(RunStatus::Failed)
                .with_error(format!("failed to start run: {}", e));
            if let Err(e) = store.store(&run_id, update).await {
                error!(run_id = %run_id, error = %e, "Failed to record run failure");
            }
        }
    }

    drop(permit);
    active.lock().await.remove(&run_id);
}

async fn record_report(store: &dyn ResultsStore, report: &RunReport) {
    let update = match report_update(report) {
        Ok(update) => update,
        Err(e) => {
            error!(run_id = %report.run_id, error = %e, "Failed to encode run report");
            RecordUpdate::status(RunStatus::Failed).with_error(e.to_string())
        }
    };
    match store.store(&report.run_id, update).await {
        Ok(record) => info!(
            run_id = %report.run_id,
            status = %record.status,
            best_effort = record.best_effort,
            "Run recorded"
        ),
        Err(e) => error!(run_id = %report.run_id, error = %e, "Failed to record run"),
    }
}
