//! Integration tests for background runs and the results store

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{fast_config, orchestrator, ScriptedLlm, ScriptedRetriever};
use research_loop::{
    FileStore, MemoryStore, RecordUpdate, ResearchError, ResearchRequest, ResultsStore, RunId,
    RunLauncher, RunRecord, RunStatus,
};

/// Memory store that can refuse the `running` write or stall the `queued` one
#[derive(Default)]
struct FaultyStore {
    inner: MemoryStore,
    refuse_running: bool,
    queued_delay: Option<Duration>,
}

#[async_trait]
impl ResultsStore for FaultyStore {
    async fn store(&self, run_id: &RunId, update: RecordUpdate) -> Result<RunRecord, ResearchError> {
        match update.status {
            Some(RunStatus::Running) if self.refuse_running => {
                return Err(ResearchError::store("connection reset"));
            }
            Some(RunStatus::Queued) => {
                if let Some(delay) = self.queued_delay {
                    tokio::time::sleep(delay).await;
                }
            }
            _ => {}
        }
        self.inner.store(run_id, update).await
    }

    async fn get(&self, run_id: &RunId) -> Result<Option<RunRecord>, ResearchError> {
        self.inner.get(run_id).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<RunRecord>, ResearchError> {
        self.inner.list_recent(limit).await
    }

    async fn purge_expired(&self) -> Result<usize, ResearchError> {
        self.inner.purge_expired().await
    }
}

fn launcher(grades: &[&str], retriever: ScriptedRetriever, store: Arc<dyn ResultsStore>) -> RunLauncher {
    let engine = orchestrator(
        Arc::new(ScriptedLlm::new(grades)),
        Arc::new(retriever),
        fast_config(),
    );
    RunLauncher::with_concurrency(engine, store, 4)
}

#[tokio::test]
async fn test_submit_records_completed_run() {
    let store: Arc<dyn ResultsStore> = Arc::new(MemoryStore::new());
    let launcher = launcher(&["72", "72", "88"], ScriptedRetriever::new(), store.clone());

    let submission = launcher.submit(ResearchRequest::ticker("nvda")).await.unwrap();
    assert_eq!(submission.status, RunStatus::Queued);
    assert_eq!(
        submission.task,
        "Analyze financial performance and market position for NVDA"
    );
    assert!(submission.message.contains("NVDA"));

    let record = launcher.join(&submission.run_id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert!(!record.best_effort);
    assert!(record.error.is_none());
    assert_eq!(record.metadata["task"], submission.task.as_str());
    assert_eq!(record.metadata["score"], 88);

    let result = record.result.unwrap();
    assert_eq!(result["outcome"]["kind"], "converged");
    assert_eq!(result["state"]["loop_count"], 3);
    assert_eq!(launcher.active_runs().await, 0);
}

#[tokio::test]
async fn test_exhausted_run_flagged_best_effort() {
    let store: Arc<dyn ResultsStore> = Arc::new(MemoryStore::new());
    let launcher = launcher(&["50"], ScriptedRetriever::new(), store);

    let submission = launcher
        .submit(ResearchRequest::task("Compare cloud margins across hyperscalers"))
        .await
        .unwrap();
    let record = launcher.join(&submission.run_id).await.unwrap().unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    assert!(record.best_effort);
    assert_eq!(record.result.unwrap()["outcome"]["kind"], "exhausted");
}

#[tokio::test]
async fn test_failed_run_stores_last_good_state() {
    let store: Arc<dyn ResultsStore> = Arc::new(MemoryStore::new());
    let launcher = launcher(&["60"], ScriptedRetriever::new().failing_from(2), store);

    let run_id = RunId::new("scenario-c").unwrap();
    launcher
        .submit_with_id(run_id.clone(), ResearchRequest::ticker("AAPL"))
        .await
        .unwrap();
    let record = launcher.join(&run_id).await.unwrap().unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert!(!record.best_effort);
    assert!(record.error.unwrap().contains("research"));

    let result = record.result.unwrap();
    let notes = result["state"]["research_notes"].as_array().unwrap();
    assert_eq!(notes.len(), 1);
}

#[tokio::test]
async fn test_invalid_request_rejected_before_queueing() {
    let store = Arc::new(MemoryStore::new());
    let launcher = launcher(&["90"], ScriptedRetriever::new(), store.clone());

    let err = launcher
        .submit(ResearchRequest::ticker("NOT A TICKER"))
        .await
        .unwrap_err();
    assert!(matches!(err, ResearchError::Validation(_)));
    assert!(store.is_empty().await);
    assert_eq!(launcher.active_runs().await, 0);
}

#[tokio::test]
async fn test_duplicate_active_run_id_rejected() {
    let store: Arc<dyn ResultsStore> = Arc::new(MemoryStore::new());
    let launcher = launcher(
        &["90"],
        ScriptedRetriever::new().with_delay(Duration::from_millis(100)),
        store,
    );

    let run_id = RunId::new("dup").unwrap();
    launcher
        .submit_with_id(run_id.clone(), ResearchRequest::ticker("MSFT"))
        .await
        .unwrap();
    let err = launcher
        .submit_with_id(run_id.clone(), ResearchRequest::ticker("MSFT"))
        .await
        .unwrap_err();
    assert!(matches!(err, ResearchError::Validation(_)));

    launcher.join(&run_id).await.unwrap();
}

#[tokio::test]
async fn test_cancelled_run_recorded_failed() {
    let store: Arc<dyn ResultsStore> = Arc::new(MemoryStore::new());
    let launcher = launcher(
        &["40"],
        ScriptedRetriever::new().with_delay(Duration::from_millis(50)),
        store,
    );

    let submission = launcher.submit(ResearchRequest::ticker("TSLA")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(launcher.cancel(&submission.run_id).await);

    let record = launcher.join(&submission.run_id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.error.unwrap().contains("cancelled"));
    assert_eq!(record.result.unwrap()["outcome"]["kind"], "cancelled");
    assert!(!launcher.cancel(&submission.run_id).await);
}

#[tokio::test]
async fn test_many_runs_with_file_store() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ResultsStore> = Arc::new(FileStore::new(temp_dir.path(), true));
    let launcher = launcher(
        &["90"],
        ScriptedRetriever::new().with_delay(Duration::from_millis(5)),
        store.clone(),
    );

    let mut ids = Vec::new();
    for ticker in ["AAPL", "MSFT", "AMZN", "GOOG", "META", "NFLX", "ORCL", "INTC"] {
        ids.push(launcher.submit(ResearchRequest::ticker(ticker)).await.unwrap().run_id);
    }
    launcher.join_all().await;

    for run_id in &ids {
        let record = store.get(run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
    }
    assert_eq!(store.list_recent(5).await.unwrap().len(), 5);
    assert_eq!(store.list_recent(100).await.unwrap().len(), ids.len());
}

#[tokio::test]
async fn test_finished_run_cannot_revert() {
    let store: Arc<dyn ResultsStore> = Arc::new(MemoryStore::new());
    let launcher = launcher(&["95"], ScriptedRetriever::new(), store.clone());

    let submission = launcher.submit(ResearchRequest::ticker("AMD")).await.unwrap();
    launcher.join(&submission.run_id).await.unwrap();

    for status in [RunStatus::Queued, RunStatus::Running, RunStatus::Failed] {
        assert!(store.update_status(&submission.run_id, status).await.is_err());
    }
    let record = store.get(&submission.run_id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_unstartable_run_recorded_failed() {
    let store: Arc<dyn ResultsStore> = Arc::new(FaultyStore {
        refuse_running: true,
        ..Default::default()
    });
    let llm = Arc::new(ScriptedLlm::new(&["90"]));
    let retriever = Arc::new(ScriptedRetriever::new());
    let engine = orchestrator(llm.clone(), retriever.clone(), fast_config());
    let launcher = RunLauncher::with_concurrency(engine, store.clone(), 2);

    let submission = launcher.submit(ResearchRequest::ticker("AAPL")).await.unwrap();
    let record = launcher.join(&submission.run_id).await.unwrap().unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.error.unwrap().contains("connection reset"));
    assert_eq!(retriever.calls(), 0);
    assert_eq!(launcher.active_runs().await, 0);
}

#[tokio::test]
async fn test_slow_queued_write_does_not_block_launcher() {
    let store: Arc<dyn ResultsStore> = Arc::new(FaultyStore {
        queued_delay: Some(Duration::from_millis(300)),
        ..Default::default()
    });
    let launcher = Arc::new(launcher(&["90"], ScriptedRetriever::new(), store));

    let submitting = {
        let launcher = Arc::clone(&launcher);
        tokio::spawn(async move { launcher.submit(ResearchRequest::ticker("MSFT")).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let active = tokio::time::timeout(Duration::from_millis(100), launcher.active_runs())
        .await
        .expect("active_runs blocked behind the queued write");
    assert_eq!(active, 1);
    let other = RunId::new("unrelated").unwrap();
    let cancelled = tokio::time::timeout(Duration::from_millis(100), launcher.cancel(&other))
        .await
        .expect("cancel blocked behind the queued write");
    assert!(!cancelled);

    let submission = submitting.await.unwrap().unwrap();
    let record = launcher.join(&submission.run_id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_cancel_all_stops_every_run() {
    let store: Arc<dyn ResultsStore> = Arc::new(MemoryStore::new());
    let launcher = launcher(
        &["40"],
        ScriptedRetriever::new().with_delay(Duration::from_millis(50)),
        store.clone(),
    );

    let mut ids = Vec::new();
    for ticker in ["AAPL", "MSFT", "AMZN"] {
        ids.push(launcher.submit(ResearchRequest::ticker(ticker)).await.unwrap().run_id);
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    launcher.cancel_all().await;
    launcher.join_all().await;

    for run_id in &ids {
        let record = store.get(run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert!(record.error.unwrap().contains("cancelled"));
    }
    assert_eq!(launcher.active_runs().await, 0);
}
