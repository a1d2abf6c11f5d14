//! In-memory results store

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{merge_record, KeyLocks, RecordUpdate, ResultsStore, RunRecord, DEFAULT_RETENTION};
use crate::engine::RunId;
use crate::error::ResearchError;

/// Results store backed by a map; suitable for tests and single-process use
#[derive(Debug)]
pub struct MemoryStore {
    records: RwLock<HashMap<RunId, RunRecord>>,
    locks: KeyLocks,
    retention: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            locks: KeyLocks::default(),
            retention,
        }
    }

    /// Number of records held, including ones not yet purged
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ResultsStore for MemoryStore {
    async fn store(&self, run_id: &RunId, update: RecordUpdate) -> Result<RunRecord, ResearchError> {
        let lock = self.locks.lock_for(run_id).await;
        let _guard = lock.lock().await;

        let now = Utc::now();
        let existing = self
            .records
            .read()
            .await
            .get(run_id)
            .filter(|record| !record.is_expired(self.retention, now))
            .cloned();

        let record = merge_record(run_id, existing, update, now)?;
        self.records
            .write()
            .await
            .insert(run_id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, run_id: &RunId) -> Result<Option<RunRecord>, ResearchError> {
        let now = Utc::now();
        let records = self.records.read().await;
        Ok(records
            .get(run_id)
            .filter(|record| !record.is_expired(self.retention, now))
            .cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<RunRecord>, ResearchError> {
        let now = Utc::now();
        let records = self.records.read().await;
        let mut live: Vec<RunRecord> = records
            .values()
            .filter(|record| !record.is_expired(self.retention, now))
            .cloned()
            .collect();
        live.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        live.truncate(limit);
        Ok(live)
    }

    async fn purge_expired(&self) -> Result<usize, ResearchError> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(self.retention, now));
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RunStatus;
    use serde_json::json;
    use std::sync::Arc;

    fn id(s: &str) -> RunId {
        RunId::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let store = MemoryStore::new();
        assert!(store.get(&id("r1")).await.unwrap().is_none());

        store
            .store(&id("r1"), RecordUpdate::status(RunStatus::Queued))
            .await
            .unwrap();
        let record = store
            .store(
                &id("r1"),
                RecordUpdate::status(RunStatus::Completed).with_result(json!({"ok": true})),
            )
            .await
            .unwrap();

        assert_eq!(record.status, RunStatus::Completed);
        let fetched = store.get(&id("r1")).await.unwrap().unwrap();
        assert_eq!(fetched, record);
    }

    #[tokio::test]
    async fn test_backwards_status_leaves_record() {
        let store = MemoryStore::new();
        store
            .store(&id("r1"), RecordUpdate::status(RunStatus::Failed).with_error("boom"))
            .await
            .unwrap();

        let err = store.update_status(&id("r1"), RunStatus::Running).await;
        assert!(err.is_err());

        let record = store.get(&id("r1")).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_list_recent_newest_first() {
        let store = MemoryStore::new();
        for name in ["a", "b", "c"] {
            store
                .store(&id(name), RecordUpdate::status(RunStatus::Queued))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let recent = store.list_recent(2).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_expired_records_hidden_and_purged() {
        let store = MemoryStore::with_retention(Duration::from_millis(20));
        store
            .store(&id("old"), RecordUpdate::status(RunStatus::Completed))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.get(&id("old")).await.unwrap().is_none());
        assert!(store.list_recent(10).await.unwrap().is_empty());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_writes_same_run() {
        let store = Arc::new(MemoryStore::new());
        store
            .store(&id("r"), RecordUpdate::status(RunStatus::Running))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .store(
                        &id("r"),
                        RecordUpdate::default().with_metadata(format!("k{}", i), json!(i)),
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = store.get(&id("r")).await.unwrap().unwrap();
        assert_eq!(record.metadata.len(), 16);
        assert_eq!(record.status, RunStatus::Running);
    }
}
