//! Redis-backed results store
//!
//! Records live under one key per run and expire server-side after the
//! retention window.
//!
//! # Key Format
//!
//! ```text
//! research:task:{run_id}        record JSON, SET EX retention
//! research:tasks:by_created      sorted set of run ids, scored by created_at (ms)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let store = RedisStore::new("redis://localhost:6379", DEFAULT_RETENTION).await?;
//! ```

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use super::{merge_record, KeyLocks, RecordUpdate, ResultsStore, RunRecord};
use crate::engine::RunId;
use crate::error::ResearchError;

const KEY_PREFIX: &str = "research:task:";
const INDEX_KEY: &str = "research:tasks:by_created";

/// Results store for deployments where several processes share run records.
///
/// Writes for one run are serialized inside this process only; two processes
/// writing the same run id concurrently fall back to last-writer-wins.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    ttl_seconds: u64,
    locks: std::sync::Arc<KeyLocks>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis at `url`
    pub async fn new(url: impl AsRef<str>, retention: Duration) -> Result<Self, ResearchError> {
        let client = redis::Client::open(url.as_ref())
            .map_err(|e| ResearchError::store(format!("Failed to create Redis client: {}", e)))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| ResearchError::store(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self {
            conn,
            ttl_seconds: retention.as_secs().max(1),
            locks: Default::default(),
        })
    }

    fn record_key(run_id: &RunId) -> String {
        Self::member_key(run_id.as_str())
    }

    fn member_key(member: &str) -> String {
        format!("{}{}", KEY_PREFIX, member)
    }

    async fn drop_from_index(&self, members: &[String]) -> Result<usize, ResearchError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        conn.zrem(INDEX_KEY, members)
            .await
            .map_err(|e| ResearchError::store(format!("Failed to prune index: {}", e)))
    }

    async fn load(&self, key: &str) -> Result<Option<RunRecord>, ResearchError> {
        let mut conn = self.conn.clone();
        let data: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| ResearchError::store(format!("Failed to load record: {}", e)))?;

        data.map(|data| {
            serde_json::from_slice(&data)
                .map_err(|e| ResearchError::store(format!("Deserialization failed: {}", e)))
        })
        .transpose()
    }
}

#[async_trait]
impl ResultsStore for RedisStore {
    async fn store(&self, run_id: &RunId, update: RecordUpdate) -> Result<RunRecord, ResearchError> {
        let lock = self.locks.lock_for(run_id).await;
        let _guard = lock.lock().await;

        let key = Self::record_key(run_id);
        let existing = self.load(&key).await?;
        let record = merge_record(run_id, existing, update, Utc::now())?;

        let data = serde_json::to_vec(&record)
            .map_err(|e| ResearchError::store(format!("Serialization failed: {}", e)))?;

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .set_ex(&key, data.as_slice(), self.ttl_seconds)
            .ignore()
            .zadd(INDEX_KEY, run_id.as_str(), record.created_at.timestamp_millis())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| ResearchError::store(format!("Failed to save record: {}", e)))?;

        Ok(record)
    }

    async fn get(&self, run_id: &RunId) -> Result<Option<RunRecord>, ResearchError> {
        self.load(&Self::record_key(run_id)).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<RunRecord>, ResearchError> {
        let mut records = Vec::with_capacity(limit);
        let mut stale = Vec::new();
        let mut start: isize = 0;
        let page = limit.max(1) as isize;
        let mut conn = self.conn.clone();

        while records.len() < limit {
            let members: Vec<String> = conn
                .zrevrange(INDEX_KEY, start, start + page - 1)
                .await
                .map_err(|e| ResearchError::store(format!("Failed to list records: {}", e)))?;
            if members.is_empty() {
                break;
            }
            start += members.len() as isize;

            for member in members {
                match self.load(&Self::member_key(&member)).await? {
                    Some(record) => records.push(record),
                    // Record key already expired server-side
                    None => stale.push(member),
                }
                if records.len() == limit {
                    break;
                }
            }
        }

        self.drop_from_index(&stale).await?;
        Ok(records)
    }

    /// Records expire server-side; this only drops index entries whose
    /// record key is gone. Returns how many entries were removed.
    async fn purge_expired(&self) -> Result<usize, ResearchError> {
        let cutoff = Utc::now().timestamp_millis() - (self.ttl_seconds as i64) * 1000;
        let mut conn = self.conn.clone();
        let candidates: Vec<String> = conn
            .zrangebyscore(INDEX_KEY, "-inf", cutoff)
            .await
            .map_err(|e| ResearchError::store(format!("Failed to scan index: {}", e)))?;

        let mut stale = Vec::new();
        for member in candidates {
            let exists: bool = conn
                .exists(Self::member_key(&member))
                .await
                .map_err(|e| ResearchError::store(format!("Failed to check record: {}", e)))?;
            if !exists {
                stale.push(member);
            }
        }
        self.drop_from_index(&stale).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{RunStatus, DEFAULT_RETENTION};
    use serde_json::json;

    async fn connect() -> RedisStore {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        RedisStore::new(url, DEFAULT_RETENTION).await.unwrap()
    }

    #[test]
    fn test_record_key_format() {
        let run_id = RunId::new("abc-123").unwrap();
        assert_eq!(RedisStore::record_key(&run_id), "research:task:abc-123");
    }

    #[tokio::test]
    #[ignore = "Requires a Redis server at REDIS_URL"]
    async fn test_store_merges_updates_and_sets_ttl() {
        let store = connect().await;
        let run_id = RunId::generate();

        store
            .store(
                &run_id,
                RecordUpdate::status(RunStatus::Queued).with_metadata("task", json!("Analyze AAPL")),
            )
            .await
            .unwrap();
        store.update_status(&run_id, RunStatus::Running).await.unwrap();
        store
            .store(
                &run_id,
                RecordUpdate::status(RunStatus::Completed)
                    .with_result(json!({"report": "ok"}))
                    .with_best_effort(true),
            )
            .await
            .unwrap();

        let record = store.get(&run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert!(record.best_effort);
        assert_eq!(record.metadata["task"], json!("Analyze AAPL"));
        assert_eq!(record.result, Some(json!({"report": "ok"})));

        let mut conn = store.conn.clone();
        let ttl: i64 = conn.ttl(RedisStore::record_key(&run_id)).await.unwrap();
        assert!(ttl > 0 && ttl <= DEFAULT_RETENTION.as_secs() as i64);
    }

    #[tokio::test]
    #[ignore = "Requires a Redis server at REDIS_URL"]
    async fn test_finished_record_cannot_move_back() {
        let store = connect().await;
        let run_id = RunId::generate();

        store.update_status(&run_id, RunStatus::Queued).await.unwrap();
        store
            .store(&run_id, RecordUpdate::status(RunStatus::Failed).with_error("boom"))
            .await
            .unwrap();

        assert!(store.update_status(&run_id, RunStatus::Running).await.is_err());
        assert!(store.update_status(&run_id, RunStatus::Completed).await.is_err());

        let record = store.get(&run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    #[ignore = "Requires a Redis server at REDIS_URL"]
    async fn test_list_recent_newest_first() {
        let store = connect().await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let run_id = RunId::generate();
            store.update_status(&run_id, RunStatus::Queued).await.unwrap();
            ids.push(run_id);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let recent = store.list_recent(3).await.unwrap();
        let listed: Vec<&RunId> = recent.iter().map(|r| &r.run_id).collect();
        let expected: Vec<&RunId> = ids.iter().rev().collect();
        assert_eq!(listed, expected);
    }
}
