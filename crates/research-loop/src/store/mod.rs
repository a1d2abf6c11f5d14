//! Results store for research runs
//!
//! One logical record per run id, updated atomically per write. Status moves
//! forward only: queued → running → {completed, failed}.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  store(run_id, update)  ┌────────────────────────┐
//! │ RunLauncher  │ ──────────────────────▶ │  dyn ResultsStore      │
//! │ (trigger)    │ ◀────────────────────── │  ├─ MemoryStore        │
//! └──────────────┘      get / list         │  ├─ FileStore          │
//!                                          │  └─ RedisStore (opt)   │
//!                                          └────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use research_loop::store::{create_store, RecordUpdate, RunStatus, StoreConfig};
//!
//! let store = create_store(&StoreConfig::Memory, DEFAULT_RETENTION).await?;
//! store.store(&run_id, RecordUpdate::status(RunStatus::Queued)).await?;
//! let record = store.get(&run_id).await?;
//! ```

mod file;
mod memory;
#[cfg(feature = "store-redis")]
mod redis;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "store-redis")]
pub use self::redis::RedisStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::engine::RunId;
use crate::error::ResearchError;

/// How long records are kept before they expire
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default page size for `list_recent`
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            RunStatus::Queued => 0,
            RunStatus::Running => 1,
            RunStatus::Completed | RunStatus::Failed => 2,
        }
    }

    /// Whether a record in this status may be moved to `next`.
    ///
    /// Rewriting the same status is allowed; moving backwards or between the
    /// two terminal statuses is not.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        *self == next || next.rank() > self.rank()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ResearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(ResearchError::store(format!("unknown run status `{}`", other))),
        }
    }
}

/// Persisted view of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub status: RunStatus,

    /// Serialized run report once the run has ended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Completed at the loop cap without reaching the threshold
    #[serde(default)]
    pub best_effort: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// Whether the record is older than `retention`, measured from its last write
    pub fn is_expired(&self, retention: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(retention) {
            Ok(retention) => now - self.updated_at > retention,
            Err(_) => false,
        }
    }
}

/// Fields to write for a run; anything left `None` keeps its stored value
#[derive(Debug, Clone, Default)]
pub struct RecordUpdate {
    pub status: Option<RunStatus>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub best_effort: Option<bool>,
}

impl RecordUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_best_effort(mut self, best_effort: bool) -> Self {
        self.best_effort = Some(best_effort);
        self
    }
}

/// Merge `update` into `existing`, or create a fresh record.
///
/// A first write must carry a status. Backwards status moves are rejected and
/// leave the stored record untouched.
pub fn merge_record(
    run_id: &RunId,
    existing: Option<RunRecord>,
    update: RecordUpdate,
    now: DateTime<Utc>,
) -> Result<RunRecord, ResearchError> {
    let mut record = match existing {
        Some(record) => record,
        None => {
            let status = update.status.ok_or_else(|| {
                ResearchError::store(format!("first write for run {} must set a status", run_id))
            })?;
            RunRecord {
                run_id: run_id.clone(),
                status,
                result: None,
                error: None,
                metadata: serde_json::Map::new(),
                best_effort: false,
                created_at: now,
                updated_at: now,
            }
        }
    };

    if let Some(status) = update.status {
        if !record.status.can_transition_to(status) {
            return Err(ResearchError::store(format!(
                "run {} cannot move from {} to {}",
                run_id, record.status, status
            )));
        }
        record.status = status;
    }
    if let Some(result) = update.result {
        record.result = Some(result);
    }
    if let Some(error) = update.error {
        record.error = Some(error);
    }
    if let Some(best_effort) = update.best_effort {
        record.best_effort = best_effort;
    }
    record.metadata.extend(update.metadata);
    record.updated_at = now;

    Ok(record)
}

/// Keyed storage of run records
#[async_trait]
pub trait ResultsStore: Send + Sync {
    /// Merge `update` into the record for `run_id` and return the stored record
    async fn store(&self, run_id: &RunId, update: RecordUpdate) -> Result<RunRecord, ResearchError>;

    /// Fetch a record; expired records read as absent
    async fn get(&self, run_id: &RunId) -> Result<Option<RunRecord>, ResearchError>;

    /// Most recently created records, newest first
    async fn list_recent(&self, limit: usize) -> Result<Vec<RunRecord>, ResearchError>;

    /// Drop expired records, returning how many were removed
    async fn purge_expired(&self) -> Result<usize, ResearchError>;

    /// Move a run to `status` without touching other fields
    async fn update_status(&self, run_id: &RunId, status: RunStatus) -> Result<RunRecord, ResearchError> {
        self.store(run_id, RecordUpdate::status(status)).await
    }
}

/// Per-run-id write locks so concurrent read-merge-write cycles for one run
/// never interleave
#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    locks: Mutex<HashMap<RunId, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub(crate) async fn lock_for(&self, run_id: &RunId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // Entries nobody else holds are dropped as we go
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(run_id.clone()).or_default())
    }
}

/// Which backend `create_store` builds
#[derive(Debug, Clone, Default)]
pub enum StoreConfig {
    /// In-process map, lost on exit
    #[default]
    Memory,

    /// One JSON document per run under `path`
    File { path: PathBuf, compression: bool },

    /// Redis with server-side expiry
    #[cfg(feature = "store-redis")]
    Redis { url: String },
}

impl FromStr for StoreConfig {
    type Err = ResearchError;

    /// Parse `memory`, `file:<dir>`, `file+zstd:<dir>` or `redis://...`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "memory" {
            return Ok(StoreConfig::Memory);
        }
        if let Some(path) = s.strip_prefix("file+zstd:") {
            return Ok(StoreConfig::File {
                path: PathBuf::from(path),
                compression: true,
            });
        }
        if let Some(path) = s.strip_prefix("file:") {
            return Ok(StoreConfig::File {
                path: PathBuf::from(path),
                compression: false,
            });
        }
        if s.starts_with("redis://") || s.starts_with("rediss://") {
            return redis_config(s);
        }
        Err(ResearchError::configuration(format!(
            "unknown results store `{}` (expected memory, file:<dir>, file+zstd:<dir> or redis://...)",
            s
        )))
    }
}

#[cfg(feature = "store-redis")]
fn redis_config(url: &str) -> Result<StoreConfig, ResearchError> {
    Ok(StoreConfig::Redis {
        url: url.to_string(),
    })
}

#[cfg(not(feature = "store-redis"))]
fn redis_config(_url: &str) -> Result<StoreConfig, ResearchError> {
    Err(ResearchError::configuration(
        "redis results store requires the `store-redis` feature",
    ))
}

/// Build the configured results store
pub async fn create_store(
    config: &StoreConfig,
    retention: Duration,
) -> Result<Arc<dyn ResultsStore>, ResearchError> {
    if retention.is_zero() {
        return Err(ResearchError::configuration("store retention must be non-zero"));
    }
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::with_retention(retention))),
        StoreConfig::File { path, compression } => Ok(Arc::new(
            FileStore::new(path.clone(), *compression).with_retention(retention),
        )),
        #[cfg(feature = "store-redis")]
        StoreConfig::Redis { url } => Ok(Arc::new(RedisStore::new(url, retention).await?)),
    }
}
