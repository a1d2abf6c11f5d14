//! File-based results store
//!
//! One JSON document per run under a base directory, optionally zstd
//! compressed. Writes go to a temp file that is renamed into place, so a
//! reader never sees a half-written record.
//!
//! ```text
//! {base}/{run_id}.json        (compression off)
//! {base}/{run_id}.json.zst    (compression on)
//! ```

use async_trait::async_trait;
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::{merge_record, KeyLocks, RecordUpdate, ResultsStore, RunRecord, DEFAULT_RETENTION};
use crate::engine::RunId;
use crate::error::ResearchError;

#[derive(Debug)]
pub struct FileStore {
    base_path: PathBuf,
    compression: bool,
    retention: Duration,
    locks: KeyLocks,
}

impl FileStore {
    pub fn new(base_path: impl Into<PathBuf>, compression: bool) -> Self {
        Self {
            base_path: base_path.into(),
            compression,
            retention: DEFAULT_RETENTION,
            locks: KeyLocks::default(),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    fn extension(&self) -> &'static str {
        if self.compression {
            ".json.zst"
        } else {
            ".json"
        }
    }

    fn record_path(&self, run_id: &RunId) -> PathBuf {
        self.base_path
            .join(format!("{}{}", run_id.as_str(), self.extension()))
    }

    fn temp_path(&self, run_id: &RunId) -> PathBuf {
        self.base_path.join(format!("{}.tmp", run_id.as_str()))
    }

    async fn ensure_dir(&self) -> Result<(), ResearchError> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| ResearchError::store(format!("Failed to create directory: {}", e)))
    }

    fn compress(data: &[u8]) -> Result<Vec<u8>, ResearchError> {
        let mut encoder = zstd::stream::Encoder::new(Vec::new(), 3)
            .map_err(|e| ResearchError::store(format!("Compression init failed: {}", e)))?;
        encoder
            .write_all(data)
            .map_err(|e| ResearchError::store(format!("Compression write failed: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| ResearchError::store(format!("Compression finish failed: {}", e)))
    }

    fn decompress(data: &[u8]) -> Result<Vec<u8>, ResearchError> {
        zstd::stream::decode_all(data)
            .map_err(|e| ResearchError::store(format!("Decompression failed: {}", e)))
    }

    fn encode(&self, record: &RunRecord) -> Result<Vec<u8>, ResearchError> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| ResearchError::store(format!("Serialization failed: {}", e)))?;
        if self.compression {
            Self::compress(&json)
        } else {
            Ok(json)
        }
    }

    fn decode(&self, data: &[u8]) -> Result<RunRecord, ResearchError> {
        let json = if self.compression {
            Self::decompress(data)?
        } else {
            data.to_vec()
        };
        serde_json::from_slice(&json)
            .map_err(|e| ResearchError::store(format!("Deserialization failed: {}", e)))
    }

    async fn read_path(&self, path: &Path) -> Result<Option<RunRecord>, ResearchError> {
        match fs::read(path).await {
            Ok(data) => self.decode(&data).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ResearchError::store(format!("Failed to read file: {}", e))),
        }
    }

    async fn write_record(&self, record: &RunRecord) -> Result<(), ResearchError> {
        self.ensure_dir().await?;
        let data = self.encode(record)?;

        let temp_path = self.temp_path(&record.run_id);
        let final_path = self.record_path(&record.run_id);

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| ResearchError::store(format!("Failed to create temp file: {}", e)))?;
        file.write_all(&data)
            .await
            .map_err(|e| ResearchError::store(format!("Failed to write data: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| ResearchError::store(format!("Failed to sync file: {}", e)))?;

        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| ResearchError::store(format!("Failed to rename file: {}", e)))
    }

    /// Every record file in the directory, expired or not
    async fn record_paths(&self) -> Result<Vec<PathBuf>, ResearchError> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| ResearchError::store(format!("Failed to read directory: {}", e)))?;

        let extension = self.extension();
        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ResearchError::store(format!("Failed to read entry: {}", e)))?
        {
            let path = entry.path();
            let is_record = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.ends_with(extension))
                .unwrap_or(false);
            if is_record {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl ResultsStore for FileStore {
    async fn store(&self, run_id: &RunId, update: RecordUpdate) -> Result<RunRecord, ResearchError> {
        let lock = self.locks.lock_for(run_id).await;
        let _guard = lock.lock().await;

        let now = Utc::now();
        let existing = self
            .read_path(&self.record_path(run_id))
            .await?
            .filter(|record| !record.is_expired(self.retention, now));

        let record = merge_record(run_id, existing, update, now)?;
        self.write_record(&record).await?;
        Ok(record)
    }

    async fn get(&self, run_id: &RunId) -> Result<Option<RunRecord>, ResearchError> {
        let path = self.record_path(run_id);
        let Some(record) = self.read_path(&path).await? else {
            return Ok(None);
        };
        if record.is_expired(self.retention, Utc::now()) {
            if let Err(e) = fs::remove_file(&path).await {
                warn!(run_id = %run_id, error = %e, "Failed to remove expired record");
            }
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<RunRecord>, ResearchError> {
        let now = Utc::now();
        let mut records = Vec::new();
        for path in self.record_paths().await? {
            match self.read_path(&path).await {
                Ok(Some(record)) if !record.is_expired(self.retention, now) => records.push(record),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable record"),
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn purge_expired(&self) -> Result<usize, ResearchError> {
        let now = Utc::now();
        let mut removed = 0;
        for path in self.record_paths().await? {
            if let Ok(Some(record)) = self.read_path(&path).await {
                if record.is_expired(self.retention, now) {
                    fs::remove_file(&path).await.map_err(|e| {
                        ResearchError::store(format!("Failed to remove file: {}", e))
                    })?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RunStatus;
    use serde_json::json;
    use tempfile::tempdir;

    fn id(s: &str) -> RunId {
        RunId::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path(), false);

        store
            .store(&id("run-1"), RecordUpdate::status(RunStatus::Queued))
            .await
            .unwrap();
        store
            .store(
                &id("run-1"),
                RecordUpdate::status(RunStatus::Completed)
                    .with_result(json!({"score": 88}))
                    .with_best_effort(false),
            )
            .await
            .unwrap();

        assert!(temp_dir.path().join("run-1.json").exists());
        assert!(!temp_dir.path().join("run-1.tmp").exists());

        let record = store.get(&id("run-1")).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.result, Some(json!({"score": 88})));
    }

    #[tokio::test]
    async fn test_file_store_with_compression() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path(), true);

        store
            .store(
                &id("zipped"),
                RecordUpdate::status(RunStatus::Failed).with_error("research unavailable"),
            )
            .await
            .unwrap();

        assert!(temp_dir.path().join("zipped.json.zst").exists());
        let record = store.get(&id("zipped")).await.unwrap().unwrap();
        assert_eq!(record.error.as_deref(), Some("research unavailable"));
    }

    #[tokio::test]
    async fn test_file_store_missing_record() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path().join("not-yet-created"), false);
        assert!(store.get(&id("nope")).await.unwrap().is_none());
        assert!(store.list_recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_rejects_backwards_status() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path(), false);
        store
            .store(&id("r"), RecordUpdate::status(RunStatus::Completed))
            .await
            .unwrap();
        assert!(store.update_status(&id("r"), RunStatus::Queued).await.is_err());
        assert_eq!(
            store.get(&id("r")).await.unwrap().unwrap().status,
            RunStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_file_store_list_and_purge() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path(), false).with_retention(Duration::from_millis(50));

        store
            .store(&id("first"), RecordUpdate::status(RunStatus::Completed))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        store
            .store(&id("second"), RecordUpdate::status(RunStatus::Queued))
            .await
            .unwrap();

        let recent = store.list_recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].run_id.as_str(), "second");

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(!temp_dir.path().join("first.json").exists());
        assert!(temp_dir.path().join("second.json").exists());
    }
}
