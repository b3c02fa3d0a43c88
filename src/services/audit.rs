//! Append-only audit log, bucketed per calendar day.
//!
//! Every storage operation appends one JSON line to
//! `{YYYYMMDD}_operations.jsonl` under the audit directory. Appends within
//! a day bucket are serialized through a per-bucket async mutex so
//! concurrent operations never interleave bytes or lose lines. The write
//! is flushed before `record` returns; the gateway only reports an
//! operation successful once its audit line is durable.

use crate::models::audit::AuditRecord;
use std::{
    collections::HashMap,
    io,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tokio::{fs, io::AsyncWriteExt};

#[derive(Clone)]
pub struct AuditRecorder {
    dir: PathBuf,
    // Map of day bucket -> append lock. The outer mutex only guards the
    // map itself and is never held across await points.
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl AuditRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.dir.join(format!("{}_operations.jsonl", bucket))
    }

    fn lock_for(&self, bucket: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("audit lock map poisoned");
        locks
            .entry(bucket.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Append one record to its day bucket. Returns only after the line is
    /// written and flushed.
    pub async fn record(&self, record: &AuditRecord) -> io::Result<()> {
        let bucket = record.timestamp.format("%Y%m%d").to_string();
        let line = serde_json::to_string(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let lock = self.lock_for(&bucket);
        let _guard = lock.lock().await;

        fs::create_dir_all(&self.dir).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.bucket_path(&bucket))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Read back all records of one day bucket (`YYYYMMDD`), oldest first.
    /// Missing buckets read as empty. For compliance consumers and tests.
    pub async fn read_day(&self, bucket: &str) -> io::Result<Vec<AuditRecord>> {
        let contents = match fs::read_to_string(self.bucket_path(bucket)).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            })
            .collect()
    }
}
