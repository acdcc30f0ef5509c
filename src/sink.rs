//! Durable event log.
//!
//! The runner appends every event here before emitting it to observers, so a
//! reconnecting client can always rebuild the conversation from the sink
//! alone. `JsonlSink` stores one JSON line per event in one file per thread,
//! append-only; `MemorySink` backs tests and ephemeral deployments.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::OrchestratorError;
use crate::types::{EventRecord, ThreadId, TurnRef};

/// Where committed events go, and where history comes back from.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Durably commit one record. Must not return before the record would
    /// survive a crash of the process (to the sink's durability level).
    async fn append(&self, turn: &TurnRef, record: &EventRecord)
        -> Result<(), OrchestratorError>;

    /// All non-meta records of a thread, oldest first. Meta events
    /// (hints, stream ends, code errors) are stored but not replayed into
    /// model-facing history.
    async fn load_history(&self, thread_id: &ThreadId)
        -> Result<Vec<EventRecord>, OrchestratorError>;
}

/// In-memory sink. Events survive for the lifetime of the process only.
#[derive(Default)]
pub struct MemorySink {
    threads: Mutex<HashMap<ThreadId, Vec<EventRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record of a thread, meta included. Test hook.
    pub async fn raw_events(&self, thread_id: &ThreadId) -> Vec<EventRecord> {
        self.threads
            .lock()
            .await
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn append(
        &self,
        turn: &TurnRef,
        record: &EventRecord,
    ) -> Result<(), OrchestratorError> {
        let mut threads = self.threads.lock().await;
        threads
            .entry(turn.thread_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn load_history(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Vec<EventRecord>, OrchestratorError> {
        let threads = self.threads.lock().await;
        Ok(threads
            .get(thread_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| !r.event.is_meta())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Append-only on-disk sink: `<dir>/<thread_id>.jsonl`, one record per line.
pub struct JsonlSink {
    dir: PathBuf,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn thread_path(&self, thread_id: &ThreadId) -> Result<PathBuf, OrchestratorError> {
        // Generated ids are plain alphanumerics; reject anything that could
        // escape the log directory.
        if !thread_id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(OrchestratorError::persistence(format!(
                "invalid thread id: {thread_id}"
            )));
        }
        Ok(self.dir.join(format!("{thread_id}.jsonl")))
    }
}

#[async_trait]
impl EventSink for JsonlSink {
    async fn append(
        &self,
        turn: &TurnRef,
        record: &EventRecord,
    ) -> Result<(), OrchestratorError> {
        let path = self.thread_path(&turn.thread_id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| OrchestratorError::persistence(e.to_string()))?;
        let mut line = serde_json::to_vec(record)
            .map_err(|e| OrchestratorError::persistence(e.to_string()))?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| OrchestratorError::persistence(e.to_string()))?;
        file.write_all(&line)
            .await
            .map_err(|e| OrchestratorError::persistence(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| OrchestratorError::persistence(e.to_string()))?;
        Ok(())
    }

    async fn load_history(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Vec<EventRecord>, OrchestratorError> {
        let path = self.thread_path(thread_id)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(OrchestratorError::persistence(e.to_string())),
        };
        let mut records = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            let record: EventRecord = serde_json::from_str(line)
                .map_err(|e| OrchestratorError::persistence(format!("corrupt record: {e}")))?;
            if !record.event.is_meta() {
                records.push(record);
            }
        }
        Ok(records)
    }
}
