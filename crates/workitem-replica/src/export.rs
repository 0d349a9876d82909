//! Index export with completion detection.
//!
//! Chunk serialization is fanned out to detached blocking tasks, one per
//! chunk key, each pushing into a shared [`ExportBuffer`] when done. The
//! fan-out call returns before the chunks exist, so completion is detected
//! by polling the buffer for [`MANIFEST_KEY`] (always produced) and then
//! waiting one grace interval for stragglers. [`await_export`] then keeps
//! polling until every planned key is present, so a partial buffer is
//! never reported complete.
//!
//! The poll is bounded by `max_wait`: a chunk that never appears yields
//! [`ExportOutcome::TimedOut`] instead of hanging the process.
//!
//! [`MANIFEST_KEY`]: workitem_replica_core::index::MANIFEST_KEY

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;

use anyhow::Result;
use workitem_replica_core::index::{FuzzyIndex, MANIFEST_KEY};
use workitem_replica_core::store::SnapshotEntry;

use crate::config::IndexConfig;

/// Chunks accumulated by an in-flight export.
#[derive(Default)]
pub struct ExportBuffer {
    entries: Mutex<Vec<SnapshotEntry>>,
}

impl ExportBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, key: &str, value: String) {
        self.entries.lock().unwrap().push(SnapshotEntry {
            key: key.to_string(),
            value,
        });
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().unwrap().iter().any(|e| e.key == key)
    }

    /// Planned keys that have not arrived yet.
    pub fn missing(&self, keys: &[String]) -> Vec<String> {
        let entries = self.entries.lock().unwrap();
        keys.iter()
            .filter(|key| !entries.iter().any(|e| &e.key == *key))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Everything collected so far, sorted by key.
    pub fn take(&self) -> Vec<SnapshotEntry> {
        let mut entries = std::mem::take(&mut *self.entries.lock().unwrap());
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExportTiming {
    pub poll: Duration,
    pub grace: Duration,
    pub max_wait: Duration,
}

impl From<&IndexConfig> for ExportTiming {
    fn from(config: &IndexConfig) -> Self {
        Self {
            poll: Duration::from_millis(config.export_poll_ms),
            grace: Duration::from_millis(config.export_grace_ms),
            max_wait: Duration::from_millis(config.export_max_wait_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    Complete,
    TimedOut,
}

/// Start serializing every chunk of `index` into `buffer`.
///
/// Returns the planned chunk keys immediately, before any chunk exists.
pub fn spawn_export(index: Arc<RwLock<FuzzyIndex>>, buffer: Arc<ExportBuffer>) -> Result<Vec<String>> {
    let keys = index.read().unwrap().export_keys()?;
    for key in keys.iter().cloned() {
        let index = index.clone();
        let buffer = buffer.clone();
        tokio::task::spawn_blocking(move || {
            let chunk = index.read().unwrap().export_chunk(&key);
            match chunk {
                Ok(value) => buffer.push(&key, value),
                Err(e) => tracing::warn!(key, "Index chunk export failed: {:#}", e),
            }
        });
    }
    Ok(keys)
}

/// Poll `buffer` every `timing.poll` until `key` appears, then wait `timing.grace`.
pub async fn await_chunk(buffer: &ExportBuffer, key: &str, timing: ExportTiming) -> ExportOutcome {
    let started = Instant::now();
    loop {
        tokio::time::sleep(timing.poll).await;

        if buffer.contains(key) {
            tokio::time::sleep(timing.grace).await;
            return ExportOutcome::Complete;
        }

        if started.elapsed() >= timing.max_wait {
            tracing::warn!(
                key,
                waited_ms = started.elapsed().as_millis() as u64,
                "Index export chunk never appeared; giving up"
            );
            return ExportOutcome::TimedOut;
        }

        tracing::debug!(key, "Index export chunk missing, will retry");
    }
}

/// Wait for the manifest, then for every other planned chunk, all within
/// `timing.max_wait`.
pub async fn await_export(buffer: &ExportBuffer, planned: &[String], timing: ExportTiming) -> ExportOutcome {
    let started = Instant::now();
    if await_chunk(buffer, MANIFEST_KEY, timing).await == ExportOutcome::TimedOut {
        return ExportOutcome::TimedOut;
    }
    loop {
        let missing = buffer.missing(planned);
        if missing.is_empty() {
            return ExportOutcome::Complete;
        }
        if started.elapsed() >= timing.max_wait {
            tracing::warn!(?missing, "Index export is missing chunks; giving up");
            return ExportOutcome::TimedOut;
        }
        tokio::time::sleep(timing.poll).await;
    }
}
