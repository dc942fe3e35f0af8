use std::collections::VecDeque;
use std::path::PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;
use crate::git::sync::SyncState;
use crate::storage::write_atomically;

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Verify,
    Status,
    Pull,
    Push,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: SyncOperation,
    pub status: SyncState,
    pub message: String,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Most recent sync attempts, oldest first.
///
/// Persisting is best effort: a log that cannot be written must never fail
/// the sync operation it describes.
pub struct SyncLog {
    path: Option<PathBuf>,
    capacity: usize,
    entries: Mutex<VecDeque<SyncLogEntry>>,
}

impl SyncLog {
    pub fn in_memory(capacity: usize) -> Self {
        Self { path: None, capacity: capacity.max(1), entries: Mutex::new(VecDeque::new()) }
    }

    /// Opens the log at `path`, keeping whatever readable entries it already has.
    pub async fn open(path: PathBuf, capacity: usize) -> Self {
        let mut entries: VecDeque<SyncLogEntry> = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!("ignoring unreadable sync log {}: {}", path.display(), e);
                VecDeque::new()
            }),
            Err(_) => VecDeque::new(),
        };
        let capacity = capacity.max(1);
        while entries.len() > capacity {
            entries.pop_front();
        }
        Self { path: Some(path), capacity, entries: Mutex::new(entries) }
    }

    pub async fn append(&self, operation: SyncOperation, status: SyncState, message: impl Into<String>, files: Vec<String>) {
        let entry = SyncLogEntry { timestamp: Utc::now(), operation, status, message: message.into(), files };
        let mut entries = self.entries.lock().await;
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        let Some(path) = &self.path else { return };
        let serialized = match serde_json::to_vec_pretty(&*entries) {
            Ok(x) => x,
            Err(e) => return warn!("cannot serialize sync log: {}", e),
        };
        let path = path.clone();
        let written = tokio::task::spawn_blocking(move || write_atomically(&path, &serialized)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("cannot write sync log: {}", e),
            Err(e) => warn!("cannot write sync log: {}", e),
        }
    }

    /// Entries newest first.
    pub async fn recent(&self) -> Vec<SyncLogEntry> {
        self.entries.lock().await.iter().rev().cloned().collect()
    }

    pub async fn last(&self) -> Option<SyncLogEntry> {
        self.entries.lock().await.back().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keeps_only_the_most_recent_entries() {
        let log = SyncLog::in_memory(3);
        for i in 0..5 {
            log.append(SyncOperation::Pull, SyncState::Clean, format!("pull {i}"), vec![]).await;
        }
        let recent = log.recent().await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message, "pull 4");
        assert_eq!(recent[2].message, "pull 2");
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sync-log.json");
        let log = SyncLog::open(path.clone(), 10).await;
        log.append(SyncOperation::Push, SyncState::Conflict, "push rejected", vec!["library/a-00000000.png".to_string()]).await;

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[0]["operation"], "push");
        assert_eq!(raw[0]["status"], "conflict");
        assert_eq!(raw[0]["files"][0], "library/a-00000000.png");

        let reopened = SyncLog::open(path, 10).await;
        assert_eq!(reopened.last().await.unwrap().message, "push rejected");
    }

    #[tokio::test]
    async fn unwritable_location_does_not_fail() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = SyncLog::open(dir.path().join("missing-dir").join("log.json"), 10).await;
        log.append(SyncOperation::Verify, SyncState::Unverified, "no repo", vec![]).await;
        assert_eq!(log.recent().await.len(), 1);
    }
}
