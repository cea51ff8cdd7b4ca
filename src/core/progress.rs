//! In-memory progress tracking for export runs.
//!
//! Every backup being exported has one entry, updated by the worker that
//! owns it. Nothing here is persisted; it exists so progress can be reported
//! while downloads are in flight.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::models::BackupId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStatus {
    Queued,
    Downloading,
    Saved,
    Failed,
}

impl ExportStatus {
    pub fn is_settled(self) -> bool {
        matches!(self, ExportStatus::Saved | ExportStatus::Failed)
    }
}

/// Thread-safe store of per-backup export status, shared by the workers of
/// one export run.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<RwLock<HashMap<BackupId, ExportStatus>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn update(&self, backup_id: BackupId, status: ExportStatus) {
        let mut map = self.inner.write().await;
        map.insert(backup_id, status);
    }

    pub async fn get(&self, backup_id: BackupId) -> Option<ExportStatus> {
        let map = self.inner.read().await;
        map.get(&backup_id).copied()
    }

    pub async fn get_all(&self) -> HashMap<BackupId, ExportStatus> {
        let map = self.inner.read().await;
        map.clone()
    }

    /// `(completed, total)`: settled entries against every tracked entry.
    pub async fn counts(&self) -> (usize, usize) {
        let map = self.inner.read().await;
        let completed = map.values().filter(|s| s.is_settled()).count();
        (completed, map.len())
    }

    /// Number of downloads currently running.
    pub async fn in_flight(&self) -> usize {
        let map = self.inner.read().await;
        map.values()
            .filter(|s| **s == ExportStatus::Downloading)
            .count()
    }
}
