//! Concurrent export of each device's latest backup.
//!
//! Downloads run on a fixed pool of workers pulling from one task channel.
//! A failed download only fails its own task; the run returns once every
//! task has settled.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::core::models::{BackupRecord, DeviceId, ExportOutcome, ExportTask};
use crate::core::progress::{ExportStatus, ProgressTracker};
use crate::error::{ApiError, ExportError};
use crate::rpc::{Client, DownloadTarget};

#[derive(Debug, Clone, Copy)]
pub struct ExportSettings {
    /// Maximum number of downloads in flight
    pub max_parallel: usize,
    /// How often `(completed, total)` is logged while downloads run
    pub progress_interval: Duration,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            max_parallel: default_parallelism(),
            progress_interval: Duration::from_secs(1),
        }
    }
}

/// One worker per available CPU.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

pub struct ExportCoordinator {
    client: Client,
    settings: ExportSettings,
    cancel: CancellationToken,
    progress: ProgressTracker,
}

impl ExportCoordinator {
    pub fn new(client: Client, settings: ExportSettings, cancel: CancellationToken) -> Self {
        Self {
            client,
            settings,
            cancel,
            progress: ProgressTracker::new(),
        }
    }

    /// Live per-backup status of the current run.
    pub fn progress(&self) -> ProgressTracker {
        self.progress.clone()
    }

    /// Latest backup of each device. Devices without any backup are absent.
    pub async fn latest_backups(&self, ids: &[DeviceId]) -> Result<Vec<BackupRecord>, ApiError> {
        self.client.latest_backups(ids).await
    }

    /// Download the latest backup of every device in `ids` into `dest_dir`
    /// (the working directory when `None`).
    ///
    /// Only resolving the latest backups can fail the whole call; download
    /// failures are reported per task.
    #[instrument(skip_all, fields(devices = ids.len()))]
    pub async fn export_latest(
        &self,
        ids: &[DeviceId],
        dest_dir: Option<&Path>,
    ) -> Result<Vec<ExportTask>, ExportError> {
        let records = self.latest_backups(ids).await?;
        let target = Arc::new(DownloadTarget::in_dir_or_cwd(dest_dir)?);
        info!(
            backups = records.len(),
            dest = %target.dir().display(),
            "Exporting latest backups"
        );
        Ok(self.export_backups(records, target).await)
    }

    /// Download every record with at most `max_parallel` in flight.
    /// Results come back in completion order.
    pub async fn export_backups(
        &self,
        records: Vec<BackupRecord>,
        target: Arc<DownloadTarget>,
    ) -> Vec<ExportTask> {
        let total = records.len();
        if total == 0 {
            return Vec::new();
        }

        let (task_tx, task_rx) = mpsc::channel(total);
        for record in &records {
            self.progress.update(record.id, ExportStatus::Queued).await;
            let task = ExportTask::new(record, target.dir().to_path_buf());
            // Capacity equals the task count, so this never waits.
            if task_tx.send(task).await.is_err() {
                break;
            }
        }
        drop(task_tx);

        let task_rx = Arc::new(Mutex::new(task_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();

        let workers = self.settings.max_parallel.clamp(1, total);
        debug!(workers, total, "Starting export workers");

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let ctx = WorkerContext {
                worker,
                client: self.client.clone(),
                target: target.clone(),
                progress: self.progress.clone(),
                cancel: self.cancel.clone(),
            };
            pool.spawn(run_worker(ctx, task_rx.clone(), result_tx.clone()));
        }
        drop(result_tx);

        let mut ticker = tokio::time::interval(self.settings.progress_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut settled = Vec::with_capacity(total);
        loop {
            tokio::select! {
                task = result_rx.recv() => match task {
                    Some(task) => settled.push(task),
                    None => break,
                },
                _ = ticker.tick() => {
                    let (completed, total) = self.progress.counts().await;
                    info!(completed, total, "Export progress");
                }
            }
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Export worker stopped unexpectedly");
            }
        }

        // A worker that died mid-download took its task with it.
        let reported: HashSet<_> = settled.iter().map(|t| t.backup_id).collect();
        for record in records.iter().filter(|r| !reported.contains(&r.id)) {
            self.progress.update(record.id, ExportStatus::Failed).await;
            let mut task = ExportTask::new(record, target.dir().to_path_buf());
            task.outcome = ExportOutcome::Failed(ExportError::WorkerLost);
            settled.push(task);
        }

        let failed = settled.iter().filter(|t| !t.succeeded()).count();
        info!(total, failed, "Export finished");
        settled
    }
}

struct WorkerContext {
    worker: usize,
    client: Client,
    target: Arc<DownloadTarget>,
    progress: ProgressTracker,
    cancel: CancellationToken,
}

async fn run_worker(
    ctx: WorkerContext,
    tasks: Arc<Mutex<mpsc::Receiver<ExportTask>>>,
    results: mpsc::UnboundedSender<ExportTask>,
) {
    loop {
        let next = tasks.lock().await.recv().await;
        let Some(mut task) = next else {
            break;
        };

        task.outcome = if ctx.cancel.is_cancelled() {
            ExportOutcome::Failed(ExportError::Cancelled)
        } else {
            ctx.progress
                .update(task.backup_id, ExportStatus::Downloading)
                .await;
            debug!(worker = ctx.worker, backup_id = task.backup_id, "Downloading");

            match ctx.client.download_backup(task.backup_id, &ctx.target).await {
                Ok(path) => {
                    info!(
                        backup_id = task.backup_id,
                        device_id = task.device_id,
                        path = %path.display(),
                        "Export saved"
                    );
                    ExportOutcome::Saved(path)
                }
                Err(e) => {
                    warn!(
                        backup_id = task.backup_id,
                        device_id = task.device_id,
                        error = %e,
                        "Export failed"
                    );
                    ExportOutcome::Failed(e)
                }
            }
        };

        let status = if task.succeeded() {
            ExportStatus::Saved
        } else {
            ExportStatus::Failed
        };
        ctx.progress.update(task.backup_id, status).await;

        if results.send(task).is_err() {
            break;
        }
    }
}

/// Remove everything inside `dir`, keeping `dir` itself.
///
/// Entries that cannot be removed are logged and skipped.
pub fn clean_directory(dir: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                error!(dir = %dir.display(), error = %e, "Failed to read directory entry");
                continue;
            }
        };

        let removed = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };

        match removed {
            Ok(()) => debug!(path = %path.display(), "Removed"),
            Err(e) => error!(path = %path.display(), error = %e, "Failed to remove"),
        }
    }
    Ok(())
}
