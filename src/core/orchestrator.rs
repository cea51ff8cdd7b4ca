//! Backup triggering and completion polling.
//!
//! A backup is started for a whole batch of devices with one call. The
//! appliance runs it asynchronously, so completion is observed by polling
//! each device until its state returns to `Idle`.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::core::models::DeviceId;
use crate::error::BackupError;
use crate::logging::LogThrottle;
use crate::rpc::Client;

/// Minimum gap between "still waiting" log lines.
const WAITING_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Timing of the polling loop.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    /// Pause between two full passes over the pending devices
    pub interval: Duration,
    /// Pause between the trigger and the first pass. A device polled too
    /// early can still show the `Idle` state from before the backup.
    pub settle_delay: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            settle_delay: Duration::from_secs(1),
        }
    }
}

/// Client-side bookkeeping of one triggered batch.
///
/// Every target is in exactly one of `remaining` and `results`.
#[derive(Debug, Clone)]
pub struct BackupJob {
    targets: BTreeSet<DeviceId>,
    remaining: Vec<DeviceId>,
    results: BTreeMap<DeviceId, bool>,
}

impl BackupJob {
    /// Duplicate ids collapse into one target; request order is kept for
    /// polling.
    pub fn new(ids: &[DeviceId]) -> Self {
        let mut targets = BTreeSet::new();
        let remaining = ids.iter().copied().filter(|id| targets.insert(*id)).collect();
        Self {
            targets,
            remaining,
            results: BTreeMap::new(),
        }
    }

    pub fn targets(&self) -> &BTreeSet<DeviceId> {
        &self.targets
    }

    pub fn remaining(&self) -> &[DeviceId] {
        &self.remaining
    }

    pub fn results(&self) -> &BTreeMap<DeviceId, bool> {
        &self.results
    }

    /// Record the outcome of a device that went idle. Returns false if the
    /// device was not pending.
    pub fn settle(&mut self, id: DeviceId, succeeded: bool) -> bool {
        let Some(pos) = self.remaining.iter().position(|r| *r == id) else {
            return false;
        };
        self.remaining.remove(pos);
        self.results.insert(id, succeeded);
        true
    }

    pub fn is_finished(&self) -> bool {
        self.remaining.is_empty()
    }

    pub fn into_report(self) -> BackupReport {
        BackupReport {
            results: self.results,
        }
    }
}

/// Outcome of a finished backup batch.
///
/// `true` means the device's own last-backup-status flag was set when it
/// went idle. A backup started by someone else in the meantime can race
/// with ours, so this is not proof that the triggered backup succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupReport {
    pub results: BTreeMap<DeviceId, bool>,
}

impl BackupReport {
    pub fn all_succeeded(&self) -> bool {
        self.results.values().all(|ok| *ok)
    }

    pub fn failed(&self) -> Vec<DeviceId> {
        self.results
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Runs backup batches to completion.
pub struct BackupOrchestrator {
    client: Client,
    settings: PollSettings,
    cancel: CancellationToken,
}

impl BackupOrchestrator {
    pub fn new(client: Client, settings: PollSettings, cancel: CancellationToken) -> Self {
        Self {
            client,
            settings,
            cancel,
        }
    }

    /// Trigger a backup of `ids` and wait until every device is idle.
    ///
    /// There is no timeout; cancel the token to give up. A failed status
    /// request aborts the whole batch.
    #[instrument(skip_all, fields(devices = ids.len()))]
    pub async fn run(&self, ids: &[DeviceId]) -> Result<BackupReport, BackupError> {
        let mut job = BackupJob::new(ids);
        if job.is_finished() {
            return Ok(job.into_report());
        }

        let targets = job.remaining().to_vec();
        info!(?targets, "Triggering backups");
        self.client.backup_devices(&targets).await?;

        self.pause(self.settings.settle_delay, &job).await?;

        let throttle = LogThrottle::new(WAITING_LOG_INTERVAL);
        let total = job.targets().len();
        loop {
            self.poll_pending(&mut job).await?;
            if job.is_finished() {
                break;
            }

            let remaining = job.remaining().len();
            if throttle.should_log() {
                info!(remaining, total, "Waiting for backups to finish");
            } else {
                debug!(remaining, total, "Waiting for backups to finish");
            }
            self.pause(self.settings.interval, &job).await?;
        }

        let report = job.into_report();
        info!(total, failed = report.failed().len(), "Backups finished");
        Ok(report)
    }

    /// One pass over every pending device.
    async fn poll_pending(&self, job: &mut BackupJob) -> Result<(), BackupError> {
        for id in job.remaining().to_vec() {
            if self.cancel.is_cancelled() {
                return Err(BackupError::Cancelled {
                    pending: job.remaining().to_vec(),
                });
            }

            let device = self.client.view_device(id).await?;
            debug!(device_id = id, state = %device.state, "Polled device");

            if device.state.is_idle() {
                let succeeded = device.last_backup_status == Some(true);
                job.settle(id, succeeded);
                info!(device_id = id, name = %device.name, succeeded, "Device backup finished");
            }
        }
        Ok(())
    }

    async fn pause(&self, duration: Duration, job: &BackupJob) -> Result<(), BackupError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(BackupError::Cancelled {
                pending: job.remaining().to_vec(),
            }),
        }
    }
}
