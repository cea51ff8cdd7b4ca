//! Scripted in-memory appliance for engine tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rpctl::core::models::{BackupId, DeviceId};
use rpctl::error::{ApiError, ExportError};
use rpctl::rpc::{Appliance, Client, DownloadTarget};
use serde_json::{Value, json};

#[derive(Default)]
struct Script {
    devices: Vec<(DeviceId, String, bool)>,
    /// Per-device `(state, last backup status)` answers to `viewdevice`.
    /// The last entry repeats once the queue is down to one.
    polls: HashMap<DeviceId, VecDeque<(String, Option<bool>)>>,
    latest: Vec<(BackupId, DeviceId)>,
    backups: HashMap<DeviceId, Vec<(BackupId, String)>>,
    filenames: HashMap<BackupId, String>,
    failing_downloads: HashSet<BackupId>,
    failing_polls: HashSet<DeviceId>,
    calls: Vec<(String, Value)>,
}

#[derive(Default)]
pub struct FakeAppliance {
    script: Mutex<Script>,
    download_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    downloads: AtomicUsize,
}

impl FakeAppliance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, id: DeviceId, name: &str, enabled: bool) -> Self {
        self.edit(|s| s.devices.push((id, name.to_string(), enabled)));
        self
    }

    pub fn with_polls(self, id: DeviceId, answers: &[(&str, Option<bool>)]) -> Self {
        self.edit(|s| {
            s.polls.insert(
                id,
                answers
                    .iter()
                    .map(|(state, ok)| (state.to_string(), *ok))
                    .collect(),
            );
        });
        self
    }

    pub fn with_latest_backup(self, backup_id: BackupId, device_id: DeviceId) -> Self {
        self.edit(|s| s.latest.push((backup_id, device_id)));
        self
    }

    pub fn with_backups(self, device_id: DeviceId, backups: &[(BackupId, &str)]) -> Self {
        self.edit(|s| {
            s.backups.insert(
                device_id,
                backups
                    .iter()
                    .map(|(id, ts)| (*id, ts.to_string()))
                    .collect(),
            );
        });
        self
    }

    pub fn with_filename(self, backup_id: BackupId, name: &str) -> Self {
        self.edit(|s| {
            s.filenames.insert(backup_id, name.to_string());
        });
        self
    }

    pub fn failing_download(self, backup_id: BackupId) -> Self {
        self.edit(|s| {
            s.failing_downloads.insert(backup_id);
        });
        self
    }

    pub fn failing_poll(self, device_id: DeviceId) -> Self {
        self.edit(|s| {
            s.failing_polls.insert(device_id);
        });
        self
    }

    pub fn download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = delay;
        self
    }

    pub fn into_client(self) -> (Client, Arc<FakeAppliance>) {
        let fake = Arc::new(self);
        (Client::new(fake.clone()), fake)
    }

    pub fn calls_to(&self, command: &str) -> Vec<Value> {
        self.edit(|s| {
            s.calls
                .iter()
                .filter(|(c, _)| c == command)
                .map(|(_, p)| p.clone())
                .collect()
        })
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn edit<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        let mut script = self.script.lock().unwrap();
        f(&mut script)
    }

    fn device_row(s: &Script, id: DeviceId) -> Value {
        let (name, enabled) = s
            .devices
            .iter()
            .find(|(d, _, _)| *d == id)
            .map(|(_, n, e)| (n.clone(), *e))
            .unwrap_or_else(|| (format!("dev-{}", id), true));
        json!({
            "ID": id,
            "Name": name,
            "Disabled": if enabled { "No" } else { "Yes" },
        })
    }
}

fn ids_param(params: &Value) -> Vec<i64> {
    params["ids"]
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

#[async_trait]
impl Appliance for FakeAppliance {
    async fn invoke(&self, command: &str, params: Value) -> Result<Value, ApiError> {
        self.edit(|s| {
            s.calls.push((command.to_string(), params.clone()));

            match command {
                "listdevices" => {
                    let rows: Vec<Value> =
                        s.devices.iter().map(|(id, _, _)| Self::device_row(s, *id)).collect();
                    Ok(json!({"Rows": rows}))
                }
                "listdevicesstatus" => {
                    let rows: Vec<Value> = s
                        .devices
                        .iter()
                        .map(|(id, _, _)| {
                            let mut row = Self::device_row(s, *id);
                            let (state, ok) = s
                                .polls
                                .get(id)
                                .and_then(|q| q.front().cloned())
                                .unwrap_or(("Idle".to_string(), Some(true)));
                            row["State"] = json!(state);
                            row["BackupStatus"] = json!(ok);
                            row
                        })
                        .collect();
                    Ok(json!(rows))
                }
                "viewdevice" => {
                    let id = params["device"]["id"].as_i64().unwrap_or_default();
                    if s.failing_polls.contains(&id) {
                        return Err(ApiError::Status(reqwest::StatusCode::BAD_GATEWAY));
                    }
                    let (state, ok) = match s.polls.get_mut(&id) {
                        Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                        Some(queue) => queue.front().cloned().unwrap(),
                        None => ("Idle".to_string(), Some(true)),
                    };
                    let mut row = Self::device_row(s, id);
                    row["State"] = json!(state);
                    row["BackupStatus"] = json!(ok);
                    Ok(row)
                }
                "backupdevices" => Ok(json!("Backup started")),
                "latestbackups" => {
                    let ids = ids_param(&params);
                    let rows: Vec<Value> = s
                        .latest
                        .iter()
                        .filter(|(_, dev)| ids.contains(dev))
                        .map(|(id, dev)| json!({"ID": id, "DeviceID": dev, "Dt": "2024-01-01 00:00:00"}))
                        .collect();
                    Ok(json!(rows))
                }
                "devicebackups" => {
                    let id = params["device"]["id"].as_i64().unwrap_or_default();
                    let rows: Vec<Value> = s
                        .backups
                        .get(&id)
                        .map(|b| {
                            b.iter()
                                .map(|(bid, ts)| json!({"ID": bid, "DeviceID": id, "Dt": ts}))
                                .collect()
                        })
                        .unwrap_or_default();
                    Ok(json!(rows))
                }
                "deletebackupids" => {
                    let ids = ids_param(&params);
                    for backups in s.backups.values_mut() {
                        backups.retain(|(id, _)| !ids.contains(id));
                    }
                    Ok(json!("OK"))
                }
                other => Err(ApiError::Remote(format!("unknown command {}", other))),
            }
        })
    }

    async fn download_backup(
        &self,
        backup_id: BackupId,
        target: &DownloadTarget,
    ) -> Result<PathBuf, ExportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.downloads.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(self.download_delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let (failing, name) = self.edit(|s| {
            (
                s.failing_downloads.contains(&backup_id),
                s.filenames
                    .get(&backup_id)
                    .cloned()
                    .unwrap_or_else(|| format!("backup-{}.cfg", backup_id)),
            )
        });

        if failing {
            return Err(ApiError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR).into());
        }

        let path = target.claim(&name)?;
        tokio::fs::write(&path, format!("config of backup {}", backup_id)).await?;
        Ok(path)
    }
}
