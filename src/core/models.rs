use std::path::PathBuf;

use serde::{Deserialize, Deserializer};

use crate::error::ExportError;

pub type DeviceId = i64;
pub type BackupId = i64;

/// A device managed by the appliance, as reported by `listdevices`,
/// `listdevicesstatus` or `viewdevice`.
///
/// Not every command fills every field, so everything but the id has a
/// default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Device {
    #[serde(rename = "ID")]
    pub id: DeviceId,
    #[serde(rename = "Name", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(
        rename = "Disabled",
        default = "enabled_by_default",
        deserialize_with = "enabled_from_disabled"
    )]
    pub enabled: bool,
    #[serde(rename = "State", default, deserialize_with = "null_as_default")]
    pub state: DeviceState,
    /// Status of the most recent backup the appliance knows about. This is
    /// not tied to any particular backup job.
    #[serde(rename = "BackupStatus", default)]
    pub last_backup_status: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum DeviceState {
    Idle,
    Running,
    Other(String),
    #[default]
    Unknown,
}

impl DeviceState {
    pub fn is_idle(&self) -> bool {
        matches!(self, DeviceState::Idle)
    }
}

impl From<String> for DeviceState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Idle" => DeviceState::Idle,
            "Running" => DeviceState::Running,
            "" => DeviceState::Unknown,
            _ => DeviceState::Other(s),
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::Idle => f.write_str("Idle"),
            DeviceState::Running => f.write_str("Running"),
            DeviceState::Other(s) => f.write_str(s),
            DeviceState::Unknown => f.write_str("Unknown"),
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

/// Some firmware sends `null` for fields it has no value for.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `Disabled` is sent as `"Yes"`/`"No"`; some firmware sends a bool.
/// `null` counts as enabled.
fn enabled_from_disabled<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(disabled)) => !disabled,
        Some(Flag::Text(s)) => !s.eq_ignore_ascii_case("yes"),
        None => true,
    })
}

/// A stored backup of one device.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackupRecord {
    #[serde(rename = "ID")]
    pub id: BackupId,
    #[serde(rename = "DeviceID", default, deserialize_with = "null_as_default")]
    pub device_id: DeviceId,
    /// Raw appliance timestamp; parsed only when ranking for retention.
    #[serde(rename = "Dt", default, deserialize_with = "null_as_default")]
    pub timestamp: String,
    #[serde(rename = "Status", default)]
    pub status: Option<bool>,
}

/// One backup to export and what became of it.
#[derive(Debug)]
pub struct ExportTask {
    pub backup_id: BackupId,
    pub device_id: DeviceId,
    pub dest_dir: PathBuf,
    pub outcome: ExportOutcome,
}

#[derive(Debug)]
pub enum ExportOutcome {
    Pending,
    Saved(PathBuf),
    Failed(ExportError),
}

impl ExportTask {
    pub fn new(record: &BackupRecord, dest_dir: PathBuf) -> Self {
        Self {
            backup_id: record.id,
            device_id: record.device_id,
            dest_dir,
            outcome: ExportOutcome::Pending,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, ExportOutcome::Saved(_))
    }
}
