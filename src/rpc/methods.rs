//! Typed appliance commands.
//!
//! One method per command the orchestration engines use.

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::core::models::{BackupId, BackupRecord, Device, DeviceId};
use crate::error::ApiError;

use super::client::Client;
use super::protocol::Request;

pub const LIST_DEVICES: &str = "listdevices";
pub const LIST_DEVICES_STATUS: &str = "listdevicesstatus";
pub const VIEW_DEVICE: &str = "viewdevice";
pub const BACKUP_DEVICES: &str = "backupdevices";
pub const LATEST_BACKUPS: &str = "latestbackups";
pub const DEVICE_BACKUPS: &str = "devicebackups";
pub const DELETE_BACKUPS: &str = "deletebackupids";
pub const EXPORT_BACKUP: &str = "exportbackup";

impl Client {
    /// All devices, enabled or not.
    pub async fn list_devices(&self) -> Result<Vec<Device>, ApiError> {
        let result = self.invoke(LIST_DEVICES, json!({})).await?;
        rows(result)
    }

    /// Live state and last backup status of every device.
    pub async fn list_devices_status(&self) -> Result<Vec<Device>, ApiError> {
        let result = self.invoke(LIST_DEVICES_STATUS, json!({})).await?;
        rows(result)
    }

    /// Live state of a single device.
    pub async fn view_device(&self, id: DeviceId) -> Result<Device, ApiError> {
        let result = self
            .invoke(VIEW_DEVICE, json!({"device": {"id": id}}))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Start backups of all `ids` in one batch.
    pub async fn backup_devices(&self, ids: &[DeviceId]) -> Result<Value, ApiError> {
        let result = self.invoke(BACKUP_DEVICES, json!({"ids": ids})).await?;
        debug!(?result, "Backup triggered");
        Ok(result)
    }

    /// Most recent backup of each device that has one.
    pub async fn latest_backups(&self, ids: &[DeviceId]) -> Result<Vec<BackupRecord>, ApiError> {
        let result = self.invoke(LATEST_BACKUPS, json!({"ids": ids})).await?;
        rows(result)
    }

    /// Every stored backup of one device, in appliance order.
    pub async fn device_backups(&self, id: DeviceId) -> Result<Vec<BackupRecord>, ApiError> {
        let result = self
            .invoke(DEVICE_BACKUPS, json!({"device": {"id": id}}))
            .await?;
        rows(result)
    }

    pub async fn delete_backups(&self, ids: &[BackupId]) -> Result<Value, ApiError> {
        self.invoke(DELETE_BACKUPS, json!({"ids": ids})).await
    }
}

/// Envelope of a browser-style export download of one backup.
pub fn export_request(backup_id: BackupId) -> Request {
    Request::new(
        EXPORT_BACKUP,
        json!({
            "ids": [backup_id],
            "command": "Browser",
            "configtype": "",
            "credentials": {"password": "", "username": ""},
            "isdownload": true,
            "location": "",
            "value": ""
        }),
    )
}

/// List results come either bare or wrapped in `{"Rows": [...]}`.
fn rows<T: DeserializeOwned>(result: Value) -> Result<Vec<T>, ApiError> {
    match result {
        Value::Object(mut map) if map.contains_key("Rows") => {
            let rows = map.remove("Rows").unwrap_or(Value::Null);
            if rows.is_null() {
                return Ok(Vec::new());
            }
            Ok(serde_json::from_value(rows)?)
        }
        Value::Null => Ok(Vec::new()),
        other => Ok(serde_json::from_value(other)?),
    }
}
