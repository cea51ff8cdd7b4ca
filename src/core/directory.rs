//! Device lookup by name and id.
//!
//! A [`DeviceDirectory`] is a snapshot of the appliance's device list taken
//! once per command. It is never refreshed in place.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::core::models::{Device, DeviceId};
use crate::error::ApiError;
use crate::rpc::Client;

/// Name that selects every device.
pub const ALL_DEVICES: &str = "all";

/// Which devices a command should act on.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Device names; empty or `["all"]` means every device
    pub names: Vec<String>,
    /// Names removed after resolution
    pub exclude: Vec<String>,
    /// Keep disabled devices when selecting all
    pub include_disabled: bool,
}

impl Selection {
    fn is_all(&self) -> bool {
        self.names.is_empty() || (self.names.len() == 1 && self.names[0] == ALL_DEVICES)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeviceDirectory {
    devices: Vec<Device>,
}

impl DeviceDirectory {
    pub async fn fetch(client: &Client) -> Result<Self, ApiError> {
        let devices = client.list_devices().await?;
        debug!(count = devices.len(), "Fetched device list");
        Ok(Self::from_devices(devices))
    }

    pub fn from_devices(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    pub fn devices(&self, include_disabled: bool) -> Vec<&Device> {
        self.devices
            .iter()
            .filter(|d| include_disabled || d.enabled)
            .collect()
    }

    pub fn all_device_ids(&self, include_disabled: bool) -> Vec<DeviceId> {
        self.devices(include_disabled).iter().map(|d| d.id).collect()
    }

    /// Map names to ids. The first device with an exactly matching name
    /// wins; names that match nothing are logged and skipped.
    pub fn resolve_names<S: AsRef<str>>(&self, names: &[S]) -> Vec<DeviceId> {
        names
            .iter()
            .filter_map(|name| {
                let name = name.as_ref();
                let found = self.devices.iter().find(|d| d.name == name).map(|d| d.id);
                if found.is_none() {
                    warn!(device = name, "Could not determine device ID");
                }
                found
            })
            .collect()
    }

    pub fn name_of(&self, id: DeviceId) -> Option<&str> {
        self.devices
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.name.as_str())
    }

    /// Drop every id whose device name is in `excluded`.
    pub fn exclude_by_name<S: AsRef<str>>(
        &self,
        ids: Vec<DeviceId>,
        excluded: &[S],
    ) -> Vec<DeviceId> {
        if excluded.is_empty() {
            return ids;
        }
        ids.into_iter()
            .filter(|id| match self.name_of(*id) {
                Some(name) => !excluded.iter().any(|e| e.as_ref() == name),
                None => true,
            })
            .collect()
    }

    /// Resolve a selection into a duplicate-free id list, in request order.
    pub fn select(&self, selection: &Selection) -> Vec<DeviceId> {
        let ids = if selection.is_all() {
            self.all_device_ids(selection.include_disabled)
        } else {
            self.resolve_names(&selection.names)
        };

        let mut seen = HashSet::new();
        let ids = ids.into_iter().filter(|id| seen.insert(*id)).collect();
        self.exclude_by_name(ids, &selection.exclude)
    }
}

/// Current device list, optionally without disabled devices.
pub async fn list_devices(client: &Client, include_disabled: bool) -> Result<Vec<Device>, ApiError> {
    let devices = client.list_devices().await?;
    Ok(devices
        .into_iter()
        .filter(|d| include_disabled || d.enabled)
        .collect())
}

/// Live state and last backup status of every device.
pub async fn device_status(client: &Client) -> Result<Vec<Device>, ApiError> {
    client.list_devices_status().await
}

/// Devices whose last backup did not succeed.
pub fn failed_devices(status: &[Device]) -> Vec<&Device> {
    status
        .iter()
        .filter(|d| d.last_backup_status != Some(true))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::DeviceState;

    fn device(id: DeviceId, name: &str, enabled: bool) -> Device {
        Device {
            id,
            name: name.to_string(),
            enabled,
            state: DeviceState::Idle,
            last_backup_status: Some(true),
        }
    }

    fn directory() -> DeviceDirectory {
        DeviceDirectory::from_devices(vec![
            device(1, "fw-a", true),
            device(2, "fw-b", true),
            device(3, "old-sw", false),
            device(4, "fw-a", true),
        ])
    }

    #[test]
    fn resolve_skips_unknown_names() {
        let ids = directory().resolve_names(&["fw-a", "ghost"]);
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn resolve_warns_once_per_unknown_name() {
        use std::io::Write;
        use std::sync::{Arc, Mutex};

        #[derive(Clone, Default)]
        struct Captured(Arc<Mutex<Vec<u8>>>);

        impl Write for Captured {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let ids = tracing::subscriber::with_default(subscriber, || {
            directory().resolve_names(&["ghost", "fw-b"])
        });

        assert_eq!(ids, vec![2]);
        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(logs.matches("Could not determine device ID").count(), 1);
        assert!(logs.contains("ghost"));
    }

    #[test]
    fn resolve_first_match_wins() {
        let ids = directory().resolve_names(&["fw-a"]);
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn all_ids_respect_disabled_filter() {
        let dir = directory();
        assert_eq!(dir.all_device_ids(true), vec![1, 2, 3, 4]);
        assert_eq!(dir.all_device_ids(false), vec![1, 2, 4]);
    }

    #[test]
    fn exclusion_beats_inclusion() {
        let dir = directory();
        let selection = Selection {
            names: vec!["fw-b".into(), "old-sw".into()],
            exclude: vec!["fw-b".into()],
            include_disabled: false,
        };
        assert_eq!(dir.select(&selection), vec![3]);
    }

    #[test]
    fn select_all_keyword() {
        let dir = directory();
        let selection = Selection {
            names: vec![ALL_DEVICES.into()],
            exclude: vec!["fw-a".into()],
            include_disabled: true,
        };
        assert_eq!(dir.select(&selection), vec![2, 3]);
    }

    #[test]
    fn select_empty_names_means_all() {
        let dir = directory();
        assert_eq!(dir.select(&Selection::default()), vec![1, 2, 4]);
    }

    #[test]
    fn select_deduplicates() {
        let dir = directory();
        let selection = Selection {
            names: vec!["fw-b".into(), "fw-b".into()],
            ..Default::default()
        };
        assert_eq!(dir.select(&selection), vec![2]);
    }

    #[test]
    fn name_of_unknown_id() {
        assert_eq!(directory().name_of(2), Some("fw-b"));
        assert_eq!(directory().name_of(99), None);
    }

    #[test]
    fn failed_devices_include_unknown_status() {
        let mut unknown = device(5, "new", true);
        unknown.last_backup_status = None;
        let mut failed = device(6, "bad", true);
        failed.last_backup_status = Some(false);
        let status = vec![device(1, "ok", true), unknown, failed];

        let ids: Vec<_> = failed_devices(&status).iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![5, 6]);
    }
}
