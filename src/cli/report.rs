//! Human-readable per-device results on stdout.

use std::io::{self, Write};

use crate::core::models::{BackupId, Device, DeviceId, ExportOutcome, ExportTask};
use crate::core::{BackupReport, DeviceDirectory};
use crate::error::RetentionError;

pub struct Reporter<'a> {
    out: &'a mut (dyn Write + Send),
    errors_only: bool,
}

impl<'a> Reporter<'a> {
    pub fn new(out: &'a mut (dyn Write + Send), errors_only: bool) -> Self {
        Self { out, errors_only }
    }

    pub fn device_names(&mut self, devices: &[&Device]) -> io::Result<()> {
        let mut names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        names.sort_by_key(|n| n.to_lowercase());
        for name in names {
            writeln!(self.out, "{}", name)?;
        }
        Ok(())
    }

    pub fn device_status(&mut self, devices: &[&Device]) -> io::Result<()> {
        let mut devices = devices.to_vec();
        devices.sort_by_key(|d| d.name.to_lowercase());
        for device in devices {
            let last = match device.last_backup_status {
                Some(true) => "ok",
                Some(false) => "failed",
                None => "unknown",
            };
            writeln!(
                self.out,
                "{}: {} (last backup {})",
                device.name, device.state, last
            )?;
        }
        Ok(())
    }

    pub fn backup_results(
        &mut self,
        directory: &DeviceDirectory,
        report: &BackupReport,
    ) -> io::Result<()> {
        for (id, succeeded) in &report.results {
            let name = display_name(directory, *id);
            if *succeeded {
                if !self.errors_only {
                    writeln!(self.out, "{}: Backup succeeded", name)?;
                }
            } else {
                writeln!(self.out, "{}: Backup failed!", name)?;
            }
        }
        Ok(())
    }

    pub fn export_results(
        &mut self,
        directory: &DeviceDirectory,
        tasks: &[ExportTask],
    ) -> io::Result<()> {
        let mut tasks: Vec<&ExportTask> = tasks.iter().collect();
        tasks.sort_by_key(|t| (display_name(directory, t.device_id), t.backup_id));

        for task in tasks {
            let name = display_name(directory, task.device_id);
            match &task.outcome {
                ExportOutcome::Saved(path) => {
                    if !self.errors_only {
                        writeln!(self.out, "{}: Export succeeded ({})", name, path.display())?;
                    }
                }
                ExportOutcome::Failed(e) => {
                    writeln!(self.out, "{}: Export failed! ({})", name, e)?;
                }
                ExportOutcome::Pending => {
                    writeln!(self.out, "{}: Export did not run", name)?;
                }
            }
        }
        Ok(())
    }

    /// Devices that were selected but have no backup to export.
    pub fn missing_exports(
        &mut self,
        directory: &DeviceDirectory,
        ids: &[DeviceId],
        tasks: &[ExportTask],
    ) -> io::Result<()> {
        if self.errors_only {
            return Ok(());
        }
        for id in ids.iter().filter(|id| !tasks.iter().any(|t| t.device_id == **id)) {
            writeln!(self.out, "{}: No backup to export", display_name(directory, *id))?;
        }
        Ok(())
    }

    pub fn prune_result(
        &mut self,
        directory: &DeviceDirectory,
        id: DeviceId,
        result: &Result<Vec<BackupId>, RetentionError>,
    ) -> io::Result<()> {
        let name = display_name(directory, id);
        match result {
            Ok(deleted) => {
                if !self.errors_only {
                    writeln!(self.out, "{}: Pruned {} backup(s)", name, deleted.len())?;
                }
            }
            Err(e) => writeln!(self.out, "{}: Prune failed! ({})", name, e)?,
        }
        Ok(())
    }
}

fn display_name(directory: &DeviceDirectory, id: DeviceId) -> String {
    match directory.name_of(id) {
        Some(name) => name.to_string(),
        None => format!("device {}", id),
    }
}
