//! Command implementations behind the `rpctl` subcommands.
//!
//! Each command resolves its devices, drives the engines, prints one line
//! per device and returns the process exit status.

pub mod report;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

use crate::context::AppContext;
use crate::core::directory::{self, Selection};
use crate::core::export::clean_directory;
use crate::core::models::DeviceId;
use report::Reporter;

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Success,
    /// At least one device failed its backup, export or prune
    Failure,
    /// Flags that make no sense together
    InvalidArguments,
    /// Nothing left to act on after resolving names
    NoDevices,
}

impl Exit {
    pub fn code(self) -> u8 {
        match self {
            Exit::Success => 0,
            Exit::Failure => 1,
            Exit::InvalidArguments => 3,
            Exit::NoDevices => 4,
        }
    }

    fn from_success(ok: bool) -> Self {
        if ok { Exit::Success } else { Exit::Failure }
    }
}

impl From<Exit> for std::process::ExitCode {
    fn from(exit: Exit) -> Self {
        std::process::ExitCode::from(exit.code())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub selection: Selection,
    /// Defaults to the working directory
    pub destination: Option<PathBuf>,
    pub force_backup: bool,
    /// Empty the destination before exporting
    pub clean: bool,
    pub prune: bool,
    pub keep: usize,
}

impl ExportOptions {
    pub fn usage_error(&self) -> Option<&'static str> {
        if self.clean && self.destination.is_none() {
            return Some("You need to set the destination dir when --clean is set");
        }
        None
    }
}

pub async fn list(
    ctx: &AppContext,
    out: &mut (dyn Write + Send),
    include_disabled: bool,
    status: bool,
    failed_only: bool,
) -> Result<Exit> {
    let mut reporter = Reporter::new(out, ctx.config.errors_only);

    if status || failed_only {
        let devices = directory::device_status(&ctx.client)
            .await
            .context("Failed to fetch device status")?;
        let shown: Vec<_> = if failed_only {
            directory::failed_devices(&devices)
        } else {
            devices.iter().collect()
        };
        let shown: Vec<_> = shown
            .into_iter()
            .filter(|d| include_disabled || d.enabled)
            .collect();
        reporter.device_status(&shown)?;
    } else {
        let devices = directory::list_devices(&ctx.client, include_disabled)
            .await
            .context("Failed to list devices")?;
        reporter.device_names(&devices.iter().collect::<Vec<_>>())?;
    }

    Ok(Exit::Success)
}

pub async fn backup(
    ctx: &AppContext,
    out: &mut (dyn Write + Send),
    selection: &Selection,
) -> Result<Exit> {
    let directory = ctx.directory().await.context("Failed to list devices")?;
    let ids = directory.select(selection);
    if ids.is_empty() {
        eprintln!("No devices selected for backup");
        return Ok(Exit::NoDevices);
    }

    let report = ctx
        .orchestrator()
        .run(&ids)
        .await
        .context("Backup run aborted")?;

    Reporter::new(out, ctx.config.errors_only).backup_results(&directory, &report)?;
    Ok(Exit::from_success(report.all_succeeded()))
}

pub async fn export(
    ctx: &AppContext,
    out: &mut (dyn Write + Send),
    opts: &ExportOptions,
) -> Result<Exit> {
    if let Some(msg) = opts.usage_error() {
        eprintln!("{}", msg);
        return Ok(Exit::InvalidArguments);
    }

    if let (true, Some(dest)) = (opts.clean, opts.destination.as_deref()) {
        clean_directory(dest)
            .with_context(|| format!("Failed to clean {}", dest.display()))?;
    }

    let directory = ctx.directory().await.context("Failed to list devices")?;
    let ids = directory.select(&opts.selection);
    if ids.is_empty() {
        eprintln!("No devices selected for export");
        return Ok(Exit::NoDevices);
    }

    let backup = if opts.force_backup {
        let report = ctx
            .orchestrator()
            .run(&ids)
            .await
            .context("Backup run aborted")?;
        Some(report)
    } else {
        None
    };

    let tasks = ctx
        .exporter()
        .export_latest(&ids, opts.destination.as_deref())
        .await
        .context("Export aborted")?;

    let mut reporter = Reporter::new(out, ctx.config.errors_only);
    let mut ok = tasks.iter().all(|t| t.succeeded());
    if let Some(report) = &backup {
        reporter.backup_results(&directory, report)?;
        ok &= report.all_succeeded();
    }
    reporter.export_results(&directory, &tasks)?;
    reporter.missing_exports(&directory, &ids, &tasks)?;

    if opts.prune {
        ok &= prune_each(ctx, &mut reporter, &directory, &ids, opts.keep).await?;
    }

    Ok(Exit::from_success(ok))
}

pub async fn prune(
    ctx: &AppContext,
    out: &mut (dyn Write + Send),
    selection: &Selection,
    keep: usize,
) -> Result<Exit> {
    let directory = ctx.directory().await.context("Failed to list devices")?;
    let ids = directory.select(selection);
    if ids.is_empty() {
        eprintln!("No devices selected for prune");
        return Ok(Exit::NoDevices);
    }

    let mut reporter = Reporter::new(out, ctx.config.errors_only);
    let ok = prune_each(ctx, &mut reporter, &directory, &ids, keep).await?;
    Ok(Exit::from_success(ok))
}

/// Prune devices one after another. A failure is reported and the next
/// device is still pruned.
async fn prune_each(
    ctx: &AppContext,
    reporter: &mut Reporter<'_>,
    directory: &directory::DeviceDirectory,
    ids: &[DeviceId],
    keep: usize,
) -> Result<bool> {
    let pruner = ctx.pruner();
    let mut ok = true;

    for id in ids {
        if ctx.cancel.is_cancelled() {
            warn!(device_id = *id, "Cancelled, remaining devices not pruned");
            return Ok(false);
        }

        let result = pruner.prune(*id, keep).await;
        if let Err(e) = &result {
            warn!(device_id = *id, error = %e, "Prune failed");
            ok = false;
        }
        reporter.prune_result(directory, *id, &result)?;
    }

    Ok(ok)
}
