use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rpctl::cli::{self, Exit, ExportOptions};
use rpctl::core::Selection;
use rpctl::{config, context, logging};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "rpctl", version)]
#[command(about = "Backup, export and prune devices on a RestorePoint appliance", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags that override the config file and environment. Unset flags are
/// skipped when serializing so they do not mask lower layers.
#[derive(Args, Serialize)]
struct GlobalArgs {
    /// Username to connect to the appliance
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(short = 'u', long, global = true)]
    username: Option<String>,

    /// Password to connect to the appliance
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(short = 'p', long, global = true)]
    password: Option<String>,

    /// Appliance hostname or base URL
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(short = 'H', long, global = true)]
    hostname: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Skip TLS certificate verification
    #[serde(skip_serializing_if = "is_false")]
    #[arg(short = 'k', long, global = true)]
    insecure: bool,

    /// Seconds between device status polls
    #[serde(rename = "poll_interval_secs", skip_serializing_if = "Option::is_none")]
    #[arg(short = 's', long = "sleep", global = true)]
    sleep: Option<u64>,

    /// Print errors only
    #[serde(skip_serializing_if = "is_false")]
    #[arg(short = 'e', long, global = true)]
    errors_only: bool,

    /// Maximum concurrent export downloads
    #[serde(rename = "max_parallel", skip_serializing_if = "Option::is_none")]
    #[arg(short = 'j', long = "parallel", global = true)]
    parallel: Option<usize>,

    /// Stop polling and downloading after this many seconds
    #[serde(rename = "timeout_secs", skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Config file (default: ./rpctl.toml if present)
    #[serde(skip)]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[serde(skip_serializing_if = "is_false")]
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Log as JSON
    #[serde(skip_serializing_if = "is_false")]
    #[arg(long, global = true)]
    json_logs: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Subcommand)]
enum Commands {
    /// List devices
    List(ListArgs),
    /// Backup one or more devices and wait for completion
    Backup(TargetArgs),
    /// Export the latest backup of one or more devices
    Export(ExportArgs),
    /// Delete all but the most recent backups of one or more devices
    Prune(PruneArgs),
}

#[derive(Args)]
struct TargetArgs {
    /// Device names (default: all)
    #[arg(value_name = "DEVICE")]
    devices: Vec<String>,

    /// Exclude a device by name; may be repeated
    #[arg(long, value_name = "NAME")]
    exclude: Vec<String>,

    /// Leave disabled devices out when selecting all
    #[arg(short = 'i', long)]
    ignore_disabled: bool,
}

impl TargetArgs {
    fn selection(&self) -> Selection {
        Selection {
            names: self.devices.clone(),
            exclude: self.exclude.clone(),
            include_disabled: !self.ignore_disabled,
        }
    }
}

#[derive(Args)]
struct ListArgs {
    /// Show live state and last backup status
    #[arg(long)]
    status: bool,

    /// Only devices whose last backup failed
    #[arg(long)]
    failed: bool,

    #[arg(short = 'i', long)]
    ignore_disabled: bool,
}

#[derive(Args)]
struct ExportArgs {
    #[command(flatten)]
    targets: TargetArgs,

    /// Destination directory (default: working directory)
    #[arg(short = 'd', long)]
    destination: Option<PathBuf>,

    /// Run a backup before exporting
    #[arg(short = 'f', long)]
    force_backup: bool,

    /// Empty the destination directory first
    #[arg(short = 'c', long)]
    clean: bool,

    /// Prune old backups after exporting
    #[arg(long)]
    prune: bool,

    /// Backups to keep when pruning
    #[arg(long, requires = "prune")]
    keep: Option<usize>,
}

#[derive(Args)]
struct PruneArgs {
    #[command(flatten)]
    targets: TargetArgs,

    /// Backups to keep per device
    #[arg(long)]
    keep: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(exit) => exit.into(),
        Err(e) => {
            error!(error = %format!("{:#}", e), "rpctl failed");
            eprintln!("Error: {:#}", e);
            Exit::Failure.into()
        }
    }
}

/// A parsed subcommand with config defaults applied.
enum Action {
    List {
        include_disabled: bool,
        status: bool,
        failed: bool,
    },
    Backup(Selection),
    Export(ExportOptions),
    Prune(Selection, usize),
}

impl Action {
    fn from_command(command: &Commands, config: &config::AppConfig) -> Self {
        match command {
            Commands::List(args) => Action::List {
                include_disabled: !args.ignore_disabled,
                status: args.status,
                failed: args.failed,
            },
            Commands::Backup(args) => Action::Backup(args.selection()),
            Commands::Export(args) => Action::Export(ExportOptions {
                selection: args.targets.selection(),
                destination: args.destination.clone(),
                force_backup: args.force_backup,
                clean: args.clean,
                prune: args.prune,
                keep: args.keep.unwrap_or(config.keep),
            }),
            Commands::Prune(args) => {
                Action::Prune(args.targets.selection(), args.keep.unwrap_or(config.keep))
            }
        }
    }
}

async fn run() -> Result<Exit> {
    let args = Cli::parse();

    let config = config::AppConfig::new(args.global.config.as_deref(), Some(&args.global))
        .context("Failed to load configuration")?;
    logging::init(config.log_config());

    let action = Action::from_command(&args.command, &config);

    // Reject bad flag combinations before logging in
    if let Action::Export(opts) = &action {
        if let Some(msg) = opts.usage_error() {
            eprintln!("{}", msg);
            return Ok(Exit::InvalidArguments);
        }
    }

    let cancel = CancellationToken::new();
    watch_for_cancellation(cancel.clone(), config.timeout());

    let ctx = context::AppContext::connect(config, cancel)
        .await
        .context("Failed to connect to appliance")?;

    let mut out = std::io::stdout();
    match action {
        Action::List {
            include_disabled,
            status,
            failed,
        } => cli::list(&ctx, &mut out, include_disabled, status, failed).await,
        Action::Backup(selection) => cli::backup(&ctx, &mut out, &selection).await,
        Action::Export(opts) => cli::export(&ctx, &mut out, &opts).await,
        Action::Prune(selection, keep) => cli::prune(&ctx, &mut out, &selection, keep).await,
    }
}

/// Cancel on Ctrl-C, and after `timeout` when one is configured. In-flight
/// requests are allowed to finish.
fn watch_for_cancellation(cancel: CancellationToken, timeout: Option<std::time::Duration>) {
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, waiting for in-flight requests");
            on_signal.cancel();
        }
    });

    if let Some(timeout) = timeout {
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    warn!(?timeout, "Timeout reached, cancelling");
                    cancel.cancel();
                }
                _ = cancel.cancelled() => {}
            }
        });
    }
}
