//! Error types for the appliance client and the orchestration engines.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::models::{BackupId, DeviceId};

/// Failure of a single appliance call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Login was rejected or no session cookie was issued.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// Authenticated, but the account may not issue this command.
    #[error("permission denied by the appliance")]
    PermissionDenied,
    /// Network or HTTP-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Non-success HTTP status.
    #[error("appliance answered with HTTP {0}")]
    Status(reqwest::StatusCode),
    /// The appliance reported an application error.
    #[error("appliance error: {0}")]
    Remote(String),
    /// The result did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("backup polling cancelled with {} device(s) still running", pending.len())]
    Cancelled { pending: Vec<DeviceId> },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("export response carried no Content-Disposition filename")]
    MissingFilename,
    #[error("failed to write export: {0}")]
    Io(#[from] std::io::Error),
    #[error("another export already claimed {}", .0.display())]
    WriteConflict(PathBuf),
    #[error("export cancelled before it started")]
    Cancelled,
    #[error("export worker stopped before reporting a result")]
    WorkerLost,
}

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("backup {backup_id} has an unparsable timestamp {value:?}")]
    UnparsableTimestamp { backup_id: BackupId, value: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Figment(#[from] Box<figment::Error>),
    #[error("config file {} does not exist", .0.display())]
    FileNotFound(PathBuf),
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid hostname {0:?}")]
    InvalidHost(String),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Figment(Box::new(e))
    }
}
