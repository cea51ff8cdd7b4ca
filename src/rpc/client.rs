//! Appliance client seam.
//!
//! The orchestration engines never talk HTTP directly. They go through an
//! [`Appliance`], which the real [`HttpSession`](super::HttpSession)
//! implements and tests replace with a scripted fake.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::core::models::BackupId;
use crate::error::{ApiError, ExportError};

/// An authenticated connection to the appliance.
///
/// Implementations are shared read-only between concurrent export workers.
#[async_trait]
pub trait Appliance: Send + Sync {
    /// Issue one command and return its unwrapped result.
    async fn invoke(&self, command: &str, params: Value) -> Result<Value, ApiError>;

    /// Download the export of `backup_id` into `target`, returning the
    /// written file path. The file name must be claimed through
    /// [`DownloadTarget::claim`] before anything is written.
    async fn download_backup(
        &self,
        backup_id: BackupId,
        target: &DownloadTarget,
    ) -> Result<PathBuf, ExportError>;
}

/// Destination directory shared by the downloads of one export run.
///
/// Keeps track of every path handed out so two downloads resolving to the
/// same file name fail instead of overwriting each other.
#[derive(Debug)]
pub struct DownloadTarget {
    dir: PathBuf,
    claimed: Mutex<HashSet<PathBuf>>,
}

impl DownloadTarget {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// Use `dir`, or the current working directory when unset.
    pub fn in_dir_or_cwd(dir: Option<&Path>) -> std::io::Result<Self> {
        match dir {
            Some(dir) => Ok(Self::new(dir)),
            None => Ok(Self::new(std::env::current_dir()?)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve `file_name` in the target directory.
    ///
    /// Only the final path component of `file_name` is used.
    pub fn claim(&self, file_name: &str) -> Result<PathBuf, ExportError> {
        let name = Path::new(file_name)
            .file_name()
            .ok_or(ExportError::MissingFilename)?;
        let path = self.dir.join(name);

        let mut claimed = self.claimed.lock().unwrap_or_else(|e| e.into_inner());
        if !claimed.insert(path.clone()) {
            return Err(ExportError::WriteConflict(path));
        }
        Ok(path)
    }
}

/// Typed appliance client. Cheap to clone; every clone shares one session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<dyn Appliance>,
}

impl Client {
    pub fn new(appliance: Arc<dyn Appliance>) -> Self {
        Self { inner: appliance }
    }

    /// Issue a raw command.
    pub async fn invoke(&self, command: &str, params: Value) -> Result<Value, ApiError> {
        self.inner.invoke(command, params).await
    }

    pub async fn download_backup(
        &self,
        backup_id: BackupId,
        target: &DownloadTarget,
    ) -> Result<PathBuf, ExportError> {
        self.inner.download_backup(backup_id, target).await
    }
}
