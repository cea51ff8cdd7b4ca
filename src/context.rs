use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{BackupOrchestrator, DeviceDirectory, ExportCoordinator, RetentionPruner};
use crate::error::ApiError;
use crate::rpc::{Client, HttpSession};

/// Everything a command needs: settings, the shared appliance session and
/// the cancellation signal.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub client: Client,
    pub cancel: CancellationToken,
}

impl AppContext {
    pub fn new(config: AppConfig, client: Client, cancel: CancellationToken) -> Self {
        Self {
            config: Arc::new(config),
            client,
            cancel,
        }
    }

    /// Log in to the configured appliance.
    pub async fn connect(config: AppConfig, cancel: CancellationToken) -> anyhow::Result<Self> {
        let session = HttpSession::login(config.session_config()?).await?;
        Ok(Self::new(config, Client::new(Arc::new(session)), cancel))
    }

    pub async fn directory(&self) -> Result<DeviceDirectory, ApiError> {
        DeviceDirectory::fetch(&self.client).await
    }

    pub fn orchestrator(&self) -> BackupOrchestrator {
        BackupOrchestrator::new(
            self.client.clone(),
            self.config.poll_settings(),
            self.cancel.clone(),
        )
    }

    pub fn exporter(&self) -> ExportCoordinator {
        ExportCoordinator::new(
            self.client.clone(),
            self.config.export_settings(),
            self.cancel.clone(),
        )
    }

    pub fn pruner(&self) -> RetentionPruner {
        RetentionPruner::new(self.client.clone())
    }
}
