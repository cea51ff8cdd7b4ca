pub mod directory;
pub mod export;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod retention;

pub use directory::{DeviceDirectory, Selection};
pub use export::{ExportCoordinator, ExportSettings};
pub use models::{BackupId, BackupRecord, Device, DeviceId, DeviceState, ExportOutcome, ExportTask};
pub use orchestrator::{BackupJob, BackupOrchestrator, BackupReport, PollSettings};
pub use progress::{ExportStatus, ProgressTracker};
pub use retention::{RetentionDecision, RetentionPruner, plan_retention};
