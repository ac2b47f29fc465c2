mod logic;
pub(crate) mod dump;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::sync::logic::SyncReport;

/// Public entry point for the backup process: create an archive, then sync.
pub async fn run_backup_flow(
    app_config: &AppConfig,
    cancel: CancellationToken,
) -> Result<SyncReport> {
    logic::perform_backup_orchestration(app_config, cancel).await
}
