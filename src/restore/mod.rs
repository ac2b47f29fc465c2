mod logic;

use anyhow::Result;
use crate::config::AppConfig;

pub use logic::RestoreOutcome;

/// Public entry point for the restore process.
pub async fn run_restore_flow(app_config: &AppConfig, name: &str) -> Result<RestoreOutcome> {
    logic::perform_restore_orchestration(app_config, name).await
}
