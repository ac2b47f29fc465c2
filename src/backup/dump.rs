// backupsync/src/backup/dump.rs
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::utils;

/// Name of the database dump inside every archive.
pub const DUMP_FILE_NAME: &str = "database_dump.sql";

/// Runs the configured dump command and stores its stdout as
/// `database_dump.sql` inside `target_dump_dir`.
pub fn dump_database(dump_command: &str, target_dump_dir: &Path) -> Result<PathBuf> {
    let dump_path = target_dump_dir.join(DUMP_FILE_NAME);
    info!("Dumping database to {}", dump_path.display());

    utils::run_shell_command_to_file(dump_command, &dump_path, "database dump")?;

    let size = fs::metadata(&dump_path)
        .with_context(|| format!("Failed to stat dump file: {}", dump_path.display()))?
        .len();
    info!("✓ Database dumped successfully ({} bytes)", size);
    Ok(dump_path)
}
