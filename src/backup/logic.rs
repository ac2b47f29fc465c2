// backupsync/src/backup/logic.rs
use anyhow::{Context, Result};
use chrono::Local;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::dump::{self, DUMP_FILE_NAME};
use crate::archive::compress::{self, ExtraEntry};
use crate::archive;
use crate::config::{self, AppConfig, BackupSettings, SettingsStore};
use crate::local::LocalRepository;
use crate::sync::{self, logic::SyncReport};
use crate::utils::lock::RunLock;

/// Writes a complete backup archive to `archive_path`: the database dump (when
/// a dump command is configured) plus every configured include path.
/// `backup_dir` is never archived, even when an include path contains it.
pub(crate) fn build_backup_archive<S: SettingsStore>(
    settings: &BackupSettings<S>,
    backup_dir: &Path,
    archive_path: &Path,
) -> Result<()> {
    let include_paths = settings.paths_to_backup_list();
    let dump_command = settings.mysqldump_command();

    let staging =
        tempfile::tempdir().context("Failed to create staging directory for database dump")?;
    let mut extra_entries = Vec::new();

    if config::is_set(&dump_command) {
        let dump_path = dump::dump_database(&dump_command, staging.path())?;
        extra_entries.push(ExtraEntry {
            name_in_archive: DUMP_FILE_NAME.to_string(),
            source: dump_path,
        });
    } else {
        warn!(
            "{} is not set; the archive will not contain a database dump",
            config::KEY_MYSQLDUMP_COMMAND
        );
    }

    if include_paths.is_empty() && extra_entries.is_empty() {
        anyhow::bail!(
            "Nothing to back up: neither {} nor {} is set",
            config::KEY_MYSQLDUMP_COMMAND,
            config::KEY_PATHS_TO_BACKUP
        );
    }

    let excluded = [backup_dir.to_path_buf(), staging.path().to_path_buf()];
    compress::create_zip_archive(&include_paths, &extra_entries, &excluded, archive_path)?;
    Ok(())
}

/// Creates a new archive in the backup directory, then reconciles it with
/// remote storage.
pub async fn perform_backup_orchestration(
    app_config: &AppConfig,
    cancel: CancellationToken,
) -> Result<SyncReport> {
    let local = LocalRepository::new(app_config.backup_dir()?);
    let mut lock = RunLock::open(local.backup_dir())?;
    let _guard = lock.try_acquire()?;

    let name = archive::archive_name_for(&Local::now());
    info!("🚀 Creating backup archive {}", name);
    let created = local
        .create(&name, |partial| {
            build_backup_archive(&app_config.settings, local.backup_dir(), partial)
        })
        .context("Backup archive creation failed")?;
    info!("✓ Backup {} created ({} MB)", created.name, created.size_mb());

    sync::sync_repository(app_config, local, cancel).await
}
