// backupsync/src/restore/logic.rs
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::archive::compress;
use crate::archive::{self, ArchiveLocation};
use crate::backup::dump::DUMP_FILE_NAME;
use crate::config::{self, AppConfig, BackupSettings, SettingsStore};
use crate::errors::AppError;
use crate::local::LocalRepository;
use crate::storage::{Existence, RemoteStore};
use crate::storage::s3::S3RemoteStore;
use crate::utils;
use crate::utils::lock::RunLock;

const RESTORE_DIR_PREFIX: &str = "restore_";

#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub archive: String,
    /// Where the archive was read from.
    pub source: ArchiveLocation,
    pub extracted_to: PathBuf,
    pub database_restored: bool,
}

pub async fn perform_restore_orchestration(
    app_config: &AppConfig,
    name: &str,
) -> Result<RestoreOutcome> {
    archive::validate_archive_name(name)?;

    let local = LocalRepository::new(app_config.backup_dir()?);
    let mut lock = RunLock::open(local.backup_dir())?;
    let _guard = lock.try_acquire()?;

    let remote = S3RemoteStore::connect(&app_config.remote)
        .await
        .context("Failed to initialize remote storage")?;

    restore_archive(&local, &remote, &app_config.settings, name).await
}

/// Extracts archive `name` next to the backup directory and feeds its database
/// dump to the configured restore command.
pub(crate) async fn restore_archive<S: SettingsStore>(
    local: &LocalRepository,
    remote: &dyn RemoteStore,
    settings: &BackupSettings<S>,
    name: &str,
) -> Result<RestoreOutcome> {
    archive::validate_archive_name(name)?;

    let download_dir = tempfile::tempdir().context("Failed to create download directory")?;
    let (archive_path, source) = locate_archive(local, remote, name, download_dir.path()).await?;

    let extract_dir = local
        .backup_dir()
        .join(format!("{}{}", RESTORE_DIR_PREFIX, name.trim_end_matches(".zip")));
    if extract_dir.exists() {
        fs::remove_dir_all(&extract_dir).with_context(|| {
            format!("Failed to clear previous restore directory: {}", extract_dir.display())
        })?;
    }
    compress::extract_zip_archive(&archive_path, &extract_dir)?;

    let database_restored = restore_database(settings, &extract_dir)?;

    info!("✅ Restore of {} finished, files extracted to {}", name, extract_dir.display());
    Ok(RestoreOutcome {
        archive: name.to_string(),
        source,
        extracted_to: extract_dir,
        database_restored,
    })
}

/// Local copy if present, otherwise a download from remote storage into `download_dir`.
async fn locate_archive(
    local: &LocalRepository,
    remote: &dyn RemoteStore,
    name: &str,
    download_dir: &Path,
) -> Result<(PathBuf, ArchiveLocation)> {
    let local_path = local.path_for(name);
    if local_path.is_file() {
        info!("Using local archive {}", local_path.display());
        return Ok((local_path, ArchiveLocation::Local));
    }

    if !remote.is_enabled() {
        anyhow::bail!(
            "Archive {} not found in {} and remote storage is disabled",
            name,
            local.backup_dir().display()
        );
    }

    match remote.probe(name).await {
        Existence::Absent => {
            anyhow::bail!("Archive {} not found locally or in {}", name, remote.describe())
        }
        // Let the download itself surface the underlying error
        Existence::Unknown => warn!("Could not confirm {} exists remotely, trying download", name),
        Existence::Present => {}
    }

    info!("Archive {} not present locally, downloading from {}", name, remote.describe());
    let data = match remote.download(name).await {
        Ok(data) => data,
        Err(e @ AppError::ObjectNotFound(_)) => {
            return Err(e)
                .with_context(|| format!("Archive {} not found locally or remotely", name));
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to download archive {}", name)),
    };

    let download_path = download_dir.join(name);
    tokio::fs::write(&download_path, &data)
        .await
        .with_context(|| {
            format!(
                "Failed to write downloaded archive to {}",
                download_path.display()
            )
        })?;
    info!("✓ Downloaded {} ({} bytes)", name, data.len());
    Ok((download_path, ArchiveLocation::Remote))
}

/// Returns whether a database restore ran.
fn restore_database<S: SettingsStore>(
    settings: &BackupSettings<S>,
    extract_dir: &Path,
) -> Result<bool> {
    let dump_path = extract_dir.join(DUMP_FILE_NAME);
    if !dump_path.is_file() {
        warn!("Archive contains no {}; skipping database restore", DUMP_FILE_NAME);
        return Ok(false);
    }

    let restore_command = settings.mysql_restore_command();
    if !config::is_set(&restore_command) {
        warn!(
            "{} is not set; database dump left at {}",
            config::KEY_MYSQL_RESTORE_COMMAND,
            dump_path.display()
        );
        return Ok(false);
    }

    info!("Restoring database from {}", dump_path.display());
    utils::run_shell_command_with_stdin(&restore_command, &dump_path, "database restore")?;
    info!("✓ Database restored successfully");
    Ok(true)
}
