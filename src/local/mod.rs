//! Archives stored in the flat local backup directory.
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::archive::{self, Archive, ArchiveLocation};
use crate::errors::{AppError, Result};

const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Clone)]
pub struct LocalRepository {
    backup_dir: PathBuf,
}

impl LocalRepository {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.backup_dir.join(name)
    }

    /// Archives in the backup directory, newest first. A missing directory lists as empty.
    pub fn list(&self) -> Result<Vec<Archive>> {
        let entries = match fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                debug!("Backup directory {} does not exist yet", self.backup_dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(AppError::local_io(&self.backup_dir, e)),
        };

        let mut archives = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AppError::local_io(&self.backup_dir, e))?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !archive::is_archive_name(name) {
                continue;
            }

            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                // Removed between read_dir and stat
                Err(e) if e.kind() == IoErrorKind::NotFound => continue,
                Err(e) => return Err(AppError::local_io(&path, e)),
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .map_err(|e| AppError::local_io(&path, e))?;

            archives.push(Archive::new(
                name,
                metadata.len(),
                DateTime::<Utc>::from(modified).timestamp(),
                ArchiveLocation::Local,
            ));
        }

        archive::sort_newest_first(&mut archives);
        Ok(archives)
    }

    /// Produces a new archive named `name`.
    ///
    /// `produce` writes the archive to a temporary `.partial` path that never
    /// matches the naming pattern; it is renamed into place only on success.
    pub fn create<F>(&self, name: &str, produce: F) -> anyhow::Result<Archive>
    where
        F: FnOnce(&Path) -> anyhow::Result<()>,
    {
        archive::validate_archive_name(name)?;

        fs::create_dir_all(&self.backup_dir).with_context(|| {
            format!("Failed to create backup directory: {}", self.backup_dir.display())
        })?;

        let final_path = self.path_for(name);
        if final_path.exists() {
            anyhow::bail!("Archive already exists: {}", final_path.display());
        }

        let partial_path = self.backup_dir.join(format!("{}{}", name, PARTIAL_SUFFIX));
        if let Err(e) = produce(&partial_path) {
            if let Err(cleanup) = fs::remove_file(&partial_path) {
                if cleanup.kind() != IoErrorKind::NotFound {
                    warn!(
                        "Failed to remove partial archive {}: {}",
                        partial_path.display(),
                        cleanup
                    );
                }
            }
            return Err(e.context(format!("Failed to produce archive {}", name)));
        }

        fs::rename(&partial_path, &final_path).with_context(|| {
            format!(
                "Failed to move {} into place at {}",
                partial_path.display(),
                final_path.display()
            )
        })?;

        let metadata = fs::metadata(&final_path)
            .with_context(|| format!("Failed to stat new archive {}", final_path.display()))?;
        let modified = metadata
            .modified()
            .with_context(|| format!("Failed to read mtime of {}", final_path.display()))?;

        info!("✓ Created local archive {} ({} bytes)", name, metadata.len());
        Ok(Archive::new(
            name,
            metadata.len(),
            DateTime::<Utc>::from(modified).timestamp(),
            ArchiveLocation::Local,
        ))
    }

    /// Removes an archive. Already-absent archives are not an error.
    pub fn delete(&self, name: &str) -> Result<()> {
        archive::validate_archive_name(name)?;
        let path = self.path_for(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted local archive {}", name);
                Ok(())
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                debug!("Local archive {} already absent", name);
                Ok(())
            }
            Err(e) => Err(AppError::local_io(path, e)),
        }
    }
}
