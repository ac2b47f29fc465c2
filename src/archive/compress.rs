// backupsync/src/archive/compress.rs
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// A single file placed at a fixed name inside the archive.
#[derive(Debug, Clone)]
pub struct ExtraEntry {
    pub name_in_archive: String,
    pub source: PathBuf,
}

/// Creates a zip archive from a set of files and directories.
///
/// Each source is stored under its own path with root and prefix components
/// stripped, so `/srv/app/var/data` lands at `srv/app/var/data/...`.
/// Sources that do not exist are skipped with a warning. Anything at or below
/// an `excluded` path, and the archive being written, is left out.
pub fn create_zip_archive(
    sources: &[PathBuf],
    extra_entries: &[ExtraEntry],
    excluded: &[PathBuf],
    archive_dest_path: &Path,
) -> Result<PathBuf> {
    if let Some(parent) = archive_dest_path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).with_context(|| {
                format!(
                    "Failed to create parent directory for archive: {}",
                    parent.display()
                )
            })?;
        }
    }

    info!("Creating zip archive at {}", archive_dest_path.display());

    let archive_file = File::create(archive_dest_path).with_context(|| {
        format!("Failed to create archive file: {}", archive_dest_path.display())
    })?;
    let mut excluded: Vec<PathBuf> = excluded
        .iter()
        .filter_map(|path| fs::canonicalize(path).ok())
        .collect();
    excluded.push(fs::canonicalize(archive_dest_path).with_context(|| {
        format!("Failed to resolve archive path: {}", archive_dest_path.display())
    })?);

    let mut writer = ZipWriter::new(archive_file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    for entry in extra_entries {
        debug!("Adding {} as {}", entry.source.display(), entry.name_in_archive);
        writer
            .start_file(entry.name_in_archive.as_str(), options)
            .with_context(|| format!("Failed to start archive entry {}", entry.name_in_archive))?;
        let mut file = File::open(&entry.source)
            .with_context(|| format!("Failed to open {}", entry.source.display()))?;
        io::copy(&mut file, &mut writer)
            .with_context(|| format!("Failed to write {} to archive", entry.source.display()))?;
    }

    for source in sources {
        if !source.exists() {
            warn!("Backup path does not exist, skipping: {}", source.display());
            continue;
        }
        let resolved_source = fs::canonicalize(source)
            .with_context(|| format!("Failed to resolve backup path: {}", source.display()))?;

        let walker = WalkDir::new(source).follow_links(false).into_iter();
        let entries = walker.filter_entry(|entry| {
            // Walked paths extend `source`; symlinks are not followed
            let resolved = match entry.path().strip_prefix(source) {
                Ok(relative) => resolved_source.join(relative),
                Err(_) => return true,
            };
            let skip = is_excluded(&resolved, &excluded);
            if skip {
                debug!("Excluding {} from archive", entry.path().display());
            }
            !skip
        });

        for entry in entries {
            let entry =
                entry.with_context(|| format!("Failed to walk directory: {}", source.display()))?;
            let path = entry.path();
            let name = archive_entry_name(path);
            if name.is_empty() {
                continue;
            }

            if entry.file_type().is_dir() {
                writer.add_directory(name.as_str(), options).with_context(|| {
                    format!("Failed to add directory {} to archive", path.display())
                })?;
            } else if entry.file_type().is_file() {
                writer
                    .start_file(name.as_str(), options)
                    .with_context(|| format!("Failed to start archive entry {}", name))?;
                let mut file = File::open(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                io::copy(&mut file, &mut writer).with_context(|| {
                    format!("Failed to append file {} to archive", path.display())
                })?;
            }
        }
    }

    writer.finish().with_context(|| {
        format!(
            "Failed to finish zip archive: {}",
            archive_dest_path.display()
        )
    })?;

    info!(
        "✓ Zip archive created successfully at {}",
        archive_dest_path.display()
    );
    Ok(archive_dest_path.to_path_buf())
}

fn is_excluded(resolved: &Path, excluded: &[PathBuf]) -> bool {
    excluded.iter().any(|path| resolved.starts_with(path))
}

/// Extracts a zip archive into a destination directory.
pub fn extract_zip_archive(archive_path: &Path, extract_to_dir: &Path) -> Result<PathBuf> {
    if !archive_path.is_file() {
        anyhow::bail!("Archive for extraction is not a file: {}", archive_path.display());
    }

    if !extract_to_dir.exists() {
        fs::create_dir_all(extract_to_dir).with_context(|| {
            format!(
                "Failed to create extraction directory: {}",
                extract_to_dir.display()
            )
        })?;
    } else if !extract_to_dir.is_dir() {
        anyhow::bail!(
            "Extraction path exists but is not a directory: {}",
            extract_to_dir.display()
        );
    }

    info!(
        "Extracting zip archive from {} to {}",
        archive_path.display(),
        extract_to_dir.display()
    );

    let archive_file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive file: {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(archive_file)
        .with_context(|| format!("Failed to read zip archive: {}", archive_path.display()))?;

    archive.extract(extract_to_dir).with_context(|| {
        format!(
            "Failed to unpack archive {} to {}",
            archive_path.display(),
            extract_to_dir.display()
        )
    })?;

    info!(
        "✓ Zip archive extracted successfully to {}",
        extract_to_dir.display()
    );
    Ok(extract_to_dir.to_path_buf())
}

/// Zip entry name for a filesystem path: normal components joined with `/`.
fn archive_entry_name(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
