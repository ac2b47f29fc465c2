//! Dated backup archives and their naming convention.
pub mod compress;

use chrono::{DateTime, TimeZone};
use regex::Regex;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::errors::{AppError, Result};

/// strftime layout of an archive name without extension.
pub const ARCHIVE_NAME_FORMAT: &str = "%Y-%m-%d_%H%M%S";
pub const ARCHIVE_EXTENSION: &str = "zip";

const BYTES_PER_MEBIBYTE: f64 = 1_048_576.0;

static ARCHIVE_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}_\d{6}\.zip$").expect("archive name pattern is valid")
});

/// Returns true if `name` is a bare archive file name like `2024-01-31_235959.zip`.
pub fn is_archive_name(name: &str) -> bool {
    ARCHIVE_NAME_PATTERN.is_match(name)
}

pub fn validate_archive_name(name: &str) -> Result<()> {
    if is_archive_name(name) {
        Ok(())
    } else {
        Err(AppError::InvalidName(name.to_string()))
    }
}

/// Archive name for a backup taken at `at`.
pub fn archive_name_for<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("{}.{}", at.format(ARCHIVE_NAME_FORMAT), ARCHIVE_EXTENSION)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveLocation {
    Local,
    Remote,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Archive {
    pub name: String,
    pub size_bytes: u64,
    /// Unix timestamp, seconds.
    pub modified_at: i64,
    pub location: ArchiveLocation,
}

impl Archive {
    pub fn new(
        name: impl Into<String>,
        size_bytes: u64,
        modified_at: i64,
        location: ArchiveLocation,
    ) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            modified_at,
            location,
        }
    }

    /// Size in mebibytes rounded to three decimals.
    pub fn size_mb(&self) -> f64 {
        (self.size_bytes as f64 / BYTES_PER_MEBIBYTE * 1000.0).round() / 1000.0
    }

    /// Newest first; equal timestamps fall back to the name, which embeds the time.
    pub fn cmp_newest_first(&self, other: &Self) -> Ordering {
        other
            .modified_at
            .cmp(&self.modified_at)
            .then_with(|| other.name.cmp(&self.name))
    }

    pub fn to_listing(&self) -> ArchiveListing {
        ArchiveListing {
            name: self.name.clone(),
            size_mb: self.size_mb(),
            modified_at: self.modified_at,
        }
    }
}

/// One row of listing output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveListing {
    pub name: String,
    #[serde(rename = "sizeMB")]
    pub size_mb: f64,
    #[serde(rename = "modifiedAt")]
    pub modified_at: i64,
}

pub fn sort_newest_first(archives: &mut [Archive]) {
    archives.sort_by(Archive::cmp_newest_first);
}

/// Drops entries with invalid names and duplicate names, returning the rest
/// newest first.
///
/// On duplicates the newest entry wins.
pub fn normalize_archive_set(archives: impl IntoIterator<Item = Archive>) -> Vec<Archive> {
    let mut by_name: BTreeMap<String, Archive> = BTreeMap::new();
    for archive in archives {
        if !is_archive_name(&archive.name) {
            continue;
        }
        match by_name.get(&archive.name) {
            Some(existing) if existing.cmp_newest_first(&archive) != Ordering::Greater => {}
            _ => {
                by_name.insert(archive.name.clone(), archive);
            }
        }
    }
    let mut archives: Vec<Archive> = by_name.into_values().collect();
    sort_newest_first(&mut archives);
    archives
}

/// One entry per name across both sides, newest first. Names found on both
/// sides are tagged [`ArchiveLocation::Both`] and keep the local size and time.
pub fn merge_locations(local: &[Archive], remote: &[Archive]) -> Vec<Archive> {
    let mut by_name: BTreeMap<&str, Archive> = BTreeMap::new();
    for archive in remote {
        by_name.insert(archive.name.as_str(), archive.clone());
    }
    for archive in local {
        let location = match by_name.get(archive.name.as_str()) {
            Some(_) => ArchiveLocation::Both,
            None => archive.location,
        };
        by_name.insert(
            archive.name.as_str(),
            Archive {
                location,
                ..archive.clone()
            },
        );
    }
    let mut merged: Vec<Archive> = by_name.into_values().collect();
    sort_newest_first(&mut merged);
    merged
}
