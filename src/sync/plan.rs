//! Reconciliation of local and remote archive sets. Pure decision logic, no I/O.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::archive::{self, Archive};

/// Caps the number of archives kept per location. Negative means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_count: i64,
}

impl RetentionPolicy {
    pub fn new(max_count: i64) -> Self {
        Self { max_count }
    }

    pub fn unlimited() -> Self {
        Self { max_count: -1 }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_count < 0
    }

    fn limit(&self) -> Option<usize> {
        usize::try_from(self.max_count).ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Present locally, absent remotely. Oldest first.
    pub to_upload: Vec<String>,
    /// Local retention overflow, oldest first.
    pub to_delete_local: Vec<String>,
    /// Remote retention overflow (counting planned uploads), oldest first.
    pub to_delete_remote: Vec<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_upload.is_empty()
            && self.to_delete_local.is_empty()
            && self.to_delete_remote.is_empty()
    }
}

/// Names beyond the newest `policy.max_count` archives, oldest first.
///
/// Input order does not matter; invalid and duplicate names are ignored.
pub fn retention_overflow(archives: &[Archive], policy: RetentionPolicy) -> Vec<String> {
    let Some(limit) = policy.limit() else {
        return Vec::new();
    };
    let sorted = archive::normalize_archive_set(archives.iter().cloned());
    sorted
        .into_iter()
        .skip(limit)
        .rev()
        .map(|a| a.name)
        .collect()
}

/// Computes what a run must do. `remote` is `None` when remote storage is disabled.
///
/// Each location's retention is evaluated against that location's own archives;
/// the remote side is evaluated on the set it will hold once uploads land.
pub fn plan_reconciliation(
    local: &[Archive],
    remote: Option<&[Archive]>,
    policy: RetentionPolicy,
) -> SyncPlan {
    let local = archive::normalize_archive_set(local.iter().cloned());

    let to_delete_local = retention_overflow(&local, policy);

    let Some(remote) = remote else {
        return SyncPlan {
            to_upload: Vec::new(),
            to_delete_local,
            to_delete_remote: Vec::new(),
        };
    };
    let remote = archive::normalize_archive_set(remote.iter().cloned());

    let remote_names: HashSet<&str> = remote.iter().map(|a| a.name.as_str()).collect();
    let uploads: Vec<&Archive> = local
        .iter()
        .rev()
        .filter(|a| !remote_names.contains(a.name.as_str()))
        .collect();

    let mut projected_remote = remote.clone();
    projected_remote.extend(uploads.iter().map(|a| (*a).clone()));
    let to_delete_remote = retention_overflow(&projected_remote, policy);

    SyncPlan {
        to_upload: uploads.into_iter().map(|a| a.name.clone()).collect(),
        to_delete_local,
        to_delete_remote,
    }
}

/// Remote deletions once the upload phase is over.
///
/// Only `landed` uploads count towards the remote total, so a failed upload
/// never pushes an existing archive over the limit.
pub fn remote_overflow_after_uploads(
    remote: &[Archive],
    local: &[Archive],
    landed: &BTreeSet<String>,
    policy: RetentionPolicy,
) -> Vec<String> {
    let mut projected: Vec<Archive> = remote.to_vec();
    projected.extend(local.iter().filter(|a| landed.contains(&a.name)).cloned());
    retention_overflow(&projected, policy)
}
