// backupsync/src/sync/mod.rs
pub mod plan;
pub(crate) mod logic;

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::archive::{self, ArchiveListing, ArchiveLocation};
use crate::config::AppConfig;
use crate::local::LocalRepository;
use crate::storage::RemoteStore;
use crate::storage::s3::S3RemoteStore;
use crate::utils::lock::RunLock;
use logic::{SyncOrchestrator, SyncReport};

/// Public entry point for the sync process.
pub async fn run_sync_flow(
    app_config: &AppConfig,
    cancel: CancellationToken,
) -> Result<SyncReport> {
    let local = LocalRepository::new(app_config.backup_dir()?);
    let mut lock = RunLock::open(local.backup_dir())?;
    let _guard = lock.try_acquire()?;

    sync_repository(app_config, local, cancel).await
}

/// Runs one reconciliation against `local`. The caller must hold the run lock.
pub(crate) async fn sync_repository(
    app_config: &AppConfig,
    local: LocalRepository,
    cancel: CancellationToken,
) -> Result<SyncReport> {
    let remote = S3RemoteStore::connect(&app_config.remote)
        .await
        .context("Failed to initialize remote storage")?;

    let mut orchestrator = SyncOrchestrator::new(local, Arc::new(remote), app_config.sync.clone())
        .with_cancellation(cancel);
    orchestrator.run().await.context("Sync run failed")
}

#[derive(Debug, Serialize)]
pub struct Listings {
    pub local: Vec<ArchiveListing>,
    /// `None` when remote storage is disabled.
    pub remote: Option<Vec<ArchiveListing>>,
    /// Every archive once, tagged with where it is stored.
    pub combined: Vec<LocatedListing>,
}

#[derive(Debug, Serialize)]
pub struct LocatedListing {
    #[serde(flatten)]
    pub listing: ArchiveListing,
    pub location: ArchiveLocation,
}

/// Local and remote archive listings, newest first.
pub async fn list_archives(app_config: &AppConfig) -> Result<Listings> {
    let local = LocalRepository::new(app_config.backup_dir()?);
    let remote = S3RemoteStore::connect(&app_config.remote)
        .await
        .context("Failed to initialize remote storage")?;
    collect_listings(&local, &remote).await
}

async fn collect_listings(local: &LocalRepository, remote: &dyn RemoteStore) -> Result<Listings> {
    let local_archives = local.list().context("Failed to list local archives")?;
    let remote_archives = if remote.is_enabled() {
        let archives = remote
            .list()
            .await
            .with_context(|| format!("Failed to list remote archives in {}", remote.describe()))?;
        Some(archives)
    } else {
        None
    };

    let remote_slice = remote_archives.as_deref().unwrap_or(&[]);
    let combined = archive::merge_locations(&local_archives, remote_slice)
        .iter()
        .map(|a| LocatedListing {
            listing: a.to_listing(),
            location: a.location,
        })
        .collect();

    Ok(Listings {
        local: local_archives.iter().map(|a| a.to_listing()).collect(),
        remote: remote_archives.map(|archives| archives.iter().map(|a| a.to_listing()).collect()),
        combined,
    })
}
