//! In-memory [`RemoteStore`] with failure and latency injection.
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use super::{Existence, RemoteStore};
use crate::archive::{self, Archive, ArchiveLocation};
use crate::errors::{AppError, Result};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    modified_at: i64,
}

#[derive(Debug)]
pub(crate) struct MemoryRemoteStore {
    enabled: bool,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failing_uploads: Mutex<HashSet<String>>,
    failing_deletes: Mutex<HashSet<String>>,
    slow_uploads: Mutex<HashSet<String>>,
    delay: Duration,
    clock: AtomicI64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MemoryRemoteStore {
    pub(crate) fn new() -> Self {
        Self {
            enabled: true,
            objects: Mutex::new(BTreeMap::new()),
            failing_uploads: Mutex::new(HashSet::new()),
            failing_deletes: Mutex::new(HashSet::new()),
            slow_uploads: Mutex::new(HashSet::new()),
            delay: Duration::ZERO,
            clock: AtomicI64::new(1_000_000),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    /// Every upload and delete sleeps for `delay` before completing.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn insert(&self, name: &str, size: usize, modified_at: i64) {
        self.objects.lock().unwrap().insert(
            name.to_string(),
            StoredObject {
                data: vec![0u8; size],
                modified_at,
            },
        );
    }

    pub(crate) fn fail_upload(&self, name: &str) {
        self.failing_uploads.lock().unwrap().insert(name.to_string());
    }

    pub(crate) fn fail_delete(&self, name: &str) {
        self.failing_deletes.lock().unwrap().insert(name.to_string());
    }

    /// Upload of `name` never finishes on its own.
    pub(crate) fn hang_upload(&self, name: &str) {
        self.slow_uploads.lock().unwrap().insert(name.to_string());
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn check_enabled(&self) -> Result<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(AppError::NotConfigured)
        }
    }

    async fn simulate_latency(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn get(&self, name: &str) -> Result<StoredObject> {
        self.check_enabled()?;
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::ObjectNotFound(name.to_string()))
    }

    fn get_metadata(&self, name: &str) -> Result<StoredObject> {
        self.get(name).map_err(|e| match e {
            AppError::ObjectNotFound(key) => AppError::StoreIo(format!("no such object: {}", key)),
            other => other,
        })
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }

    async fn upload(&self, local_path: &Path, name: &str) -> Result<()> {
        self.check_enabled()?;
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|_| AppError::LocalFileMissing(local_path.to_path_buf()))?;

        let hang = self.slow_uploads.lock().unwrap().contains(name);
        if hang {
            std::future::pending::<()>().await;
        }
        self.simulate_latency().await;
        let fail = self.failing_uploads.lock().unwrap().contains(name);
        if fail {
            return Err(AppError::StoreIo(format!("injected upload failure for {}", name)));
        }

        let modified_at = self.clock.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), StoredObject { data, modified_at });
        Ok(())
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>> {
        Ok(self.get(name)?.data)
    }

    async fn probe(&self, name: &str) -> Existence {
        match self.get(name) {
            Ok(_) => Existence::Present,
            Err(AppError::ObjectNotFound(_)) => Existence::Absent,
            Err(_) => Existence::Unknown,
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.check_enabled()?;
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        let fail = self.failing_deletes.lock().unwrap().contains(name);
        if fail {
            return Err(AppError::StoreIo(format!("injected delete failure for {}", name)));
        }
        self.objects.lock().unwrap().remove(name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Archive>> {
        self.check_enabled()?;
        let mut archives: Vec<Archive> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| archive::is_archive_name(name))
            .map(|(name, object)| {
                Archive::new(
                    name.as_str(),
                    object.data.len() as u64,
                    object.modified_at,
                    ArchiveLocation::Remote,
                )
            })
            .collect();
        archive::sort_newest_first(&mut archives);
        Ok(archives)
    }

    async fn size(&self, name: &str) -> Result<u64> {
        Ok(self.get_metadata(name)?.data.len() as u64)
    }

    async fn last_modified(&self, name: &str) -> Result<i64> {
        Ok(self.get_metadata(name)?.modified_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_filters_foreign_objects_and_sorts() -> anyhow::Result<()> {
        let store = MemoryRemoteStore::new();
        store.insert("2024-01-01_000000.zip", 10, 100);
        store.insert("2024-01-02_000000.zip", 10, 300);
        store.insert("2024-01-01_120000.zip", 10, 200);
        store.insert("manifest.json", 10, 999);

        let names: Vec<String> = store.list().await?.into_iter().map(|a| a.name).collect();
        assert_eq!(
            names,
            vec![
                "2024-01-02_000000.zip",
                "2024-01-01_120000.zip",
                "2024-01-01_000000.zip"
            ]
        );

        // Idempotent listing
        assert_eq!(store.list().await?, store.list().await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_probe_and_delete() -> anyhow::Result<()> {
        let store = MemoryRemoteStore::new();
        store.insert("2024-01-01_000000.zip", 1_048_576, 100);
        assert_eq!(store.probe("2024-01-01_000000.zip").await, Existence::Present);
        assert_eq!(store.size("2024-01-01_000000.zip").await?, 1_048_576);
        assert_eq!(store.last_modified("2024-01-01_000000.zip").await?, 100);

        store.delete("2024-01-01_000000.zip").await?;
        store.delete("2024-01-01_000000.zip").await?;
        assert_eq!(store.probe("2024-01-01_000000.zip").await, Existence::Absent);
        assert!(matches!(
            store.size("2024-01-01_000000.zip").await,
            Err(AppError::StoreIo(_))
        ));
        assert!(matches!(
            store.download("2024-01-01_000000.zip").await,
            Err(AppError::ObjectNotFound(_))
        ));
        Ok(())
    }
}
