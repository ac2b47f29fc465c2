//! Remote object storage for archives.
//!
//! Reconciliation and orchestration only see [`RemoteStore`]; the concrete
//! backend (any S3-compatible service) lives in [`s3`].
pub mod s3;

#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use std::path::Path;

use crate::archive::Archive;
use crate::errors::Result;

/// Outcome of a best-effort existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    Present,
    Absent,
    /// The check itself failed (transport, auth, not configured).
    Unknown,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// False when credentials, bucket or prefix are missing.
    fn is_enabled(&self) -> bool;

    /// Human readable target, used in log lines.
    fn describe(&self) -> String;

    /// Uploads `local_path` as archive `name`.
    async fn upload(&self, local_path: &Path, name: &str) -> Result<()>;

    async fn download(&self, name: &str) -> Result<Vec<u8>>;

    /// Existence check that never fails; see [`Existence::Unknown`].
    async fn probe(&self, name: &str) -> Existence;

    /// Deleting a missing object succeeds.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Archives under the configured prefix, newest first.
    async fn list(&self) -> Result<Vec<Archive>>;

    /// Object size in bytes. A missing object is a `StoreIo` error.
    async fn size(&self, name: &str) -> Result<u64>;

    /// Last modification time as a unix timestamp in seconds.
    async fn last_modified(&self, name: &str) -> Result<i64>;

    /// Best-effort boolean view of [`RemoteStore::probe`]: failures read as `false`.
    async fn exists(&self, name: &str) -> bool {
        self.probe(name).await == Existence::Present
    }
}
