// backupsync/src/sync/logic.rs
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::plan::{self, SyncPlan};
use crate::archive::Archive;
use crate::config::SyncOptions;
use crate::errors::{AppError, ErrorKind, Result};
use crate::local::LocalRepository;
use crate::storage::RemoteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    Listing,
    Planning,
    Executing,
    Completed,
    CompletedWithErrors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operation {
    Upload,
    DeleteRemote,
    DeleteLocal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedOperation {
    pub name: String,
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub name: String,
    pub operation: Operation,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedOperation {
    pub name: String,
    pub operation: Operation,
    pub reason: String,
}

/// Outcome of one sync run: every attempted operation ends up in exactly one list.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub state: RunState,
    pub remote_enabled: bool,
    pub succeeded: Vec<CompletedOperation>,
    pub failures: Vec<SyncFailure>,
    pub skipped: Vec<SkippedOperation>,
    pub cancelled: bool,
}

impl SyncReport {
    fn new(run_id: Uuid, remote_enabled: bool) -> Self {
        Self {
            run_id,
            state: RunState::Idle,
            remote_enabled,
            succeeded: Vec::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
            cancelled: false,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.failures.is_empty()
    }

    fn record(&mut self, name: String, operation: Operation, result: Result<()>) {
        match result {
            Ok(()) => self.succeeded.push(CompletedOperation { name, operation }),
            Err(e) => {
                error!("{:?} of {} failed: {}", operation, name, e);
                self.failures.push(SyncFailure {
                    name,
                    operation,
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
    }

    fn skip(&mut self, name: String, operation: Operation, reason: &str) {
        debug!("Skipping {:?} of {}: {}", operation, name, reason);
        self.skipped.push(SkippedOperation {
            name,
            operation,
            reason: reason.to_string(),
        });
    }

    fn skip_all(&mut self, names: &[String], operation: Operation, reason: &str) {
        for name in names {
            self.skip(name.clone(), operation, reason);
        }
    }
}

const CANCELLED_REASON: &str = "run cancelled";
const FAILED_UPLOAD_REASON: &str = "upload failed in this run; keeping the only copy";

/// Drives one reconciliation run: list both sides, plan, then upload, prune
/// remote and prune local, in that order.
///
/// Runs against the same directory/prefix must be serialized by the caller.
pub struct SyncOrchestrator {
    local: LocalRepository,
    remote: Arc<dyn RemoteStore>,
    options: SyncOptions,
    cancel: CancellationToken,
    state: RunState,
}

impl SyncOrchestrator {
    pub fn new(local: LocalRepository, remote: Arc<dyn RemoteStore>, options: SyncOptions) -> Self {
        Self {
            local,
            remote,
            options,
            cancel: CancellationToken::new(),
            state: RunState::Idle,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        debug!("Sync state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Executes a full run. Only listing failures are returned as errors;
    /// per-archive failures are collected in the report.
    pub async fn run(&mut self) -> Result<SyncReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&mut self, run_id: Uuid) -> Result<SyncReport> {
        self.transition(RunState::Idle);
        let remote_enabled = self.remote.is_enabled();
        let mut report = SyncReport::new(run_id, remote_enabled);
        let retention = self.options.retention;

        self.transition(RunState::Listing);
        let local_archives = self.local.list()?;
        let remote_archives = if remote_enabled {
            Some(self.list_remote().await?)
        } else {
            info!("Remote storage disabled; skipping remote steps");
            None
        };
        info!(
            "Found {} local archives{}",
            local_archives.len(),
            remote_archives
                .as_ref()
                .map(|r| format!(", {} remote archives in {}", r.len(), self.remote.describe()))
                .unwrap_or_default()
        );

        self.transition(RunState::Planning);
        let plan =
            plan::plan_reconciliation(&local_archives, remote_archives.as_deref(), retention);
        log_plan(&plan, retention.is_unlimited());

        self.transition(RunState::Executing);

        let backup_dir = self.local.backup_dir().to_path_buf();
        let upload = move |remote: Arc<dyn RemoteStore>, name: String| {
            let path = backup_dir.join(&name);
            async move { remote.upload(&path, &name).await }
        };
        let uploaded = self
            .execute_remote_batch(Operation::Upload, &plan.to_upload, &mut report, upload)
            .await;

        if let Some(remote_archives) = &remote_archives {
            let to_delete_remote = if uploaded.len() == plan.to_upload.len() {
                plan.to_delete_remote.clone()
            } else {
                let recomputed = plan::remote_overflow_after_uploads(
                    remote_archives,
                    &local_archives,
                    &uploaded,
                    retention,
                );
                debug!(
                    "Remote pruning recomputed after incomplete uploads: {:?}",
                    recomputed
                );
                recomputed
            };

            if self.cancel.is_cancelled() {
                report.skip_all(&to_delete_remote, Operation::DeleteRemote, CANCELLED_REASON);
            } else {
                self.execute_remote_batch(
                    Operation::DeleteRemote,
                    &to_delete_remote,
                    &mut report,
                    |remote, name| async move { remote.delete(&name).await },
                )
                .await;
            }
        }

        let failed_uploads: HashSet<&str> = plan
            .to_upload
            .iter()
            .filter(|name| !uploaded.contains(*name))
            .map(String::as_str)
            .collect();
        self.prune_local(&plan.to_delete_local, &failed_uploads, &mut report);

        report.cancelled = self.cancel.is_cancelled();
        let terminal = if report.has_errors() {
            RunState::CompletedWithErrors
        } else {
            RunState::Completed
        };
        self.transition(terminal);
        report.state = terminal;

        if report.has_errors() {
            warn!(
                "Sync completed with {} failure(s), {} succeeded, {} skipped",
                report.failures.len(),
                report.succeeded.len(),
                report.skipped.len()
            );
        } else {
            info!(
                "✅ Sync completed: {} operation(s) succeeded, {} skipped",
                report.succeeded.len(),
                report.skipped.len()
            );
        }
        Ok(report)
    }

    async fn list_remote(&self) -> Result<Vec<Archive>> {
        let timeout = self.options.operation_timeout;
        match tokio::time::timeout(timeout, self.remote.list()).await {
            Ok(result) => result,
            Err(_) => Err(AppError::StoreIo(format!(
                "listing {} timed out after {:?}",
                self.remote.describe(),
                timeout
            ))),
        }
    }

    /// Runs `op` for every name on a bounded pool, each call under the
    /// operation timeout. Returns the names that succeeded.
    ///
    /// On cancellation no further operations are scheduled; in-flight ones are
    /// awaited and the rest are reported as skipped.
    async fn execute_remote_batch<F, Fut>(
        &self,
        operation: Operation,
        names: &[String],
        report: &mut SyncReport,
        op: F,
    ) -> BTreeSet<String>
    where
        F: Fn(Arc<dyn RemoteStore>, String) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut succeeded = BTreeSet::new();
        if names.is_empty() {
            return succeeded;
        }

        let timeout = self.options.operation_timeout;
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_operations.max(1)));
        let mut tasks = JoinSet::new();
        let mut pending: HashSet<String> = HashSet::new();

        for (index, name) in names.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                warn!(
                    "Cancellation requested; not scheduling remaining {:?} operations",
                    operation
                );
                report.skip_all(&names[index..], operation, CANCELLED_REASON);
                break;
            };

            let fut = op(Arc::clone(&self.remote), name.clone());
            let task_name = name.clone();
            pending.insert(name.clone());
            tasks.spawn(async move {
                let _permit = permit;
                let result = match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::StoreIo(format!(
                        "{:?} of {} timed out after {:?}",
                        operation, task_name, timeout
                    ))),
                };
                (task_name, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, result)) => {
                    pending.remove(&name);
                    if result.is_ok() {
                        succeeded.insert(name.clone());
                    }
                    report.record(name, operation, result);
                }
                Err(join_error) => {
                    error!("{:?} task aborted: {}", operation, join_error);
                }
            }
        }

        // Tasks that panicked never reported back
        for name in pending {
            report.failures.push(SyncFailure {
                name,
                operation,
                kind: ErrorKind::Other,
                message: "operation task panicked".to_string(),
            });
        }

        succeeded
    }

    fn prune_local(
        &self,
        to_delete: &[String],
        failed_uploads: &HashSet<&str>,
        report: &mut SyncReport,
    ) {
        for (index, name) in to_delete.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.skip_all(&to_delete[index..], Operation::DeleteLocal, CANCELLED_REASON);
                return;
            }
            if failed_uploads.contains(name.as_str()) {
                report.skip(name.clone(), Operation::DeleteLocal, FAILED_UPLOAD_REASON);
                continue;
            }
            let result = self.local.delete(name);
            report.record(name.clone(), Operation::DeleteLocal, result);
        }
    }
}

fn log_plan(plan: &SyncPlan, unlimited: bool) {
    if plan.is_empty() {
        info!("Local and remote archives are in sync; nothing to do");
        return;
    }
    info!(
        "Plan: {} upload(s), {} remote deletion(s), {} local deletion(s){}",
        plan.to_upload.len(),
        plan.to_delete_remote.len(),
        plan.to_delete_local.len(),
        if unlimited { " (unlimited retention)" } else { "" }
    );
    debug!("Plan detail: {:?}", plan);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::tests::write_archive;
    use crate::storage::memory::MemoryRemoteStore;
    use crate::sync::plan::RetentionPolicy;
    use std::path::Path;
    use std::time::Duration;

    fn options(max_count: i64) -> SyncOptions {
        SyncOptions {
            retention: RetentionPolicy::new(max_count),
            max_concurrent_operations: 4,
            operation_timeout: Duration::from_secs(5),
        }
    }

    fn day(n: u32) -> String {
        format!("2024-01-{:02}_000000.zip", n)
    }

    fn seed_local(dir: &Path, days: std::ops::RangeInclusive<u32>) -> anyhow::Result<()> {
        for d in days {
            write_archive(dir, &day(d), 128, i64::from(d) * 100)?;
        }
        Ok(())
    }

    fn local_names(repo: &LocalRepository) -> anyhow::Result<Vec<String>> {
        Ok(repo.list()?.into_iter().map(|a| a.name).collect())
    }

    #[tokio::test]
    async fn test_uploads_missing_archives() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        seed_local(workspace.path(), 1..=3)?;
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.insert(&day(2), 128, 50);

        let mut orchestrator = SyncOrchestrator::new(
            LocalRepository::new(workspace.path()),
            remote.clone(),
            options(-1),
        );
        let report = orchestrator.run().await?;

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(orchestrator.state(), RunState::Completed);
        assert!(report.remote_enabled);
        assert_eq!(remote.names(), vec![day(1), day(2), day(3)]);
        let uploaded: Vec<&str> = report
            .succeeded
            .iter()
            .filter(|op| op.operation == Operation::Upload)
            .map(|op| op.name.as_str())
            .collect();
        assert_eq!(uploaded.len(), 2);
        assert!(!uploaded.contains(&day(2).as_str()));
        Ok(())
    }

    #[tokio::test]
    async fn test_one_failed_upload_does_not_stop_others() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        seed_local(workspace.path(), 1..=5)?;
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.fail_upload(&day(3));

        let mut orchestrator = SyncOrchestrator::new(
            LocalRepository::new(workspace.path()),
            remote.clone(),
            options(-1),
        );
        let report = orchestrator.run().await?;

        assert_eq!(report.state, RunState::CompletedWithErrors);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, day(3));
        assert_eq!(report.failures[0].operation, Operation::Upload);
        assert_eq!(report.failures[0].kind, ErrorKind::StoreIoError);
        assert_eq!(remote.names(), vec![day(1), day(2), day(4), day(5)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_retention_enforced_in_both_locations() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        seed_local(workspace.path(), 10..=15)?;
        let remote = Arc::new(MemoryRemoteStore::new());
        for d in 1..=3 {
            remote.insert(&day(d), 64, i64::from(d));
        }
        let repo = LocalRepository::new(workspace.path());

        let mut orchestrator = SyncOrchestrator::new(repo.clone(), remote.clone(), options(2));
        let report = orchestrator.run().await?;

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(local_names(&repo)?, vec![day(15), day(14)]);
        let remote_names = remote.names();
        assert!(remote_names.len() <= 2, "remote kept {:?}", remote_names);
        assert!(remote.list().await?.len() <= 2);

        // A second run against the converged state does nothing
        let report = orchestrator.run().await?;
        assert!(report.succeeded.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(local_names(&repo)?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_fresh_upload_survives_when_within_limit() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        seed_local(workspace.path(), 5..=5)?;
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.insert(&day(1), 64, 1);
        remote.insert(&day(2), 64, 2);

        let mut orchestrator = SyncOrchestrator::new(
            LocalRepository::new(workspace.path()),
            remote.clone(),
            options(3),
        );
        let report = orchestrator.run().await?;

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(remote.names(), vec![day(1), day(2), day(5)]);
        assert_eq!(remote.delete_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_upload_is_not_pruned_locally() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        seed_local(workspace.path(), 1..=3)?;
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.fail_upload(&day(1));
        let repo = LocalRepository::new(workspace.path());

        let mut orchestrator = SyncOrchestrator::new(repo.clone(), remote.clone(), options(2));
        let report = orchestrator.run().await?;

        assert_eq!(report.state, RunState::CompletedWithErrors);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(local_names(&repo)?, vec![day(3), day(2), day(1)]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].name, day(1));
        assert_eq!(report.skipped[0].operation, Operation::DeleteLocal);
        // Only two uploads landed, so nothing is pruned remotely
        assert_eq!(remote.names(), vec![day(2), day(3)]);
        assert_eq!(remote.delete_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_remote_delete_failure_is_reported() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        let remote = Arc::new(MemoryRemoteStore::new());
        for d in 1..=3 {
            remote.insert(&day(d), 64, i64::from(d));
        }
        remote.fail_delete(&day(1));

        let mut orchestrator = SyncOrchestrator::new(
            LocalRepository::new(workspace.path()),
            remote.clone(),
            options(1),
        );
        let report = orchestrator.run().await?;

        assert_eq!(report.state, RunState::CompletedWithErrors);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].operation, Operation::DeleteRemote);
        assert_eq!(report.failures[0].name, day(1));
        assert_eq!(remote.names(), vec![day(1), day(3)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_local_only_when_remote_disabled() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        seed_local(workspace.path(), 1..=4)?;
        let repo = LocalRepository::new(workspace.path());

        let mut orchestrator = SyncOrchestrator::new(
            repo.clone(),
            Arc::new(MemoryRemoteStore::disabled()),
            options(1),
        );
        let report = orchestrator.run().await?;

        assert_eq!(report.state, RunState::Completed);
        assert!(!report.remote_enabled);
        assert_eq!(local_names(&repo)?, vec![day(4)]);
        assert!(report
            .succeeded
            .iter()
            .all(|op| op.operation == Operation::DeleteLocal));
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_timeout_is_store_io_error() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        seed_local(workspace.path(), 1..=3)?;
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.hang_upload(&day(2));

        let mut opts = options(-1);
        opts.operation_timeout = Duration::from_millis(200);
        let mut orchestrator =
            SyncOrchestrator::new(LocalRepository::new(workspace.path()), remote.clone(), opts);
        let report = orchestrator.run().await?;

        assert_eq!(report.state, RunState::CompletedWithErrors);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, day(2));
        assert_eq!(report.failures[0].kind, ErrorKind::StoreIoError);
        assert_eq!(remote.names(), vec![day(1), day(3)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        seed_local(workspace.path(), 1..=8)?;
        let remote = Arc::new(MemoryRemoteStore::new().with_delay(Duration::from_millis(50)));

        let mut opts = options(-1);
        opts.max_concurrent_operations = 3;
        let mut orchestrator =
            SyncOrchestrator::new(LocalRepository::new(workspace.path()), remote.clone(), opts);
        let report = orchestrator.run().await?;

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(remote.names().len(), 8);
        assert!(remote.max_in_flight() <= 3);
        assert!(remote.max_in_flight() >= 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_before_run_schedules_nothing() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        seed_local(workspace.path(), 1..=3)?;
        let remote = Arc::new(MemoryRemoteStore::new());
        let repo = LocalRepository::new(workspace.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut orchestrator = SyncOrchestrator::new(repo.clone(), remote.clone(), options(1))
            .with_cancellation(cancel);
        let report = orchestrator.run().await?;

        assert!(report.cancelled);
        assert_eq!(report.state, RunState::Completed);
        assert!(remote.names().is_empty());
        assert_eq!(local_names(&repo)?.len(), 3);
        // 3 uploads + 2 local deletions skipped
        assert_eq!(report.skipped.len(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancellation_lets_in_flight_upload_finish() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        seed_local(workspace.path(), 1..=3)?;
        let remote = Arc::new(MemoryRemoteStore::new().with_delay(Duration::from_millis(300)));
        let cancel = CancellationToken::new();

        let mut opts = options(-1);
        opts.max_concurrent_operations = 1;
        let mut orchestrator =
            SyncOrchestrator::new(LocalRepository::new(workspace.path()), remote.clone(), opts)
                .with_cancellation(cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let report = orchestrator.run().await?;
        canceller.await?;

        assert!(report.cancelled);
        assert_eq!(remote.names(), vec![day(1)]);
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.skipped.len(), 2);
        assert!(report.failures.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_report_serializes() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        seed_local(workspace.path(), 1..=1)?;
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.fail_upload(&day(1));

        let mut orchestrator =
            SyncOrchestrator::new(LocalRepository::new(workspace.path()), remote, options(-1));
        let report = orchestrator.run().await?;
        let value = serde_json::to_value(&report)?;

        assert_eq!(value["state"], "CompletedWithErrors");
        assert_eq!(value["failures"][0]["kind"], "StoreIoError");
        assert_eq!(value["failures"][0]["operation"], "Upload");
        Ok(())
    }
}
