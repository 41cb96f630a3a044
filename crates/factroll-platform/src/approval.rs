//! Approval gates.
//!
//! `AutoApprove` grants immediately. `FileApprovalGate` waits for an operator
//! (or an external pipeline) to drop a `<environment>.approved` marker file
//! into a watched directory. `BoundedApproval` puts a deadline on any gate.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::PlatformError;
use crate::platform_traits::{ApprovalGate, PlatformResult};

/// Gate that never blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn await_approval(&self, environment: &str) -> PlatformResult<()> {
        debug!(environment = %environment, "approval not required");
        Ok(())
    }
}

/// Gate that polls for a marker file.
#[derive(Debug, Clone)]
pub struct FileApprovalGate {
    dir: PathBuf,
    poll_interval: Duration,
}

impl FileApprovalGate {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            poll_interval: Duration::from_secs(10),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Path of the marker that approves `environment`.
    pub fn marker_path(&self, environment: &str) -> PathBuf {
        self.dir.join(format!("{environment}.approved"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ApprovalGate for FileApprovalGate {
    async fn await_approval(&self, environment: &str) -> PlatformResult<()> {
        let marker = self.marker_path(environment);
        info!(environment = %environment, marker = %marker.display(), "waiting for approval");
        loop {
            if tokio::fs::try_exists(&marker).await? {
                info!(environment = %environment, "approval granted");
                return Ok(());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Wraps another gate and fails with [`PlatformError::Timeout`] if approval
/// has not arrived within `limit`.
#[derive(Clone)]
pub struct BoundedApproval {
    inner: Arc<dyn ApprovalGate>,
    limit: Duration,
}

impl BoundedApproval {
    pub fn new(inner: Arc<dyn ApprovalGate>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

impl std::fmt::Debug for BoundedApproval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedApproval")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ApprovalGate for BoundedApproval {
    async fn await_approval(&self, environment: &str) -> PlatformResult<()> {
        match tokio::time::timeout(self.limit, self.inner.await_approval(environment)).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Timeout(format!(
                "no approval for {environment} within {:?}",
                self.limit
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auto_approve_returns_immediately() {
        AutoApprove.await_approval("production").await.unwrap();
    }

    #[tokio::test]
    async fn file_gate_passes_when_marker_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("production.approved"), b"").unwrap();
        let gate = FileApprovalGate::new(dir.path());
        gate.await_approval("production").await.unwrap();
    }

    #[tokio::test]
    async fn file_gate_waits_for_marker() {
        let dir = tempfile::tempdir().unwrap();
        let gate = FileApprovalGate::new(dir.path()).with_poll_interval(Duration::from_millis(10));
        let marker = gate.marker_path("staging");

        let waiter = tokio::spawn(async move { gate.await_approval("staging").await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        std::fs::write(&marker, b"ok").unwrap();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("gate did not release")
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_gate_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(FileApprovalGate::new(dir.path()));
        let gate = BoundedApproval::new(inner, Duration::from_secs(60));
        let err = gate.await_approval("production").await.unwrap_err();
        assert!(matches!(err, PlatformError::Timeout(_)));
        assert!(err.to_string().contains("production"));
    }

    #[tokio::test]
    async fn bounded_gate_passes_through_approval() {
        let gate = BoundedApproval::new(Arc::new(AutoApprove), Duration::from_secs(1));
        gate.await_approval("production").await.unwrap();
    }
}
