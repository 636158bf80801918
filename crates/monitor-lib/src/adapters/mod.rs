//! Boundary adapters to the cluster, analyzer, LLM, filesystem and clock
//!
//! Every adapter call accepts a cancellation token and is bounded by a
//! deadline. Tests substitute in-memory fakes for all of these traits.

mod clock;
mod fs;
mod k8sgpt;
mod kubectl;
mod llm;

pub use clock::{Clock, SystemClock};
#[cfg(test)]
pub use clock::test_support::ManualClock;
pub use fs::{LocalFilesystem, ProcessLock};
pub use k8sgpt::K8sgptAnalyzer;
pub use kubectl::KubectlCluster;
pub use llm::{DisabledLlm, HttpLlm, LlmConfig};

use crate::cancel::CancelToken;
use crate::error::{AdapterError, AdapterResult};
use crate::models::{ClusterSnapshot, Diagnostic, EventInfo, ObjectRef};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use async_trait::async_trait;

/// Read-only view of the cluster
#[async_trait]
pub trait ClusterAdapter: Send + Sync {
    /// Produce a full point-in-time snapshot
    async fn snapshot(&self, cancel: &CancelToken) -> AdapterResult<ClusterSnapshot>;

    /// Fetch the tail of a pod's logs
    async fn pod_logs(
        &self,
        cancel: &CancelToken,
        namespace: &str,
        name: &str,
        tail_lines: usize,
    ) -> AdapterResult<String>;

    /// List events, optionally scoped to one object
    async fn events(
        &self,
        cancel: &CancelToken,
        target: Option<&ObjectRef>,
    ) -> AdapterResult<Vec<EventInfo>>;
}

/// External diagnostic analyzer (k8sgpt or compatible)
#[async_trait]
pub trait AnalyzerAdapter: Send + Sync {
    async fn scan(
        &self,
        cancel: &CancelToken,
        namespace: Option<&str>,
    ) -> AdapterResult<Vec<Diagnostic>>;
}

/// Narrow LLM boundary: prompt in, text out.
///
/// Vendor specifics stay behind this trait so that `safeMode` can disable
/// the whole integration and tests can script replies.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// False when the integration is disabled or unconfigured
    fn enabled(&self) -> bool;

    async fn complete(&self, cancel: &CancelToken, prompt: &str) -> AdapterResult<String>;
}

/// Filesystem operations used by the report store
pub trait FilesystemAdapter: Send + Sync {
    /// Write the full contents, visible atomically at `path`
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// Take the advisory process lock for `dir`, creating it if needed
    fn acquire_lock(&self, dir: &Path) -> io::Result<ProcessLock>;
}

/// Run an adapter future under a deadline and a cancellation token.
///
/// The first of completion, deadline, or cancellation wins.
pub async fn bounded<T, F>(
    deadline: Duration,
    cancel: &CancelToken,
    fut: F,
) -> AdapterResult<T>
where
    F: Future<Output = AdapterResult<T>>,
{
    tokio::select! {
        res = tokio::time::timeout(deadline, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(AdapterError::Timeout(deadline)),
        },
        () = cancel.cancelled() => Err(AdapterError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;

    #[tokio::test]
    async fn test_bounded_passes_through_success() {
        let token = CancelToken::never();
        let out = bounded(Duration::from_secs(1), &token, async { Ok(42u32) }).await;
        assert_eq!(out.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let token = CancelToken::never();
        let out: AdapterResult<()> = bounded(Duration::from_millis(10), &token, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(out, Err(AdapterError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_bounded_observes_cancellation() {
        let (handle, token) = cancel_pair();
        handle.cancel();
        let out: AdapterResult<()> = bounded(Duration::from_secs(5), &token, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(out, Err(AdapterError::Cancelled)));
    }
}
