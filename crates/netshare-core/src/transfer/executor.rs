//! Protocol executors and the progress handle they report through.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::watch;

use super::{ftp::FtpExecutor, http::HttpExecutor, Inner, TransferKind};
use crate::config::TransferConfig;
use crate::connection::{ConnectionProfile, Protocol};
use crate::error::{Error, Result};

/// Everything an executor needs to run one transfer.
#[derive(Debug, Clone)]
pub struct TransferJob {
    /// Task being executed
    pub task_id: String,
    /// Direction
    pub kind: TransferKind,
    /// Remote endpoint
    pub endpoint: Arc<ConnectionProfile>,
    /// Local side
    pub local_path: PathBuf,
    /// Remote side
    pub remote_path: String,
}

/// Moves bytes for one protocol.
///
/// Both methods return the number of bytes transferred.
#[async_trait]
pub trait TransferExecutor: Send + Sync + fmt::Debug {
    /// Send `job.local_path` to `job.remote_path`.
    async fn upload(&self, job: &TransferJob, progress: &ProgressReporter) -> Result<u64>;

    /// Fetch `job.remote_path` into `job.local_path`.
    async fn download(&self, job: &TransferJob, progress: &ProgressReporter) -> Result<u64>;

    /// Whether `kind` is implemented. Unsupported kinds are rejected at
    /// enqueue time.
    fn supports(&self, _kind: TransferKind) -> bool {
        true
    }
}

/// Executor for protocols this crate does not speak.
#[derive(Debug, Clone, Copy)]
pub struct UnsupportedExecutor(pub Protocol);

#[async_trait]
impl TransferExecutor for UnsupportedExecutor {
    async fn upload(&self, _job: &TransferJob, _progress: &ProgressReporter) -> Result<u64> {
        Err(Error::Unsupported {
            protocol: self.0,
            operation: "upload".into(),
        })
    }

    async fn download(&self, _job: &TransferJob, _progress: &ProgressReporter) -> Result<u64> {
        Err(Error::Unsupported {
            protocol: self.0,
            operation: "download".into(),
        })
    }

    fn supports(&self, _kind: TransferKind) -> bool {
        false
    }
}

/// Executors keyed by protocol.
#[derive(Debug, Clone, Default)]
pub struct ExecutorSet {
    executors: HashMap<Protocol, Arc<dyn TransferExecutor>>,
}

impl ExecutorSet {
    /// An empty set; every transfer fails as unsupported.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// FTP and HTTP(S) over the network; SFTP unsupported.
    #[must_use]
    pub fn standard(config: &TransferConfig) -> Self {
        let http: Arc<dyn TransferExecutor> = Arc::new(HttpExecutor::new(config));
        Self::empty()
            .with(Protocol::Ftp, Arc::new(FtpExecutor::new(config)))
            .with(Protocol::Http, Arc::clone(&http))
            .with(Protocol::Https, http)
            .with(Protocol::Sftp, Arc::new(UnsupportedExecutor(Protocol::Sftp)))
    }

    /// Register `executor` for `protocol`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, protocol: Protocol, executor: Arc<dyn TransferExecutor>) -> Self {
        self.executors.insert(protocol, executor);
        self
    }

    /// Executor registered for `protocol`.
    #[must_use]
    pub fn get(&self, protocol: Protocol) -> Option<Arc<dyn TransferExecutor>> {
        self.executors.get(&protocol).cloned()
    }

    pub(super) fn supports(&self, protocol: Protocol, kind: TransferKind) -> bool {
        self.executors
            .get(&protocol)
            .is_some_and(|executor| executor.supports(kind))
    }
}

/// Progress handle given to an executor for one run of a task.
///
/// Reports from a run that was paused or cancelled are dropped, and the
/// recorded byte count never goes backwards.
pub struct ProgressReporter {
    sink: Option<(Weak<Inner>, String, u64)>,
    stop: watch::Receiver<bool>,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("task_id", &self.sink.as_ref().map(|(_, id, _)| id))
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl ProgressReporter {
    pub(super) fn attached(
        inner: Weak<Inner>,
        task_id: String,
        run_id: u64,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            sink: Some((inner, task_id, run_id)),
            stop,
        }
    }

    /// A reporter that records nothing and is never stopped. Useful for
    /// driving an executor outside a manager.
    #[must_use]
    pub fn detached() -> Self {
        let (_, stop) = watch::channel(false);
        Self { sink: None, stop }
    }

    /// Record the size of the transfer once it is known.
    pub fn set_total(&self, total: u64) {
        if let Some((inner, task_id, run_id)) = &self.sink {
            if let Some(inner) = inner.upgrade() {
                inner.record_total(task_id, *run_id, total);
            }
        }
    }

    /// Record that `transferred` bytes have moved so far.
    pub fn report(&self, transferred: u64) {
        if let Some((inner, task_id, run_id)) = &self.sink {
            if let Some(inner) = inner.upgrade() {
                inner.record_progress(task_id, *run_id, transferred);
            }
        }
    }

    /// Whether the task was paused or cancelled.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// `Err(TransferCancelled)` once the task was paused or cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_stopped() {
            Err(Error::TransferCancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_set_support() {
        let set = ExecutorSet::standard(&TransferConfig::default());
        assert!(set.supports(Protocol::Ftp, TransferKind::Upload));
        assert!(set.supports(Protocol::Https, TransferKind::Download));
        assert!(!set.supports(Protocol::Sftp, TransferKind::Upload));
        assert!(!ExecutorSet::empty().supports(Protocol::Http, TransferKind::Upload));
    }

    #[tokio::test]
    async fn test_unsupported_executor() {
        let job = TransferJob {
            task_id: "t".into(),
            kind: TransferKind::Download,
            endpoint: Arc::new(ConnectionProfile::new("s", "10.0.0.2", 22, Protocol::Sftp)),
            local_path: PathBuf::from("out.bin"),
            remote_path: "in.bin".into(),
        };
        let err = UnsupportedExecutor(Protocol::Sftp)
            .download(&job, &ProgressReporter::detached())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "download is not supported over sftp");
    }

    #[test]
    fn test_detached_reporter() {
        let reporter = ProgressReporter::detached();
        reporter.set_total(10);
        reporter.report(5);
        assert!(!reporter.is_stopped());
        assert!(reporter.check().is_ok());
    }
}
