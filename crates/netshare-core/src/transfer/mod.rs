//! Transfer queue for NetShare.
//!
//! The [`TransferManager`] owns every upload and download between this
//! device and a remote endpoint:
//!
//! - A FIFO pending queue and an active set bounded by
//!   `concurrent_transfers`
//! - A dispatch step that starts pending tasks while slots are free and
//!   re-runs whenever a task leaves the active set
//! - Protocol executors selected by the endpoint's [`Protocol`]
//! - Progress bookkeeping published on the [`EventBus`]
//!
//! ## Task lifecycle
//!
//! ```text
//! Pending -> Uploading/Downloading -> Completed | Failed
//!    |  ^            |
//!    v  |            v
//!   Paused <---------+
//! ```
//!
//! Cancelling removes a non-terminal task outright. Pausing or cancelling an
//! executing task only signals its executor; a completion that arrives
//! afterwards is discarded.

mod executor;
pub mod ftp;
pub mod http;

pub use executor::{ExecutorSet, ProgressReporter, TransferExecutor, TransferJob, UnsupportedExecutor};

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::TransferConfig;
use crate::connection::{ConnectionProfile, Protocol};
use crate::discovery::DiscoveredDevice;
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus};

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// Local file to remote endpoint
    Upload,
    /// Remote file to local path
    Download,
}

/// Status of a transfer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Waiting for a free slot
    Pending,
    /// Upload executing
    Uploading,
    /// Download executing
    Downloading,
    /// Taken out of the queue until resumed
    Paused,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl TransferStatus {
    /// Whether the task has finished.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the task is executing I/O.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Uploading | Self::Downloading)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Which saved connection a task belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetadata {
    /// Id of the connection profile, `None` for discovered peers
    pub connection_id: Option<String>,
    /// Display name of the endpoint
    pub connection_name: String,
}

/// One upload or download tracked through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferTask {
    /// Unique task id
    pub id: String,
    /// File name shown to users
    pub file_name: String,
    /// Local side of the transfer
    pub file_path: PathBuf,
    /// Remote side of the transfer
    pub remote_path: String,
    /// Direction
    #[serde(rename = "type")]
    pub kind: TransferKind,
    /// Size in bytes; 0 while unknown
    pub total_bytes: u64,
    /// Bytes moved so far
    pub transferred_bytes: u64,
    /// Throughput in bytes per second
    pub speed: u64,
    /// Current status
    pub status: TransferStatus,
    /// Epoch milliseconds the current run started
    pub start_time: Option<u64>,
    /// Epoch milliseconds of the terminal transition
    pub end_time: Option<u64>,
    /// Error of a failed task
    pub error_message: Option<String>,
    /// Owning connection
    pub metadata: TransferMetadata,
}

impl TransferTask {
    /// Progress as a percentage (0.0 - 100.0).
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            if self.status == TransferStatus::Completed {
                100.0
            } else {
                0.0
            }
        } else {
            (self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0
        }
    }
}

/// Where a transfer goes to or comes from.
#[derive(Debug, Clone)]
pub enum TransferTarget {
    /// A registered connection profile
    Connection(ConnectionProfile),
    /// A peer running the sharing server, addressed over HTTP
    Peer(SocketAddr),
}

impl TransferTarget {
    fn into_endpoint(self) -> (ConnectionProfile, TransferMetadata) {
        match self {
            Self::Connection(profile) => {
                let metadata = TransferMetadata {
                    connection_id: Some(profile.id.clone()),
                    connection_name: profile.name.clone(),
                };
                (profile, metadata)
            }
            Self::Peer(addr) => {
                let name = addr.to_string();
                let mut profile =
                    ConnectionProfile::new(name.clone(), addr.ip().to_string(), addr.port(), Protocol::Http);
                profile.id = name.clone();
                let metadata = TransferMetadata {
                    connection_id: None,
                    connection_name: name,
                };
                (profile, metadata)
            }
        }
    }
}

impl From<ConnectionProfile> for TransferTarget {
    fn from(profile: ConnectionProfile) -> Self {
        Self::Connection(profile)
    }
}

impl From<&DiscoveredDevice> for TransferTarget {
    fn from(device: &DiscoveredDevice) -> Self {
        Self::Peer(SocketAddr::new(device.ip_address.into(), device.port))
    }
}

struct Entry {
    task: TransferTask,
    endpoint: Arc<ConnectionProfile>,
    seq: u64,
    run: Option<Run>,
}

struct Run {
    id: u64,
    stop: watch::Sender<bool>,
}

#[derive(Default)]
struct QueueState {
    tasks: HashMap<String, Entry>,
    pending: VecDeque<String>,
    active: HashSet<String>,
    history: VecDeque<TransferTask>,
    next_seq: u64,
    next_run: u64,
}

struct Inner {
    config: TransferConfig,
    executors: ExecutorSet,
    clock: Arc<dyn Clock>,
    events: EventBus,
    state: Mutex<QueueState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the transfer queue. Cloning is cheap; clones share the queue.
#[derive(Clone)]
pub struct TransferManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for TransferManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("TransferManager")
            .field("concurrent_transfers", &self.inner.config.concurrent_transfers)
            .field("pending", &state.pending.len())
            .field("active", &state.active.len())
            .finish_non_exhaustive()
    }
}

impl TransferManager {
    /// Create a manager.
    #[must_use]
    pub fn new(
        config: TransferConfig,
        executors: ExecutorSet,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                executors,
                clock,
                events,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Subscribe to engine events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Queue an upload of `local_path` to `remote_path` on `target`.
    ///
    /// Fails immediately when the local file is missing or the target's
    /// protocol cannot upload.
    pub async fn enqueue_upload(
        &self,
        target: impl Into<TransferTarget>,
        local_path: impl AsRef<Path>,
        remote_path: &str,
    ) -> Result<TransferTask> {
        let local_path = local_path.as_ref();
        let meta = tokio::fs::metadata(local_path)
            .await
            .map_err(|_| Error::FileNotFound(local_path.display().to_string()))?;
        if !meta.is_file() {
            return Err(Error::FileNotFound(local_path.display().to_string()));
        }

        let file_name = file_name_of(local_path.to_string_lossy().as_ref());
        let remote_path = if remote_path.trim().is_empty() {
            file_name.clone()
        } else {
            remote_path.to_string()
        };

        self.enqueue(
            target.into(),
            TransferKind::Upload,
            local_path.to_path_buf(),
            remote_path,
            file_name,
            meta.len(),
        )
        .await
    }

    /// Queue a download of `remote_path` on `target` into `local_path`.
    pub async fn enqueue_download(
        &self,
        target: impl Into<TransferTarget>,
        remote_path: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<TransferTask> {
        if remote_path.trim().is_empty() {
            return Err(Error::InvalidInput("remote path must not be empty".into()));
        }
        let file_name = file_name_of(remote_path);
        self.enqueue(
            target.into(),
            TransferKind::Download,
            local_path.as_ref().to_path_buf(),
            remote_path.to_string(),
            file_name,
            0,
        )
        .await
    }

    async fn enqueue(
        &self,
        target: TransferTarget,
        kind: TransferKind,
        file_path: PathBuf,
        remote_path: String,
        file_name: String,
        total_bytes: u64,
    ) -> Result<TransferTask> {
        let (endpoint, metadata) = target.into_endpoint();
        if !self.inner.executors.supports(endpoint.protocol, kind) {
            return Err(Error::Unsupported {
                protocol: endpoint.protocol,
                operation: operation_name(kind).to_string(),
            });
        }

        let task = TransferTask {
            id: Uuid::new_v4().to_string(),
            file_name,
            file_path,
            remote_path,
            kind,
            total_bytes,
            transferred_bytes: 0,
            speed: 0,
            status: TransferStatus::Pending,
            start_time: None,
            end_time: None,
            error_message: None,
            metadata,
        };

        {
            let mut state = self.inner.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push_back(task.id.clone());
            state.tasks.insert(
                task.id.clone(),
                Entry {
                    task: task.clone(),
                    endpoint: Arc::new(endpoint),
                    seq,
                    run: None,
                },
            );
        }

        tracing::info!(
            task_id = %task.id,
            kind = ?task.kind,
            file = %task.file_name,
            connection = %task.metadata.connection_name,
            "Transfer queued"
        );
        self.publish(EngineEvent::TransferProgress(task.clone()));
        self.dispatch();

        Ok(self.get(&task.id).unwrap_or(task))
    }

    /// Remove a non-terminal task from the queue and drop its progress.
    ///
    /// No further progress events are published for it.
    pub async fn cancel(&self, task_id: &str) -> Result<()> {
        {
            let mut state = self.inner.lock();
            let Some(entry) = state.tasks.remove(task_id) else {
                return Err(self.missing_or_terminal(&state, task_id, "cancel"));
            };
            state.pending.retain(|id| id != task_id);
            state.active.remove(task_id);
            if let Some(run) = entry.run {
                let _ = run.stop.send(true);
            }
        }

        tracing::info!(task_id = %task_id, "Transfer cancelled");
        self.dispatch();
        Ok(())
    }

    /// Take a pending or executing task out of the queue.
    ///
    /// An executing task's in-flight I/O is only signalled to stop; its
    /// completion is discarded.
    pub async fn pause(&self, task_id: &str) -> Result<TransferTask> {
        let task = {
            let mut state = self.inner.lock();
            let Some(entry) = state.tasks.get_mut(task_id) else {
                return Err(self.missing_or_terminal(&state, task_id, "pause"));
            };
            let status = entry.task.status;
            if !(status == TransferStatus::Pending || status.is_active()) {
                return Err(Error::InvalidTransition {
                    action: "pause",
                    state: status.to_string(),
                });
            }
            entry.task.status = TransferStatus::Paused;
            entry.task.speed = 0;
            if let Some(run) = entry.run.take() {
                let _ = run.stop.send(true);
            }
            let task = entry.task.clone();
            state.pending.retain(|id| id != task_id);
            state.active.remove(task_id);
            task
        };

        tracing::info!(task_id = %task_id, "Transfer paused");
        self.publish(EngineEvent::TransferProgress(task.clone()));
        self.dispatch();
        Ok(task)
    }

    /// Put a paused task back at the end of the pending queue.
    ///
    /// Progress is cleared; the next run transfers the whole file again.
    pub async fn resume(&self, task_id: &str) -> Result<TransferTask> {
        let task = {
            let mut state = self.inner.lock();
            let Some(entry) = state.tasks.get_mut(task_id) else {
                return Err(self.missing_or_terminal(&state, task_id, "resume"));
            };
            if entry.task.status != TransferStatus::Paused {
                return Err(Error::InvalidTransition {
                    action: "resume",
                    state: entry.task.status.to_string(),
                });
            }
            // The executor restarts from byte zero.
            entry.task.status = TransferStatus::Pending;
            entry.task.transferred_bytes = 0;
            entry.task.speed = 0;
            entry.task.start_time = None;
            let task = entry.task.clone();
            state.pending.push_back(task_id.to_string());
            task
        };

        tracing::info!(task_id = %task_id, "Transfer resumed");
        self.publish(EngineEvent::TransferProgress(task.clone()));
        self.dispatch();
        Ok(self.get(task_id).unwrap_or(task))
    }

    /// Cancel every non-terminal task belonging to `connection_id`.
    ///
    /// Returns the number of cancelled tasks.
    pub async fn cancel_for_connection(&self, connection_id: &str) -> usize {
        let ids: Vec<String> = {
            let state = self.inner.lock();
            state
                .tasks
                .values()
                .filter(|e| e.task.metadata.connection_id.as_deref() == Some(connection_id))
                .map(|e| e.task.id.clone())
                .collect()
        };

        let mut cancelled = 0;
        for id in ids {
            if self.cancel(&id).await.is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Snapshot of a task, live or finished.
    #[must_use]
    pub fn get(&self, task_id: &str) -> Option<TransferTask> {
        let state = self.inner.lock();
        state
            .tasks
            .get(task_id)
            .map(|e| e.task.clone())
            .or_else(|| state.history.iter().find(|t| t.id == task_id).cloned())
    }

    /// All non-terminal tasks in queue order.
    #[must_use]
    pub fn tasks(&self) -> Vec<TransferTask> {
        let state = self.inner.lock();
        let mut entries: Vec<&Entry> = state.tasks.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.task.clone()).collect()
    }

    /// Finished tasks, newest first.
    #[must_use]
    pub fn history(&self) -> Vec<TransferTask> {
        self.inner.lock().history.iter().cloned().collect()
    }

    /// Number of tasks executing I/O.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    /// Number of tasks waiting for a slot.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    fn missing_or_terminal(&self, state: &QueueState, task_id: &str, action: &'static str) -> Error {
        match state.history.iter().find(|t| t.id == task_id) {
            Some(task) => Error::InvalidTransition {
                action,
                state: task.status.to_string(),
            },
            None => Error::TaskNotFound(task_id.to_string()),
        }
    }

    fn publish(&self, event: EngineEvent) {
        self.inner.events.publish(event);
    }

    /// Start pending tasks while the active set has room.
    fn dispatch(&self) {
        let mut launches = Vec::new();
        {
            let mut state = self.inner.lock();
            let cap = self.inner.config.concurrent_transfers.max(1);
            let now = self.inner.clock.now_millis();

            while state.active.len() < cap {
                let Some(id) = state.pending.pop_front() else {
                    break;
                };
                let run_id = state.next_run;
                state.next_run += 1;

                let Some(entry) = state.tasks.get_mut(&id) else {
                    continue;
                };
                if entry.task.status != TransferStatus::Pending {
                    continue;
                }

                entry.task.status = match entry.task.kind {
                    TransferKind::Upload => TransferStatus::Uploading,
                    TransferKind::Download => TransferStatus::Downloading,
                };
                entry.task.start_time.get_or_insert(now);

                let (stop_tx, stop_rx) = watch::channel(false);
                entry.run = Some(Run {
                    id: run_id,
                    stop: stop_tx,
                });

                let job = TransferJob {
                    task_id: id.clone(),
                    kind: entry.task.kind,
                    endpoint: Arc::clone(&entry.endpoint),
                    local_path: entry.task.file_path.clone(),
                    remote_path: entry.task.remote_path.clone(),
                };
                let task = entry.task.clone();
                state.active.insert(id.clone());
                launches.push((job, task, run_id, stop_rx));
            }
        }

        for (job, task, run_id, stop_rx) in launches {
            tracing::debug!(task_id = %task.id, status = %task.status, "Transfer started");
            self.publish(EngineEvent::TransferProgress(task));

            let manager = self.clone();
            tokio::spawn(async move {
                let reporter = ProgressReporter::attached(
                    Arc::downgrade(&manager.inner),
                    job.task_id.clone(),
                    run_id,
                    stop_rx,
                );
                let result = match manager.inner.executors.get(job.endpoint.protocol) {
                    Some(executor) => match job.kind {
                        TransferKind::Upload => executor.upload(&job, &reporter).await,
                        TransferKind::Download => executor.download(&job, &reporter).await,
                    },
                    None => Err(Error::Unsupported {
                        protocol: job.endpoint.protocol,
                        operation: operation_name(job.kind).to_string(),
                    }),
                };
                manager.finish(&job.task_id, run_id, result);
            });
        }
    }

    /// Record an executor's outcome and refill the active set.
    fn finish(&self, task_id: &str, run_id: u64, result: Result<u64>) {
        let finished = {
            let mut state = self.inner.lock();
            let current = state
                .tasks
                .get(task_id)
                .and_then(|e| e.run.as_ref())
                .is_some_and(|run| run.id == run_id);
            if !current {
                tracing::debug!(task_id = %task_id, "Discarding late transfer completion");
                None
            } else {
                state.active.remove(task_id);
                state.tasks.remove(task_id).map(|entry| {
                    let mut task = entry.task;
                    task.end_time = Some(self.inner.clock.now_millis());
                    match result {
                        Ok(bytes) => {
                            if task.total_bytes == 0 {
                                task.total_bytes = bytes.max(task.transferred_bytes);
                            }
                            task.transferred_bytes = task.total_bytes;
                            task.status = TransferStatus::Completed;
                        }
                        Err(e) => {
                            task.status = TransferStatus::Failed;
                            task.error_message = Some(e.to_string());
                        }
                    }
                    state.history.push_front(task.clone());
                    state.history.truncate(self.inner.config.history_limit.max(1));
                    task
                })
            }
        };

        if let Some(task) = finished {
            match task.status {
                TransferStatus::Completed => tracing::info!(
                    task_id = %task.id,
                    bytes = task.transferred_bytes,
                    "Transfer completed"
                ),
                _ => tracing::error!(
                    task_id = %task.id,
                    error = task.error_message.as_deref().unwrap_or(""),
                    "Transfer failed"
                ),
            }
            self.publish(EngineEvent::TransferFinished(task));
        }
        self.dispatch();
    }
}

impl Inner {
    fn record_total(&self, task_id: &str, run_id: u64, total: u64) {
        let mut state = self.lock();
        if let Some(entry) = live_entry(&mut state, task_id, run_id) {
            entry.task.total_bytes = total;
        }
    }

    fn record_progress(&self, task_id: &str, run_id: u64, transferred: u64) {
        let now = self.clock.now_millis();
        let task = {
            let mut state = self.lock();
            let Some(entry) = live_entry(&mut state, task_id, run_id) else {
                return;
            };
            let task = &mut entry.task;
            task.transferred_bytes = task.transferred_bytes.max(transferred);
            let elapsed = now.saturating_sub(task.start_time.unwrap_or(now)).max(1);
            task.speed = task.transferred_bytes.saturating_mul(1000) / elapsed;
            task.clone()
        };
        self.events.publish(EngineEvent::TransferProgress(task));
    }
}

fn live_entry<'a>(state: &'a mut QueueState, task_id: &str, run_id: u64) -> Option<&'a mut Entry> {
    state
        .tasks
        .get_mut(task_id)
        .filter(|e| e.task.status.is_active() && e.run.as_ref().is_some_and(|r| r.id == run_id))
}

fn operation_name(kind: TransferKind) -> &'static str {
    match kind {
        TransferKind::Upload => "upload",
        TransferKind::Download => "download",
    }
}

fn file_name_of(path: &str) -> String {
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("file")
        .to_string()
}
