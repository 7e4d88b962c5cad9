//! Common test utilities for `NetShare` integration tests.
//!
//! Not every test binary uses every helper.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use netshare_core::error::{Error, Result};
use netshare_core::transfer::{ProgressReporter, TransferExecutor, TransferJob};
use tokio::sync::Semaphore;

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &Path, path2: &Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1, content2, "File contents differ");
}

/// A loopback port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    listener.local_addr().expect("local addr").port()
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Executor that holds every transfer until the test releases it.
///
/// Reports half the file as progress on start and the rest on release.
/// Remote paths starting with `fail` end in an error.
#[derive(Debug)]
pub struct GateExecutor {
    gate: Semaphore,
    started: Mutex<Vec<String>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl GateExecutor {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            started: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    /// Let `n` held transfers finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Remote paths in the order their transfers started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Highest number of transfers held at once.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    async fn run(&self, job: &TransferJob, progress: &ProgressReporter) -> Result<u64> {
        self.started.lock().unwrap().push(job.remote_path.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let len = tokio::fs::metadata(&job.local_path)
            .await
            .map(|m| m.len())
            .unwrap_or(64);
        progress.set_total(len);
        progress.report(len / 2);

        let permit = self.gate.acquire().await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        permit
            .map_err(|_| Error::Internal("gate closed".into()))?
            .forget();

        if job.remote_path.starts_with("fail") {
            return Err(Error::Protocol("remote rejected the file".into()));
        }
        progress.report(len);
        Ok(len)
    }
}

#[async_trait]
impl TransferExecutor for GateExecutor {
    async fn upload(&self, job: &TransferJob, progress: &ProgressReporter) -> Result<u64> {
        self.run(job, progress).await
    }

    async fn download(&self, job: &TransferJob, progress: &ProgressReporter) -> Result<u64> {
        self.run(job, progress).await
    }
}
