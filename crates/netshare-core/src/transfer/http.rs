//! HTTP(S) transfer executor.
//!
//! Uploads are multipart `POST`s to `/upload` with a single `file` part
//! streamed from disk. The target directory travels as the `dir` query
//! parameter: the directory part of the task's remote path, else the
//! profile's `remote_path`. Downloads are streamed `GET`s; a bare file name
//! is looked up under the profile's `remote_path`. A peer running the
//! sharing server is a valid endpoint.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;

use super::executor::{ProgressReporter, TransferExecutor, TransferJob};
use crate::config::TransferConfig;
use crate::connection::ConnectionProfile;
use crate::error::{Error, Result};

/// Upload route of the sharing server.
pub const DEFAULT_UPLOAD_PATH: &str = "/upload";

/// Build a client carrying the profile's custom headers.
pub fn build_client(profile: &ConnectionProfile, connect_timeout: Duration) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    for (name, value) in &profile.custom_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::InvalidInput(format!("invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::InvalidInput(format!("invalid value for header '{name}'")))?;
        headers.insert(name, value);
    }

    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .default_headers(headers)
        .user_agent(concat!("netshare/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))
}

/// Join the profile's base URL with a remote path.
fn endpoint_url(profile: &ConnectionProfile, path: &str) -> String {
    format!("{}/{}", profile.base_url(), path.trim_start_matches('/'))
}

fn authorize(request: reqwest::RequestBuilder, profile: &ConnectionProfile) -> reqwest::RequestBuilder {
    match &profile.user {
        Some(user) => request.basic_auth(user, profile.secret.as_deref()),
        None => request,
    }
}

/// Runs transfers against HTTP and HTTPS endpoints.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    connect_timeout: Duration,
    chunk_size: usize,
}

impl HttpExecutor {
    /// Create an executor using the timeouts of `config`.
    #[must_use]
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            chunk_size: config.chunk_size,
        }
    }
}

/// Split an upload's remote path into the target directory and file name.
///
/// A remote path without a directory falls back to `default_dir`.
fn upload_target<'a>(remote_path: &'a str, default_dir: Option<&'a str>) -> (Option<&'a str>, &'a str) {
    let (dir, name) = match remote_path.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (default_dir, remote_path),
    };
    let dir = dir.map(|d| d.trim_matches('/')).filter(|d| !d.is_empty());
    let name = if name.is_empty() { "file" } else { name };
    (dir, name)
}

/// Remote path of a download, resolved against the profile's directory.
fn download_path(job: &TransferJob) -> String {
    match job.endpoint.remote_path.as_deref() {
        Some(dir) if !job.remote_path.contains('/') && !dir.trim_matches('/').is_empty() => {
            format!("{}/{}", dir.trim_end_matches('/'), job.remote_path)
        }
        _ => job.remote_path.clone(),
    }
}

#[async_trait]
impl TransferExecutor for HttpExecutor {
    async fn upload(&self, job: &TransferJob, progress: &ProgressReporter) -> Result<u64> {
        let file = File::open(&job.local_path).await?;
        let len = file.metadata().await?.len();
        progress.set_total(len);

        let (dir, file_name) = upload_target(&job.remote_path, job.endpoint.remote_path.as_deref());
        let file_name = file_name.to_string();

        progress.check()?;

        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let mut sent = 0u64;
        let body_stream = ReaderStream::with_capacity(file, self.chunk_size.max(1)).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                let _ = tx.send(sent);
            }
            chunk
        });

        let part = Part::stream_with_length(reqwest::Body::wrap_stream(body_stream), len)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(|e| Error::Internal(e.to_string()))?;
        let form = Form::new().part("file", part);

        let client = build_client(&job.endpoint, self.connect_timeout)?;
        let url = endpoint_url(&job.endpoint, DEFAULT_UPLOAD_PATH);
        let mut request = authorize(client.post(&url), &job.endpoint).multipart(form);
        if let Some(dir) = dir {
            request = request.query(&[("dir", dir)]);
        }

        let send = request.send();
        tokio::pin!(send);
        let response = loop {
            tokio::select! {
                response = &mut send => break response?,
                Some(sent) = rx.recv() => {
                    progress.report(sent);
                    progress.check()?;
                }
            }
        };
        while let Ok(sent) = rx.try_recv() {
            progress.report(sent);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Protocol(format!("POST {url} returned {status}")));
        }
        if let Ok(reply) = serde_json::from_str::<serde_json::Value>(&body) {
            if reply.get("status").and_then(|s| s.as_str()) == Some("error") {
                let message = reply
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("upload rejected");
                return Err(Error::Protocol(message.to_string()));
            }
        }

        progress.report(len);
        Ok(len)
    }

    async fn download(&self, job: &TransferJob, progress: &ProgressReporter) -> Result<u64> {
        let client = build_client(&job.endpoint, self.connect_timeout)?;
        let url = endpoint_url(&job.endpoint, &download_path(job));
        let response = authorize(client.get(&url), &job.endpoint).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Protocol(format!("GET {url} returned {status}")));
        }
        if let Some(len) = response.content_length() {
            progress.set_total(len);
        }

        if let Some(parent) = job.local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(&job.local_path).await?;
        let mut stream = response.bytes_stream();
        let mut received = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            progress.report(received);
            progress.check()?;
        }
        file.flush().await?;

        Ok(received)
    }
}
