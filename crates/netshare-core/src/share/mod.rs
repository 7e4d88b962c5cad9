//! Expiring share links.
//!
//! The [`ShareLinkRegistry`] mints a [`ShareRecord`] for one or more local
//! files and hands back a URL embedding the record's time-ordered id:
//!
//! - `{base_url}/file/{shareId}` for a single file
//! - `{base_url}/files/{shareId}` for a file set
//!
//! A record expires once more than the configured window (24 hours by
//! default) has passed since `createdAt`. Expired records refuse downloads
//! and are removed by [`ShareLinkRegistry::cleanup_expired_shares`].

mod qr;

pub use qr::QrPayload;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use uuid::{NoContext, Timestamp, Uuid};

use crate::clock::Clock;
use crate::config::ShareConfig;
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus};
use crate::storage::KeyValueStore;

/// Key prefix of persisted share records.
pub const KEY_PREFIX: &str = "share/";

/// Whether a share covers one file or a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShareKind {
    /// One file, served at `/file/{id}`
    SingleFile,
    /// Several files, served at `/files/{id}`
    MultiFile,
}

/// Metadata of a link-accessible file or file set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRecord {
    /// Time-ordered identifier
    pub share_id: String,
    /// Single or multi-file
    #[serde(rename = "type")]
    pub kind: ShareKind,
    /// Absolute paths of the shared files
    pub file_paths: Vec<PathBuf>,
    /// File names, parallel to `file_paths`
    pub file_names: Vec<String>,
    /// Total size in bytes
    pub file_size: u64,
    /// Epoch milliseconds of creation
    pub created_at: u64,
    /// Successful downloads so far
    pub download_count: u64,
    /// Device that minted the share
    pub device_id: String,
    /// Shareable URL
    pub url: String,
}

impl ShareRecord {
    /// Path of the first (for single-file shares, the only) file.
    #[must_use]
    pub fn file_path(&self) -> Option<&Path> {
        self.file_paths.first().map(PathBuf::as_path)
    }

    /// Name of the first (for single-file shares, the only) file.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.file_names.first().map(String::as_str)
    }

    /// Whether more than `window` has passed since creation at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: u64, window: Duration) -> bool {
        now.saturating_sub(self.created_at) > duration_millis(window)
    }

    /// Time left before expiry at `now`; zero once expired.
    #[must_use]
    pub fn time_remaining_at(&self, now: u64, window: Duration) -> Duration {
        let expires_at = self.created_at.saturating_add(duration_millis(window));
        Duration::from_millis(expires_at.saturating_sub(now))
    }

    fn storage_key(&self) -> String {
        format!("{KEY_PREFIX}{}", self.share_id)
    }
}

/// A share record together with its expiry state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareInfo {
    /// The stored record
    #[serde(flatten)]
    pub record: ShareRecord,
    /// Whether the record is past its window
    pub is_expired: bool,
    /// Milliseconds until expiry, zero once expired
    #[serde(rename = "timeRemaining")]
    pub time_remaining_ms: u64,
}

impl ShareInfo {
    /// Time left before expiry.
    #[must_use]
    pub fn time_remaining(&self) -> Duration {
        Duration::from_millis(self.time_remaining_ms)
    }
}

/// Result of minting a share.
#[derive(Debug, Clone)]
pub struct ShareLink {
    /// Id embedded in the URL
    pub share_id: String,
    /// Shareable URL
    pub url: String,
    /// The persisted record
    pub record: ShareRecord,
}

/// Mints, looks up and expires share records.
pub struct ShareLinkRegistry {
    config: ShareConfig,
    device_id: String,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for ShareLinkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareLinkRegistry")
            .field("config", &self.config)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

impl ShareLinkRegistry {
    /// Create a registry persisting through `store`.
    #[must_use]
    pub fn new(
        config: ShareConfig,
        device_id: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            device_id: device_id.into(),
            store,
            clock,
            events,
            write_lock: Mutex::new(()),
        }
    }

    /// Subscribe to engine events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Share a single file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileNotFound`] if `path` is not an existing regular
    /// file.
    pub async fn generate_shareable_link(&self, path: impl AsRef<Path>) -> Result<ShareLink> {
        self.mint(ShareKind::SingleFile, &[path.as_ref().to_path_buf()])
            .await
    }

    /// Share several files under one link.
    pub async fn generate_shareable_link_multi(&self, paths: &[PathBuf]) -> Result<ShareLink> {
        if paths.is_empty() {
            return Err(Error::InvalidInput("no files to share".into()));
        }
        self.mint(ShareKind::MultiFile, paths).await
    }

    async fn mint(&self, kind: ShareKind, paths: &[PathBuf]) -> Result<ShareLink> {
        let mut file_paths = Vec::with_capacity(paths.len());
        let mut file_names = Vec::with_capacity(paths.len());
        let mut file_size = 0u64;

        for path in paths {
            let (absolute, size) = regular_file(path).await?;
            let name = absolute
                .file_name()
                .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().to_string());
            // Multi-file downloads land side by side in one directory.
            if file_names.contains(&name) {
                return Err(Error::InvalidInput(format!(
                    "more than one shared file is named '{name}'"
                )));
            }
            file_names.push(name);
            file_paths.push(absolute);
            file_size += size;
        }

        let created_at = self.clock.now_millis();
        let share_id = time_ordered_id(created_at);
        let segment = match kind {
            ShareKind::SingleFile => "file",
            ShareKind::MultiFile => "files",
        };
        let url = format!(
            "{}/{segment}/{share_id}",
            self.config.base_url.trim_end_matches('/')
        );

        let record = ShareRecord {
            share_id: share_id.clone(),
            kind,
            file_paths,
            file_names,
            file_size,
            created_at,
            download_count: 0,
            device_id: self.device_id.clone(),
            url: url.clone(),
        };
        self.save(&record)?;

        tracing::info!(share_id = %share_id, files = record.file_paths.len(), "Share link created");
        self.events.publish(EngineEvent::ShareCreated(record.clone()));

        Ok(ShareLink {
            share_id,
            url,
            record,
        })
    }

    /// Look up a record and its expiry state.
    pub fn get_share_info(&self, share_id: &str) -> Result<ShareInfo> {
        let record = self.load(share_id)?;
        let now = self.clock.now_millis();
        Ok(ShareInfo {
            is_expired: record.is_expired_at(now, self.config.expiry),
            time_remaining_ms: duration_millis(record.time_remaining_at(now, self.config.expiry)),
            record,
        })
    }

    /// Copy the shared file(s) to `dest` and count the download.
    ///
    /// For a single-file share `dest` is the target file, or a directory to
    /// copy into if it already exists as one. For a multi-file share `dest`
    /// is always a directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShareExpired`] without counting when the record is
    /// past its window.
    pub async fn download_shared_file(&self, share_id: &str, dest: impl AsRef<Path>) -> Result<ShareRecord> {
        let dest = dest.as_ref();
        let record = self.load(share_id)?;
        if record.is_expired_at(self.clock.now_millis(), self.config.expiry) {
            tracing::warn!(share_id = %share_id, "Refusing download of expired share");
            return Err(Error::ShareExpired(share_id.to_string()));
        }

        match record.kind {
            ShareKind::SingleFile => {
                let (source, name) = record
                    .file_paths
                    .first()
                    .zip(record.file_names.first())
                    .ok_or_else(|| Error::Internal(format!("share '{share_id}' has no files")))?;
                let target = if tokio::fs::metadata(dest).await.is_ok_and(|m| m.is_dir()) {
                    dest.join(name)
                } else {
                    dest.to_path_buf()
                };
                copy_file(source, &target).await?;
            }
            ShareKind::MultiFile => {
                tokio::fs::create_dir_all(dest).await?;
                for (source, name) in record.file_paths.iter().zip(&record.file_names) {
                    copy_file(source, &dest.join(name)).await?;
                }
            }
        }

        let _guard = self.write_lock.lock().await;
        let mut record = self.load(share_id)?;
        record.download_count += 1;
        self.save(&record)?;

        tracing::info!(
            share_id = %share_id,
            downloads = record.download_count,
            "Shared file downloaded"
        );
        Ok(record)
    }

    /// Delete every record past its window. Returns how many were removed.
    pub async fn cleanup_expired_shares(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let now = self.clock.now_millis();
        let mut removed = 0;

        for key in self.store.list_keys(KEY_PREFIX)? {
            let Some(bytes) = self.store.load(&key)? else {
                continue;
            };
            let expired = match serde_json::from_slice::<ShareRecord>(&bytes) {
                Ok(record) => record.is_expired_at(now, self.config.expiry),
                Err(e) => {
                    tracing::warn!(key = %key, "Removing unreadable share record: {}", e);
                    true
                }
            };
            if expired {
                self.store.delete(&key)?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Expired shares cleaned up");
        }
        self.events.publish(EngineEvent::SharesExpired { removed });
        Ok(removed)
    }

    /// All stored records, oldest first.
    pub fn list_shares(&self) -> Result<Vec<ShareRecord>> {
        let mut records = Vec::new();
        for key in self.store.list_keys(KEY_PREFIX)? {
            let Some(bytes) = self.store.load(&key)? else {
                continue;
            };
            match serde_json::from_slice::<ShareRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(key = %key, "Skipping unreadable share record: {}", e),
            }
        }
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.share_id.cmp(&b.share_id))
        });
        Ok(records)
    }

    /// Encode `data` (usually a share URL) as a QR payload.
    pub fn generate_qr_code(&self, data: &str) -> Result<QrPayload> {
        QrPayload::new(data)
    }

    fn load(&self, share_id: &str) -> Result<ShareRecord> {
        let bytes = self
            .store
            .load(&format!("{KEY_PREFIX}{share_id}"))?
            .ok_or_else(|| Error::ShareNotFound(share_id.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save(&self, record: &ShareRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.store.save(&record.storage_key(), &bytes)
    }
}

/// Canonical path and size of an existing regular file.
async fn regular_file(path: &Path) -> Result<(PathBuf, u64)> {
    let not_found = || Error::FileNotFound(path.display().to_string());
    let absolute = tokio::fs::canonicalize(path).await.map_err(|_| not_found())?;
    let meta = tokio::fs::metadata(&absolute).await.map_err(|_| not_found())?;
    if !meta.is_file() {
        return Err(not_found());
    }
    Ok((absolute, meta.len()))
}

async fn copy_file(source: &Path, target: &Path) -> Result<()> {
    if !tokio::fs::metadata(source).await.is_ok_and(|m| m.is_file()) {
        return Err(Error::FileNotFound(source.display().to_string()));
    }
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(source, target).await?;
    Ok(())
}

/// UUIDv7 stamped with the registry clock, so ids sort by creation time.
fn time_ordered_id(now_millis: u64) -> String {
    let secs = now_millis / 1000;
    let nanos = u32::try_from((now_millis % 1000) * 1_000_000).unwrap_or(0);
    Uuid::new_v7(Timestamp::from_unix(NoContext, secs, nanos)).to_string()
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn registry(clock: Arc<ManualClock>) -> (ShareLinkRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = ShareLinkRegistry::new(
            ShareConfig::default(),
            "laptop",
            store.clone(),
            clock,
            EventBus::default(),
        );
        (registry, store)
    }

    fn file_in(dir: &TempDir, name: &str, len: usize) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, vec![b'x'; len]).unwrap();
        path
    }

    #[test]
    fn test_expiry_boundary() {
        let record = ShareRecord {
            share_id: "s".into(),
            kind: ShareKind::SingleFile,
            file_paths: vec![],
            file_names: vec![],
            file_size: 0,
            created_at: 1_000,
            download_count: 0,
            device_id: "d".into(),
            url: String::new(),
        };
        let window = 24 * HOUR;
        let limit = 1_000 + 24 * 3_600_000;

        assert!(!record.is_expired_at(limit, window));
        assert!(record.is_expired_at(limit + 1, window));
        assert_eq!(record.time_remaining_at(limit - 500, window), Duration::from_millis(500));
        assert_eq!(record.time_remaining_at(limit + 10_000, window), Duration::ZERO);
    }

    #[test]
    fn test_time_ordered_ids() {
        let a = time_ordered_id(1_700_000_000_000);
        let b = time_ordered_id(1_700_000_000_001);
        assert!(a < b);
        assert_eq!(Uuid::parse_str(&a).unwrap().get_version_num(), 7);
    }

    #[test]
    fn test_record_serialization_uses_camel_case() {
        let record = ShareRecord {
            share_id: "abc".into(),
            kind: ShareKind::MultiFile,
            file_paths: vec![PathBuf::from("/a"), PathBuf::from("/b")],
            file_names: vec!["a".into(), "b".into()],
            file_size: 3,
            created_at: 42,
            download_count: 1,
            device_id: "dev".into(),
            url: "https://x/files/abc".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["shareId"], "abc");
        assert_eq!(json["type"], "multi-file");
        assert_eq!(json["createdAt"], 42);
        assert_eq!(json["downloadCount"], 1);
        assert_eq!(json["fileNames"][1], "b");
    }

    #[tokio::test]
    async fn test_generate_and_lookup() {
        let dir = TempDir::new().unwrap();
        let path = file_in(&dir, "report.pdf", 64);
        let (registry, _) = registry(Arc::new(ManualClock::new(10_000)));

        let link = registry.generate_shareable_link(&path).await.unwrap();
        assert_eq!(link.url, format!("https://netshare.local/file/{}", link.share_id));

        let info = registry.get_share_info(&link.share_id).unwrap();
        assert_eq!(info.record.file_name(), Some("report.pdf"));
        assert_eq!(info.record.file_size, 64);
        assert_eq!(
            info.record.file_path(),
            Some(std::fs::canonicalize(&path).unwrap().as_path())
        );
        assert_eq!(info.record.device_id, "laptop");
        assert!(!info.is_expired);
        assert_eq!(info.time_remaining(), 24 * HOUR);
    }

    #[tokio::test]
    async fn test_missing_file_rejected() {
        let dir = TempDir::new().unwrap();
        let (registry, store) = registry(Arc::new(ManualClock::new(0)));

        let err = registry
            .generate_shareable_link(dir.path().join("nope.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));

        let err = registry.generate_shareable_link(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
        assert!(store.list_keys("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_counts_and_copies() {
        let dir = TempDir::new().unwrap();
        let path = file_in(&dir, "a.txt", 10);
        let out = TempDir::new().unwrap();
        let (registry, _) = registry(Arc::new(ManualClock::new(0)));

        let link = registry.generate_shareable_link(&path).await.unwrap();
        let record = registry
            .download_shared_file(&link.share_id, out.path())
            .await
            .unwrap();
        assert_eq!(record.download_count, 1);
        assert_eq!(std::fs::read(out.path().join("a.txt")).unwrap().len(), 10);

        let record = registry
            .download_shared_file(&link.share_id, out.path().join("renamed.txt"))
            .await
            .unwrap();
        assert_eq!(record.download_count, 2);
        assert!(out.path().join("renamed.txt").exists());
    }

    #[tokio::test]
    async fn test_expired_download_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = file_in(&dir, "a.txt", 10);
        let out = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let (registry, _) = registry(clock.clone());

        let link = registry.generate_shareable_link(&path).await.unwrap();
        clock.advance(25 * HOUR);

        let info = registry.get_share_info(&link.share_id).unwrap();
        assert!(info.is_expired);
        assert_eq!(info.time_remaining(), Duration::ZERO);

        let err = registry
            .download_shared_file(&link.share_id, out.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ShareExpired(_)));
        assert_eq!(
            registry.get_share_info(&link.share_id).unwrap().record.download_count,
            0
        );
    }

    #[tokio::test]
    async fn test_multi_file_share() {
        let dir = TempDir::new().unwrap();
        let paths = vec![file_in(&dir, "one.txt", 3), file_in(&dir, "two.txt", 4)];
        let out = TempDir::new().unwrap();
        let (registry, _) = registry(Arc::new(ManualClock::new(0)));

        let link = registry.generate_shareable_link_multi(&paths).await.unwrap();
        assert!(link.url.contains("/files/"));
        assert_eq!(link.record.file_size, 7);
        assert_eq!(link.record.kind, ShareKind::MultiFile);

        let dest = out.path().join("bundle");
        registry.download_shared_file(&link.share_id, &dest).await.unwrap();
        assert!(dest.join("one.txt").exists());
        assert!(dest.join("two.txt").exists());

        assert!(registry.generate_shareable_link_multi(&[]).await.is_err());
    }

    #[tokio::test]
    async fn test_multi_file_share_rejects_duplicate_names() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let paths = vec![file_in(&first, "a.txt", 3), file_in(&second, "a.txt", 5)];
        let (registry, store) = registry(Arc::new(ManualClock::new(0)));

        let err = registry.generate_shareable_link_multi(&paths).await.unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(store.list_keys("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let (registry, _) = registry(clock.clone());

        let old = registry
            .generate_shareable_link(file_in(&dir, "old.txt", 1))
            .await
            .unwrap();
        clock.advance(20 * HOUR);
        let fresh = registry
            .generate_shareable_link(file_in(&dir, "fresh.txt", 1))
            .await
            .unwrap();
        clock.advance(5 * HOUR);

        assert_eq!(registry.cleanup_expired_shares().await.unwrap(), 1);
        assert!(matches!(
            registry.get_share_info(&old.share_id),
            Err(Error::ShareNotFound(_))
        ));
        let remaining = registry.list_shares().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].share_id, fresh.share_id);
    }

    #[tokio::test]
    async fn test_unknown_share() {
        let (registry, _) = registry(Arc::new(ManualClock::new(0)));
        assert!(matches!(
            registry.get_share_info("missing"),
            Err(Error::ShareNotFound(_))
        ));
        let out = TempDir::new().unwrap();
        assert!(matches!(
            registry.download_shared_file("missing", out.path()).await,
            Err(Error::ShareNotFound(_))
        ));
    }
}
