//! Saved remote endpoints.
//!
//! A [`ConnectionProfile`] describes a server files can be pushed to or
//! pulled from. Profiles enter the [`ConnectionRegistry`] only after a
//! protocol-specific liveness probe succeeds:
//!
//! | Protocol | Probe |
//! |----------|-------|
//! | FTP | connect, read greeting, log in, `QUIT` |
//! | HTTP / HTTPS | `HEAD` on the base URL, 2xx expected |
//! | SFTP | assumed reachable |
//!
//! Profile JSON is persisted under `connection/<id>`; the password lives in
//! the [`SecretStore`] under the same key and is never serialized.

mod probe;

pub use probe::{ConnectivityProbe, NetworkProbe};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::storage::{KeyValueStore, SecretStore};
use crate::transfer::TransferManager;

/// Key prefix of persisted profiles and their secrets.
pub const KEY_PREFIX: &str = "connection/";

/// Transfer protocol spoken by a remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// File Transfer Protocol
    Ftp,
    /// SSH File Transfer Protocol
    Sftp,
    /// Plain HTTP
    Http,
    /// HTTP over TLS
    Https,
}

impl Protocol {
    /// Well-known port of the protocol.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Ftp => 21,
            Self::Sftp => 22,
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ftp => write!(f, "ftp"),
            Self::Sftp => write!(f, "sftp"),
            Self::Http => write!(f, "http"),
            Self::Https => write!(f, "https"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ftp" => Ok(Self::Ftp),
            "sftp" => Ok(Self::Sftp),
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(Error::InvalidInput(format!(
                "Unknown protocol '{other}'. Use ftp, sftp, http or https"
            ))),
        }
    }
}

/// A saved remote endpoint.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    /// Unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Protocol spoken by the endpoint
    pub protocol: Protocol,
    /// User name, if the endpoint requires one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Password or token; kept in the secret store, never serialized
    #[serde(skip)]
    pub secret: Option<String>,
    /// Extra headers sent with HTTP requests
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_headers: BTreeMap<String, String>,
    /// Remote directory used when a transfer names no directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
    /// Use TLS where the protocol allows it
    #[serde(default)]
    pub is_secure: bool,
    /// Whether the last probe succeeded
    #[serde(default)]
    pub is_active: bool,
    /// Epoch milliseconds of the last successful connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<u64>,
    /// Epoch milliseconds of the last update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("user", &self.user)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("remote_path", &self.remote_path)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

impl ConnectionProfile {
    /// Create an inactive profile with a fresh id.
    #[must_use]
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            host: host.into(),
            port,
            protocol,
            user: None,
            secret: None,
            custom_headers: BTreeMap::new(),
            remote_path: None,
            is_secure: protocol == Protocol::Https,
            is_active: false,
            last_connected: None,
            updated_at: None,
        }
    }

    /// Set user name and secret.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, secret: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.secret = Some(secret.into());
        self
    }

    /// Add an HTTP header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(name.into(), value.into());
        self
    }

    /// Set the default remote directory.
    #[must_use]
    pub fn with_remote_path(mut self, path: impl Into<String>) -> Self {
        self.remote_path = Some(path.into());
        self
    }

    /// Base URL for HTTP-family protocols, e.g. `https://10.0.0.2:8443`.
    #[must_use]
    pub fn base_url(&self) -> String {
        let scheme = match self.protocol {
            Protocol::Https => "https",
            Protocol::Http if self.is_secure => "https",
            Protocol::Http => "http",
            Protocol::Ftp => "ftp",
            Protocol::Sftp => "sftp",
        };
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("{scheme}://[{}]:{}", self.host, self.port)
        } else {
            format!("{scheme}://{}:{}", self.host, self.port)
        }
    }

    /// Check fields that would make the profile unusable.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidInput("connection id must not be empty".into()));
        }
        let host = self.host.trim();
        if host.is_empty() || host.contains(char::is_whitespace) || host.contains('/') {
            return Err(Error::InvalidInput(format!("invalid host '{}'", self.host)));
        }
        if self.port == 0 {
            return Err(Error::InvalidInput("port must be between 1 and 65535".into()));
        }
        Ok(())
    }

    fn storage_key(&self) -> String {
        storage_key(&self.id)
    }
}

fn storage_key(id: &str) -> String {
    format!("{KEY_PREFIX}{id}")
}

/// Parse `host`, `host:port`, `[v6]` or `[v6]:port` into an address.
///
/// ```
/// use netshare_core::connection::parse_host_address;
///
/// let addr = parse_host_address("192.168.1.100", 8080).unwrap();
/// assert_eq!(addr.port(), 8080);
///
/// let addr = parse_host_address("192.168.1.100:2121", 8080).unwrap();
/// assert_eq!(addr.port(), 2121);
/// ```
pub fn parse_host_address(host: &str, default_port: u16) -> Result<SocketAddr> {
    let host = host.trim();
    let invalid = || {
        Error::InvalidInput(format!(
            "Invalid host format '{host}'. Use IP or IP:PORT (e.g., 192.168.1.100 or 192.168.1.100:8080)"
        ))
    };

    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        let ip: IpAddr = inner.parse().map_err(|_| invalid())?;
        return Ok(SocketAddr::new(ip, default_port));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    if let Some((ip_part, port_part)) = host.rsplit_once(':') {
        if !ip_part.contains(':') {
            let ip: IpAddr = ip_part.parse().map_err(|_| invalid())?;
            let port: u16 = port_part.parse().map_err(|_| {
                Error::InvalidInput(format!(
                    "Invalid port '{port_part}'. Port must be a number between 1 and 65535"
                ))
            })?;
            return Ok(SocketAddr::new(ip, port));
        }
    }

    Err(invalid())
}

/// Store of validated connection profiles.
pub struct ConnectionRegistry {
    store: Arc<dyn KeyValueStore>,
    secrets: Arc<dyn SecretStore>,
    prober: Arc<dyn ConnectivityProbe>,
    clock: Arc<dyn Clock>,
    config: ConnectionConfig,
    profiles: RwLock<HashMap<String, ConnectionProfile>>,
    transfers: Option<TransferManager>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        store: Arc<dyn KeyValueStore>,
        secrets: Arc<dyn SecretStore>,
        prober: Arc<dyn ConnectivityProbe>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            secrets,
            prober,
            clock,
            config,
            profiles: RwLock::new(HashMap::new()),
            transfers: None,
        }
    }

    /// Cancel transfers through `transfers` when a profile is removed.
    #[must_use]
    pub fn with_transfers(mut self, transfers: TransferManager) -> Self {
        self.transfers = Some(transfers);
        self
    }

    /// Rehydrate profiles (and their secrets) from the store.
    ///
    /// Entries that fail to parse are logged and skipped.
    pub async fn load_all(&self) -> Result<usize> {
        let keys = self.store.list_keys(KEY_PREFIX)?;
        let mut profiles = self.profiles.write().await;

        for key in keys {
            let Some(bytes) = self.store.load(&key)? else {
                continue;
            };
            let mut profile: ConnectionProfile = match serde_json::from_slice(&bytes) {
                Ok(profile) => profile,
                Err(e) => {
                    tracing::warn!(key = %key, "Skipping unreadable connection profile: {}", e);
                    continue;
                }
            };
            profile.secret = self.secrets.secret(&key)?;
            profiles.insert(profile.id.clone(), profile);
        }

        Ok(profiles.len())
    }

    /// Probe `profile` and, on success, persist it as active.
    ///
    /// A failed probe leaves the registry and the stores untouched.
    pub async fn add(&self, mut profile: ConnectionProfile) -> Result<ConnectionProfile> {
        profile.validate()?;
        let duplicate = || Error::InvalidInput(format!("connection '{}' already exists", profile.id));
        if self.profiles.read().await.contains_key(&profile.id) {
            return Err(duplicate());
        }

        self.probe(&profile).await?;

        // Another add may have finished during the connectivity check.
        let mut profiles = self.profiles.write().await;
        if profiles.contains_key(&profile.id) {
            return Err(duplicate());
        }

        let now = self.clock.now_millis();
        profile.is_active = true;
        profile.last_connected = Some(now);
        profile.updated_at = Some(now);

        self.persist(&profile)?;
        profiles.insert(profile.id.clone(), profile.clone());
        drop(profiles);

        tracing::info!(
            connection_id = %profile.id,
            protocol = %profile.protocol,
            host = %profile.host,
            "Connection added"
        );
        Ok(profile)
    }

    /// Replace a stored profile's fields.
    ///
    /// A `None` secret keeps the previously stored secret.
    pub async fn update(&self, mut profile: ConnectionProfile) -> Result<ConnectionProfile> {
        profile.validate()?;
        let mut profiles = self.profiles.write().await;
        let existing = profiles
            .get(&profile.id)
            .ok_or_else(|| Error::ConnectionNotFound(profile.id.clone()))?;

        if profile.secret.is_none() {
            profile.secret.clone_from(&existing.secret);
        }
        profile.updated_at = Some(self.clock.now_millis());

        self.persist(&profile)?;
        profiles.insert(profile.id.clone(), profile.clone());

        tracing::info!(connection_id = %profile.id, "Connection updated");
        Ok(profile)
    }

    /// Delete a profile and cancel every transfer that references it.
    ///
    /// Returns the number of cancelled transfers. The profile stays registered if
    /// it cannot be deleted from the store.
    pub async fn remove(&self, id: &str) -> Result<usize> {
        {
            let mut profiles = self.profiles.write().await;
            let profile = profiles
                .get(id)
                .ok_or_else(|| Error::ConnectionNotFound(id.to_string()))?;

            let key = profile.storage_key();
            self.store.delete(&key)?;
            self.secrets.delete_secret(&key)?;
            profiles.remove(id);
        }

        let cancelled = match &self.transfers {
            Some(transfers) => transfers.cancel_for_connection(id).await,
            None => 0,
        };

        tracing::info!(connection_id = %id, cancelled, "Connection removed");
        Ok(cancelled)
    }

    /// Stamp `lastConnected` on a profile.
    pub async fn touch(&self, id: &str) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .get_mut(id)
            .ok_or_else(|| Error::ConnectionNotFound(id.to_string()))?;
        profile.last_connected = Some(self.clock.now_millis());
        let snapshot = profile.clone();
        drop(profiles);
        self.persist_profile_only(&snapshot)
    }

    /// Look up a profile by id.
    pub async fn get(&self, id: &str) -> Option<ConnectionProfile> {
        self.profiles.read().await.get(id).cloned()
    }

    /// Stored credential of a profile, read from the secret store.
    pub async fn secret_for(&self, id: &str) -> Result<Option<String>> {
        if !self.profiles.read().await.contains_key(id) {
            return Err(Error::ConnectionNotFound(id.to_string()));
        }
        self.secrets.secret(&storage_key(id))
    }

    /// All profiles, sorted by name.
    pub async fn list(&self) -> Vec<ConnectionProfile> {
        let mut profiles: Vec<_> = self.profiles.read().await.values().cloned().collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        profiles
    }

    /// Number of stored profiles.
    pub async fn len(&self) -> usize {
        self.profiles.read().await.len()
    }

    async fn probe(&self, profile: &ConnectionProfile) -> Result<()> {
        let timeout = self.config.probe_timeout;
        match tokio::time::timeout(timeout, self.prober.probe(profile)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::warn!(host = %profile.host, port = profile.port, "Connectivity probe failed: {}", e);
                Err(match e {
                    Error::Io(io) => Error::Connectivity(format!(
                        "{}:{} ({io})",
                        profile.host, profile.port
                    )),
                    other => other,
                })
            }
            Err(_) => {
                tracing::warn!(host = %profile.host, port = profile.port, "Connectivity probe timed out");
                Err(Error::Timeout(
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                ))
            }
        }
    }

    fn persist(&self, profile: &ConnectionProfile) -> Result<()> {
        let key = profile.storage_key();
        if let Some(secret) = &profile.secret {
            self.secrets.set_secret(&key, secret)?;
        }
        if let Err(e) = self.persist_profile_only(profile) {
            if profile.secret.is_some() {
                let _ = self.secrets.delete_secret(&key);
            }
            return Err(e);
        }
        Ok(())
    }

    fn persist_profile_only(&self, profile: &ConnectionProfile) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(profile)?;
        self.store.save(&profile.storage_key(), &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{MemorySecretStore, MemoryStore};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct StubProbe {
        fail: AtomicBool,
        hang: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ConnectivityProbe for StubProbe {
        async fn probe(&self, profile: &ConnectionProfile) -> Result<()> {
            if self.hang.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Connectivity(format!(
                    "{}:{} refused",
                    profile.host, profile.port
                )));
            }
            Ok(())
        }
    }

    struct Fixture {
        registry: ConnectionRegistry,
        store: Arc<MemoryStore>,
        secrets: Arc<MemorySecretStore>,
        probe: Arc<StubProbe>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let secrets = Arc::new(MemorySecretStore::new());
        let probe = Arc::new(StubProbe::default());
        let config = ConnectionConfig {
            probe_timeout: Duration::from_millis(100),
        };
        let registry = ConnectionRegistry::new(
            config,
            store.clone(),
            secrets.clone(),
            probe.clone(),
            Arc::new(ManualClock::new(5_000)),
        );
        Fixture {
            registry,
            store,
            secrets,
            probe,
        }
    }

    fn ftp_profile() -> ConnectionProfile {
        ConnectionProfile::new("NAS", "192.168.1.20", 21, Protocol::Ftp)
            .with_credentials("alice", "s3cret")
    }

    #[test]
    fn test_protocol_parse_and_display() {
        assert_eq!("FTP".parse::<Protocol>().unwrap(), Protocol::Ftp);
        assert_eq!(Protocol::Https.to_string(), "https");
        assert_eq!(Protocol::Sftp.default_port(), 22);
        assert!("gopher".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_profile_serialization_omits_secret() {
        let profile = ftp_profile();
        let json = serde_json::to_string(&profile).unwrap();

        assert!(!json.contains("s3cret"));
        assert!(json.contains("\"protocol\":\"ftp\""));
        assert!(json.contains("\"isSecure\":false"));

        let debug = format!("{profile:?}");
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_base_url() {
        let profile = ConnectionProfile::new("web", "10.0.0.5", 8443, Protocol::Https);
        assert_eq!(profile.base_url(), "https://10.0.0.5:8443");

        let profile = ConnectionProfile::new("v6", "fe80::1", 80, Protocol::Http);
        assert_eq!(profile.base_url(), "http://[fe80::1]:80");
    }

    #[test]
    fn test_validate() {
        assert!(ftp_profile().validate().is_ok());
        assert!(ConnectionProfile::new("x", "", 21, Protocol::Ftp).validate().is_err());
        assert!(ConnectionProfile::new("x", "host", 0, Protocol::Ftp).validate().is_err());
        assert!(ConnectionProfile::new("x", "a b", 21, Protocol::Ftp).validate().is_err());
    }

    #[test]
    fn test_parse_host_address() {
        let addr = parse_host_address("192.168.1.100", 21).unwrap();
        assert_eq!(addr.port(), 21);
        let addr = parse_host_address("[::1]:2121", 21).unwrap();
        assert_eq!(addr.port(), 2121);
        let addr = parse_host_address("[::1]", 21).unwrap();
        assert_eq!(addr.ip().to_string(), "::1");
        assert!(parse_host_address("192.168.1.100:99999", 21).is_err());
        assert!(parse_host_address("not-a-host", 21).is_err());
    }

    #[tokio::test]
    async fn test_add_persists_active_profile_and_secret() {
        let f = fixture();
        let added = f.registry.add(ftp_profile()).await.unwrap();

        assert!(added.is_active);
        assert_eq!(added.last_connected, Some(5_000));

        let key = format!("{KEY_PREFIX}{}", added.id);
        let stored = f.store.load(&key).unwrap().expect("profile persisted");
        let text = String::from_utf8(stored).unwrap();
        assert!(!text.contains("s3cret"));
        assert_eq!(f.secrets.secret(&key).unwrap().as_deref(), Some("s3cret"));
        assert_eq!(f.registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_add_with_failed_probe_leaves_registry_unchanged() {
        let f = fixture();
        f.probe.fail.store(true, Ordering::SeqCst);

        let err = f.registry.add(ftp_profile()).await.unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::Connectivity);
        assert_eq!(f.registry.len().await, 0);
        assert!(f.store.list_keys("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_probe_timeout() {
        let f = fixture();
        f.probe.hang.store(true, Ordering::SeqCst);

        let err = f.registry.add(ftp_profile()).await.unwrap_err();

        assert!(matches!(err, Error::Timeout(100)));
        assert_eq!(f.registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_update_keeps_secret_and_stamps_time() {
        let f = fixture();
        let added = f.registry.add(ftp_profile()).await.unwrap();

        let mut changed = added.clone();
        changed.name = "Basement NAS".to_string();
        changed.secret = None;
        let updated = f.registry.update(changed).await.unwrap();

        assert_eq!(updated.name, "Basement NAS");
        assert_eq!(updated.secret.as_deref(), Some("s3cret"));
        assert!(updated.updated_at.is_some());

        let missing = ConnectionProfile::new("ghost", "10.0.0.9", 21, Protocol::Ftp);
        assert!(matches!(
            f.registry.update(missing).await,
            Err(Error::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_deletes_profile_and_secret() {
        let f = fixture();
        let added = f.registry.add(ftp_profile()).await.unwrap();
        let key = format!("{KEY_PREFIX}{}", added.id);

        let cancelled = f.registry.remove(&added.id).await.unwrap();

        assert_eq!(cancelled, 0);
        assert!(f.registry.get(&added.id).await.is_none());
        assert!(f.store.load(&key).unwrap().is_none());
        assert!(f.secrets.secret(&key).unwrap().is_none());
        assert!(matches!(
            f.registry.remove(&added.id).await,
            Err(Error::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_add_saves_once() {
        let f = fixture();
        let profile = ftp_profile();

        let (a, b) = tokio::join!(f.registry.add(profile.clone()), f.registry.add(profile));

        assert!(a.is_ok() != b.is_ok(), "exactly one add should win");
        let err = a.err().or(b.err()).unwrap();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(f.registry.len().await, 1);
    }

    #[derive(Debug, Default)]
    struct UndeletableStore(MemoryStore);

    impl KeyValueStore for UndeletableStore {
        fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
            self.0.save(key, bytes)
        }

        fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.0.load(key)
        }

        fn delete(&self, _key: &str) -> Result<()> {
            Err(Error::Storage("disk is read-only".into()))
        }

        fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
            self.0.list_keys(prefix)
        }
    }

    #[tokio::test]
    async fn test_remove_keeps_profile_when_store_delete_fails() {
        let store = Arc::new(UndeletableStore::default());
        let registry = ConnectionRegistry::new(
            ConnectionConfig::default(),
            store.clone(),
            Arc::new(MemorySecretStore::new()),
            Arc::new(StubProbe::default()),
            Arc::new(ManualClock::new(0)),
        );
        let added = registry.add(ftp_profile()).await.unwrap();

        assert!(registry.remove(&added.id).await.is_err());

        assert!(registry.get(&added.id).await.is_some());
        assert!(store.load(&added.storage_key()).unwrap().is_some());
        assert_eq!(
            registry.secret_for(&added.id).await.unwrap().as_deref(),
            Some("s3cret")
        );
    }

    #[tokio::test]
    async fn test_secret_for() {
        let f = fixture();
        let added = f.registry.add(ftp_profile()).await.unwrap();

        assert_eq!(
            f.registry.secret_for(&added.id).await.unwrap().as_deref(),
            Some("s3cret")
        );
        assert!(matches!(
            f.registry.secret_for("unknown").await,
            Err(Error::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_load_all_rehydrates_secrets() {
        let f = fixture();
        let added = f.registry.add(ftp_profile()).await.unwrap();
        f.store.save("connection/broken", b"not json").unwrap();

        let reloaded = ConnectionRegistry::new(
            ConnectionConfig::default(),
            f.store.clone(),
            f.secrets.clone(),
            f.probe.clone(),
            Arc::new(ManualClock::new(0)),
        );
        assert_eq!(reloaded.load_all().await.unwrap(), 1);

        let profile = reloaded.get(&added.id).await.unwrap();
        assert_eq!(profile.secret.as_deref(), Some("s3cret"));
        assert_eq!(profile.host, "192.168.1.20");
    }
}
