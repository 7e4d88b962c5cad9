//! Configuration management for NetShare.
//!
//! Every component takes its own section by value at construction time;
//! there is no process-wide configuration singleton.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/netshare/config.toml` |
//! | macOS | `~/Library/Application Support/com.netshare.NetShare/config.toml` |
//! | Windows | `%APPDATA%\NetShare\NetShare\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use netshare_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Probe timeout: {:?}", config.discovery.probe_timeout);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for NetShare.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Discovery scan settings
    pub discovery: DiscoveryConfig,
    /// Transfer queue settings
    pub transfer: TransferConfig,
    /// Local sharing server settings
    pub server: ServerConfig,
    /// Share link settings
    pub share: ShareConfig,
    /// Connection registry settings
    pub connection: ConnectionConfig,
}

/// General configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Identifier recorded on share records created by this device
    pub device_id: String,
    /// Display name of this device
    pub device_name: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        let host = hostname::get().map_or_else(
            |_| "NetShare Device".to_string(),
            |h| h.to_string_lossy().to_string(),
        );
        Self {
            device_id: host.to_lowercase().replace(' ', "-"),
            device_name: host,
        }
    }
}

/// Discovery scan configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Ports probed on every host, in priority order
    pub candidate_ports: Vec<u16>,
    /// Timeout of a single TCP connect attempt
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    /// Maximum simultaneous connection attempts
    pub max_concurrent_probes: usize,
    /// Query the short-range discovery hook during scans
    pub short_range_enabled: bool,
    /// How long the short-range hook may run
    #[serde(with = "humantime_serde")]
    pub short_range_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            candidate_ports: crate::DEFAULT_CANDIDATE_PORTS.to_vec(),
            probe_timeout: Duration::from_millis(500),
            max_concurrent_probes: 64,
            short_range_enabled: true,
            short_range_timeout: Duration::from_secs(3),
        }
    }
}

/// Transfer queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum transfers executing at once
    pub concurrent_transfers: usize,
    /// Connect timeout for protocol executors
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Attempts per FTP transfer before giving up
    pub retry_attempts: u32,
    /// Delay between attempts, multiplied by the attempt number
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    /// Read/write buffer size
    pub chunk_size: usize,
    /// Number of finished tasks kept in history
    pub history_limit: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrent_transfers: crate::DEFAULT_CONCURRENT_TRANSFERS,
            connect_timeout: Duration::from_secs(5),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            history_limit: 100,
        }
    }
}

/// Local sharing server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Default listening port
    pub port: u16,
    /// Bind to localhost only
    pub localhost_only: bool,
    /// Maximum accepted upload body size in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_SERVER_PORT,
            localhost_only: false,
            max_upload_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// Share link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// Base of generated share URLs
    pub base_url: String,
    /// Lifetime of a share record
    #[serde(with = "humantime_serde")]
    pub expiry: Duration,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            base_url: "https://netshare.local".to_string(),
            expiry: crate::SHARE_EXPIRY,
        }
    }
}

/// Connection registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Timeout of the liveness probe run before a profile is saved
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read,
    /// parsed, or fails validation.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(&path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Check values that would make a component unusable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.discovery.candidate_ports.is_empty() {
            return Err(invalid("discovery.candidate_ports", "must not be empty"));
        }
        if self.discovery.candidate_ports.contains(&0) {
            return Err(invalid("discovery.candidate_ports", "port 0 is not probeable"));
        }
        if self.discovery.max_concurrent_probes == 0 {
            return Err(invalid("discovery.max_concurrent_probes", "must be at least 1"));
        }
        if self.transfer.concurrent_transfers == 0 {
            return Err(invalid("transfer.concurrent_transfers", "must be at least 1"));
        }
        if self.transfer.retry_attempts == 0 {
            return Err(invalid("transfer.retry_attempts", "must be at least 1"));
        }
        if self.transfer.chunk_size == 0 {
            return Err(invalid("transfer.chunk_size", "must be at least 1"));
        }
        if self.share.expiry.is_zero() {
            return Err(invalid("share.expiry", "must be non-zero"));
        }
        Ok(())
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the default data directory path (persisted records live here).
    #[must_use]
    pub fn data_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "netshare", "NetShare")
}

fn invalid(key: &str, reason: &str) -> Error {
    Error::InvalidConfig {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis();
        let text = if millis % 1000 != 0 {
            format!("{millis}ms")
        } else if duration.as_secs() % 3600 == 0 && duration.as_secs() > 0 {
            format!("{}h", duration.as_secs() / 3600)
        } else {
            format!("{}s", duration.as_secs())
        };
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let (digits, unit) = s
            .find(|c: char| !c.is_ascii_digit())
            .map_or((s, ""), |idx| s.split_at(idx));
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration '{s}'"))?;
        match unit {
            "ms" => Ok(Duration::from_millis(value)),
            "s" => Ok(Duration::from_secs(value)),
            "m" => Ok(Duration::from_secs(value * 60)),
            "h" => Ok(Duration::from_secs(value * 3600)),
            _ => Err(format!("invalid duration format '{s}'")),
        }
    }
}
