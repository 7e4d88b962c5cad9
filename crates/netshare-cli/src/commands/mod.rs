//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use netshare_core::clock::{Clock, SystemClock};
use netshare_core::config::Config;
use netshare_core::connection::{ConnectionRegistry, NetworkProbe};
use netshare_core::events::EventBus;
use netshare_core::storage::{FileStore, SecretStore};
use netshare_core::transfer::{ExecutorSet, TransferManager};

pub mod connections;
pub mod scan;
pub mod serve;
pub mod share;
pub mod transfer;

/// Load configuration with graceful fallback to defaults.
///
/// A missing or unparsable config file yields the defaults.
pub fn load_config() -> Config {
    Config::load().unwrap_or_default()
}

/// Shared engine components for one CLI invocation.
pub struct Engine {
    /// Loaded configuration
    pub config: Config,
    /// On-disk record store
    pub store: Arc<FileStore>,
    /// Credential store
    pub secrets: Arc<dyn SecretStore>,
    /// Wall clock
    pub clock: Arc<dyn Clock>,
    /// Event hub shared by every component
    pub events: EventBus,
}

impl Engine {
    /// Open the default on-disk store and wire the system clock.
    pub fn open() -> Result<Self> {
        let config = load_config();
        config.validate().context("Invalid configuration")?;
        let store = FileStore::open_default().context("Failed to open the NetShare data store")?;
        Ok(Self {
            config,
            store: Arc::new(store),
            secrets: default_secret_store(),
            clock: Arc::new(SystemClock),
            events: EventBus::default(),
        })
    }

    /// Transfer manager with the standard executors.
    pub fn transfers(&self) -> TransferManager {
        TransferManager::new(
            self.config.transfer.clone(),
            ExecutorSet::standard(&self.config.transfer),
            self.clock.clone(),
            self.events.clone(),
        )
    }

    /// Connection registry with every saved profile loaded.
    pub async fn connections(&self, transfers: Option<TransferManager>) -> Result<ConnectionRegistry> {
        let mut registry = ConnectionRegistry::new(
            self.config.connection.clone(),
            self.store.clone(),
            self.secrets.clone(),
            Arc::new(NetworkProbe::new(self.config.connection.probe_timeout)),
            self.clock.clone(),
        );
        if let Some(transfers) = transfers {
            registry = registry.with_transfers(transfers);
        }
        registry
            .load_all()
            .await
            .context("Failed to load saved connections")?;
        Ok(registry)
    }
}

#[cfg(feature = "keyring")]
fn default_secret_store() -> Arc<dyn SecretStore> {
    use netshare_core::storage::KeyringSecretStore;
    Arc::new(KeyringSecretStore::new(KeyringSecretStore::DEFAULT_SERVICE))
}

#[cfg(not(feature = "keyring"))]
fn default_secret_store() -> Arc<dyn SecretStore> {
    use netshare_core::storage::MemorySecretStore;
    tracing::debug!("keyring support disabled, credentials are kept for this session only");
    Arc::new(MemorySecretStore::new())
}

/// NetShare - discover, share and move files on the local network
#[derive(Parser)]
#[command(name = "netshare")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Scan the local subnet for reachable services
    Scan(ScanArgs),

    /// Serve a directory over HTTP to the local network
    Serve(ServeArgs),

    /// Create a share link for one or more files
    Share(ShareArgs),

    /// Show details of a share link
    ShareInfo(ShareInfoArgs),

    /// Copy the files behind a share link to a destination
    FetchShare(FetchShareArgs),

    /// Remove expired share links
    Cleanup,

    /// Upload a file to a peer or saved connection
    Send(SendArgs),

    /// Download a file from a peer or saved connection
    Get(GetArgs),

    /// Manage saved connections
    Connections(ConnectionsArgs),
}

/// Arguments for the scan command.
#[derive(Parser)]
pub struct ScanArgs {
    /// Subnet to scan instead of the local /24 (e.g. 192.168.1.0/24)
    #[arg(long)]
    pub subnet: Option<String>,

    /// Ports to probe on each host, comma separated
    #[arg(short, long, value_delimiter = ',')]
    pub ports: Vec<u16>,

    /// Per-probe timeout (e.g. "500ms", "2s")
    #[arg(short, long)]
    pub timeout: Option<String>,

    /// Also browse mDNS for advertised services
    #[arg(long)]
    pub mdns: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the serve command.
#[derive(Parser)]
pub struct ServeArgs {
    /// Directory to serve
    #[arg(default_value = ".")]
    pub root: PathBuf,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Only accept connections from this machine
    #[arg(long)]
    pub localhost: bool,
}

/// Arguments for the share command.
#[derive(Parser)]
pub struct ShareArgs {
    /// Files to share
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Print a QR code of the link
    #[arg(long)]
    pub qr: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the share-info command.
#[derive(Parser)]
pub struct ShareInfoArgs {
    /// Share identifier
    pub share_id: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the fetch-share command.
#[derive(Parser)]
pub struct FetchShareArgs {
    /// Share identifier
    pub share_id: String,

    /// Destination file or directory
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,
}

/// Arguments for the send command.
#[derive(Parser)]
pub struct SendArgs {
    /// Peer address (ip:port) or saved connection id
    pub target: String,

    /// Local files to upload
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Remote directory to upload into
    #[arg(short, long)]
    pub remote_dir: Option<String>,
}

/// Arguments for the get command.
#[derive(Parser)]
pub struct GetArgs {
    /// Peer address (ip:port) or saved connection id
    pub target: String,

    /// Remote file paths to download
    #[arg(required = true)]
    pub remote_paths: Vec<String>,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,
}

/// Arguments for the connections command.
#[derive(Parser)]
pub struct ConnectionsArgs {
    /// Connection action
    #[command(subcommand)]
    pub action: ConnectionsAction,
}

/// Connection actions
#[derive(Subcommand)]
pub enum ConnectionsAction {
    /// List saved connections
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Probe and save a connection
    Add {
        /// Display name
        name: String,

        /// Host name or address, optionally with a port
        host: String,

        /// Protocol: ftp, sftp, http or https
        #[arg(short = 'P', long, default_value = "http")]
        protocol: String,

        /// Port (defaults to the protocol's well-known port)
        #[arg(short, long)]
        port: Option<u16>,

        /// User name
        #[arg(short, long)]
        user: Option<String>,

        /// Password or token
        #[arg(long, requires = "user")]
        password: Option<String>,

        /// Default remote directory
        #[arg(long)]
        remote_path: Option<String>,

        /// Extra HTTP header as NAME=VALUE (repeatable)
        #[arg(long = "header")]
        headers: Vec<String>,
    },

    /// Remove a saved connection and cancel its transfers
    Remove {
        /// Connection id
        id: String,
    },
}
