//! Embedded HTTP server exposing a local directory to peers.
//!
//! The server requires **zero external infrastructure**: peers on the same
//! network browse and fetch files with any HTTP client and push files back
//! through a multipart upload.
//!
//! ## API Endpoints
//!
//! | Method | Endpoint | Description |
//! |--------|----------|-------------|
//! | GET | / | Directory listing (HTML, or JSON with `?format=json`) |
//! | GET | /health | Liveness check |
//! | GET | /{path} | File content |
//! | POST | /upload | Multipart upload into the served root |
//!
//! ## Lifecycle
//!
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`. Every transition
//! is published as [`EngineEvent::ServerStateChanged`].

mod error;
mod handlers;
mod paths;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;

pub use error::{ApiError, ApiResult};
pub use handlers::{Listing, ListingEntry, UploadResponse};
pub use paths::{sanitize_file_name, validate_relative};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus};
use crate::net::LocalAddressResolver;

/// Lifecycle phase of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Not listening
    Stopped,
    /// Binding the listener
    Starting,
    /// Accepting connections
    Running,
    /// Draining in-flight requests
    Stopping,
}

/// Snapshot of the server's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerState {
    /// Lifecycle phase
    pub status: ServerStatus,
    /// Address the listener is bound to
    pub bind_address: Option<SocketAddr>,
    /// Bound port
    pub port: Option<u16>,
    /// Served directory
    pub root_path: Option<PathBuf>,
    /// URL peers should use
    pub server_url: Option<String>,
}

impl ServerState {
    const fn stopped() -> Self {
        Self {
            status: ServerStatus::Stopped,
            bind_address: None,
            port: None,
            root_path: None,
            server_url: None,
        }
    }

    /// Whether the server is accepting connections.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == ServerStatus::Running
    }
}

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// The local sharing server.
pub struct LocalSharingServer {
    config: ServerConfig,
    resolver: Arc<dyn LocalAddressResolver>,
    events: EventBus,
    state: RwLock<ServerState>,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for LocalSharingServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSharingServer")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl LocalSharingServer {
    /// Create a stopped server.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        resolver: Arc<dyn LocalAddressResolver>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            resolver,
            events,
            state: RwLock::new(ServerState::stopped()),
            running: Mutex::new(None),
        }
    }

    /// Subscribe to engine events, including server state changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the server is accepting connections.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Address the listener is bound to while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state().bind_address
    }

    fn set_state(&self, state: ServerState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state.clone();
        self.events.publish(EngineEvent::ServerStateChanged(state));
    }

    fn bind_addr(&self, port: u16) -> SocketAddr {
        if self.config.localhost_only {
            SocketAddr::from((Ipv4Addr::LOCALHOST, port))
        } else {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
        }
    }

    fn server_url(&self, port: u16) -> String {
        let host = if self.config.localhost_only {
            Ipv4Addr::LOCALHOST
        } else {
            self.resolver.local_ip().unwrap_or(Ipv4Addr::LOCALHOST)
        };
        format!("http://{host}:{port}")
    }

    /// Start serving `root` on `port`.
    ///
    /// Port `0` binds an ephemeral port; the chosen one is reported in the
    /// returned state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] if the server is running (its state
    /// is left untouched), [`Error::InvalidPath`] if `root` is not a
    /// directory, or [`Error::Bind`] if the port cannot be bound.
    pub async fn start(&self, root: impl AsRef<Path>, port: u16) -> Result<ServerState> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            let current = self.state();
            let addr = current
                .bind_address
                .unwrap_or_else(|| self.bind_addr(current.port.unwrap_or(port)));
            return Err(Error::AlreadyRunning(addr));
        }

        let root = root.as_ref();
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|_| Error::InvalidPath(format!("{} does not exist", root.display())))?;
        if !tokio::fs::metadata(&root).await?.is_dir() {
            return Err(Error::InvalidPath(format!("{} is not a directory", root.display())));
        }

        self.set_state(ServerState {
            status: ServerStatus::Starting,
            root_path: Some(root.clone()),
            ..ServerState::stopped()
        });

        let addr = self.bind_addr(port);
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::warn!(%addr, error = %e, "failed to bind sharing server");
                self.set_state(ServerState::stopped());
                return Err(Error::Bind {
                    addr,
                    reason: e.to_string(),
                });
            }
        };
        let bound = listener.local_addr()?;

        let app = handlers::router(
            handlers::AppState {
                root: Arc::new(root.clone()),
            },
            self.config.max_upload_bytes,
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "sharing server terminated");
            }
        });

        let state = ServerState {
            status: ServerStatus::Running,
            bind_address: Some(bound),
            port: Some(bound.port()),
            root_path: Some(root),
            server_url: Some(self.server_url(bound.port())),
        };
        self.set_state(state.clone());
        *running = Some(Running {
            shutdown: shutdown_tx,
            task,
        });

        tracing::info!(addr = %bound, url = ?state.server_url, "sharing server started");
        Ok(state)
    }

    /// Stop accepting connections and wait for in-flight responses.
    ///
    /// Stopping a stopped server is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        let Some(handle) = running.take() else {
            return Ok(());
        };

        let stopping = ServerState {
            status: ServerStatus::Stopping,
            ..self.state()
        };
        self.set_state(stopping);

        let _ = handle.shutdown.send(());
        if let Err(e) = handle.task.await {
            tracing::warn!(error = %e, "sharing server task failed during shutdown");
        }

        self.set_state(ServerState::stopped());
        tracing::info!("sharing server stopped");
        Ok(())
    }
}
