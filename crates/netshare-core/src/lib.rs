//! # NetShare Core Library
//!
//! `netshare-core` is the engine behind NetShare, a local network file
//! sharing tool.
//!
//! ## Features
//!
//! - **Subnet discovery**: bounded parallel probing of the local `/24`
//! - **Embedded server**: serve a directory and accept uploads over HTTP
//! - **Transfer queue**: FTP and HTTP(S) uploads/downloads with progress,
//!   a concurrency cap, pause, resume and cancel
//! - **Share links**: expiring, QR-encodable links to local files
//!
//! ## Modules
//!
//! - [`clock`] - Injectable wall clock
//! - [`config`] - Configuration management
//! - [`connection`] - Saved remote endpoints and connectivity probes
//! - [`discovery`] - Local subnet scanning and short-range discovery hooks
//! - [`error`] - Error type and taxonomy
//! - [`events`] - Typed event bus for observers
//! - [`net`] - Local address resolution and subnet math
//! - [`server`] - Embedded HTTP sharing server
//! - [`share`] - Expiring share links and QR payloads
//! - [`storage`] - Key-value and secret persistence
//! - [`transfer`] - Transfer queue and protocol executors
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use netshare_core::{config::Config, discovery::NetworkDiscoveryEngine};
//!
//! let config = Config::load()?;
//! let engine = NetworkDiscoveryEngine::new(
//!     config.discovery,
//!     Arc::new(netshare_core::net::SystemResolver),
//!     Arc::new(netshare_core::clock::SystemClock),
//!     netshare_core::events::EventBus::default(),
//! );
//! for device in engine.scan().await {
//!     println!("{} ({})", device.id, device.service);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

use std::time::Duration;

pub mod clock;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod events;
pub mod net;
pub mod share;
pub mod storage;
pub mod transfer;

#[cfg(feature = "web")]
pub mod server;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Ports probed on every host during a discovery scan
pub const DEFAULT_CANDIDATE_PORTS: [u16; 8] = [80, 8080, 21, 22, 443, 5000, 8000, 9000];

/// Default number of simultaneously executing transfers
pub const DEFAULT_CONCURRENT_TRANSFERS: usize = 3;

/// Default I/O chunk size for transfers (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default port of the sharing server
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Lifetime of a share link
pub const SHARE_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);
