//! NetShare CLI - local network discovery, sharing and file transfer
//!
//! ## Quick Start
//!
//! ```bash
//! # Find peers on the local network
//! netshare scan
//!
//! # Serve a directory to them
//! netshare serve ./public
//!
//! # Push a file to a peer running `netshare serve`
//! netshare send 192.168.1.20:8080 ./report.pdf
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

use anyhow::Result;
use clap::Parser;

mod commands;
mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Scan(args) => commands::scan::run(args).await,
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Share(args) => commands::share::run(args).await,
        Command::ShareInfo(args) => commands::share::info(args).await,
        Command::FetchShare(args) => commands::share::fetch(args).await,
        Command::Cleanup => commands::share::cleanup().await,
        Command::Send(args) => commands::transfer::send(args).await,
        Command::Get(args) => commands::transfer::get(args).await,
        Command::Connections(args) => commands::connections::run(args).await,
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,netshare=info,netshare_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
