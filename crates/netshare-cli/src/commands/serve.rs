//! Serve command implementation.

use std::sync::Arc;

use anyhow::{Context, Result};

use netshare_core::events::EventBus;
use netshare_core::net::SystemResolver;
use netshare_core::server::LocalSharingServer;

use super::{load_config, ServeArgs};

/// Run the serve command until Ctrl+C.
pub async fn run(args: ServeArgs) -> Result<()> {
    let mut config = load_config();
    config.server.localhost_only = config.server.localhost_only || args.localhost;
    let port = args.port.unwrap_or(config.server.port);

    let server = LocalSharingServer::new(
        config.server.clone(),
        Arc::new(SystemResolver),
        EventBus::default(),
    );

    let state = server
        .start(&args.root, port)
        .await
        .with_context(|| format!("Failed to serve {}", args.root.display()))?;

    println!();
    println!("  Serving {}", args.root.display());
    if let Some(url) = &state.server_url {
        println!("  Open {} in a browser on the same network", url);
    }
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!();
    println!("  Stopping server...");
    server.stop().await.context("Failed to stop server")?;
    Ok(())
}
