//! Connections command implementation.

use anyhow::{Context, Result};

use netshare_core::connection::{ConnectionProfile, Protocol};

use super::{ConnectionsAction, ConnectionsArgs, Engine};
use crate::ui::{format_timestamp, truncate_string};

/// Run the connections command.
pub async fn run(args: ConnectionsArgs) -> Result<()> {
    match args.action {
        ConnectionsAction::List { json } => list(json).await,
        ConnectionsAction::Add {
            name,
            host,
            protocol,
            port,
            user,
            password,
            remote_path,
            headers,
        } => {
            check_password_storable(password.as_deref(), cfg!(feature = "keyring"))?;
            let protocol: Protocol = protocol.parse()?;
            let (host, parsed_port) = split_host_port(&host);
            let port = port.or(parsed_port).unwrap_or(protocol.default_port());

            let mut profile = ConnectionProfile::new(name, host, port, protocol);
            if let Some(user) = user {
                profile.user = Some(user);
                profile.secret = password;
            }
            if let Some(path) = remote_path {
                profile = profile.with_remote_path(path);
            }
            for header in headers {
                let (key, value) = header
                    .split_once('=')
                    .with_context(|| format!("Invalid header '{}'. Use NAME=VALUE", header))?;
                profile = profile.with_header(key.trim(), value.trim());
            }
            add(profile).await
        }
        ConnectionsAction::Remove { id } => remove(&id).await,
    }
}

async fn list(json: bool) -> Result<()> {
    let engine = Engine::open()?;
    let profiles = engine.connections(None).await?.list().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&profiles)?);
        return Ok(());
    }

    if profiles.is_empty() {
        println!("No saved connections.");
        println!();
        println!("Add one with: netshare connections add <name> <host> --protocol ftp");
        return Ok(());
    }

    println!();
    println!("Saved Connections:");
    println!("{}", "─".repeat(76));
    println!(
        "  {:36}  {:16}  {:6}  {:16}",
        "Id", "Name", "Proto", "Last connected"
    );
    println!("{}", "─".repeat(76));
    for profile in &profiles {
        println!(
            "  {:36}  {:16}  {:6}  {:16}",
            profile.id,
            truncate_string(&profile.name, 16),
            profile.protocol.to_string(),
            profile
                .last_connected
                .map_or_else(|| "never".to_string(), format_timestamp)
        );
    }
    println!("{}", "─".repeat(76));
    println!();
    Ok(())
}

async fn add(profile: ConnectionProfile) -> Result<()> {
    let engine = Engine::open()?;
    let registry = engine.connections(None).await?;

    println!("Checking {}...", profile.base_url());
    let saved = registry
        .add(profile)
        .await
        .context("Connection check failed; nothing was saved")?;

    println!();
    println!("  Saved '{}' ({})", saved.name, saved.base_url());
    println!("  Id: {}", saved.id);
    println!();
    Ok(())
}

async fn remove(id: &str) -> Result<()> {
    let engine = Engine::open()?;
    let transfers = engine.transfers();
    let registry = engine.connections(Some(transfers)).await?;

    let cancelled = registry
        .remove(id)
        .await
        .with_context(|| format!("Failed to remove connection '{}'", id))?;

    println!("Removed connection {}", id);
    if cancelled > 0 {
        println!("Cancelled {} transfer(s)", cancelled);
    }
    Ok(())
}

/// A password only survives this process when a keyring backs the secret store.
fn check_password_storable(password: Option<&str>, keyring: bool) -> Result<()> {
    if password.is_some() && !keyring {
        anyhow::bail!(
            "This build has no keyring support, so the password cannot be saved. \
             Rebuild with the 'keyring' feature or omit --password."
        );
    }
    Ok(())
}

/// Split `host:port`, leaving bare hosts and IPv6 literals intact.
fn split_host_port(host: &str) -> (String, Option<u16>) {
    let host = host.trim();
    if let Some(inner) = host.strip_prefix('[') {
        if let Some((addr, rest)) = inner.split_once(']') {
            let port = rest.strip_prefix(':').and_then(|p| p.parse().ok());
            return (addr.to_string(), port);
        }
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') => match port.parse() {
            Ok(port) => (name.to_string(), Some(port)),
            Err(_) => (host.to_string(), None),
        },
        _ => (host.to_string(), None),
    }
}
