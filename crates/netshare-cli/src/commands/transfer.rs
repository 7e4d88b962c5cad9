//! Send and get commands: queue transfers and follow their progress.

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use futures::StreamExt;

use netshare_core::events::EngineEvent;
use netshare_core::transfer::{TransferManager, TransferStatus, TransferTarget, TransferTask};

use super::{Engine, GetArgs, SendArgs};
use crate::ui::{format_size, progress_bar, truncate_string};

/// Run the send command.
pub async fn send(args: SendArgs) -> Result<()> {
    let engine = Engine::open()?;
    let transfers = engine.transfers();
    let target = resolve_target(&engine, &args.target).await?;

    // Subscribe before queueing so fast tasks are not missed.
    let events = engine.events.stream();

    let mut queued = Vec::with_capacity(args.files.len());
    for file in &args.files {
        let remote = remote_path(args.remote_dir.as_deref(), file)?;
        let task = transfers
            .enqueue_upload(target.clone(), file, &remote)
            .await
            .with_context(|| format!("Failed to queue {}", file.display()))?;
        queued.push(task);
    }

    follow(&transfers, queued, events).await
}

/// Run the get command.
pub async fn get(args: GetArgs) -> Result<()> {
    let engine = Engine::open()?;
    let transfers = engine.transfers();
    let target = resolve_target(&engine, &args.target).await?;

    tokio::fs::create_dir_all(&args.output)
        .await
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    let events = engine.events.stream();

    let mut queued = Vec::with_capacity(args.remote_paths.len());
    for remote in &args.remote_paths {
        let name = remote
            .rsplit('/')
            .find(|s| !s.is_empty())
            .with_context(|| format!("Remote path '{}' has no file name", remote))?;
        let task = transfers
            .enqueue_download(target.clone(), remote, args.output.join(name))
            .await
            .with_context(|| format!("Failed to queue {}", remote))?;
        queued.push(task);
    }

    follow(&transfers, queued, events).await
}

/// A literal `ip:port` is a peer; anything else names a saved connection.
async fn resolve_target(engine: &Engine, target: &str) -> Result<TransferTarget> {
    if let Ok(addr) = target.parse::<SocketAddr>() {
        return Ok(TransferTarget::Peer(addr));
    }

    let registry = engine.connections(None).await?;
    let profile = registry
        .get(target)
        .await
        .with_context(|| format!("'{}' is neither ip:port nor a saved connection id", target))?;
    Ok(TransferTarget::Connection(profile))
}

fn remote_path(remote_dir: Option<&str>, file: &Path) -> Result<String> {
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("'{}' has no usable file name", file.display()))?;
    Ok(match remote_dir {
        Some(dir) => format!("{}/{}", dir.trim_end_matches('/'), name),
        None => name.to_string(),
    })
}

async fn follow(
    transfers: &TransferManager,
    queued: Vec<TransferTask>,
    events: impl futures::Stream<Item = EngineEvent> + Send,
) -> Result<()> {
    let mut outcomes: HashMap<String, TransferTask> = HashMap::new();
    let order: Vec<String> = queued.iter().map(|t| t.id.clone()).collect();
    for task in queued {
        if task.status.is_terminal() {
            outcomes.insert(task.id.clone(), task);
        }
    }

    println!();
    let mut events = std::pin::pin!(events);
    while outcomes.len() < order.len() {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                match event {
                    EngineEvent::TransferProgress(task) if order.contains(&task.id) => {
                        print_progress(&task);
                    }
                    EngineEvent::TransferFinished(task) if order.contains(&task.id) => {
                        print_progress(&task);
                        println!();
                        outcomes.insert(task.id.clone(), task);
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("  Cancelling...");
                for id in &order {
                    let _ = transfers.cancel(id).await;
                }
                anyhow::bail!("Transfer cancelled");
            }
        }
    }

    println!();
    let mut failed = 0;
    for id in &order {
        let Some(task) = outcomes.get(id).cloned().or_else(|| transfers.get(id)) else {
            continue;
        };
        match task.status {
            TransferStatus::Completed => println!(
                "  ✓ {} ({})",
                task.file_name,
                format_size(task.transferred_bytes)
            ),
            _ => {
                failed += 1;
                println!(
                    "  ✗ {}: {}",
                    task.file_name,
                    task.error_message.as_deref().unwrap_or("did not complete")
                );
            }
        }
    }
    println!();

    if failed > 0 {
        anyhow::bail!("{} of {} transfer(s) failed", failed, order.len());
    }
    Ok(())
}

fn print_progress(task: &TransferTask) {
    print!(
        "\r  {:24} {} {:>10}/s",
        truncate_string(&task.file_name, 24),
        progress_bar(task.percentage(), 20),
        format_size(task.speed)
    );
    let _ = io::stdout().flush();
}
