//! Share link commands: create, inspect, fetch and clean up.

use anyhow::{Context, Result};

use netshare_core::share::{ShareInfo, ShareLinkRegistry};

use super::{Engine, FetchShareArgs, ShareArgs, ShareInfoArgs};
use crate::ui::{format_remaining, format_size, format_timestamp};

fn registry(engine: &Engine) -> ShareLinkRegistry {
    ShareLinkRegistry::new(
        engine.config.share.clone(),
        engine.config.general.device_id.clone(),
        engine.store.clone(),
        engine.clock.clone(),
        engine.events.clone(),
    )
}

/// Run the share command.
pub async fn run(args: ShareArgs) -> Result<()> {
    let engine = Engine::open()?;
    let registry = registry(&engine);

    let link = if args.files.len() == 1 {
        registry.generate_shareable_link(&args.files[0]).await
    } else {
        registry.generate_shareable_link_multi(&args.files).await
    }
    .context("Failed to create share link")?;

    if args.json {
        let output = serde_json::json!({
            "shareId": link.share_id,
            "url": link.url,
            "files": link.record.file_names,
            "size": link.record.file_size,
            "expiresIn": engine.config.share.expiry.as_secs(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!();
    println!("  Share created");
    println!();
    println!("  Link:     {}", link.url);
    println!("  Id:       {}", link.share_id);
    println!(
        "  Files:    {} ({})",
        link.record.file_names.join(", "),
        format_size(link.record.file_size)
    );
    println!(
        "  Expires:  in {}",
        format_remaining(engine.config.share.expiry)
    );
    println!();

    if args.qr {
        let qr = registry
            .generate_qr_code(&link.url)
            .context("Failed to render QR code")?;
        println!("{}", qr.to_ascii());
    }

    Ok(())
}

/// Show the details of one share.
pub async fn info(args: ShareInfoArgs) -> Result<()> {
    let engine = Engine::open()?;
    let info = registry(&engine)
        .get_share_info(&args.share_id)
        .with_context(|| format!("Share '{}' not found", args.share_id))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    display_info(&info);
    Ok(())
}

fn display_info(info: &ShareInfo) {
    let record = &info.record;
    println!();
    println!("  Share {}", record.share_id);
    println!("{}", "─".repeat(60));
    println!("  Link:       {}", record.url);
    println!("  Created:    {}", format_timestamp(record.created_at));
    println!("  Downloads:  {}", record.download_count);
    println!("  Size:       {}", format_size(record.file_size));
    if info.is_expired {
        println!("  Status:     expired");
    } else {
        println!(
            "  Status:     active, {} remaining",
            format_remaining(info.time_remaining())
        );
    }
    println!("  Files:");
    for (name, path) in record.file_names.iter().zip(&record.file_paths) {
        println!("    {}  ({})", name, path.display());
    }
    println!();
}

/// Copy the files behind a share to a destination.
pub async fn fetch(args: FetchShareArgs) -> Result<()> {
    let engine = Engine::open()?;
    let record = registry(&engine)
        .download_shared_file(&args.share_id, &args.output)
        .await
        .with_context(|| format!("Failed to fetch share '{}'", args.share_id))?;

    println!(
        "Copied {} file(s) ({}) to {}",
        record.file_names.len(),
        format_size(record.file_size),
        args.output.display()
    );
    Ok(())
}

/// Remove expired shares.
pub async fn cleanup() -> Result<()> {
    let engine = Engine::open()?;
    let removed = registry(&engine)
        .cleanup_expired_shares()
        .await
        .context("Failed to clean up shares")?;

    if removed == 0 {
        println!("No expired shares.");
    } else {
        println!("Removed {} expired share(s).", removed);
    }
    Ok(())
}
