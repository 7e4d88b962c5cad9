//! Scan command implementation.

use std::sync::Arc;

use anyhow::{Context, Result};

use netshare_core::discovery::mdns::MdnsDiscovery;
use netshare_core::discovery::{DiscoveredDevice, NetworkDiscoveryEngine};
use netshare_core::net::{Subnet, SystemResolver};

use super::{Engine, ScanArgs};
use crate::ui::{format_timestamp, parse_duration, truncate_string};

/// Run the scan command.
pub async fn run(args: ScanArgs) -> Result<()> {
    let engine = Engine::open()?;
    let mut config = engine.config.discovery.clone();

    if !args.ports.is_empty() {
        config.candidate_ports = args.ports;
    }
    if let Some(timeout) = &args.timeout {
        config.probe_timeout = parse_duration(timeout)
            .context("Invalid timeout format. Use formats like '500ms', '2s'")?;
    }
    config.short_range_enabled = config.short_range_enabled || args.mdns;

    let subnet = args
        .subnet
        .as_deref()
        .map(str::parse::<Subnet>)
        .transpose()
        .context("Invalid subnet. Use a form like 192.168.1.0/24")?;

    let mut discovery = NetworkDiscoveryEngine::new(
        config.clone(),
        Arc::new(SystemResolver),
        engine.clock.clone(),
        engine.events.clone(),
    );
    if config.short_range_enabled {
        discovery = discovery.with_short_range(Arc::new(MdnsDiscovery::new(engine.clock.clone())));
    }

    let target = subnet.or_else(|| discovery.local_subnet());
    let Some(target) = target else {
        anyhow::bail!("No local IPv4 address found. Pass --subnet to scan explicitly");
    };

    if !args.json {
        println!();
        println!(
            "Scanning {} on {} port(s)...",
            target,
            config.candidate_ports.len()
        );
        println!();
    }

    let devices = discovery.scan_subnet(target).await;

    if args.json {
        output_json(&devices)?;
    } else {
        display_devices(&devices);
    }

    Ok(())
}

fn output_json(devices: &[DiscoveredDevice]) -> Result<()> {
    let output = serde_json::json!({ "devices": devices });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn display_devices(devices: &[DiscoveredDevice]) {
    if devices.is_empty() {
        println!("No devices found.");
        println!();
        return;
    }

    println!("Devices on Network:");
    println!("{}", "─".repeat(64));
    println!(
        "  {:21}  {:20}  {:9}  {:16}",
        "Address", "Name", "Service", "Seen"
    );
    println!("{}", "─".repeat(64));
    for device in devices {
        println!(
            "  {:21}  {:20}  {:9}  {:16}",
            device.addr().to_string(),
            truncate_string(&device.name, 20),
            device.service.to_string(),
            format_timestamp(device.last_seen)
        );
    }
    println!("{}", "─".repeat(64));
    println!("  {} device(s) found", devices.len());
    println!();
}
