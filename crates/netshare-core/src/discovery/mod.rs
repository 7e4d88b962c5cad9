//! Peer discovery on the local network.
//!
//! The [`NetworkDiscoveryEngine`] finds reachable peers by probing every
//! host of the local `/24` subnet on a fixed set of candidate ports. Each
//! host is tried port by port in priority order and the first port that
//! accepts a TCP connection wins, so a host yields at most one device.
//!
//! ## Resource bounds
//!
//! Hosts are probed through `buffer_unordered(max_concurrent_probes)` and
//! ports within a host are tried sequentially, so at most
//! `max_concurrent_probes` connection attempts are in flight at once.
//! Refused or timed-out probes are skipped silently.
//!
//! ## Short-range hook
//!
//! Platform peer-to-peer discovery (mDNS with the `mdns` feature) plugs in
//! through [`ShortRangeDiscovery`]. It is best-effort: a missing or failing
//! hook never fails a scan.

#[cfg(feature = "mdns")]
pub mod mdns;
mod short_range;

pub use short_range::ShortRangeDiscovery;

use std::collections::BTreeMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::clock::Clock;
use crate::config::DiscoveryConfig;
use crate::events::{EngineEvent, EventBus};
use crate::net::{LocalAddressResolver, Subnet};

/// Service category inferred from the port a peer answered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceKind {
    /// Port 21
    Ftp,
    /// Port 22
    Ssh,
    /// Ports 80, 8000, 8080
    Http,
    /// Port 443
    Https,
    /// Ports 5000, 9000
    FileShare,
    /// Anything else
    Unknown,
}

impl ServiceKind {
    /// Infer the service behind a port.
    #[must_use]
    pub const fn from_port(port: u16) -> Self {
        match port {
            21 => Self::Ftp,
            22 => Self::Ssh,
            443 => Self::Https,
            80 | 8000 | 8080 => Self::Http,
            5000 | 9000 => Self::FileShare,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ftp => "FTP",
            Self::Ssh => "SSH",
            Self::Http => "HTTP",
            Self::Https => "HTTPS",
            Self::FileShare => "file share",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A peer found by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    /// `ip:port`
    pub id: String,
    /// Display name
    pub name: String,
    /// IPv4 address
    pub ip_address: Ipv4Addr,
    /// Port that accepted the probe
    pub port: u16,
    /// Inferred service
    #[serde(rename = "type")]
    pub service: ServiceKind,
    /// Epoch milliseconds of the successful probe
    pub last_seen: u64,
    /// Whether the peer answered
    pub is_online: bool,
}

impl DiscoveredDevice {
    /// A device that just answered on `ip:port`.
    #[must_use]
    pub fn new(ip_address: Ipv4Addr, port: u16, seen_at: u64) -> Self {
        let service = ServiceKind::from_port(port);
        Self {
            id: format!("{ip_address}:{port}"),
            name: format!("{service} on {ip_address}"),
            ip_address,
            port,
            service,
            last_seen: seen_at,
            is_online: true,
        }
    }

    /// Socket address of the device.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip_address.into(), self.port)
    }
}

/// Subnet scanner.
pub struct NetworkDiscoveryEngine {
    config: DiscoveryConfig,
    resolver: Arc<dyn LocalAddressResolver>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    short_range: Option<Arc<dyn ShortRangeDiscovery>>,
}

impl fmt::Debug for NetworkDiscoveryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkDiscoveryEngine")
            .field("config", &self.config)
            .field("short_range", &self.short_range)
            .finish_non_exhaustive()
    }
}

impl NetworkDiscoveryEngine {
    /// Create an engine without a short-range hook.
    #[must_use]
    pub fn new(
        config: DiscoveryConfig,
        resolver: Arc<dyn LocalAddressResolver>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            resolver,
            clock,
            events,
            short_range: None,
        }
    }

    /// Query `hook` alongside every scan.
    #[must_use]
    pub fn with_short_range(mut self, hook: Arc<dyn ShortRangeDiscovery>) -> Self {
        self.short_range = Some(hook);
        self
    }

    /// Subscribe to engine events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// The subnet a scan would cover, if this device has a LAN address.
    #[must_use]
    pub fn local_subnet(&self) -> Option<Subnet> {
        self.resolver.local_ip().map(Subnet::containing)
    }

    /// Lazily probe the local subnet.
    ///
    /// The stream is finite and can be consumed once. Without a local
    /// address it is empty.
    pub fn discover(&self) -> BoxStream<'static, DiscoveredDevice> {
        match self.local_subnet() {
            Some(subnet) => self.discover_subnet(subnet),
            None => {
                tracing::warn!("No local IPv4 address; nothing to scan");
                stream::empty().boxed()
            }
        }
    }

    /// Lazily probe an explicit subnet.
    pub fn discover_subnet(&self, subnet: Subnet) -> BoxStream<'static, DiscoveredDevice> {
        let ports: Arc<[u16]> = self.config.candidate_ports.clone().into();
        let timeout = self.config.probe_timeout;
        let clock = Arc::clone(&self.clock);
        let events = self.events.clone();
        let fan_out = self.config.max_concurrent_probes.max(1);

        tracing::info!(
            subnet = %subnet,
            ports = ports.len(),
            fan_out,
            "Starting subnet scan"
        );

        stream::iter(subnet.hosts())
            .map(move |ip| {
                let ports = Arc::clone(&ports);
                let clock = Arc::clone(&clock);
                async move { probe_host(ip, &ports, timeout, clock.as_ref()).await }
            })
            .buffer_unordered(fan_out)
            .filter_map(|found| async move { found })
            .inspect(move |device| {
                tracing::debug!(device = %device.id, service = %device.service, "Device discovered");
                events.publish(EngineEvent::DeviceDiscovered(device.clone()));
            })
            .boxed()
    }

    /// Scan the local subnet and the short-range hook, collecting results.
    pub async fn scan(&self) -> Vec<DiscoveredDevice> {
        match self.local_subnet() {
            Some(subnet) => self.scan_subnet(subnet).await,
            None => {
                tracing::warn!("No local IPv4 address; nothing to scan");
                self.events.publish(EngineEvent::DiscoveryFinished { found: 0 });
                Vec::new()
            }
        }
    }

    /// Scan `subnet` and the short-range hook, collecting results.
    ///
    /// Devices are deduplicated by id and sorted by address. Short-range
    /// results are kept only if they fall inside `subnet` on a candidate
    /// port.
    pub async fn scan_subnet(&self, subnet: Subnet) -> Vec<DiscoveredDevice> {
        let probes = self.discover_subnet(subnet).collect::<Vec<_>>();
        let (probed, nearby) = tokio::join!(probes, self.short_range_devices());

        let mut devices: BTreeMap<(Ipv4Addr, u16), DiscoveredDevice> = probed
            .into_iter()
            .map(|d| ((d.ip_address, d.port), d))
            .collect();

        for device in nearby {
            if !subnet.contains(device.ip_address)
                || !self.config.candidate_ports.contains(&device.port)
            {
                tracing::debug!(device = %device.id, "Ignoring short-range device outside scan range");
                continue;
            }
            let key = (device.ip_address, device.port);
            if let std::collections::btree_map::Entry::Vacant(slot) = devices.entry(key) {
                self.events
                    .publish(EngineEvent::DeviceDiscovered(device.clone()));
                slot.insert(device);
            }
        }

        let found: Vec<_> = devices.into_values().collect();
        tracing::info!(subnet = %subnet, found = found.len(), "Subnet scan finished");
        self.events
            .publish(EngineEvent::DiscoveryFinished { found: found.len() });
        found
    }

    async fn short_range_devices(&self) -> Vec<DiscoveredDevice> {
        if !self.config.short_range_enabled {
            return Vec::new();
        }
        let Some(hook) = &self.short_range else {
            return Vec::new();
        };

        let window = self.config.short_range_timeout;
        let grace = window + Duration::from_secs(1);
        match tokio::time::timeout(grace, hook.discover(window)).await {
            Ok(Ok(devices)) => devices,
            Ok(Err(e)) => {
                tracing::debug!(hook = hook.name(), "Short-range discovery unavailable: {}", e);
                Vec::new()
            }
            Err(_) => {
                tracing::debug!(hook = hook.name(), "Short-range discovery timed out");
                Vec::new()
            }
        }
    }
}

/// Try `ports` on `ip` in order; the first that accepts wins.
async fn probe_host(
    ip: Ipv4Addr,
    ports: &[u16],
    timeout: Duration,
    clock: &dyn Clock,
) -> Option<DiscoveredDevice> {
    for &port in ports {
        let addr = SocketAddr::new(ip.into(), port);
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => return Some(DiscoveredDevice::new(ip, port, clock.now_millis())),
            Ok(Err(e)) => tracing::trace!(addr = %addr, "Probe refused: {}", e),
            Err(_) => tracing::trace!(addr = %addr, "Probe timed out"),
        }
    }
    None
}
