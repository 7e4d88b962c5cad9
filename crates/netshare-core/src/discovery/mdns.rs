//! mDNS/DNS-SD short-range discovery.
//!
//! Browses a DNS-SD service type (`_http._tcp.local.` by default) for a
//! bounded window and maps every resolved IPv4 service to a
//! [`DiscoveredDevice`]. The daemon lives only for the duration of one
//! browse.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};

use super::{DiscoveredDevice, ShortRangeDiscovery};
use crate::clock::Clock;
use crate::error::{Error, Result};

/// Service type browsed by default.
pub const DEFAULT_SERVICE_TYPE: &str = "_http._tcp.local.";

/// Short-range hook backed by mDNS.
#[derive(Debug, Clone)]
pub struct MdnsDiscovery {
    service_type: String,
    clock: Arc<dyn Clock>,
}

impl MdnsDiscovery {
    /// Browse [`DEFAULT_SERVICE_TYPE`].
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_service_type(DEFAULT_SERVICE_TYPE, clock)
    }

    /// Browse a custom service type such as `_ftp._tcp.local.`.
    #[must_use]
    pub fn with_service_type(service_type: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            service_type: service_type.into(),
            clock,
        }
    }

    fn to_device(&self, info: &ServiceInfo) -> Option<DiscoveredDevice> {
        let ip = info.get_addresses().iter().find_map(|addr| match addr {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        })?;
        let mut device = DiscoveredDevice::new(ip, info.get_port(), self.clock.now_millis());

        let instance = info
            .get_fullname()
            .strip_suffix(&self.service_type)
            .map(|name| name.trim_end_matches('.'))
            .filter(|name| !name.is_empty());
        if let Some(instance) = instance {
            device.name = instance.to_string();
        }
        Some(device)
    }
}

#[async_trait]
impl ShortRangeDiscovery for MdnsDiscovery {
    fn name(&self) -> &str {
        "mdns"
    }

    async fn discover(&self, window: Duration) -> Result<Vec<DiscoveredDevice>> {
        let daemon =
            ServiceDaemon::new().map_err(|e| Error::Internal(format!("mDNS daemon error: {e}")))?;
        let receiver = daemon
            .browse(&self.service_type)
            .map_err(|e| Error::Internal(format!("Failed to browse mDNS services: {e}")))?;

        let mut found = HashMap::new();
        let deadline = tokio::time::Instant::now() + window;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, receiver.recv_async()).await {
                Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                    if let Some(device) = self.to_device(&info) {
                        tracing::debug!(device = %device.id, name = %device.name, "Found service via mDNS");
                        found.insert(device.id.clone(), device);
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }

        if let Err(e) = daemon.stop_browse(&self.service_type) {
            tracing::debug!("Failed to stop mDNS browse: {e}");
        }
        if let Err(e) = daemon.shutdown() {
            tracing::debug!("Failed to shutdown mDNS daemon: {e}");
        }

        Ok(found.into_values().collect())
    }
}
