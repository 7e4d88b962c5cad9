//! Best-effort short-range discovery hook.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use super::DiscoveredDevice;
use crate::error::Result;

/// A platform discovery capability (mDNS, Wi-Fi Direct, hotspot peers).
///
/// The engine only consumes results; an error or timeout is logged and the
/// scan carries on without them.
#[async_trait]
pub trait ShortRangeDiscovery: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Collect peers visible within `window`.
    async fn discover(&self, window: Duration) -> Result<Vec<DiscoveredDevice>>;
}
