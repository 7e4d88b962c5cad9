//! Typed engine events.
//!
//! Components publish state changes on an [`EventBus`]; any number of
//! observers subscribe and receive every event published after they
//! subscribed. Publishing never blocks and never fails, even with no
//! subscribers. A slow subscriber that falls more than the channel capacity
//! behind receives `RecvError::Lagged` and skips ahead.

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::discovery::DiscoveredDevice;
use crate::share::ShareRecord;
use crate::transfer::TransferTask;

#[cfg(feature = "web")]
use crate::server::ServerState;

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// An event emitted by one of the engine components.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A discovery scan found a reachable peer.
    DeviceDiscovered(DiscoveredDevice),
    /// A discovery scan finished.
    DiscoveryFinished {
        /// Number of devices found
        found: usize,
    },
    /// A transfer task changed status or made progress.
    TransferProgress(TransferTask),
    /// A transfer task reached a terminal state.
    TransferFinished(TransferTask),
    /// The local sharing server changed state.
    #[cfg(feature = "web")]
    ServerStateChanged(ServerState),
    /// A share link was minted.
    ShareCreated(ShareRecord),
    /// Expired shares were garbage-collected.
    SharesExpired {
        /// Number of records removed
        removed: usize,
    },
}

/// Broadcast hub for [`EngineEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a bus buffering `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a [`Stream`]. Events missed by lagging are skipped.
    pub fn stream(&self) -> impl Stream<Item = EngineEvent> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|event| async move {
            match event {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::debug!("event subscriber lagged: {e}");
                    None
                }
            }
        })
    }

    /// Publish an event to current subscribers.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
