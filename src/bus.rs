use std::sync::Arc;

use tokio::sync::broadcast;

use crate::shares::{BlockchainStats, Share};

/// Fire-and-forget events the core publishes for external sinks to subscribe to (spec §6, §10.5).
/// The core never awaits a subscriber and never applies backpressure: a slow or absent
/// subscriber simply misses events once the channel's ring buffer wraps.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// An accepted share, stamped and ready for persistence/payout accounting.
    ClientShare(Arc<Share>),
    /// A refreshed view of daemon-reported chain state for one pool.
    TelemetryEvent { pool_id: String, stats: BlockchainStats },
    /// A new job was broadcast to connected miners.
    JobBroadcast { pool_id: String, job_id: String, clean_jobs: bool },
}

/// The pool-wide event bus. Cloning is cheap (it clones the underlying `Sender` handle); every
/// clone publishes onto the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PoolEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; returns the number of live subscribers it reached. A return of `Ok(0)`
    /// (nobody subscribed) is not an error.
    pub fn publish(&self, event: PoolEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
