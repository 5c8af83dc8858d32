use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::task::ClusterResult;
use super::types::CollectorId;

/// A sink on the source node for results of remote tasks.
///
/// An error from `receive` abandons that result; it is never redelivered.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn receive(&self, result: ClusterResult) -> anyhow::Result<()>;
}

/// Collectors on this node, addressed by [`CollectorId`]
#[derive(Default)]
pub struct CollectorRegistry {
    collectors: DashMap<CollectorId, Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collector under a fresh id
    pub fn register(&self, collector: Arc<dyn Collector>) -> CollectorId {
        let id = CollectorId::new();
        self.collectors.insert(id, collector);
        debug!(collector = %id, "Registered collector");
        id
    }

    pub fn get(&self, id: &CollectorId) -> Option<Arc<dyn Collector>> {
        self.collectors.get(id).map(|c| c.value().clone())
    }

    /// Tear a collector down. Results that arrive for it afterwards are abandoned.
    pub fn remove(&self, id: &CollectorId) -> bool {
        let removed = self.collectors.remove(id).is_some();
        if removed {
            debug!(collector = %id, "Removed collector");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

/// Forwards results into an unbounded channel. Fails once the receiver
/// has been dropped.
pub struct ChannelCollector {
    tx: mpsc::UnboundedSender<ClusterResult>,
}

impl ChannelCollector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClusterResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Collector for ChannelCollector {
    async fn receive(&self, result: ClusterResult) -> anyhow::Result<()> {
        self.tx
            .send(result)
            .map_err(|_| anyhow::anyhow!("collector channel closed"))
    }
}
