use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tracing::trace;

use super::dispatcher::ClusterDispatcher;
use super::task::{ClusterResult, ClusterTaskRef};
use super::types::NodeName;
use crate::core::errors::{DispatchError, Result};

/// Moves tasks and results between nodes.
///
/// Both calls return once the far side has accepted the message, not once
/// the work is done.
#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// Hand a task to its target node
    async fn send_task(&self, task_ref: ClusterTaskRef) -> Result<()>;

    /// Return a result to the node the task came from
    async fn send_result(&self, result: ClusterResult) -> Result<()>;
}

/// In-process transport between dispatchers sharing a runtime.
///
/// Every message is encoded to JSON and decoded again on the way through.
#[derive(Default)]
pub struct LocalTransport {
    nodes: DashMap<NodeName, Weak<ClusterDispatcher>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a dispatcher reachable under its node name
    pub fn attach(&self, dispatcher: &Arc<ClusterDispatcher>) {
        self.nodes
            .insert(dispatcher.node().clone(), Arc::downgrade(dispatcher));
    }

    /// Make a node unreachable, as when it leaves the cluster. Returns false
    /// if it was not attached.
    pub fn detach(&self, node: &NodeName) -> bool {
        self.nodes.remove(node).is_some()
    }

    fn node(&self, node: &NodeName) -> Result<Arc<ClusterDispatcher>> {
        self.nodes
            .get(node)
            .and_then(|entry| entry.value().upgrade())
            .ok_or_else(|| DispatchError::NodeNotFound {
                node: node.to_string(),
            })
    }
}

fn over_the_wire<T: Serialize + DeserializeOwned>(message: &T) -> Result<T> {
    let bytes = serde_json::to_vec(message)?;
    trace!(bytes = bytes.len(), "Encoded cluster message");
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl ClusterTransport for LocalTransport {
    async fn send_task(&self, task_ref: ClusterTaskRef) -> Result<()> {
        let target = self.node(task_ref.target_node())?;
        target.accept(over_the_wire(&task_ref)?)
    }

    async fn send_result(&self, result: ClusterResult) -> Result<()> {
        let source = self.node(result.task_ref().source_node())?;
        source.deliver_result(over_the_wire(&result)?);
        Ok(())
    }
}
