use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

use super::types::{ClusterError, ClusterTaskType, CollectorId, NodeName};
use crate::core::errors::{DispatchError, Result};
use crate::task::TaskId;

/// The work a cluster task carries. Each variant is one task kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum ClusterTaskPayload {
    /// Search some shards of an index on the target node
    ShardSearch {
        index: String,
        shards: Vec<u64>,
        query: String,
    },
    /// Terminate the target node's tasks descending from `ancestor`
    Terminate {
        search_name: String,
        ancestor: TaskId,
        task_name: Option<String>,
    },
    /// Liveness check
    Ping,
}

impl ClusterTaskPayload {
    pub fn task_type(&self) -> ClusterTaskType {
        match self {
            Self::ShardSearch { .. } => ClusterTaskType::ShardSearch,
            Self::Terminate { .. } => ClusterTaskType::Terminate,
            Self::Ping => ClusterTaskType::Ping,
        }
    }
}

/// A task descriptor that can be sent to another node.
///
/// The id is assigned by the worker when execution begins. Equality and
/// hashing use that id alone, so two tasks that have not run yet are never
/// equal, not even to themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterTask {
    name: String,
    payload: ClusterTaskPayload,
    id: Option<TaskId>,
}

impl ClusterTask {
    pub fn new(name: impl Into<String>, payload: ClusterTaskPayload) -> Self {
        Self {
            name: name.into(),
            payload,
            id: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &ClusterTaskPayload {
        &self.payload
    }

    pub fn task_type(&self) -> ClusterTaskType {
        self.payload.task_type()
    }

    /// The worker-assigned id. Fails if the task has not been executed yet.
    pub fn id(&self) -> Result<&TaskId> {
        self.id.as_ref().ok_or_else(|| DispatchError::NotYetExecuted {
            task_name: self.name.clone(),
        })
    }

    pub fn has_id(&self) -> bool {
        self.id.is_some()
    }

    /// Give the task its id on the worker. An id can only be assigned once.
    pub fn assign_id(&mut self, id: TaskId) -> Result<()> {
        if let Some(existing) = &self.id {
            return Err(DispatchError::AlreadyAssigned {
                task_name: self.name.clone(),
                task_id: existing.to_string(),
            });
        }
        self.id = Some(id);
        Ok(())
    }
}

impl PartialEq for ClusterTask {
    fn eq(&self, other: &Self) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl Hash for ClusterTask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Addressing for one remote task: where it came from, where it runs, and
/// which collector takes its result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterTaskRef {
    dispatch_id: Uuid,
    task: ClusterTask,
    source_node: NodeName,
    target_node: NodeName,
    source_task_id: TaskId,
    collector_id: CollectorId,
}

impl ClusterTaskRef {
    pub fn new(
        task: ClusterTask,
        source_node: NodeName,
        target_node: NodeName,
        source_task_id: TaskId,
        collector_id: CollectorId,
    ) -> Self {
        Self {
            dispatch_id: Uuid::new_v4(),
            task,
            source_node,
            target_node,
            source_task_id,
            collector_id,
        }
    }

    /// Identifies this dispatch on the source node
    pub fn dispatch_id(&self) -> Uuid {
        self.dispatch_id
    }

    pub fn task(&self) -> &ClusterTask {
        &self.task
    }

    pub(crate) fn task_mut(&mut self) -> &mut ClusterTask {
        &mut self.task
    }

    pub fn source_node(&self) -> &NodeName {
        &self.source_node
    }

    pub fn target_node(&self) -> &NodeName {
        &self.target_node
    }

    pub fn source_task_id(&self) -> &TaskId {
        &self.source_task_id
    }

    pub fn collector_id(&self) -> CollectorId {
        self.collector_id
    }
}

/// Outcome of a remote task: a value or an error, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterResult {
    task_ref: ClusterTaskRef,
    outcome: std::result::Result<Value, ClusterError>,
}

impl ClusterResult {
    pub fn success(task_ref: ClusterTaskRef, result: Value) -> Self {
        Self {
            task_ref,
            outcome: Ok(result),
        }
    }

    pub fn failure(task_ref: ClusterTaskRef, error: ClusterError) -> Self {
        Self {
            task_ref,
            outcome: Err(error),
        }
    }

    pub fn task_ref(&self) -> &ClusterTaskRef {
        &self.task_ref
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn result(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    pub fn throwable(&self) -> Option<&ClusterError> {
        self.outcome.as_ref().err()
    }
}
