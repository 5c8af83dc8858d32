use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Identity of a node in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeName(String);

impl NodeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for NodeName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Address of a result sink on the source node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectorId(Uuid);

impl CollectorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CollectorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CollectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of a cluster task, used to resolve its handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterTaskType {
    ShardSearch,
    Terminate,
    Ping,
}

impl ClusterTaskType {
    /// Every task kind; a complete handler registry binds all of them
    pub const ALL: [ClusterTaskType; 3] = [Self::ShardSearch, Self::Terminate, Self::Ping];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShardSearch => "ShardSearch",
            Self::Terminate => "Terminate",
            Self::Ping => "Ping",
        }
    }
}

impl fmt::Display for ClusterTaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterErrorKind {
    /// The handler returned an error or panicked
    Execution,
    /// The task could not be handed to the target node in time
    Timeout,
    /// The target node has no handler for the task kind
    UnknownTaskType,
    /// The target node could not be reached or refused the task
    Rejected,
    /// The task was terminated on the target node before it started
    Cancelled,
}

/// A failure carried back across the node boundary as data
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ClusterError {
    pub kind: ClusterErrorKind,
    pub message: String,
}

impl ClusterError {
    pub fn new(kind: ClusterErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ClusterErrorKind::Execution, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ClusterErrorKind::Timeout, message)
    }

    pub fn unknown_task_type(task_type: ClusterTaskType) -> Self {
        Self::new(
            ClusterErrorKind::UnknownTaskType,
            format!("No handler found for task type {}", task_type),
        )
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ClusterErrorKind::Rejected, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ClusterErrorKind::Cancelled, message)
    }
}
