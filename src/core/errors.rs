use std::time::Duration;
use thiserror::Error;

/// Unified error type for scheduling and cluster dispatch
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Configuration errors, raised while wiring the system together
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// A handler was bound twice for the same task type
    #[error("Handler already bound for task type {task_type}")]
    HandlerAlreadyBound { task_type: String },

    /// No handler could be resolved for a task type
    #[error("No handler found for task type {task_type}")]
    UnknownTaskType { task_type: String },

    /// The worker id of a cluster task was read before the worker assigned it
    #[error("Cluster task '{task_name}' has not been executed yet, it has no id")]
    NotYetExecuted { task_name: String },

    /// A worker id was assigned twice
    #[error("Cluster task '{task_name}' already has id {task_id}")]
    AlreadyAssigned { task_name: String, task_id: String },

    #[error("Collector not found: {collector_id}")]
    CollectorNotFound { collector_id: String },

    /// A collector refused a result
    #[error("Collector {collector_id} failed to receive result: {message}")]
    CollectorFailed {
        collector_id: String,
        message: String,
    },

    #[error("Node not found: {node}")]
    NodeNotFound { node: String },

    #[error("Operation timed out: {operation} (timeout: {timeout_ms}ms)")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Queue full: capacity {capacity} reached")]
    QueueFull { capacity: usize },

    #[error("Operation was cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DispatchError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error pointing at a field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if the failed operation may succeed when tried again later
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::QueueFull { .. } => true,
            Self::NodeNotFound { .. }
            | Self::CollectorNotFound { .. }
            | Self::CollectorFailed { .. } => false,
            Self::Configuration { .. }
            | Self::HandlerAlreadyBound { .. }
            | Self::UnknownTaskType { .. }
            | Self::NotYetExecuted { .. }
            | Self::AlreadyAssigned { .. } => false,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } | Self::HandlerAlreadyBound { .. } => "configuration",
            Self::UnknownTaskType { .. } => "registry",
            Self::NotYetExecuted { .. } | Self::AlreadyAssigned { .. } => "contract",
            Self::CollectorNotFound { .. } | Self::NodeNotFound { .. } => "lookup",
            Self::CollectorFailed { .. } => "delivery",
            Self::Timeout { .. } => "timeout",
            Self::QueueFull { .. } => "capacity",
            Self::Cancelled { .. } => "cancelled",
            Self::Serialization(_) => "serialization",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, DispatchError>;

impl From<anyhow::Error> for DispatchError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}
