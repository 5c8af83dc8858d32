use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::task::{ClusterTask, ClusterTaskPayload};
use super::types::{ClusterTaskType, NodeName};
use crate::core::errors::{DispatchError, Result};
use crate::task::{TaskControl, TaskId, TaskManager};

/// What a handler can see while it runs on the worker
#[derive(Clone)]
pub struct HandlerContext {
    pub node: NodeName,
    pub control: Arc<TaskControl>,
    pub task_manager: Arc<TaskManager>,
}

impl HandlerContext {
    pub fn task_id(&self) -> &TaskId {
        self.control.id()
    }

    /// Long running handlers should check this between units of work
    pub fn is_terminated(&self) -> bool {
        self.control.is_terminated()
    }
}

/// Executes one kind of cluster task on the worker node
#[async_trait]
pub trait ClusterTaskHandler: Send + Sync {
    async fn exec(&self, ctx: &HandlerContext, task: &ClusterTask) -> anyhow::Result<Value>;
}

/// Handlers keyed by task type, fixed once built
pub struct HandlerRegistry {
    handlers: HashMap<ClusterTaskType, Arc<dyn ClusterTaskHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn resolve(&self, task_type: ClusterTaskType) -> Result<Arc<dyn ClusterTaskHandler>> {
        self.handlers
            .get(&task_type)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownTaskType {
                task_type: task_type.to_string(),
            })
    }

    pub fn contains(&self, task_type: ClusterTaskType) -> bool {
        self.handlers.contains_key(&task_type)
    }

    pub fn task_types(&self) -> Vec<ClusterTaskType> {
        ClusterTaskType::ALL
            .into_iter()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<ClusterTaskType, Arc<dyn ClusterTaskHandler>>,
}

impl HandlerRegistryBuilder {
    /// Bind a handler to a task type. Each type may be bound once.
    pub fn bind<H>(mut self, task_type: ClusterTaskType, handler: H) -> Result<Self>
    where
        H: ClusterTaskHandler + 'static,
    {
        if self.handlers.contains_key(&task_type) {
            return Err(DispatchError::HandlerAlreadyBound {
                task_type: task_type.to_string(),
            });
        }
        debug!(task_type = %task_type, "Bound cluster task handler");
        self.handlers.insert(task_type, Arc::new(handler));
        Ok(self)
    }

    /// Bind the handlers every node needs: termination and ping
    pub fn with_builtin_handlers(self) -> Result<Self> {
        self.bind(ClusterTaskType::Terminate, TerminateHandler)?
            .bind(ClusterTaskType::Ping, PingHandler)
    }

    /// Build the registry, failing if any task type has no handler
    pub fn build(self) -> Result<HandlerRegistry> {
        let missing: Vec<&str> = ClusterTaskType::ALL
            .iter()
            .filter(|t| !self.handlers.contains_key(t))
            .map(|t| t.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(DispatchError::configuration_field(
                format!("No handler bound for task types: {}", missing.join(", ")),
                "handlers",
            ));
        }
        Ok(self.build_partial())
    }

    /// Build the registry even if some task types are unbound. Tasks of an
    /// unbound type fail when they arrive.
    pub fn build_partial(self) -> HandlerRegistry {
        info!(handlers = self.handlers.len(), "Built handler registry");
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}

/// Terminates this node's tasks that descend from the given ancestor
pub struct TerminateHandler;

#[async_trait]
impl ClusterTaskHandler for TerminateHandler {
    async fn exec(&self, ctx: &HandlerContext, task: &ClusterTask) -> anyhow::Result<Value> {
        let ClusterTaskPayload::Terminate {
            search_name,
            ancestor,
            task_name,
        } = task.payload()
        else {
            anyhow::bail!("expected a Terminate payload, got {}", task.task_type());
        };

        let terminated = ctx
            .task_manager
            .terminate(search_name, ancestor, task_name.as_deref());
        Ok(serde_json::to_value(terminated)?)
    }
}

/// Answers with the name of the node it ran on
pub struct PingHandler;

#[async_trait]
impl ClusterTaskHandler for PingHandler {
    async fn exec(&self, ctx: &HandlerContext, _task: &ClusterTask) -> anyhow::Result<Value> {
        Ok(json!({ "node": ctx.node }))
    }
}
