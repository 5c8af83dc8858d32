//! Fair scheduling of tasks from many sources under global and per-source
//! concurrency caps, and dispatch of tasks to other nodes with results routed
//! back to in-memory collectors.
//!
//! A job registers a [`TaskSource`] with a [`TaskExecutor`]. The executor
//! visits sources round robin in registration order and starts tasks until
//! the global cap is reached; each completion releases its slot and makes one
//! more scheduling attempt. Work bound for another node is wrapped in a
//! [`ClusterTask`], sent through a [`ClusterDispatcher`], and its
//! [`ClusterResult`] handed to the [`Collector`] named in the task's ref.

pub mod cluster;
pub mod core;
pub mod scheduler;
pub mod task;

pub use crate::core::config::{SchedulerConfig, SchedulerConfigBuilder};
pub use crate::core::errors::{DispatchError, Result};
pub use crate::core::telemetry::init_logging;

pub use cluster::{
    ChannelCollector, ClusterDispatcher, ClusterError, ClusterErrorKind, ClusterResult,
    ClusterTask, ClusterTaskHandler, ClusterTaskPayload, ClusterTaskRef, ClusterTaskType,
    ClusterTransport, Collector, CollectorId, CollectorRegistry, DispatchState, DispatchStats,
    HandlerContext, HandlerRegistry, LocalTransport, NodeName,
};
pub use scheduler::{
    FnTaskSource, Prioritiser, QueuedTaskSource, SchedulerStats, SourceCore, TaskExecutor,
    TaskQueue, TaskSource,
};
pub use task::{Task, TaskControl, TaskId, TaskManager, TaskProgress, ThreadPoolHint};
