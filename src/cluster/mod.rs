//! Sending tasks to other nodes and routing their results back.

pub mod collector;
pub mod dispatcher;
pub mod handler;
pub mod task;
pub mod transport;
pub mod types;

pub use collector::{ChannelCollector, Collector, CollectorRegistry};
pub use dispatcher::{ClusterDispatcher, DispatchState, DispatchStats};
pub use handler::{
    ClusterTaskHandler, HandlerContext, HandlerRegistry, HandlerRegistryBuilder, PingHandler,
    TerminateHandler,
};
pub use task::{ClusterResult, ClusterTask, ClusterTaskPayload, ClusterTaskRef};
pub use transport::{ClusterTransport, LocalTransport};
pub use types::{ClusterError, ClusterErrorKind, ClusterTaskType, CollectorId, NodeName};
