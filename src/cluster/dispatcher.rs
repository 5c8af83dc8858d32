use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::collector::CollectorRegistry;
use super::handler::{HandlerContext, HandlerRegistry};
use super::task::{ClusterResult, ClusterTask, ClusterTaskPayload, ClusterTaskRef};
use super::transport::ClusterTransport;
use super::types::{ClusterError, CollectorId, NodeName};
use crate::core::config::SchedulerConfig;
use crate::core::errors::{DispatchError, Result};
use crate::scheduler::{QueuedTaskSource, TaskExecutor};
use crate::task::{Task, TaskControl, TaskId, TaskManager, TaskProgress, ThreadPoolHint};

/// Where a remote task is, as seen from the node that sent it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchState {
    Created,
    Dispatched,
    /// Accepted by the target node
    Running,
    /// The target could not be reached in time or refused the task
    Rejected,
    ResultDelivered,
    Abandoned,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Tasks sent from this node
    pub dispatched: u64,
    pub rejected: u64,
    /// Results handed to a collector
    pub delivered: u64,
    /// Dispatches dropped without a result reaching a collector
    pub abandoned: u64,
    /// Tasks this node ran for other nodes
    pub executed: u64,
    /// Tasks from other nodes terminated here before they started
    pub cancelled: u64,
    /// Results this node could not send back
    pub send_failures: u64,
    /// Dispatches that have not reached a terminal state
    pub in_flight: usize,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    abandoned: AtomicU64,
    executed: AtomicU64,
    cancelled: AtomicU64,
    send_failures: AtomicU64,
}

/// A dispatch this node is waiting on
struct Tracked {
    state: DispatchState,
    source_task_id: TaskId,
    created: Instant,
}

impl Tracked {
    fn new(state: DispatchState, source_task_id: &TaskId) -> Self {
        Self {
            state,
            source_task_id: source_task_id.clone(),
            created: Instant::now(),
        }
    }
}

/// Scheduler that runs tasks received from other nodes
struct WorkerPool {
    executor: TaskExecutor,
    source: Arc<QueuedTaskSource>,
}

/// Sends tasks to other nodes, runs tasks sent to this one, and routes
/// results back to their collectors.
///
/// Results are always handed to collectors on a freshly spawned task, never
/// on the task that received them from the transport.
pub struct ClusterDispatcher {
    node: NodeName,
    runtime: Handle,
    transport: Arc<dyn ClusterTransport>,
    handlers: Arc<HandlerRegistry>,
    collectors: Arc<CollectorRegistry>,
    task_manager: Arc<TaskManager>,
    worker: Option<WorkerPool>,
    remote_timeout: Duration,
    delivery_timeout: Duration,
    states: DashMap<Uuid, Tracked>,
    counters: Counters,
}

impl ClusterDispatcher {
    pub fn new(
        node: impl Into<NodeName>,
        runtime: Handle,
        transport: Arc<dyn ClusterTransport>,
        handlers: Arc<HandlerRegistry>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            node: node.into(),
            runtime,
            transport,
            handlers,
            collectors: Arc::new(CollectorRegistry::new()),
            task_manager: Arc::new(TaskManager::new()),
            worker: None,
            remote_timeout: config.remote_timeout,
            delivery_timeout: config.delivery_timeout,
            states: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Share a task manager with the rest of the node, so termination by
    /// ancestor reaches local and remote work alike
    pub fn with_task_manager(mut self, task_manager: Arc<TaskManager>) -> Self {
        self.task_manager = task_manager;
        self
    }

    pub fn with_collectors(mut self, collectors: Arc<CollectorRegistry>) -> Self {
        self.collectors = collectors;
        self
    }

    /// Run incoming tasks through `executor` instead of spawning them
    /// directly, so they share its global cap with local work
    pub fn with_executor(mut self, executor: TaskExecutor, config: &SchedulerConfig) -> Self {
        let source = Arc::new(QueuedTaskSource::from_config(
            format!("cluster@{}", self.node),
            config,
        ));
        executor.register_source(source.clone());
        self.worker = Some(WorkerPool { executor, source });
        self
    }

    pub fn node(&self) -> &NodeName {
        &self.node
    }

    pub fn collectors(&self) -> &Arc<CollectorRegistry> {
        &self.collectors
    }

    pub fn task_manager(&self) -> &Arc<TaskManager> {
        &self.task_manager
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Address a task to `target`, on behalf of `source_task_id`
    pub fn create_ref(
        &self,
        task: ClusterTask,
        target: NodeName,
        source_task_id: &TaskId,
        collector_id: CollectorId,
    ) -> ClusterTaskRef {
        let task_ref = ClusterTaskRef::new(
            task,
            self.node.clone(),
            target,
            source_task_id.clone(),
            collector_id,
        );
        self.states.insert(
            task_ref.dispatch_id(),
            Tracked::new(DispatchState::Created, source_task_id),
        );
        task_ref
    }

    /// Send a task and return at once. The result, or the failure to send,
    /// reaches the task's collector later.
    ///
    /// Refs created more than `remote_timeout` ago and never dispatched are
    /// abandoned on the way.
    pub fn dispatch(self: &Arc<Self>, task_ref: ClusterTaskRef) {
        let dispatch_id = task_ref.dispatch_id();
        self.expire_undispatched(dispatch_id);
        self.states
            .entry(dispatch_id)
            .and_modify(|tracked| tracked.state = DispatchState::Dispatched)
            .or_insert_with(|| Tracked::new(DispatchState::Dispatched, task_ref.source_task_id()));
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        info!(
            %dispatch_id,
            task = task_ref.task().name(),
            task_type = %task_ref.task().task_type(),
            target = %task_ref.target_node(),
            "Dispatching cluster task"
        );

        let this = self.clone();
        self.runtime.spawn(async move {
            let sent = timeout(this.remote_timeout, this.transport.send_task(task_ref.clone())).await;
            let error = match sent {
                Ok(Ok(())) => {
                    this.advance(dispatch_id, DispatchState::Running);
                    return;
                }
                Ok(Err(e)) => ClusterError::rejected(e.to_string()),
                Err(_) => ClusterError::timeout(
                    DispatchError::timeout(
                        format!("send task to {}", task_ref.target_node()),
                        this.remote_timeout,
                    )
                    .to_string(),
                ),
            };

            this.counters.rejected.fetch_add(1, Ordering::Relaxed);
            this.advance(dispatch_id, DispatchState::Rejected);
            warn!(
                %dispatch_id,
                target = %task_ref.target_node(),
                kind = ?error.kind,
                error = %error,
                "Cluster task rejected"
            );
            this.deliver_result(ClusterResult::failure(task_ref, error));
        });
    }

    /// Build a ref and dispatch it. Returns the dispatch id.
    pub fn dispatch_task(
        self: &Arc<Self>,
        task: ClusterTask,
        target: NodeName,
        source_task_id: &TaskId,
        collector_id: CollectorId,
    ) -> Uuid {
        let task_ref = self.create_ref(task, target, source_task_id, collector_id);
        let dispatch_id = task_ref.dispatch_id();
        self.dispatch(task_ref);
        dispatch_id
    }

    /// Hand a result to its collector on a new task. A result no collector
    /// accepts is abandoned: logged and dropped, never retried. So is a
    /// result for a dispatch that was already abandoned.
    pub fn deliver_result(self: &Arc<Self>, result: ClusterResult) {
        let this = self.clone();
        self.runtime.spawn(async move {
            this.deliver(result).await;
        });
    }

    async fn deliver(&self, result: ClusterResult) -> DispatchState {
        let dispatch_id = result.task_ref().dispatch_id();
        let collector_id = result.task_ref().collector_id();
        let task_name = result.task_ref().task().name().to_string();
        let success = result.is_success();

        if self.states.remove(&dispatch_id).is_none() {
            debug!(%dispatch_id, task = %task_name, "Dropping result of abandoned dispatch");
            return DispatchState::Abandoned;
        }

        let delivered = match self.collectors.get(&collector_id) {
            None => Err(DispatchError::CollectorNotFound {
                collector_id: collector_id.to_string(),
            }),
            Some(collector) => {
                let receive = AssertUnwindSafe(collector.receive(result)).catch_unwind();
                match timeout(self.delivery_timeout, receive).await {
                    Ok(Ok(Ok(()))) => Ok(()),
                    Ok(Ok(Err(e))) => Err(DispatchError::CollectorFailed {
                        collector_id: collector_id.to_string(),
                        message: e.to_string(),
                    }),
                    Ok(Err(panic)) => Err(DispatchError::CollectorFailed {
                        collector_id: collector_id.to_string(),
                        message: panic_message(panic.as_ref()),
                    }),
                    Err(_) => Err(DispatchError::timeout(
                        format!("deliver to collector {}", collector_id),
                        self.delivery_timeout,
                    )),
                }
            }
        };

        match delivered {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(%dispatch_id, collector = %collector_id, task = %task_name, success, "Delivered cluster result");
                DispatchState::ResultDelivered
            }
            Err(e) => {
                self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                warn!(
                    %dispatch_id,
                    collector = %collector_id,
                    task = %task_name,
                    error = %e,
                    "Abandoned cluster result"
                );
                DispatchState::Abandoned
            }
        }
    }

    /// Accept a task that arrived from another node. The task gets its id
    /// here, as a child of the source task, and runs in the background.
    ///
    /// Every accepted task sends exactly one result back, including a task
    /// terminated while it waits for a slot.
    pub fn accept(self: &Arc<Self>, mut task_ref: ClusterTaskRef) -> Result<()> {
        let task_id = TaskId::child_of(task_ref.source_task_id());
        task_ref.task_mut().assign_id(task_id.clone())?;
        let control = Arc::new(TaskControl::new(task_id, task_ref.task().name()));
        self.task_manager.register(&control);
        debug!(
            task_id = %control.id(),
            task = control.name(),
            source = %task_ref.source_node(),
            "Accepted cluster task"
        );

        let slot = Arc::new(Mutex::new(Some(task_ref)));
        let pending = PendingResult {
            dispatcher: self.clone(),
            control: control.clone(),
            task_ref: slot.clone(),
        };
        let work = async move {
            if let Some(task_ref) = pending.take() {
                pending
                    .dispatcher
                    .execute(task_ref, pending.control.clone())
                    .await;
            }
            Ok::<(), anyhow::Error>(())
        };

        match &self.worker {
            Some(pool) => {
                let task = Task::from_control(control.clone(), work).with_pool(ThreadPoolHint::Cluster);
                if let Err(rejected) = pool.source.try_add(Arc::new(task)) {
                    // The caller reports the refusal, not the dropped body
                    slot.lock().take();
                    drop(rejected);
                    self.task_manager.deregister(control.id());
                    return Err(DispatchError::QueueFull {
                        capacity: pool.source.queue().capacity(),
                    });
                }
                pool.executor.exec_next_task();
            }
            None => {
                self.runtime.spawn(work);
            }
        }
        Ok(())
    }

    async fn execute(&self, task_ref: ClusterTaskRef, control: Arc<TaskControl>) {
        let task_type = task_ref.task().task_type();
        let result = match self.handlers.resolve(task_type) {
            Err(e) => {
                warn!(task_id = %control.id(), error = %e, "Cannot execute cluster task");
                ClusterResult::failure(task_ref, ClusterError::unknown_task_type(task_type))
            }
            Ok(handler) => {
                let ctx = HandlerContext {
                    node: self.node.clone(),
                    control: control.clone(),
                    task_manager: self.task_manager.clone(),
                };
                let outcome = AssertUnwindSafe(handler.exec(&ctx, task_ref.task()))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(value)) => ClusterResult::success(task_ref, value),
                    Ok(Err(e)) => {
                        debug!(task_id = %control.id(), error = %e, "Cluster task failed");
                        ClusterResult::failure(task_ref, ClusterError::execution(e.to_string()))
                    }
                    Err(panic) => ClusterResult::failure(
                        task_ref,
                        ClusterError::execution(panic_message(panic.as_ref())),
                    ),
                }
            }
        };
        self.counters.executed.fetch_add(1, Ordering::Relaxed);
        self.return_result(result, &control).await;
    }

    /// Report a task whose body was dropped before it ran
    async fn cancel(&self, task_ref: ClusterTaskRef, control: Arc<TaskControl>) {
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        debug!(task_id = %control.id(), task = control.name(), "Cluster task dropped before it started");
        let reason = DispatchError::cancelled(format!("{} before it started", control.name()));
        let result = ClusterResult::failure(task_ref, ClusterError::cancelled(reason.to_string()));
        self.return_result(result, &control).await;
    }

    async fn return_result(&self, result: ClusterResult, control: &TaskControl) {
        let sent = timeout(self.remote_timeout, self.transport.send_result(result)).await;
        let failure = match sent {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(DispatchError::timeout("send result", self.remote_timeout)),
        };
        if let Some(e) = failure {
            self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
            warn!(task_id = %control.id(), error = %e, "Failed to return cluster result, terminating task");
            self.task_manager
                .terminate(control.name(), control.id(), None);
        }
        self.task_manager.deregister(control.id());
    }

    /// Terminate this node's tasks that are, or descend from, `ancestor`.
    ///
    /// Without a `task_name` filter the whole search is over, so dispatches
    /// made on its behalf are abandoned too and their late results dropped.
    pub fn terminate(
        &self,
        search_name: &str,
        ancestor: &TaskId,
        task_name: Option<&str>,
    ) -> Vec<TaskProgress> {
        if task_name.is_none() {
            self.abandon_where(
                |_, tracked| tracked.source_task_id.is_or_descends_from(ancestor),
                "search terminated",
            );
        }
        self.task_manager.terminate(search_name, ancestor, task_name)
    }

    /// Send a terminate task to every node in `nodes`. Each node's list of
    /// terminated tasks arrives at `collector_id`.
    pub fn terminate_cluster(
        self: &Arc<Self>,
        nodes: &[NodeName],
        search_name: &str,
        ancestor: &TaskId,
        task_name: Option<&str>,
        collector_id: CollectorId,
    ) -> Vec<Uuid> {
        info!(search = search_name, ancestor = %ancestor, nodes = nodes.len(), "Terminating across cluster");
        // Own root, so the terminate task is not among the tasks it terminates
        let source_task_id = TaskId::new_root();
        nodes
            .iter()
            .map(|node| {
                let task = ClusterTask::new(
                    format!("terminate {}", search_name),
                    ClusterTaskPayload::Terminate {
                        search_name: search_name.to_string(),
                        ancestor: ancestor.clone(),
                        task_name: task_name.map(str::to_string),
                    },
                );
                self.dispatch_task(task, node.clone(), &source_task_id, collector_id)
            })
            .collect()
    }

    /// State of a dispatch that has not finished yet
    pub fn state(&self, dispatch_id: &Uuid) -> Option<DispatchState> {
        self.states.get(dispatch_id).map(|tracked| tracked.state)
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            dispatched: c.dispatched.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            abandoned: c.abandoned.load(Ordering::Relaxed),
            executed: c.executed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
            in_flight: self.states.len(),
        }
    }

    /// Move a dispatch still being tracked to `state`. Dispatches that
    /// already finished are left alone.
    fn advance(&self, dispatch_id: Uuid, state: DispatchState) {
        if let Some(mut tracked) = self.states.get_mut(&dispatch_id) {
            tracked.state = state;
        }
    }

    /// Abandon refs created more than `remote_timeout` ago and never
    /// dispatched, other than the one being dispatched now
    fn expire_undispatched(&self, dispatching: Uuid) {
        let max_age = self.remote_timeout;
        self.abandon_where(
            |dispatch_id, tracked| {
                *dispatch_id != dispatching
                    && tracked.state == DispatchState::Created
                    && tracked.created.elapsed() > max_age
            },
            "never dispatched",
        );
    }

    /// Stop tracking every dispatch matching `stale`. Returns how many.
    fn abandon_where<F>(&self, stale: F, reason: &str) -> usize
    where
        F: Fn(&Uuid, &Tracked) -> bool,
    {
        let mut abandoned = Vec::new();
        self.states.retain(|dispatch_id, tracked| {
            if stale(dispatch_id, tracked) {
                abandoned.push(*dispatch_id);
                return false;
            }
            true
        });
        for dispatch_id in &abandoned {
            self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
            warn!(%dispatch_id, reason, "Abandoned cluster dispatch");
        }
        abandoned.len()
    }
}

/// Holds a remote task until its body starts. A body dropped unstarted,
/// because the task was terminated while queued, still answers the source
/// node with a cancelled result.
struct PendingResult {
    dispatcher: Arc<ClusterDispatcher>,
    control: Arc<TaskControl>,
    task_ref: Arc<Mutex<Option<ClusterTaskRef>>>,
}

impl PendingResult {
    fn take(&self) -> Option<ClusterTaskRef> {
        self.task_ref.lock().take()
    }
}

impl Drop for PendingResult {
    fn drop(&mut self) {
        let Some(task_ref) = self.take() else {
            return;
        };
        let dispatcher = self.dispatcher.clone();
        let control = self.control.clone();
        self.dispatcher.runtime.spawn(async move {
            dispatcher.cancel(task_ref, control).await;
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "task panicked".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::collector::ChannelCollector;
    use crate::cluster::handler::ClusterTaskHandler;
    use crate::cluster::transport::LocalTransport;
    use crate::cluster::types::{ClusterErrorKind, ClusterTaskType};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    struct PanicHandler;

    #[async_trait]
    impl ClusterTaskHandler for PanicHandler {
        async fn exec(&self, _ctx: &HandlerContext, _task: &ClusterTask) -> anyhow::Result<Value> {
            panic!("index corrupt")
        }
    }

    fn node(
        name: &str,
        transport: &Arc<LocalTransport>,
        handlers: HandlerRegistry,
    ) -> Arc<ClusterDispatcher> {
        let dispatcher = Arc::new(ClusterDispatcher::new(
            name,
            Handle::current(),
            transport.clone(),
            Arc::new(handlers),
            &SchedulerConfig::development(),
        ));
        transport.attach(&dispatcher);
        dispatcher
    }

    fn search() -> ClusterTask {
        ClusterTask::new(
            "search",
            ClusterTaskPayload::ShardSearch {
                index: "events".into(),
                shards: vec![0],
                query: "*".into(),
            },
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ping_round_trip() {
        let transport = Arc::new(LocalTransport::new());
        let builtin = || HandlerRegistry::builder().with_builtin_handlers().unwrap().build_partial();
        let a = node("node-a", &transport, builtin());
        let _b = node("node-b", &transport, builtin());

        let (collector, mut rx) = ChannelCollector::new();
        let collector_id = a.collectors().register(Arc::new(collector));
        let dispatch_id = a.dispatch_task(
            ClusterTask::new("ping", ClusterTaskPayload::Ping),
            "node-b".into(),
            &TaskId::new_root(),
            collector_id,
        );

        let result = rx.recv().await.unwrap();
        assert_eq!(result.result(), Some(&json!({"node": "node-b"})));
        assert_eq!(result.task_ref().dispatch_id(), dispatch_id);
        assert!(result.task_ref().task().id().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unbound_type_fails_as_data() {
        let transport = Arc::new(LocalTransport::new());
        let a = node("node-a", &transport, HandlerRegistry::builder().build_partial());
        let _b = node("node-b", &transport, HandlerRegistry::builder().build_partial());

        let (collector, mut rx) = ChannelCollector::new();
        let collector_id = a.collectors().register(Arc::new(collector));
        a.dispatch_task(search(), "node-b".into(), &TaskId::new_root(), collector_id);

        let result = rx.recv().await.unwrap();
        let error = result.throwable().unwrap();
        assert_eq!(error.kind, ClusterErrorKind::UnknownTaskType);
        assert_eq!(error.message, "No handler found for task type ShardSearch");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_handler_panic_becomes_failure() {
        let transport = Arc::new(LocalTransport::new());
        let handlers = || {
            HandlerRegistry::builder()
                .bind(ClusterTaskType::ShardSearch, PanicHandler)
                .unwrap()
                .build_partial()
        };
        let a = node("node-a", &transport, handlers());
        let b = node("node-b", &transport, handlers());

        let (collector, mut rx) = ChannelCollector::new();
        let collector_id = a.collectors().register(Arc::new(collector));
        a.dispatch_task(search(), "node-b".into(), &TaskId::new_root(), collector_id);

        let result = rx.recv().await.unwrap();
        assert_eq!(result.throwable().unwrap().message, "index corrupt");
        assert_eq!(b.stats().executed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unknown_target_is_rejected() {
        let transport = Arc::new(LocalTransport::new());
        let a = node("node-a", &transport, HandlerRegistry::builder().build_partial());

        let (collector, mut rx) = ChannelCollector::new();
        let collector_id = a.collectors().register(Arc::new(collector));
        let dispatch_id = a.dispatch_task(search(), "node-z".into(), &TaskId::new_root(), collector_id);

        let result = rx.recv().await.unwrap();
        let error = result.throwable().unwrap();
        assert_eq!(error.kind, ClusterErrorKind::Rejected);
        assert_eq!(error.message, "Node not found: node-z");
        assert!(result.task_ref().task().id().is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(a.state(&dispatch_id), None);
        let stats = a.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_missing_collector_abandons() {
        let transport = Arc::new(LocalTransport::new());
        let a = node("node-a", &transport, HandlerRegistry::builder().build_partial());

        let task_ref = a.create_ref(search(), "node-b".into(), &TaskId::new_root(), CollectorId::new());
        assert_eq!(a.state(&task_ref.dispatch_id()), Some(DispatchState::Created));

        let state = a
            .deliver(ClusterResult::success(task_ref.clone(), json!(1)))
            .await;
        assert_eq!(state, DispatchState::Abandoned);
        assert_eq!(a.state(&task_ref.dispatch_id()), None);
        assert_eq!(a.stats().abandoned, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_undispatched_refs_expire() {
        let transport = Arc::new(LocalTransport::new());
        let config = SchedulerConfig::builder()
            .remote_timeout(Duration::from_millis(20))
            .build()
            .unwrap();
        let a = Arc::new(ClusterDispatcher::new(
            "node-a",
            Handle::current(),
            transport.clone(),
            Arc::new(HandlerRegistry::builder().build_partial()),
            &config,
        ));
        transport.attach(&a);
        let (collector, mut rx) = ChannelCollector::new();
        let collector_id = a.collectors().register(Arc::new(collector));

        let forgotten = a.create_ref(search(), "node-b".into(), &TaskId::new_root(), collector_id);
        let late = a.create_ref(search(), "node-b".into(), &TaskId::new_root(), collector_id);
        tokio::time::sleep(Duration::from_millis(40)).await;

        a.dispatch(late);
        assert_eq!(a.state(&forgotten.dispatch_id()), None);
        assert_eq!(a.stats().abandoned, 1);

        // node-b was never attached, the late ref is rejected but still answered
        let result = rx.recv().await.unwrap();
        assert_eq!(result.throwable().unwrap().kind, ClusterErrorKind::Rejected);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = a.stats();
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_terminates_task_when_result_cannot_be_returned() {
        let transport = Arc::new(LocalTransport::new());
        let b = node(
            "node-b",
            &transport,
            HandlerRegistry::builder().with_builtin_handlers().unwrap().build_partial(),
        );

        // node-a never attached, so the result has nowhere to go
        let task_ref = ClusterTaskRef::new(
            ClusterTask::new("ping", ClusterTaskPayload::Ping),
            "node-a".into(),
            "node-b".into(),
            TaskId::new_root(),
            CollectorId::new(),
        );
        b.accept(task_ref).unwrap();

        for _ in 0..100 {
            if b.stats().send_failures == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(b.stats().send_failures, 1);
        assert_eq!(b.stats().executed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_runs_through_executor() {
        let transport = Arc::new(LocalTransport::new());
        let config = SchedulerConfig::development();
        let executor = TaskExecutor::from_config("node-b", Handle::current(), &config);
        let builtin = || HandlerRegistry::builder().with_builtin_handlers().unwrap().build_partial();

        let a = node("node-a", &transport, builtin());
        let b = Arc::new(
            ClusterDispatcher::new("node-b", Handle::current(), transport.clone(), Arc::new(builtin()), &config)
                .with_executor(executor.clone(), &config),
        );
        transport.attach(&b);
        assert_eq!(executor.source_count(), 1);

        let (collector, mut rx) = ChannelCollector::new();
        let collector_id = a.collectors().register(Arc::new(collector));
        for _ in 0..3 {
            a.dispatch_task(
                ClusterTask::new("ping", ClusterTaskPayload::Ping),
                "node-b".into(),
                &TaskId::new_root(),
                collector_id,
            );
        }
        for _ in 0..3 {
            assert!(rx.recv().await.unwrap().is_success());
        }
        assert_eq!(executor.stats().tasks_started, 3);
    }
}
