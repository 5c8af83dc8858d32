use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::id::TaskId;

/// Hint for which worker pool a task prefers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadPoolHint {
    #[default]
    Default,
    /// Index shard searching
    Search,
    /// Data extraction following a search
    Extraction,
    /// Work that arrived from another node
    Cluster,
}

/// Shared, observable state of one task: identity and the termination flag.
///
/// The flag only ever moves from false to true, so it is safe to read from
/// any thread without further synchronisation.
#[derive(Debug)]
pub struct TaskControl {
    id: TaskId,
    name: String,
    created_at: DateTime<Utc>,
    terminated: AtomicBool,
    info: Mutex<String>,
}

impl TaskControl {
    pub fn new(id: TaskId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            created_at: Utc::now(),
            terminated: AtomicBool::new(false),
            info: Mutex::new(String::new()),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Flag the task as terminated. Returns true if this call flipped the flag.
    pub fn terminate(&self) -> bool {
        !self.terminated.swap(true, Ordering::AcqRel)
    }

    /// Latest progress message
    pub fn info(&self) -> String {
        self.info.lock().clone()
    }

    pub fn set_info(&self, info: impl Into<String>) {
        *self.info.lock() = info.into();
    }
}

/// The body of a task
pub type TaskWork = BoxFuture<'static, anyhow::Result<()>>;

/// A unit of work: created by a source, queued, executed at most once, then dropped.
pub struct Task {
    control: Arc<TaskControl>,
    pool: ThreadPoolHint,
    work: Mutex<Option<TaskWork>>,
}

impl Task {
    /// Create a task from a future
    pub fn new<Fut>(name: impl Into<String>, parent: Option<&TaskId>, work: Fut) -> Self
    where
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let control = Arc::new(TaskControl::new(TaskId::new(parent), name));
        Self::from_control(control, work)
    }

    /// Create a task whose body can observe its own control, so it can poll
    /// for termination while it runs
    pub fn with_control<F, Fut>(name: impl Into<String>, parent: Option<&TaskId>, f: F) -> Self
    where
        F: FnOnce(Arc<TaskControl>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let control = Arc::new(TaskControl::new(TaskId::new(parent), name));
        let work = f(control.clone());
        Self::from_control(control, work)
    }

    pub(crate) fn from_control<Fut>(control: Arc<TaskControl>, work: Fut) -> Self
    where
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            control,
            pool: ThreadPoolHint::default(),
            work: Mutex::new(Some(work.boxed())),
        }
    }

    pub fn with_pool(mut self, pool: ThreadPoolHint) -> Self {
        self.pool = pool;
        self
    }

    pub fn id(&self) -> &TaskId {
        self.control.id()
    }

    pub fn name(&self) -> &str {
        self.control.name()
    }

    pub fn pool(&self) -> ThreadPoolHint {
        self.pool
    }

    pub fn control(&self) -> &Arc<TaskControl> {
        &self.control
    }

    pub fn is_terminated(&self) -> bool {
        self.control.is_terminated()
    }

    pub fn terminate(&self) -> bool {
        self.control.terminate()
    }

    /// Take the body out of the task. Only the first caller gets it.
    pub fn take_work(&self) -> Option<TaskWork> {
        self.work.lock().take()
    }

    /// Run the task body. A second run fails.
    pub async fn run(&self) -> anyhow::Result<()> {
        let work = self
            .take_work()
            .ok_or_else(|| anyhow::anyhow!("task {} has already been executed", self.id()))?;
        work.await
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", self.id())
            .field("name", &self.name())
            .field("pool", &self.pool)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_terminate_is_one_way() {
        let control = TaskControl::new(TaskId::new_root(), "search");
        assert!(!control.is_terminated());
        assert!(control.terminate());
        assert!(!control.terminate());
        assert!(control.is_terminated());
    }

    #[tokio::test]
    async fn test_task_runs_at_most_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let task = Task::new("once", None, async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(task.run().await.is_ok());
        assert!(task.run().await.is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_body_sees_its_own_control() {
        let task = Task::with_control("polling", None, |control| async move {
            if control.is_terminated() {
                anyhow::bail!("terminated before start");
            }
            control.set_info("searching shard 3");
            Ok(())
        })
        .with_pool(ThreadPoolHint::Search);

        assert_eq!(task.pool(), ThreadPoolHint::Search);
        let control = task.control().clone();
        task.run().await.unwrap();
        assert_eq!(control.info(), "searching shard 3");
    }

    #[tokio::test]
    async fn test_terminated_body_can_bail() {
        let task = Task::with_control("polling", None, |control| async move {
            if control.is_terminated() {
                anyhow::bail!("terminated before start");
            }
            Ok(())
        });
        task.terminate();
        let err = task.run().await.unwrap_err();
        assert_eq!(err.to_string(), "terminated before start");
    }
}
