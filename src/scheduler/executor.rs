use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};

use super::source::TaskSource;
use crate::core::config::SchedulerConfig;
use crate::task::Task;

/// Registered sources in registration order, plus the round-robin cursor.
#[derive(Default)]
struct SourceRing {
    sources: BTreeMap<u64, Arc<dyn TaskSource>>,
    next_seq: u64,
    last: Option<u64>,
}

impl SourceRing {
    fn insert(&mut self, source: Arc<dyn TaskSource>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.sources.insert(seq, source);
        seq
    }

    fn remove(&mut self, ptr: *const ()) -> bool {
        let key = self
            .sources
            .iter()
            .find(|(_, s)| Arc::as_ptr(s) as *const () == ptr)
            .map(|(k, _)| *k);
        match key {
            Some(key) => {
                self.sources.remove(&key);
                true
            }
            None => false,
        }
    }

    /// The source after the cursor, wrapping to the oldest. A cursor that
    /// points at a removed source still orders correctly.
    fn next_producer(&mut self) -> Option<Arc<dyn TaskSource>> {
        let after_cursor = self
            .last
            .and_then(|last| self.sources.range((Excluded(last), Unbounded)).next());
        let (seq, source) = after_cursor
            .or_else(|| self.sources.iter().next())
            .map(|(seq, source)| (*seq, source.clone()))?;
        self.last = Some(seq);
        Some(source)
    }
}

/// Statistics about the scheduler state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total_threads: usize,
    pub max_threads: usize,
    pub source_count: usize,
    pub tasks_started: u64,
    pub tasks_skipped: u64,
    pub tasks_failed: u64,
}

struct ExecutorInner {
    name: String,
    runtime: Handle,
    max_threads: AtomicUsize,
    total_threads: AtomicUsize,
    ring: Mutex<SourceRing>,
    tasks_started: AtomicU64,
    tasks_skipped: AtomicU64,
    tasks_failed: AtomicU64,
}

/// Fair scheduler over many task sources under one global concurrency cap.
///
/// There is no polling loop. Each finished task releases its slot and makes
/// one more scheduling attempt, so completions keep the pipeline full once
/// [`TaskExecutor::exec`] has primed it.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<ExecutorInner>,
}

impl TaskExecutor {
    pub fn new(name: impl Into<String>, runtime: Handle, max_threads: usize) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                name: name.into(),
                runtime,
                max_threads: AtomicUsize::new(max_threads),
                total_threads: AtomicUsize::new(0),
                ring: Mutex::new(SourceRing::default()),
                tasks_started: AtomicU64::new(0),
                tasks_skipped: AtomicU64::new(0),
                tasks_failed: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(name: impl Into<String>, runtime: Handle, config: &SchedulerConfig) -> Self {
        Self::new(name, runtime, config.max_threads)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Change the global cap. Applies from the next scheduling attempt,
    /// in-flight work is left alone.
    pub fn set_max_threads(&self, max_threads: usize) {
        let old = self.inner.max_threads.swap(max_threads, Ordering::AcqRel);
        if old != max_threads {
            info!(executor = %self.inner.name, old, new = max_threads, "Max threads changed");
        }
    }

    pub fn max_threads(&self) -> usize {
        self.inner.max_threads.load(Ordering::Acquire)
    }

    /// Tasks currently holding a slot
    pub fn total_threads(&self) -> usize {
        self.inner.total_threads.load(Ordering::Acquire)
    }

    pub fn register_source(&self, source: Arc<dyn TaskSource>) {
        let name = source.name().to_string();
        let seq = self.inner.ring.lock().insert(source);
        info!(executor = %self.inner.name, source = %name, seq, "Registered task source");
    }

    /// Stop scheduling from `source`. Returns false if it was not registered.
    /// Tasks already running finish normally.
    pub fn remove_source<S: TaskSource + ?Sized>(&self, source: &Arc<S>) -> bool {
        let removed = self
            .inner
            .ring
            .lock()
            .remove(Arc::as_ptr(source) as *const ());
        if removed {
            info!(executor = %self.inner.name, source = source.name(), "Removed task source");
        }
        removed
    }

    pub fn source_count(&self) -> usize {
        self.inner.ring.lock().sources.len()
    }

    /// Fill every free slot. This is the initial driver call; afterwards
    /// completions keep scheduling on their own.
    pub fn exec(&self) -> usize {
        let mut started = 0;
        while self.exec_next_task() {
            started += 1;
        }
        started
    }

    /// One scheduling attempt. Returns true if a task was started.
    ///
    /// Never blocks: it either starts a task or returns straight away.
    pub fn exec_next_task(&self) -> bool {
        let inner = &self.inner;
        loop {
            let total = inner.total_threads.fetch_add(1, Ordering::AcqRel) + 1;
            if total > inner.max_threads.load(Ordering::Acquire) {
                inner.total_threads.fetch_sub(1, Ordering::AcqRel);
                trace!(executor = %inner.name, "No free slot");
                return false;
            }

            let Some((source, task)) = self.next_from_sources() else {
                inner.total_threads.fetch_sub(1, Ordering::AcqRel);
                return false;
            };

            if task.is_terminated() {
                // Release the slot without running it, then try again.
                inner.total_threads.fetch_sub(1, Ordering::AcqRel);
                source.complete(&task);
                inner.tasks_skipped.fetch_add(1, Ordering::Relaxed);
                debug!(task_id = %task.id(), task = task.name(), "Skipped terminated task");
                continue;
            }

            self.spawn(source, task);
            return true;
        }
    }

    /// Ask each source at most once, starting after the cursor
    fn next_from_sources(&self) -> Option<(Arc<dyn TaskSource>, Arc<Task>)> {
        let tries = self.inner.ring.lock().sources.len();
        for _ in 0..tries {
            let source = self.inner.ring.lock().next_producer()?;
            if let Some(task) = source.next() {
                return Some((source, task));
            }
        }
        None
    }

    fn spawn(&self, source: Arc<dyn TaskSource>, task: Arc<Task>) {
        let inner = &self.inner;
        inner.tasks_started.fetch_add(1, Ordering::Relaxed);
        debug!(
            executor = %inner.name,
            task_id = %task.id(),
            task = task.name(),
            pool = ?task.pool(),
            "Starting task"
        );

        let work = task.take_work();
        let handle = inner.runtime.spawn(async move {
            match work {
                Some(work) => work.await,
                None => Err(anyhow::anyhow!("task has already been executed")),
            }
        });

        let executor = self.clone();
        inner.runtime.spawn(async move {
            let failed = match handle.await {
                Ok(Ok(())) => false,
                Ok(Err(e)) => {
                    warn!(task_id = %task.id(), task = task.name(), error = %e, "Task failed");
                    true
                }
                Err(e) => {
                    warn!(task_id = %task.id(), task = task.name(), error = %e, "Task aborted");
                    true
                }
            };
            executor.complete(source, task, failed);
        });
    }

    fn complete(&self, source: Arc<dyn TaskSource>, task: Arc<Task>, failed: bool) {
        let inner = &self.inner;
        if failed {
            inner.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
        inner.total_threads.fetch_sub(1, Ordering::AcqRel);
        source.complete(&task);
        self.exec_next_task();
    }

    /// Wait until nothing is running, checking every `poll`
    pub async fn await_idle(&self, poll: Duration) {
        while self.total_threads() > 0 {
            tokio::time::sleep(poll).await;
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        let inner = &self.inner;
        SchedulerStats {
            total_threads: inner.total_threads.load(Ordering::Acquire),
            max_threads: inner.max_threads.load(Ordering::Acquire),
            source_count: self.source_count(),
            tasks_started: inner.tasks_started.load(Ordering::Relaxed),
            tasks_skipped: inner.tasks_skipped.load(Ordering::Relaxed),
            tasks_failed: inner.tasks_failed.load(Ordering::Relaxed),
        }
    }
}
