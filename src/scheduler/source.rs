use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::task::Task;

/// Counters shared by every task source.
///
/// `threads_used` is the only contended field. It is changed with single
/// atomic increments and decrements, never under a lock.
#[derive(Debug)]
pub struct SourceCore {
    max_threads_per_task: usize,
    threads_used: AtomicUsize,
    tasks_issued: AtomicU64,
    tasks_completed: AtomicU64,
    finished_adding: AtomicBool,
}

impl SourceCore {
    pub fn new(max_threads_per_task: usize) -> Self {
        Self {
            max_threads_per_task,
            threads_used: AtomicUsize::new(0),
            tasks_issued: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            finished_adding: AtomicBool::new(false),
        }
    }

    pub fn max_threads_per_task(&self) -> usize {
        self.max_threads_per_task
    }

    /// Tasks issued and not yet completed
    pub fn threads_used(&self) -> usize {
        self.threads_used.load(Ordering::Acquire)
    }

    pub fn tasks_issued(&self) -> u64 {
        self.tasks_issued.load(Ordering::Acquire)
    }

    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed.load(Ordering::Acquire)
    }

    /// Declare that no more work will be added to the source
    pub fn finish_adding(&self) {
        self.finished_adding.store(true, Ordering::Release);
    }

    pub fn is_finished_adding(&self) -> bool {
        self.finished_adding.load(Ordering::Acquire)
    }

    /// Claim one execution slot, rolling back if that takes the source over its cap
    fn try_reserve(&self) -> bool {
        let used = self.threads_used.fetch_add(1, Ordering::AcqRel) + 1;
        if used > self.max_threads_per_task() {
            self.threads_used.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    fn release(&self) {
        self.threads_used.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A logical job that yields tasks to the scheduler, under its own concurrency cap.
///
/// Implementors provide [`TaskSource::core`] and [`TaskSource::get_next`]; the
/// provided `next`/`complete` pair does the slot accounting.
pub trait TaskSource: Send + Sync + 'static {
    fn core(&self) -> &SourceCore;

    /// Produce the next task, if one is available right now
    fn get_next(&self) -> Option<Arc<Task>>;

    fn name(&self) -> &str {
        "source"
    }

    /// Reserve a slot and fetch a task. Yields nothing when the source is at
    /// its cap or has no work, and in both cases leaves no slot reserved.
    fn next(&self) -> Option<Arc<Task>> {
        let core = self.core();
        if !core.try_reserve() {
            trace!(source = self.name(), "Source at capacity");
            return None;
        }

        match self.get_next() {
            Some(task) => {
                core.tasks_issued.fetch_add(1, Ordering::AcqRel);
                Some(task)
            }
            None => {
                core.release();
                None
            }
        }
    }

    /// Called exactly once for every task returned by `next`
    fn complete(&self, task: &Arc<Task>) {
        let core = self.core();
        core.release();
        core.tasks_completed.fetch_add(1, Ordering::AcqRel);
        self.on_complete(task);
    }

    /// Hook run after a task's slot has been released
    fn on_complete(&self, _task: &Arc<Task>) {}

    /// True once no more work will be added and every issued task has completed
    fn is_complete(&self) -> bool {
        let core = self.core();
        core.is_finished_adding()
            && core.threads_used() == 0
            && core.tasks_issued() == core.tasks_completed()
    }
}
