use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::prioritiser::Prioritiser;
use super::queue::TaskQueue;
use super::source::{SourceCore, TaskSource};
use crate::core::config::SchedulerConfig;
use crate::task::Task;

/// A source fed through a bounded [`TaskQueue`].
///
/// Candidates are pulled from the queue in batches and handed to the
/// [`Prioritiser`], so work terminated while queued is dropped before it
/// takes a slot.
pub struct QueuedTaskSource {
    name: String,
    core: SourceCore,
    queue: TaskQueue,
    candidates: Mutex<VecDeque<Arc<Task>>>,
    batch_size: usize,
    prioritiser: Prioritiser,
}

impl QueuedTaskSource {
    pub fn new(
        name: impl Into<String>,
        max_threads_per_task: usize,
        queue_capacity: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            core: SourceCore::new(max_threads_per_task),
            queue: TaskQueue::new(queue_capacity),
            candidates: Mutex::new(VecDeque::new()),
            batch_size: batch_size.max(1),
            prioritiser: Prioritiser::new(),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &SchedulerConfig) -> Self {
        Self::new(
            name,
            config.max_threads_per_task,
            config.queue_capacity,
            config.source_batch_size,
        )
    }

    /// Queue a task. Returns false when the queue is full.
    pub fn add(&self, task: Arc<Task>) -> bool {
        self.queue.offer(task)
    }

    /// Queue a task, handing it back when the queue is full
    pub fn try_add(&self, task: Arc<Task>) -> Result<(), Arc<Task>> {
        self.queue.try_offer(task)
    }

    /// Tasks waiting in the queue or the current candidate batch
    pub fn pending(&self) -> usize {
        self.queue.len() + self.candidates.lock().len()
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }
}

impl TaskSource for QueuedTaskSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn get_next(&self) -> Option<Arc<Task>> {
        let mut candidates = self.candidates.lock();
        loop {
            if candidates.is_empty() {
                candidates.extend(self.queue.drain_up_to(self.batch_size));
                if candidates.is_empty() {
                    return None;
                }
            }
            if let Some(task) = self.prioritiser.select(&mut candidates) {
                return Some(task);
            }
        }
    }

    fn is_complete(&self) -> bool {
        let core = self.core();
        core.is_finished_adding()
            && self.pending() == 0
            && core.threads_used() == 0
            && core.tasks_issued() == core.tasks_completed()
    }
}

type NextFn = dyn Fn() -> Option<Arc<Task>> + Send + Sync;

/// A source that computes its next task on demand
pub struct FnTaskSource {
    name: String,
    core: SourceCore,
    next: Box<NextFn>,
}

impl FnTaskSource {
    pub fn new<F>(name: impl Into<String>, max_threads_per_task: usize, next: F) -> Self
    where
        F: Fn() -> Option<Arc<Task>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            core: SourceCore::new(max_threads_per_task),
            next: Box::new(next),
        }
    }
}

impl TaskSource for FnTaskSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn get_next(&self) -> Option<Arc<Task>> {
        (self.next)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn task(name: &str) -> Arc<Task> {
        Arc::new(Task::new(name, None, async { Ok(()) }))
    }

    #[test]
    fn test_queued_source_skips_terminated() {
        let source = QueuedTaskSource::new("shards", 10, 100, 3);
        let tasks: Vec<_> = ["T1", "T2", "T3", "T4", "T5"].iter().map(|n| task(n)).collect();
        for t in &tasks {
            assert!(source.add(t.clone()));
        }
        tasks[2].terminate();

        let mut issued = Vec::new();
        while let Some(t) = source.next() {
            issued.push(t.name().to_string());
        }

        assert_eq!(issued, vec!["T1", "T2", "T4", "T5"]);
        assert_eq!(source.core().tasks_issued(), 4);
        assert_eq!(source.pending(), 0);
    }

    #[test]
    fn test_queued_source_respects_cap_and_keeps_candidates() {
        let source = QueuedTaskSource::new("shards", 1, 100, 4);
        for i in 0..4 {
            source.add(task(&format!("T{}", i)));
        }

        let first = source.next().unwrap();
        assert!(source.next().is_none());
        assert_eq!(source.pending(), 3);

        source.complete(&first);
        assert_eq!(source.next().unwrap().name(), "T1");
    }

    #[test]
    fn test_queued_source_completion() {
        let source = QueuedTaskSource::new("shards", 2, 10, 2);
        source.add(task("only"));
        source.core().finish_adding();
        assert!(!source.is_complete());

        let t = source.next().unwrap();
        assert!(!source.is_complete());
        source.complete(&t);
        assert!(source.is_complete());
    }

    #[test]
    fn test_queued_source_backpressure() {
        let source = QueuedTaskSource::new("shards", 2, 2, 1);
        assert!(source.add(task("a")));
        assert!(source.add(task("b")));
        assert!(!source.add(task("c")));

        let rejected = source.try_add(task("d")).unwrap_err();
        assert_eq!(rejected.name(), "d");
    }

    #[test]
    fn test_fn_source() {
        let source = FnTaskSource::new("backlog", 2, || Some(task("generated")));
        assert!(source.next().is_some());
        assert!(source.next().is_some());
        assert!(source.next().is_none());
        assert_eq!(source.name(), "backlog");
    }
}
