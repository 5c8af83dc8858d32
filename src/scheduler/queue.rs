use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use crate::task::Task;

/// A bounded FIFO holding area for work awaiting a slot, with capacity control.
///
/// `offer`/`poll` never wait. The `_timeout` variants wait up to the given
/// duration for room or for an item. Producers that outpace consumers are
/// pushed back instead of growing the queue.
pub struct TaskQueue<T = Arc<Task>> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> TaskQueue<T> {
    /// Default capacity when none is configured
    pub const DEFAULT_CAPACITY: usize = 1000;

    /// Creates a new TaskQueue with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    fn try_push(&self, item: T, front: bool) -> Result<(), T> {
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                return Err(item);
            }
            if front {
                items.push_front(item);
            } else {
                items.push_back(item);
            }
        }
        self.not_empty.notify_one();
        Ok(())
    }

    /// Insert at the back. Returns false if the queue is at capacity.
    pub fn offer(&self, item: T) -> bool {
        self.try_push(item, false).is_ok()
    }

    /// Insert at the back, handing the item back if the queue is at capacity
    pub fn try_offer(&self, item: T) -> Result<(), T> {
        self.try_push(item, false)
    }

    /// Insert at the front, for priority corrections
    pub fn offer_first(&self, item: T) -> bool {
        self.try_push(item, true).is_ok()
    }

    /// Insert at the back, waiting up to `timeout` for room
    pub async fn offer_timeout(&self, item: T, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut item = item;
        loop {
            let notified = self.not_full.notified();
            match self.try_push(item, false) {
                Ok(()) => return true,
                Err(rejected) => item = rejected,
            }
            if timeout_at(deadline, notified).await.is_err() {
                return self.try_push(item, false).is_ok();
            }
        }
    }

    /// Remove from the front, if anything is queued
    pub fn poll(&self) -> Option<T> {
        let item = self.items.lock().pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Remove from the front, waiting up to `timeout` for an item
    pub async fn poll_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.not_empty.notified();
            if let Some(item) = self.poll() {
                return Some(item);
            }
            if timeout_at(deadline, notified).await.is_err() {
                return self.poll();
            }
        }
    }

    /// Remove up to `max` items from the front, in order
    pub fn drain_up_to(&self, max: usize) -> Vec<T> {
        let drained: Vec<T> = {
            let mut items = self.items.lock();
            let n = max.min(items.len());
            items.drain(..n).collect()
        };
        for _ in 0..drained.len() {
            self.not_full.notify_one();
        }
        drained
    }

    /// Returns the current number of items in the queue
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clears all items from the queue
    pub fn clear(&self) {
        self.items.lock().clear();
        self.not_full.notify_waiters();
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_basic_operations() {
        let queue = TaskQueue::new(3);

        assert!(queue.is_empty());
        assert_eq!(queue.poll(), None);

        assert!(queue.offer(1));
        assert!(queue.offer(2));
        assert!(queue.offer(3));
        assert!(!queue.offer(4));
        assert!(queue.is_full());

        assert_eq!(queue.poll(), Some(1));
        assert!(queue.offer_first(0));
        assert_eq!(queue.poll(), Some(0));
        assert_eq!(queue.poll(), Some(2));
        assert_eq!(queue.len(), 1);

        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_preserves_order() {
        let queue = TaskQueue::new(10);
        for i in 0..6 {
            queue.offer(i);
        }
        assert_eq!(queue.drain_up_to(4), vec![0, 1, 2, 3]);
        assert_eq!(queue.drain_up_to(4), vec![4, 5]);
        assert!(queue.drain_up_to(4).is_empty());
    }

    #[test]
    fn test_capacity_enforcement() {
        let queue = Arc::new(TaskQueue::new(10));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || (0..10).filter(|j| queue.offer(i * 10 + j)).count())
            })
            .collect();

        let total_pushed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total_pushed, 10);
        assert!(queue.is_full());
    }

    #[tokio::test]
    async fn test_poll_timeout_on_empty_queue() {
        let queue: TaskQueue<u32> = TaskQueue::new(2);
        let start = std::time::Instant::now();
        assert_eq!(queue.poll_timeout(Duration::from_millis(50)).await, None);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_offer_timeout_on_full_queue() {
        let queue = TaskQueue::new(1);
        assert!(queue.offer(1));
        assert!(!queue.offer_timeout(2, Duration::from_millis(30)).await);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocked_offer_resumes_after_poll() {
        let queue = Arc::new(TaskQueue::new(1));
        queue.offer(1);

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.offer_timeout(2, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.poll(), Some(1));
        assert!(producer.await.unwrap());
        assert_eq!(queue.poll(), Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocked_poll_resumes_after_offer() {
        let queue: Arc<TaskQueue<&str>> = Arc::new(TaskQueue::new(4));

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.poll_timeout(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.offer("shard-7"));
        assert_eq!(consumer.await.unwrap(), Some("shard-7"));
    }
}
