use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use crate::task::Task;

/// Picks the next task from a batch of candidates.
///
/// Candidates are consumed from the front. Terminated tasks are discarded on
/// the way, so they never reach a worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct Prioritiser;

impl Prioritiser {
    pub fn new() -> Self {
        Self
    }

    pub fn select(&self, candidates: &mut VecDeque<Arc<Task>>) -> Option<Arc<Task>> {
        while let Some(task) = candidates.pop_front() {
            if task.is_terminated() {
                debug!(task_id = %task.id(), task = task.name(), "Discarding terminated candidate");
                continue;
            }
            return Some(task);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn batch(names: &[&str]) -> VecDeque<Arc<Task>> {
        names
            .iter()
            .map(|name| Arc::new(Task::new(*name, None, async { Ok(()) })))
            .collect()
    }

    #[test]
    fn test_skips_terminated_candidates() {
        let mut candidates = batch(&["T1", "T2", "T3", "T4", "T5"]);
        candidates[2].terminate();

        let prioritiser = Prioritiser::new();
        let mut selected = Vec::new();
        while let Some(task) = prioritiser.select(&mut candidates) {
            selected.push(task.name().to_string());
        }

        assert_eq!(selected, vec!["T1", "T2", "T4", "T5"]);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_consumes_discarded_candidates() {
        let mut candidates = batch(&["T1", "T2", "T3"]);
        candidates[0].terminate();
        candidates[1].terminate();

        let task = Prioritiser::new().select(&mut candidates).unwrap();
        assert_eq!(task.name(), "T3");
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_all_terminated() {
        let mut candidates = batch(&["T1", "T2"]);
        for task in &candidates {
            task.terminate();
        }
        assert!(Prioritiser::new().select(&mut candidates).is_none());
        assert!(candidates.is_empty());
    }
}
