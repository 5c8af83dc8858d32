use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use super::control::{Task, TaskControl};
use super::id::TaskId;

/// Snapshot of a live task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub id: TaskId,
    pub name: String,
    pub info: String,
    pub age_ms: i64,
    pub terminated: bool,
}

impl TaskProgress {
    fn of(control: &TaskControl) -> Self {
        Self {
            id: control.id().clone(),
            name: control.name().to_string(),
            info: control.info(),
            age_ms: (Utc::now() - control.created_at()).num_milliseconds(),
            terminated: control.is_terminated(),
        }
    }
}

/// Registry of the tasks alive on this node.
///
/// Entries are weak, a task that has been dropped disappears from every
/// listing and is pruned on the next walk.
#[derive(Default)]
pub struct TaskManager {
    tasks: DashMap<String, Weak<TaskControl>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, control: &Arc<TaskControl>) {
        self.tasks
            .insert(control.id().id().to_string(), Arc::downgrade(control));
    }

    pub fn deregister(&self, id: &TaskId) {
        self.tasks.remove(id.id());
    }

    /// Build a task that is already known to this manager
    pub fn create_task<F, Fut>(&self, name: impl Into<String>, parent: Option<&TaskId>, f: F) -> Arc<Task>
    where
        F: FnOnce(Arc<TaskControl>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let control = Arc::new(TaskControl::new(TaskId::new(parent), name));
        self.register(&control);
        let work = f(control.clone());
        Arc::new(Task::from_control(control, work))
    }

    fn live(&self) -> Vec<Arc<TaskControl>> {
        self.tasks.retain(|_, control| control.strong_count() > 0);
        self.tasks
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect()
    }

    /// Terminate every live task that is `ancestor` or descends from it,
    /// optionally only those named `task_name`.
    ///
    /// Returns the tasks this call terminated; tasks that were already
    /// terminated are left out.
    pub fn terminate(
        &self,
        search_name: &str,
        ancestor: &TaskId,
        task_name: Option<&str>,
    ) -> Vec<TaskProgress> {
        let terminated: Vec<TaskProgress> = self
            .live()
            .into_iter()
            .filter(|control| control.id().is_or_descends_from(ancestor))
            .filter(|control| task_name.map_or(true, |name| control.name() == name))
            .filter(|control| control.terminate())
            .map(|control| {
                debug!(task_id = %control.id(), task = control.name(), "Terminated task");
                TaskProgress::of(&control)
            })
            .collect();

        info!(
            search = search_name,
            ancestor = %ancestor,
            count = terminated.len(),
            "Terminated tasks"
        );
        terminated
    }

    /// Progress of every live task
    pub fn find_progress(&self) -> Vec<TaskProgress> {
        self.live().iter().map(|c| TaskProgress::of(c)).collect()
    }

    pub fn current_task_count(&self) -> usize {
        self.live().len()
    }

    /// Terminate everything. Returns how many tasks were flagged.
    pub fn shutdown(&self) -> usize {
        let count = self
            .live()
            .into_iter()
            .filter(|control| control.terminate())
            .count();
        info!(count, "Task manager shut down");
        count
    }
}
