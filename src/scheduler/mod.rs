//! Fair scheduling of tasks from many sources onto a bounded set of workers.

pub mod executor;
pub mod prioritiser;
pub mod queue;
pub mod source;
pub mod sources;

pub use executor::{SchedulerStats, TaskExecutor};
pub use prioritiser::Prioritiser;
pub use queue::TaskQueue;
pub use source::{SourceCore, TaskSource};
pub use sources::{FnTaskSource, QueuedTaskSource};
