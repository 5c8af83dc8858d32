// Task identity, cancellation and the per-node task registry

pub mod control;
pub mod id;
pub mod manager;

pub use control::{Task, TaskControl, TaskWork, ThreadPoolHint};
pub use id::TaskId;
pub use manager::{TaskManager, TaskProgress};
