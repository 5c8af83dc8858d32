// Infrastructure shared by the scheduler and cluster dispatch

pub mod config;
pub mod errors;
pub mod telemetry;

pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use errors::{DispatchError, Result};
pub use telemetry::init_logging;
