use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::errors::{DispatchError, Result};

/// Scheduler and dispatch configuration with all tuning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    // Concurrency caps
    /// Maximum number of tasks executing at once across all sources
    pub max_threads: usize,
    /// Maximum number of tasks executing at once for a single source
    pub max_threads_per_task: usize,

    // Queue configuration
    /// Capacity of task queues before producers are pushed back
    pub queue_capacity: usize,
    /// Number of candidates a batching source pulls before prioritising
    pub source_batch_size: usize,

    // Cluster dispatch
    /// Bound on sending a task to a worker node
    pub remote_timeout: Duration,
    /// Bound on a single collector accepting a result
    pub delivery_timeout: Duration,
}

fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_threads: cpu_count() * 2,
            max_threads_per_task: 5,
            queue_capacity: 1000,
            source_batch_size: 10,
            remote_timeout: Duration::from_secs(60),
            delivery_timeout: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    /// Create a new builder for SchedulerConfig
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::new()
    }

    /// Parse a configuration handed over by the host application as JSON.
    /// Missing fields take their default values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SchedulerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(DispatchError::configuration_field(
                "max_threads must be greater than 0",
                "max_threads",
            ));
        }
        if self.max_threads_per_task == 0 {
            return Err(DispatchError::configuration_field(
                "max_threads_per_task must be greater than 0",
                "max_threads_per_task",
            ));
        }
        if self.queue_capacity == 0 {
            return Err(DispatchError::configuration_field(
                "queue_capacity must be greater than 0",
                "queue_capacity",
            ));
        }
        if self.source_batch_size == 0 {
            return Err(DispatchError::configuration_field(
                "source_batch_size must be greater than 0",
                "source_batch_size",
            ));
        }
        if self.source_batch_size > self.queue_capacity {
            return Err(DispatchError::configuration_field(
                "source_batch_size cannot exceed queue_capacity",
                "source_batch_size",
            ));
        }
        if self.remote_timeout.is_zero() {
            return Err(DispatchError::configuration_field(
                "remote_timeout must be non-zero",
                "remote_timeout",
            ));
        }
        if self.delivery_timeout.is_zero() {
            return Err(DispatchError::configuration_field(
                "delivery_timeout must be non-zero",
                "delivery_timeout",
            ));
        }
        Ok(())
    }

    /// Create a configuration for development and tests
    pub fn development() -> Self {
        Self {
            max_threads: 4,
            max_threads_per_task: 2,
            queue_capacity: 100,
            source_batch_size: 5,
            remote_timeout: Duration::from_secs(5),
            delivery_timeout: Duration::from_secs(5),
        }
    }

    /// Create a configuration for production nodes
    pub fn production() -> Self {
        let cpus = cpu_count();

        Self {
            max_threads: cpus * 4,
            max_threads_per_task: cpus.max(5),
            queue_capacity: 10_000,
            source_batch_size: 50,
            ..Default::default()
        }
    }
}

/// Builder for SchedulerConfig
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
        }
    }

    pub fn max_threads(mut self, max_threads: usize) -> Self {
        self.config.max_threads = max_threads;
        self
    }

    pub fn max_threads_per_task(mut self, max_threads_per_task: usize) -> Self {
        self.config.max_threads_per_task = max_threads_per_task;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn source_batch_size(mut self, batch_size: usize) -> Self {
        self.config.source_batch_size = batch_size;
        self
    }

    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.config.remote_timeout = timeout;
        self
    }

    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.config.delivery_timeout = timeout;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<SchedulerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_capacity, 1000);
    }

    #[test]
    fn test_presets() {
        let dev = SchedulerConfig::development();
        assert!(dev.validate().is_ok());
        assert_eq!(dev.max_threads, 4);
        assert_eq!(dev.max_threads_per_task, 2);

        let prod = SchedulerConfig::production();
        assert!(prod.validate().is_ok());
        assert!(prod.max_threads >= 4);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = SchedulerConfig::default();

        config.max_threads = 0;
        assert!(config.validate().is_err());
        config.max_threads = 8;

        config.max_threads_per_task = 0;
        assert!(config.validate().is_err());
        config.max_threads_per_task = 2;

        config.source_batch_size = config.queue_capacity + 1;
        assert!(config.validate().is_err());
        config.source_batch_size = 10;

        config.remote_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = SchedulerConfig::builder()
            .max_threads(16)
            .max_threads_per_task(3)
            .queue_capacity(500)
            .source_batch_size(20)
            .remote_timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        assert_eq!(config.max_threads, 16);
        assert_eq!(config.max_threads_per_task, 3);
        assert_eq!(config.queue_capacity, 500);
        assert_eq!(config.source_batch_size, 20);
        assert_eq!(config.remote_timeout, Duration::from_secs(10));

        assert!(SchedulerConfig::builder().max_threads(0).build().is_err());
    }

    #[test]
    fn test_from_json() {
        let config = SchedulerConfig::from_json(r#"{"max_threads": 12, "queue_capacity": 64}"#)
            .unwrap();
        assert_eq!(config.max_threads, 12);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.max_threads_per_task, 5);

        assert!(SchedulerConfig::from_json(r#"{"max_threads": 0}"#).is_err());
        assert!(SchedulerConfig::from_json("not json").is_err());
    }
}
