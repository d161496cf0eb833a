//! Pipeline configuration

use crate::core::{PipelineError, Result};
use crate::queue::Capacity;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a pipeline
///
/// Durations are (de)serialized as whole milliseconds. Missing fields take
/// their default value.
///
/// ```rust
/// use bounded_pipeline::pipeline::PipelineConfig;
/// use bounded_pipeline::queue::Capacity;
/// use std::time::Duration;
///
/// let config = PipelineConfig::from_json(
///     r#"{ "input_capacity": { "bounded": 10 }, "items_per_producer": 30, "poll_timeout": 50 }"#,
/// )?;
///
/// assert_eq!(config.input_capacity, Capacity::Bounded(10));
/// assert_eq!(config.items_per_producer, 30);
/// assert_eq!(config.poll_timeout, Duration::from_millis(50));
/// # Ok::<(), bounded_pipeline::PipelineError>(())
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of the queue between producers and workers
    pub input_capacity: Capacity,
    /// Capacity of the queue between workers and the collector
    pub output_capacity: Capacity,
    /// Items each producer generates
    pub items_per_producer: u64,
    /// How long a worker or the collector waits on an empty queue before
    /// re-checking. Default: 100ms
    #[serde(with = "duration_ms")]
    pub poll_timeout: Duration,
    /// How long a producer or worker waits on a full queue per attempt.
    /// Default: 100ms
    #[serde(with = "duration_ms")]
    pub put_timeout: Duration,
    /// Pause between two items of the same producer. Default: none
    #[serde(with = "duration_ms")]
    pub producer_delay: Duration,
    /// Thread name prefix, also used as the pipeline name in errors
    pub thread_name_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_capacity: Capacity::Bounded(100),
            output_capacity: Capacity::Bounded(100),
            items_per_producer: 10,
            poll_timeout: Duration::from_millis(100),
            put_timeout: Duration::from_millis(100),
            producer_delay: Duration::ZERO,
            thread_name_prefix: "pipeline".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Create a configuration where each producer emits `items_per_producer` items
    #[must_use]
    pub fn new(items_per_producer: u64) -> Self {
        Self {
            items_per_producer,
            ..Default::default()
        }
    }

    /// Parse a JSON configuration and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Set the input queue capacity
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_input_capacity(mut self, capacity: Capacity) -> Self {
        self.input_capacity = capacity;
        self
    }

    /// Set the output queue capacity
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_output_capacity(mut self, capacity: Capacity) -> Self {
        self.output_capacity = capacity;
        self
    }

    /// Set the number of items per producer
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_items_per_producer(mut self, count: u64) -> Self {
        self.items_per_producer = count;
        self
    }

    /// Set the poll timeout for workers and the collector.
    ///
    /// Shorter timeouts make idle workers wake more often; they never make a
    /// worker exit early.
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the per-attempt put timeout
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_put_timeout(mut self, timeout: Duration) -> Self {
        self.put_timeout = timeout;
        self
    }

    /// Set the pause between items of one producer
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_producer_delay(mut self, delay: Duration) -> Self {
        self.producer_delay = delay;
        self
    }

    /// Set thread name prefix
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, capacity) in [
            ("input_capacity", self.input_capacity),
            ("output_capacity", self.output_capacity),
        ] {
            if capacity == Capacity::Bounded(0) {
                return Err(PipelineError::invalid_config(
                    name,
                    "bounded capacity must be greater than 0",
                ));
            }
        }
        if self.poll_timeout.is_zero() {
            return Err(PipelineError::invalid_config(
                "poll_timeout",
                "poll timeout must be non-zero",
            ));
        }
        if self.put_timeout.is_zero() {
            return Err(PipelineError::invalid_config(
                "put_timeout",
                "put timeout must be non-zero",
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
