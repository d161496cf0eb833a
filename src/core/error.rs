//! Error types for the pipeline

use std::fmt;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while configuring or running a pipeline
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// Pipeline has already been started
    #[error("Pipeline '{name}' is already started ({state})")]
    AlreadyStarted {
        /// Name of the pipeline
        name: String,
        /// State the pipeline was in
        state: String,
    },

    /// Pipeline has not been started yet
    #[error("Pipeline '{name}' has not been started")]
    NotStarted {
        /// Name of the pipeline
        name: String,
    },

    /// Failed to spawn a pipeline thread
    #[error("Failed to spawn {role} thread #{thread_id}: {message}")]
    SpawnError {
        /// Role of the thread (producer, worker, collector, coordinator)
        role: &'static str,
        /// Index of the thread within its role
        thread_id: usize,
        /// Error message
        message: String,
        /// Source IO error
        #[source]
        source: Option<std::io::Error>,
    },

    /// Failed to join a pipeline thread
    #[error("Failed to join {role} thread #{thread_id}: {message}")]
    JoinError {
        /// Role of the thread
        role: &'static str,
        /// Index of the thread within its role
        thread_id: usize,
        /// Error message
        message: String,
    },

    /// Pipeline did not reach quiescence in time
    #[error("Pipeline did not complete within {timeout_ms}ms")]
    CompletionTimeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Operation observed a cancelled token
    #[error("Cancelled: {reason}")]
    Cancelled {
        /// Reason for cancellation
        reason: String,
    },

    /// A queue was closed underneath a writer
    #[error("Queue '{queue}' is closed")]
    QueueClosed {
        /// Name of the queue
        queue: String,
    },

    /// Invalid configuration with parameter
    #[error("Invalid configuration for '{parameter}': {message}")]
    InvalidConfig {
        /// Configuration parameter name
        parameter: String,
        /// Error message
        message: String,
    },

    /// Configuration could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl PipelineError {
    /// Create an already started error
    pub fn already_started(name: impl Into<String>, state: impl fmt::Display) -> Self {
        PipelineError::AlreadyStarted {
            name: name.into(),
            state: state.to_string(),
        }
    }

    /// Create a not started error
    pub fn not_started(name: impl Into<String>) -> Self {
        PipelineError::NotStarted { name: name.into() }
    }

    /// Create a spawn error with source
    pub fn spawn(role: &'static str, thread_id: usize, source: std::io::Error) -> Self {
        PipelineError::SpawnError {
            role,
            thread_id,
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a join error
    pub fn join(role: &'static str, thread_id: usize, message: impl Into<String>) -> Self {
        PipelineError::JoinError {
            role,
            thread_id,
            message: message.into(),
        }
    }

    /// Create a completion timeout error
    pub fn completion_timeout(timeout_ms: u64) -> Self {
        PipelineError::CompletionTimeout { timeout_ms }
    }

    /// Create a cancelled error
    pub fn cancelled(reason: impl Into<String>) -> Self {
        PipelineError::Cancelled {
            reason: reason.into(),
        }
    }

    /// Create a queue closed error
    pub fn queue_closed(queue: impl Into<String>) -> Self {
        PipelineError::QueueClosed {
            queue: queue.into(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::InvalidConfig {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

/// Failure reported by a [`Transform`](crate::core::Transform).
///
/// The variant decides what the worker does next: a recoverable failure drops
/// the item and keeps the worker running, a fatal one stops that worker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// The item is skipped and counted as a failure
    #[error("recoverable transform failure: {0}")]
    Recoverable(String),

    /// The worker that hit this stops processing
    #[error("fatal transform failure: {0}")]
    Fatal(String),
}

impl TransformError {
    /// Create a recoverable failure
    pub fn recoverable(msg: impl Into<String>) -> Self {
        TransformError::Recoverable(msg.into())
    }

    /// Create a fatal failure
    pub fn fatal(msg: impl Into<String>) -> Self {
        TransformError::Fatal(msg.into())
    }

    /// Whether the worker should keep going after this failure
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransformError::Recoverable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PipelineError::already_started("etl", "Running");
        assert!(matches!(err, PipelineError::AlreadyStarted { .. }));

        let err = PipelineError::invalid_config("poll_timeout", "must be non-zero");
        assert!(matches!(err, PipelineError::InvalidConfig { .. }));

        let err = PipelineError::cancelled("manually cancelled");
        assert!(matches!(err, PipelineError::Cancelled { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = PipelineError::already_started("etl", "Draining");
        assert_eq!(err.to_string(), "Pipeline 'etl' is already started (Draining)");

        let err = PipelineError::queue_closed("output");
        assert_eq!(err.to_string(), "Queue 'output' is closed");

        let err = PipelineError::completion_timeout(250);
        assert_eq!(err.to_string(), "Pipeline did not complete within 250ms");

        let err = PipelineError::join("worker", 3, "thread panicked");
        assert_eq!(
            err.to_string(),
            "Failed to join worker thread #3: thread panicked"
        );
    }

    #[test]
    fn test_spawn_error_with_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = PipelineError::spawn("producer", 5, io_err);

        assert!(matches!(err, PipelineError::SpawnError { .. }));
        assert!(err.to_string().contains("producer thread #5"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_transform_error_kinds() {
        assert!(TransformError::recoverable("bad value").is_recoverable());
        assert!(!TransformError::fatal("disk gone").is_recoverable());
        assert_eq!(
            TransformError::fatal("disk gone").to_string(),
            "fatal transform failure: disk gone"
        );
    }
}
