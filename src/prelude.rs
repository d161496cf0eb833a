//! Convenient re-exports for common types and traits

pub use crate::core::{
    CancellationReason, CancellationToken, Item, ItemId, PipelineError, Result, Transform,
    TransformError, WorkResult,
};
pub use crate::pipeline::{
    Coordinator, PipelineConfig, PipelineState, Producer, ResultCollector, Tally,
};
pub use crate::pool::{ExitReason, WorkerPool, WorkerStats};
pub use crate::queue::{BoundedQueue, Capacity, GetError, PutError};
