//! Core types shared by every pipeline stage

pub mod cancellation;
pub mod error;
pub mod item;
pub mod transform;

pub use cancellation::{CancellationCallbackGuard, CancellationReason, CancellationToken};
pub use error::{PipelineError, Result, TransformError};
pub use item::{Item, ItemId, WorkResult};
pub use transform::Transform;
