//! # Bounded Pipeline
//!
//! A multi-producer, multi-worker processing pipeline over bounded queues.
//!
//! ## Features
//!
//! - **Backpressure**: bounded FIFO queues block producers when full
//! - **Clean termination**: a closed and empty queue reports `Drained`, which
//!   is distinct from a transient timeout
//! - **Event-driven shutdown**: the coordinator moves through
//!   `Starting → Running → Draining → Stopped` on producer and worker exit
//!   events, never on fixed sleeps
//! - **Cancellation**: one token wakes every blocked `put` and `get`
//! - **Accounting**: a final [`Tally`] places every produced item in exactly
//!   one bucket
//!
//! ## Quick Start
//!
//! ```rust
//! use bounded_pipeline::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> Result<()> {
//! let config = PipelineConfig::new(5).with_input_capacity(Capacity::Bounded(8));
//! let mut pipeline = Coordinator::new(
//!     config,
//!     |_id: ItemId| fastrand::u32(1..=100),
//!     |item: &Item<u32>| -> std::result::Result<u32, TransformError> {
//!         Ok(item.payload() * 2)
//!     },
//! )?;
//!
//! pipeline.start(2, 3)?;
//! let tally = pipeline.await_completion(Duration::from_secs(10))?;
//!
//! assert_eq!(tally.results_collected, 10);
//! assert!(tally.is_conserved());
//! # Ok(())
//! # }
//! ```
//!
//! ## Transforms
//!
//! Closures work, and so does any type implementing [`Transform`]. Return
//! [`TransformError::Recoverable`] to skip one item, or
//! [`TransformError::Fatal`] to stop the worker that hit it.
//!
//! ```rust
//! use bounded_pipeline::prelude::*;
//!
//! struct ParseNumber;
//!
//! impl Transform<String, i64> for ParseNumber {
//!     fn transform(&self, item: &Item<String>) -> std::result::Result<i64, TransformError> {
//!         item.payload()
//!             .trim()
//!             .parse()
//!             .map_err(|e| TransformError::recoverable(format!("{}", e)))
//!     }
//!
//!     fn name(&self) -> &str {
//!         "ParseNumber"
//!     }
//! }
//! ```
//!
//! ## Cancellation
//!
//! ```rust
//! use bounded_pipeline::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> Result<()> {
//! let shutdown = CancellationToken::new();
//! let mut pipeline = Coordinator::new(
//!     PipelineConfig::new(1_000_000).with_input_capacity(Capacity::Bounded(4)),
//!     |id: ItemId| id.sequence,
//!     |item: &Item<u64>| -> std::result::Result<u64, TransformError> { Ok(*item.payload()) },
//! )?
//! .with_cancellation(&shutdown);
//!
//! pipeline.start(1, 2)?;
//! shutdown.cancel();
//!
//! let tally = pipeline.await_completion(Duration::from_secs(10))?;
//! assert!(tally.cancelled.is_some());
//! assert!(tally.is_conserved());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod core;
pub mod observability;
pub mod pipeline;
pub mod pool;
pub mod prelude;
pub mod queue;

pub use crate::core::{
    CancellationReason, CancellationToken, Item, ItemId, PipelineError, Result, Transform,
    TransformError, WorkResult,
};
pub use crate::pipeline::{Coordinator, PipelineConfig, PipelineState, Tally};
pub use crate::queue::{BoundedQueue, Capacity, GetError, PutError};
