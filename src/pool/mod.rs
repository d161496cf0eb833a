//! Worker threads and the pool that owns them

pub mod worker;
pub mod worker_pool;

pub use worker::{ExitReason, Worker, WorkerExit, WorkerStats, WorkerStatsSnapshot};
pub use worker_pool::WorkerPool;
