//! Producers, collector and the coordinator that ties them to a worker pool

pub mod collector;
pub mod config;
pub mod coordinator;
pub mod producer;
pub mod tally;

pub use collector::{CollectorReport, ResultCallback, ResultCollector};
pub use config::PipelineConfig;
pub use coordinator::{Coordinator, PipelineState};
pub use producer::{PayloadSource, Producer, ProducerOutcome, ProducerReport};
pub use tally::{Tally, WorkerFailure};
