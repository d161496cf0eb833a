//! Final pipeline report

use crate::core::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// A worker that stopped on an unrecoverable error
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFailure {
    /// Worker id
    pub worker_id: usize,
    /// Failure message
    pub message: String,
}

/// Counts for one pipeline run.
///
/// Every produced item ends up in exactly one bucket, so a finished run
/// satisfies `items_produced == results_collected + transform_failures +
/// items_lost + items_unprocessed` (see [`is_conserved`](Self::is_conserved)).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Unique id of the run
    pub run_id: Uuid,
    /// When the coordinator started
    pub started_at: DateTime<Utc>,
    /// When the tally was published
    pub finished_at: DateTime<Utc>,
    /// Items enqueued by all producers
    pub items_produced: u64,
    /// Results the collector took from the output queue
    pub results_collected: u64,
    /// Items skipped after a recoverable transform failure
    pub transform_failures: u64,
    /// Items a worker held when it stopped (fatal error or cancellation)
    pub items_lost: u64,
    /// Items still in the input queue when the workers stopped
    pub items_unprocessed: u64,
    /// Collected results per worker id
    pub results_by_worker: BTreeMap<usize, u64>,
    /// Workers that stopped on a fatal error
    pub worker_failures: Vec<WorkerFailure>,
    /// Panic message of the result callback; results after it were still
    /// collected, without the callback
    pub collector_failure: Option<String>,
    /// Cancellation reason, if the run was cancelled
    pub cancelled: Option<String>,
}

impl Tally {
    /// Every produced item is accounted for
    pub fn is_conserved(&self) -> bool {
        self.items_produced
            == self.results_collected
                + self.transform_failures
                + self.items_lost
                + self.items_unprocessed
    }

    /// The run finished without cancellation, item loss or a failed callback
    pub fn is_complete(&self) -> bool {
        self.cancelled.is_none()
            && self.collector_failure.is_none()
            && self.items_lost == 0
            && self.items_unprocessed == 0
            && self.is_conserved()
    }

    /// Wall-clock duration of the run
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {}: produced={} collected={} failed={} lost={} unprocessed={}",
            self.run_id,
            self.items_produced,
            self.results_collected,
            self.transform_failures,
            self.items_lost,
            self.items_unprocessed
        )?;
        if let Some(reason) = &self.cancelled {
            write!(f, " (cancelled: {})", reason)?;
        }
        if let Some(msg) = &self.collector_failure {
            write!(f, " (result callback failed: {})", msg)?;
        }
        Ok(())
    }
}
