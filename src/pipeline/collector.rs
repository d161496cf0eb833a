//! Result collection

use crate::core::{PipelineError, Result, WorkResult};
use crate::queue::{BoundedQueue, GetError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

/// Callback invoked once per collected result
pub type ResultCallback<U> = Box<dyn FnMut(&WorkResult<U>) + Send>;

/// What a collector saw before the output queue drained
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorReport {
    /// Results taken from the output queue
    pub results: u64,
    /// Results per worker id
    pub by_worker: BTreeMap<usize, u64>,
    /// Panic message of the result callback, which is not called again
    /// after panicking
    pub callback_failure: Option<String>,
}

impl CollectorReport {
    fn record(&mut self, worker_id: usize) {
        self.results += 1;
        *self.by_worker.entry(worker_id).or_insert(0) += 1;
    }
}

/// Drains the output queue until it is closed and empty.
///
/// The collector does not watch the cancellation token: after a cancel the
/// coordinator still closes the output queue, and every result that made it
/// into the queue gets counted.
pub struct ResultCollector<U> {
    poll_timeout: Duration,
    callback: Option<ResultCallback<U>>,
}

impl<U> fmt::Debug for ResultCollector<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCollector")
            .field("poll_timeout", &self.poll_timeout)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl<U: Send + 'static> ResultCollector<U> {
    /// Create a collector polling every `poll_timeout`
    pub fn new(poll_timeout: Duration) -> Self {
        Self {
            poll_timeout,
            callback: None,
        }
    }

    /// Observe every collected result
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&WorkResult<U>) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub(crate) fn with_boxed_callback(mut self, callback: Option<ResultCallback<U>>) -> Self {
        self.callback = callback;
        self
    }

    /// Collect until `output` is closed and empty
    pub fn run(&mut self, output: &BoundedQueue<WorkResult<U>>) -> CollectorReport {
        let mut report = CollectorReport::default();
        loop {
            match output.get(self.poll_timeout) {
                Ok(result) => {
                    log::trace!(
                        "collected {} from worker {}",
                        result.item_id(),
                        result.worker_id()
                    );
                    report.record(result.worker_id());
                    if let Some(callback) = self.callback.as_mut() {
                        let outcome = catch_unwind(AssertUnwindSafe(|| callback(&result)));
                        if let Err(panic_info) = outcome {
                            let msg = panic_message(panic_info.as_ref());
                            log::error!(
                                "result callback panicked on {}: {}; collecting without it",
                                result.item_id(),
                                msg
                            );
                            report.callback_failure = Some(msg);
                            self.callback = None;
                        }
                    }
                }
                Err(GetError::Timeout) | Err(GetError::Empty) => continue,
                Err(GetError::Drained) | Err(GetError::Cancelled) => break,
            }
        }
        log::debug!("collector finished with {} results", report.results);
        report
    }

    /// Run the collector on its own thread
    pub fn spawn(
        mut self,
        name: String,
        output: BoundedQueue<WorkResult<U>>,
    ) -> Result<thread::JoinHandle<CollectorReport>> {
        thread::Builder::new()
            .name(name)
            .spawn(move || self.run(&output))
            .map_err(|e| PipelineError::spawn("collector", 0, e))
    }
}

fn panic_message(panic_info: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
