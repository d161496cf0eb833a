//! Worker thread implementation

use crate::core::{
    CancellationToken, Item, PipelineError, Result, Transform, TransformError, WorkResult,
};
use crate::queue::{BoundedQueue, GetError, PutError};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::ControlFlow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use tracing::{span, Level};

/// Statistics for a worker thread
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Items transformed and delivered to the output queue
    pub items_processed: AtomicU64,
    /// Items dropped after a recoverable transform failure
    pub items_failed: AtomicU64,
    /// Items dropped because the worker stopped while holding them
    pub items_lost: AtomicU64,
    /// `get` calls that timed out with the input queue still open
    pub idle_polls: AtomicU64,
    /// Total time spent in transforms (microseconds)
    pub total_processing_time_us: AtomicU64,
}

impl WorkerStats {
    /// Create new worker statistics
    pub fn new() -> Self {
        Self::default()
    }

    fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get items processed
    pub fn get_items_processed(&self) -> u64 {
        self.items_processed.load(Ordering::Relaxed)
    }

    /// Get items failed
    pub fn get_items_failed(&self) -> u64 {
        self.items_failed.load(Ordering::Relaxed)
    }

    /// Get items lost
    pub fn get_items_lost(&self) -> u64 {
        self.items_lost.load(Ordering::Relaxed)
    }

    /// Get idle poll count
    pub fn get_idle_polls(&self) -> u64 {
        self.idle_polls.load(Ordering::Relaxed)
    }

    /// Average transform time per processed item in microseconds
    pub fn get_average_processing_time_us(&self) -> f64 {
        let total = self.total_processing_time_us.load(Ordering::Relaxed);
        let count = self.get_items_processed() + self.get_items_failed();
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            items_processed: self.get_items_processed(),
            items_failed: self.get_items_failed(),
            items_lost: self.get_items_lost(),
            idle_polls: self.get_idle_polls(),
            total_processing_time_us: self.total_processing_time_us.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`WorkerStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatsSnapshot {
    /// Items transformed and delivered
    pub items_processed: u64,
    /// Items dropped after a recoverable failure
    pub items_failed: u64,
    /// Items dropped while stopping
    pub items_lost: u64,
    /// Timed-out polls on an open queue
    pub idle_polls: u64,
    /// Total transform time (microseconds)
    pub total_processing_time_us: u64,
}

/// Why a worker stopped
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Input queue closed and empty
    Drained,
    /// The pipeline's cancellation token fired
    Cancelled,
    /// Unrecoverable transform failure or panic
    Fatal(String),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Drained => write!(f, "input drained"),
            ExitReason::Cancelled => write!(f, "cancelled"),
            ExitReason::Fatal(msg) => write!(f, "fatal: {}", msg),
        }
    }
}

/// Exit notification a worker sends exactly once
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerExit {
    /// Worker that stopped
    pub worker_id: usize,
    /// Why it stopped
    pub reason: ExitReason,
}

impl WorkerExit {
    /// Whether the worker stopped on an unrecoverable error
    pub fn is_fatal(&self) -> bool {
        matches!(self.reason, ExitReason::Fatal(_))
    }
}

/// Queues, transform and timing shared by the workers of one pool
pub(crate) struct WorkerContext<T, U> {
    pub(crate) input: BoundedQueue<Item<T>>,
    pub(crate) output: BoundedQueue<WorkResult<U>>,
    pub(crate) transform: Arc<dyn Transform<T, U>>,
    pub(crate) token: CancellationToken,
    pub(crate) poll_timeout: Duration,
    pub(crate) put_timeout: Duration,
}

impl<T, U> Clone for WorkerContext<T, U> {
    fn clone(&self) -> Self {
        Self {
            input: self.input.clone(),
            output: self.output.clone(),
            transform: Arc::clone(&self.transform),
            token: self.token.clone(),
            poll_timeout: self.poll_timeout,
            put_timeout: self.put_timeout,
        }
    }
}

/// Sends the worker's exit on drop, so an unwinding thread still reports.
struct ExitNotice {
    worker_id: usize,
    reason: Option<ExitReason>,
    events: Sender<WorkerExit>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let reason = self
            .reason
            .take()
            .unwrap_or_else(|| ExitReason::Fatal("worker thread unwound".to_string()));
        // The receiver may already be gone if the pool was dropped.
        let _ = self.events.send(WorkerExit {
            worker_id: self.worker_id,
            reason,
        });
    }
}

/// A worker thread pulling items from the input queue
#[derive(Debug)]
pub struct Worker {
    id: usize,
    thread: Option<thread::JoinHandle<()>>,
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// Spawn a worker thread.
    ///
    /// The worker reports a [`WorkerExit`] on `events` when it stops.
    pub(crate) fn spawn<T, U>(
        id: usize,
        name: String,
        ctx: WorkerContext<T, U>,
        events: Sender<WorkerExit>,
    ) -> Result<Self>
    where
        T: Send + 'static,
        U: Send + 'static,
    {
        let stats = Arc::new(WorkerStats::new());
        let stats_clone = Arc::clone(&stats);

        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let mut notice = ExitNotice {
                    worker_id: id,
                    reason: None,
                    events,
                };
                notice.reason = Some(Self::run(id, &ctx, &stats_clone));
            })
            .map_err(|e| PipelineError::spawn("worker", id, e))?;

        Ok(Self {
            id,
            thread: Some(thread),
            stats,
        })
    }

    /// Get worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get worker statistics
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Whether the worker thread is still running
    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Join the worker thread
    pub fn join(mut self) -> Result<()> {
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| PipelineError::join("worker", self.id, "worker panicked"))?;
        }
        Ok(())
    }

    /// Main worker loop
    ///
    /// A timed-out `get` only means no work arrived yet; the worker stops on
    /// `Drained`, on cancellation, or on a fatal transform failure.
    fn run<T, U>(id: usize, ctx: &WorkerContext<T, U>, stats: &WorkerStats) -> ExitReason
    where
        T: Send + 'static,
        U: Send + 'static,
    {
        #[cfg(feature = "tracing")]
        let worker_span = span!(Level::DEBUG, "worker", id = id);
        #[cfg(feature = "tracing")]
        let _guard = worker_span.enter();

        log::debug!("worker {} started", id);

        let reason = loop {
            match ctx.input.get_cancellable(ctx.poll_timeout, &ctx.token) {
                Ok(item) => {
                    if let ControlFlow::Break(reason) = Self::process(id, item, ctx, stats) {
                        break reason;
                    }
                }
                Err(GetError::Timeout) | Err(GetError::Empty) => {
                    WorkerStats::increment(&stats.idle_polls);
                }
                Err(GetError::Drained) => break ExitReason::Drained,
                Err(GetError::Cancelled) => break ExitReason::Cancelled,
            }
        };

        match &reason {
            ExitReason::Fatal(msg) => log::error!("worker {} stopped: {}", id, msg),
            other => log::debug!(
                "worker {} stopped ({}): processed={} failed={}",
                id,
                other,
                stats.get_items_processed(),
                stats.get_items_failed()
            ),
        }
        #[cfg(feature = "tracing")]
        crate::observability::metrics::record_worker_exit(id, &reason);

        reason
    }

    /// Transform one item and deliver the result
    fn process<T, U>(
        id: usize,
        item: Item<T>,
        ctx: &WorkerContext<T, U>,
        stats: &WorkerStats,
    ) -> ControlFlow<ExitReason>
    where
        T: Send + 'static,
        U: Send + 'static,
    {
        let start = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| ctx.transform.transform(&item)));
        let elapsed = start.elapsed();
        stats
            .total_processing_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(TransformError::Recoverable(msg))) => {
                log::warn!(
                    "worker {}: {} failed on {}: {}",
                    id,
                    ctx.transform.name(),
                    item.id(),
                    msg
                );
                WorkerStats::increment(&stats.items_failed);
                #[cfg(feature = "tracing")]
                crate::observability::metrics::record_completion(elapsed, false);
                return ControlFlow::Continue(());
            }
            Ok(Err(TransformError::Fatal(msg))) => {
                WorkerStats::increment(&stats.items_lost);
                return ControlFlow::Break(ExitReason::Fatal(format!(
                    "{} failed on {}: {}",
                    ctx.transform.name(),
                    item.id(),
                    msg
                )));
            }
            Err(panic_info) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                WorkerStats::increment(&stats.items_lost);
                return ControlFlow::Break(ExitReason::Fatal(format!(
                    "{} panicked on {}: {}",
                    ctx.transform.name(),
                    item.id(),
                    panic_msg
                )));
            }
        };

        let mut result = WorkResult::new(item.id(), value, id);
        loop {
            match ctx
                .output
                .put_cancellable(result, ctx.put_timeout, &ctx.token)
            {
                Ok(()) => break,
                Err(PutError::Timeout(back)) | Err(PutError::Full(back)) => result = back,
                Err(PutError::Cancelled(_)) => {
                    WorkerStats::increment(&stats.items_lost);
                    return ControlFlow::Break(ExitReason::Cancelled);
                }
                Err(PutError::Closed(_)) => {
                    WorkerStats::increment(&stats.items_lost);
                    return ControlFlow::Break(ExitReason::Fatal(
                        PipelineError::queue_closed("output").to_string(),
                    ));
                }
            }
        }

        WorkerStats::increment(&stats.items_processed);
        #[cfg(feature = "tracing")]
        crate::observability::metrics::record_completion(elapsed, true);
        ControlFlow::Continue(())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("worker {} panicked during shutdown", self.id);
            }
        }
    }
}
