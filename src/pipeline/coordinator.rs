//! Pipeline lifecycle
//!
//! The coordinator launches producers, a worker pool and a collector, then
//! hands them to a supervisor thread that drives the run to completion from
//! lifecycle events alone: producer reports and worker exits arrive over
//! channels and are multiplexed with `select!`.

use crate::core::{
    CancellationReason, CancellationToken, Item, ItemId, PipelineError, Result, Transform,
    WorkResult,
};
use crate::pipeline::collector::{CollectorReport, ResultCallback, ResultCollector};
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::producer::{PayloadSource, Producer, ProducerOutcome, ProducerReport};
use crate::pipeline::tally::{Tally, WorkerFailure};
use crate::pool::{ExitReason, WorkerExit, WorkerPool};
use crate::queue::BoundedQueue;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, never, select, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle state of a pipeline run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    /// Created, threads not yet running
    Starting,
    /// Producers are generating items
    Running,
    /// Producers are done; workers drain the input queue
    Draining,
    /// All threads finished, tally published
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Starting => write!(f, "starting"),
            PipelineState::Running => write!(f, "running"),
            PipelineState::Draining => write!(f, "draining"),
            PipelineState::Stopped => write!(f, "stopped"),
        }
    }
}

type SharedState = Arc<Mutex<PipelineState>>;

fn set_state(state: &SharedState, name: &str, next: PipelineState) {
    let mut current = state.lock();
    if *current != next {
        log::info!("pipeline '{}': {} -> {}", name, *current, next);
        *current = next;
        #[cfg(feature = "tracing")]
        crate::observability::metrics::record_state(name, next);
    }
}

/// Runs a producer → worker → collector pipeline over two bounded queues.
///
/// # Example
///
/// ```rust
/// use bounded_pipeline::prelude::*;
/// use std::time::Duration;
///
/// # fn main() -> bounded_pipeline::Result<()> {
/// let config = PipelineConfig::new(50).with_input_capacity(Capacity::Bounded(10));
/// let mut pipeline = Coordinator::new(
///     config,
///     |id: ItemId| id.sequence,
///     |item: &Item<u64>| -> std::result::Result<u64, TransformError> { Ok(item.payload() * 2) },
/// )?;
///
/// pipeline.start(2, 4)?;
/// let tally = pipeline.await_completion(Duration::from_secs(10))?;
///
/// assert_eq!(tally.items_produced, 100);
/// assert_eq!(tally.results_collected, 100);
/// assert_eq!(pipeline.state(), PipelineState::Stopped);
/// # Ok(())
/// # }
/// ```
pub struct Coordinator<T, U> {
    config: PipelineConfig,
    source: PayloadSource<T>,
    transform: Arc<dyn Transform<T, U>>,
    on_result: Option<ResultCallback<U>>,
    token: CancellationToken,
    state: SharedState,
    queues: Option<(BoundedQueue<Item<T>>, BoundedQueue<WorkResult<U>>)>,
    supervisor: Option<JoinHandle<()>>,
    completion: Option<Receiver<Result<Tally>>>,
    tally: Option<Tally>,
}

impl<T, U> fmt::Debug for Coordinator<T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("name", &self.config.thread_name_prefix)
            .field("state", &*self.state.lock())
            .field("transform", &self.transform.name())
            .finish()
    }
}

impl<T, U> Coordinator<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    /// Create a coordinator.
    ///
    /// `source` builds the payload of each item from its id; `transform`
    /// turns an item into a result on a worker thread.
    pub fn new<S, X>(config: PipelineConfig, source: S, transform: X) -> Result<Self>
    where
        S: Fn(ItemId) -> T + Send + Sync + 'static,
        X: Transform<T, U> + 'static,
    {
        config.validate()?;
        Ok(Self {
            config,
            source: Arc::new(source),
            transform: Arc::new(transform),
            on_result: None,
            token: CancellationToken::new(),
            state: Arc::new(Mutex::new(PipelineState::Starting)),
            queues: None,
            supervisor: None,
            completion: None,
            tally: None,
        })
    }

    /// Tie the run to `parent`: cancelling it cancels the pipeline.
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.token = parent.child();
        self
    }

    /// Invoke `callback` on the collector thread for every result
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn on_result<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&WorkResult<U>) + Send + 'static,
    {
        self.on_result = Some(Box::new(callback));
        self
    }

    /// Launch `producer_count` producers and `worker_count` workers.
    ///
    /// A worker count of 0 starts one worker per CPU. Returns immediately;
    /// use [`await_completion`](Self::await_completion) for the result.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::AlreadyStarted`] on a second call
    /// - [`PipelineError::InvalidConfig`] for zero producers
    /// - [`PipelineError::SpawnError`] if a thread cannot be created; the
    ///   threads already running are cancelled and the pipeline stops
    pub fn start(&mut self, producer_count: usize, worker_count: usize) -> Result<()> {
        if self.queues.is_some() {
            return Err(PipelineError::already_started(
                self.config.thread_name_prefix.clone(),
                self.state(),
            ));
        }
        if producer_count == 0 {
            return Err(PipelineError::invalid_config(
                "producer_count",
                "at least one producer is required",
            ));
        }
        let worker_count = if worker_count == 0 {
            num_cpus::get()
        } else {
            worker_count
        };

        let input = BoundedQueue::new(self.config.input_capacity)?;
        let output = BoundedQueue::new(self.config.output_capacity)?;
        input.bind_cancellation(&self.token);
        output.bind_cancellation(&self.token);
        self.queues = Some((input.clone(), output.clone()));

        let name = self.config.thread_name_prefix.clone();
        log::info!(
            "pipeline '{}': starting {} producers, {} workers",
            name,
            producer_count,
            worker_count
        );

        let launch = Launch {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            input,
            output,
        };
        let result = self.launch(launch, producer_count, worker_count);
        if result.is_err() {
            set_state(&self.state, &name, PipelineState::Stopped);
        }
        result
    }

    fn launch(
        &mut self,
        launch: Launch<T, U>,
        producer_count: usize,
        worker_count: usize,
    ) -> Result<()> {
        let name = self.config.thread_name_prefix.clone();
        let Launch {
            run_id,
            started_at,
            input,
            output,
        } = launch;

        let abort = |token: &CancellationToken, reason: &PipelineError| {
            token.cancel_with_reason(CancellationReason::Error(reason.to_string()));
            input.close();
            output.close();
        };

        let (report_tx, reports) = unbounded();
        let mut producers = Vec::with_capacity(producer_count);
        for id in 0..producer_count {
            match self.spawn_producer(id, &input, report_tx.clone()) {
                Ok(handle) => producers.push(handle),
                Err(e) => {
                    abort(&self.token, &e);
                    join_all(producers);
                    return Err(e);
                }
            }
        }
        drop(report_tx);

        let pool = match WorkerPool::spawn(
            worker_count,
            input.clone(),
            output.clone(),
            Arc::clone(&self.transform),
            &self.config,
            self.token.clone(),
        ) {
            Ok(pool) => pool,
            Err(e) => {
                abort(&self.token, &e);
                join_all(producers);
                return Err(e);
            }
        };

        let collector = match ResultCollector::new(self.config.poll_timeout)
            .with_boxed_callback(self.on_result.take())
            .spawn(format!("{}-collector", name), output.clone())
        {
            Ok(handle) => handle,
            Err(e) => {
                abort(&self.token, &e);
                join_all(producers);
                let _ = pool.join();
                return Err(e);
            }
        };

        set_state(&self.state, &name, PipelineState::Running);

        let (done_tx, done_rx) = bounded(1);
        let supervisor = Supervisor {
            name: name.clone(),
            run_id,
            started_at,
            producers,
            reports,
            pool,
            collector,
            input,
            output,
            token: self.token.clone(),
            state: Arc::clone(&self.state),
        };

        let handle = thread::Builder::new()
            .name(format!("{}-supervisor", name))
            .spawn(move || {
                let result = supervisor.run();
                let _ = done_tx.send(result);
            })
            .map_err(|e| {
                // The closure was dropped with the supervisor; its pool cancels the token.
                self.token
                    .cancel_with_reason(CancellationReason::Error(e.to_string()));
                PipelineError::spawn("supervisor", 0, e)
            })?;

        self.supervisor = Some(handle);
        self.completion = Some(done_rx);
        Ok(())
    }

    fn spawn_producer(
        &self,
        id: usize,
        input: &BoundedQueue<Item<T>>,
        reports: Sender<ProducerReport>,
    ) -> Result<JoinHandle<()>> {
        let producer = Producer::from_source(id, Arc::clone(&self.source))
            .with_delay(self.config.producer_delay)
            .with_put_timeout(self.config.put_timeout);
        let count = self.config.items_per_producer;
        let input = input.clone();
        let token = self.token.clone();

        thread::Builder::new()
            .name(format!("{}-producer-{}", self.config.thread_name_prefix, id))
            .spawn(move || {
                let report = producer.run(count, &input, &token);
                let _ = reports.send(report);
            })
            .map_err(|e| PipelineError::spawn("producer", id, e))
    }

    /// Wait up to `timeout` for the run to finish.
    ///
    /// On [`PipelineError::CompletionTimeout`] the pipeline keeps running and
    /// this can be called again. Once the tally is available every later call
    /// returns a copy of it.
    pub fn await_completion(&mut self, timeout: Duration) -> Result<Tally> {
        if let Some(tally) = &self.tally {
            return Ok(tally.clone());
        }
        let completion = self
            .completion
            .as_ref()
            .ok_or_else(|| PipelineError::not_started(self.config.thread_name_prefix.clone()))?;

        let outcome = match completion.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                return Err(PipelineError::completion_timeout(timeout.as_millis() as u64));
            }
            Err(RecvTimeoutError::Disconnected) => Err(PipelineError::join(
                "supervisor",
                0,
                "supervisor exited without a tally",
            )),
        };

        self.completion = None;
        if let Some(handle) = self.supervisor.take() {
            let _ = handle.join();
        }

        let tally = outcome?;
        self.tally = Some(tally.clone());
        Ok(tally)
    }

    /// Current lifecycle state
    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    /// Cancel the run.
    ///
    /// Blocked producers and workers return promptly; the collector still
    /// counts every result already delivered and the tally is published as
    /// usual.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The pipeline's cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Current `(input, output)` queue sizes, once started
    pub fn queue_sizes(&self) -> Option<(usize, usize)> {
        self.queues
            .as_ref()
            .map(|(input, output)| (input.size(), output.size()))
    }

    /// Configuration in use
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl<T, U> Drop for Coordinator<T, U> {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.take() {
            self.token.cancel_with_reason(CancellationReason::Custom(
                "coordinator dropped".to_string(),
            ));
            let _ = handle.join();
        }
    }
}

struct Launch<T, U> {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    input: BoundedQueue<Item<T>>,
    output: BoundedQueue<WorkResult<U>>,
}

fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.join();
    }
}

/// Owns every thread of a started run
struct Supervisor<T, U> {
    name: String,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    producers: Vec<JoinHandle<()>>,
    reports: Receiver<ProducerReport>,
    pool: WorkerPool,
    collector: JoinHandle<CollectorReport>,
    input: BoundedQueue<Item<T>>,
    output: BoundedQueue<WorkResult<U>>,
    token: CancellationToken,
    state: SharedState,
}

impl<T, U> Supervisor<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    fn run(self) -> Result<Tally> {
        let Supervisor {
            name,
            run_id,
            started_at,
            producers,
            reports,
            pool,
            collector,
            input,
            output,
            token,
            state,
        } = self;

        let worker_count = pool.len();
        let exit_events = pool.exit_events().clone();
        let no_exits = never();
        let mut exits: Vec<WorkerExit> = Vec::with_capacity(worker_count);
        let mut exits_open = true;
        let mut produced = 0;

        // Running: until every producer has reported.
        let mut reports_open = true;
        while reports_open {
            let exit_rx = if exits_open && exits.len() < worker_count {
                &exit_events
            } else {
                &no_exits
            };
            select! {
                recv(reports) -> msg => match msg {
                    Ok(report) => {
                        produced += report.produced;
                        if report.outcome != ProducerOutcome::Completed {
                            log::debug!(
                                "pipeline '{}': producer {} stopped early ({:?})",
                                name,
                                report.producer_id,
                                report.outcome
                            );
                        }
                    }
                    Err(_) => reports_open = false,
                },
                recv(exit_rx) -> msg => match msg {
                    Ok(exit) => {
                        record_exit(&name, exit, &mut exits);
                        if exits.len() == worker_count && !token.is_cancelled() {
                            log::error!(
                                "pipeline '{}': all workers exited, cancelling producers",
                                name
                            );
                            token.cancel_with_reason(CancellationReason::Error(
                                "all workers exited".to_string(),
                            ));
                        }
                    }
                    Err(_) => exits_open = false,
                },
            }
        }

        let mut failure = None;
        for (id, handle) in producers.into_iter().enumerate() {
            if handle.join().is_err() {
                log::error!("pipeline '{}': producer {} panicked", name, id);
                token.cancel_with_reason(CancellationReason::Error(format!(
                    "producer {} panicked",
                    id
                )));
                failure.get_or_insert_with(|| {
                    PipelineError::join("producer", id, "producer panicked")
                });
            }
        }

        // Draining: no more input will arrive.
        set_state(&state, &name, PipelineState::Draining);
        input.close();
        while exits_open && exits.len() < worker_count {
            match exit_events.recv() {
                Ok(exit) => record_exit(&name, exit, &mut exits),
                Err(_) => exits_open = false,
            }
        }

        let snapshots = pool.snapshots();
        let delivered = pool.total_items_processed();
        let items_unprocessed = input.size() as u64;
        if let Err(e) = pool.join() {
            failure.get_or_insert(e);
        }

        // Stopped: flush the output side.
        output.close();
        let collected = match collector.join() {
            Ok(report) => report,
            Err(_) => {
                failure.get_or_insert_with(|| {
                    PipelineError::join("collector", 0, "collector panicked")
                });
                CollectorReport::default()
            }
        };
        set_state(&state, &name, PipelineState::Stopped);

        if let Some(e) = failure {
            return Err(e);
        }
        if collected.results != delivered {
            log::warn!(
                "pipeline '{}': workers delivered {} results, collector saw {}",
                name,
                delivered,
                collected.results
            );
        }

        let mut worker_failures: Vec<WorkerFailure> = exits
            .into_iter()
            .filter_map(|exit| match exit.reason {
                ExitReason::Fatal(message) => Some(WorkerFailure {
                    worker_id: exit.worker_id,
                    message,
                }),
                _ => None,
            })
            .collect();
        worker_failures.sort_by_key(|f| f.worker_id);

        let tally = Tally {
            run_id,
            started_at,
            finished_at: Utc::now(),
            items_produced: produced,
            results_collected: collected.results,
            transform_failures: snapshots.iter().map(|s| s.items_failed).sum(),
            items_lost: snapshots.iter().map(|s| s.items_lost).sum(),
            items_unprocessed,
            results_by_worker: collected.by_worker,
            worker_failures,
            collector_failure: collected.callback_failure,
            cancelled: token.reason().map(|r| r.to_string()),
        };

        if tally.is_conserved() {
            log::info!("pipeline '{}': {}", name, tally);
        } else {
            log::warn!("pipeline '{}': item counts do not add up: {}", name, tally);
        }
        #[cfg(feature = "tracing")]
        crate::observability::metrics::record_tally(&tally);

        Ok(tally)
    }
}

fn record_exit(name: &str, exit: WorkerExit, exits: &mut Vec<WorkerExit>) {
    match &exit.reason {
        ExitReason::Fatal(msg) => {
            log::error!("pipeline '{}': worker {} failed: {}", name, exit.worker_id, msg)
        }
        reason => log::debug!("pipeline '{}': worker {} stopped: {}", name, exit.worker_id, reason),
    }
    exits.push(exit);
}
