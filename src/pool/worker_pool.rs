//! Fixed-size pool of workers sharing one input and one output queue

use crate::core::{CancellationReason, CancellationToken, Item, Result, Transform, WorkResult};
use crate::pipeline::PipelineConfig;
use crate::pool::worker::{Worker, WorkerContext, WorkerExit, WorkerStatsSnapshot};
use crate::queue::BoundedQueue;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

/// A set of worker threads `0..n` draining one input queue into one output
/// queue.
///
/// Each worker reports exactly one [`WorkerExit`] on
/// [`exit_events`](Self::exit_events), which is how the coordinator learns
/// that workers have finished without polling them.
///
/// # Example
///
/// ```rust
/// use bounded_pipeline::prelude::*;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// fn square(item: &Item<u64>) -> std::result::Result<u64, TransformError> {
///     Ok(item.payload() * item.payload())
/// }
///
/// # fn main() -> bounded_pipeline::Result<()> {
/// let input: BoundedQueue<Item<u64>> = BoundedQueue::bounded(8)?;
/// let output: BoundedQueue<WorkResult<u64>> = BoundedQueue::bounded(8)?;
/// let pool = WorkerPool::spawn(
///     2,
///     input.clone(),
///     output.clone(),
///     Arc::new(square),
///     &PipelineConfig::default(),
///     CancellationToken::new(),
/// )?;
///
/// input.put(Item::new(ItemId::new(0, 0), 7), Duration::from_millis(100)).unwrap();
/// input.close();
/// pool.join()?;
///
/// assert_eq!(*output.get(Duration::from_millis(100)).unwrap().value(), 49);
/// # Ok(())
/// # }
/// ```
pub struct WorkerPool {
    workers: Vec<Worker>,
    exits: Receiver<WorkerExit>,
    token: CancellationToken,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("alive", &self.alive_count())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `worker_count` workers.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SpawnError`](crate::PipelineError::SpawnError)
    /// if a thread cannot be created. Workers already spawned are cancelled
    /// through `token` and joined before the error is returned.
    pub fn spawn<T, U>(
        worker_count: usize,
        input: BoundedQueue<Item<T>>,
        output: BoundedQueue<WorkResult<U>>,
        transform: Arc<dyn Transform<T, U>>,
        config: &PipelineConfig,
        token: CancellationToken,
    ) -> Result<Self>
    where
        T: Send + 'static,
        U: Send + 'static,
    {
        input.bind_cancellation(&token);
        output.bind_cancellation(&token);

        let (tx, exits) = unbounded();
        let ctx = WorkerContext {
            input,
            output,
            transform,
            token: token.clone(),
            poll_timeout: config.poll_timeout,
            put_timeout: config.put_timeout,
        };

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let name = format!("{}-worker-{}", config.thread_name_prefix, id);
            match Worker::spawn(id, name, ctx.clone(), tx.clone()) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    token.cancel_with_reason(CancellationReason::Error(e.to_string()));
                    drop(workers);
                    return Err(e);
                }
            }
        }

        log::debug!("spawned {} workers", worker_count);

        Ok(Self {
            workers,
            exits,
            token,
        })
    }

    /// Number of workers in the pool
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool has no workers
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Number of worker threads still running
    pub fn alive_count(&self) -> usize {
        self.workers.iter().filter(|w| w.is_alive()).count()
    }

    /// Channel on which every worker reports its exit once
    pub fn exit_events(&self) -> &Receiver<WorkerExit> {
        &self.exits
    }

    /// Waits up to `timeout` for the next worker exit
    pub fn wait_exit(&self, timeout: Duration) -> Option<WorkerExit> {
        match self.exits.recv_timeout(timeout) {
            Ok(exit) => Some(exit),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Per-worker snapshots, indexed by worker id
    pub fn snapshots(&self) -> Vec<WorkerStatsSnapshot> {
        self.workers.iter().map(|w| w.stats().snapshot()).collect()
    }

    /// Items processed across all workers
    pub fn total_items_processed(&self) -> u64 {
        self.workers
            .iter()
            .map(|w| w.stats().get_items_processed())
            .sum()
    }

    /// Join every worker thread.
    ///
    /// Workers stop once the input queue is drained or the token is
    /// cancelled; close the input queue first for a clean shutdown.
    pub fn join(mut self) -> Result<()> {
        let workers = std::mem::take(&mut self.workers);
        for worker in workers {
            worker.join()?;
        }
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            // Not joined: stop the workers so dropping them does not block.
            self.token.cancel_with_reason(CancellationReason::Custom(
                "worker pool dropped".to_string(),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ItemId, TransformError};
    use crate::pool::worker::ExitReason;
    use std::collections::HashSet;
    use std::thread;

    const POLL: Duration = Duration::from_millis(10);

    fn identity(item: &Item<u64>) -> std::result::Result<u64, TransformError> {
        Ok(*item.payload())
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default()
            .with_poll_timeout(POLL)
            .with_put_timeout(POLL)
    }

    #[test]
    fn test_pool_processes_every_item_once() {
        let input: BoundedQueue<Item<u64>> = BoundedQueue::bounded(4).unwrap();
        let output: BoundedQueue<WorkResult<u64>> = BoundedQueue::unbounded();
        let token = CancellationToken::new();
        let pool = WorkerPool::spawn(
            4,
            input.clone(),
            output.clone(),
            Arc::new(identity),
            &config(),
            token,
        )
        .unwrap();
        assert_eq!(pool.len(), 4);

        for seq in 0..200 {
            let mut item = Item::new(ItemId::new(0, seq), seq);
            loop {
                match input.put(item, POLL) {
                    Ok(()) => break,
                    Err(e) => item = e.into_inner(),
                }
            }
        }
        input.close();

        let mut exits = Vec::new();
        for _ in 0..4 {
            exits.push(pool.wait_exit(Duration::from_secs(5)).unwrap());
        }
        assert!(exits.iter().all(|e| e.reason == ExitReason::Drained));
        assert_eq!(pool.total_items_processed(), 200);
        pool.join().unwrap();

        let mut seen = HashSet::new();
        while let Ok(result) = output.try_get() {
            assert!(seen.insert(result.item_id()));
        }
        assert_eq!(seen.len(), 200);
    }

    #[test]
    fn test_workers_stay_alive_on_open_queue() {
        let input: BoundedQueue<Item<u64>> = BoundedQueue::bounded(4).unwrap();
        let output: BoundedQueue<WorkResult<u64>> = BoundedQueue::bounded(4).unwrap();
        let pool = WorkerPool::spawn(
            3,
            input.clone(),
            output,
            Arc::new(identity),
            &config(),
            CancellationToken::new(),
        )
        .unwrap();

        thread::sleep(POLL * 6);
        assert_eq!(pool.alive_count(), 3);
        assert!(pool.snapshots().iter().all(|s| s.idle_polls >= 3));
        assert!(pool.exit_events().is_empty());

        input.close();
        pool.join().unwrap();
    }

    #[test]
    fn test_drop_cancels_unjoined_workers() {
        let input: BoundedQueue<Item<u64>> = BoundedQueue::bounded(4).unwrap();
        let output: BoundedQueue<WorkResult<u64>> = BoundedQueue::bounded(4).unwrap();
        let token = CancellationToken::new();
        let pool = WorkerPool::spawn(
            2,
            input,
            output,
            Arc::new(identity),
            &config(),
            token.clone(),
        )
        .unwrap();

        drop(pool);
        assert!(token.is_cancelled());
    }
}
