//! Item producers

use crate::core::{CancellationToken, Item, ItemId};
use crate::queue::{BoundedQueue, PutError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Function producing the payload for a given item id
pub type PayloadSource<T> = Arc<dyn Fn(ItemId) -> T + Send + Sync>;

/// How a producer run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProducerOutcome {
    /// Every requested item was enqueued
    Completed,
    /// The cancellation token fired first
    Cancelled,
    /// The queue was closed underneath the producer
    QueueClosed,
}

/// Summary of one [`Producer::run`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerReport {
    /// Producer that ran
    pub producer_id: usize,
    /// Items successfully enqueued
    pub produced: u64,
    /// How the run ended
    pub outcome: ProducerOutcome,
}

/// Generates items with strictly increasing sequence numbers and pushes them
/// into a queue.
///
/// A producer never closes the queue it writes to: several producers may
/// share one queue, and only the coordinator knows when the last one is done.
///
/// ```rust
/// use bounded_pipeline::pipeline::{Producer, ProducerOutcome};
/// use bounded_pipeline::{BoundedQueue, CancellationToken};
///
/// let queue = BoundedQueue::unbounded();
/// let producer = Producer::new(3, |id| id.sequence * 10);
///
/// let report = producer.run(4, &queue, &CancellationToken::new());
/// assert_eq!(report.produced, 4);
/// assert_eq!(report.outcome, ProducerOutcome::Completed);
/// assert_eq!(queue.size(), 4);
/// ```
pub struct Producer<T> {
    id: usize,
    source: PayloadSource<T>,
    delay: Duration,
    put_timeout: Duration,
}

impl<T> std::fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.id)
            .field("delay", &self.delay)
            .field("put_timeout", &self.put_timeout)
            .finish()
    }
}

impl Producer<u32> {
    /// A producer with random payloads in `1..=100`
    pub fn random(id: usize) -> Self {
        Self::new(id, |_| fastrand::u32(1..=100))
    }
}

impl<T: Send + 'static> Producer<T> {
    /// Create a producer whose payloads come from `source`
    pub fn new<F>(id: usize, source: F) -> Self
    where
        F: Fn(ItemId) -> T + Send + Sync + 'static,
    {
        Self::from_source(id, Arc::new(source))
    }

    /// Create a producer sharing an existing payload source
    pub fn from_source(id: usize, source: PayloadSource<T>) -> Self {
        Self {
            id,
            source,
            delay: Duration::ZERO,
            put_timeout: Duration::from_millis(100),
        }
    }

    /// Pause between consecutive items
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// How long each put attempt waits on a full queue before retrying
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_put_timeout(mut self, timeout: Duration) -> Self {
        self.put_timeout = timeout;
        self
    }

    /// Producer id
    pub fn id(&self) -> usize {
        self.id
    }

    /// Enqueue `count` items, blocking on backpressure.
    ///
    /// A full queue only slows the producer down; it returns early only when
    /// `token` is cancelled or the queue gets closed.
    pub fn run(
        &self,
        count: u64,
        queue: &BoundedQueue<Item<T>>,
        token: &CancellationToken,
    ) -> ProducerReport {
        log::debug!("producer {} started ({} items)", self.id, count);

        // Cancellation interrupts the pause between items.
        let (wake_tx, wake_rx) = crossbeam_channel::bounded::<()>(1);
        let _wake = token.on_cancel(move || {
            let _ = wake_tx.try_send(());
        });

        let mut produced = 0;
        let mut outcome = ProducerOutcome::Completed;

        'items: for sequence in 0..count {
            if token.is_cancelled() {
                outcome = ProducerOutcome::Cancelled;
                break;
            }

            let id = ItemId::new(self.id, sequence);
            let mut item = Item::new(id, (self.source)(id));
            loop {
                match queue.put_cancellable(item, self.put_timeout, token) {
                    Ok(()) => break,
                    Err(PutError::Timeout(back)) | Err(PutError::Full(back)) => {
                        log::trace!("producer {}: queue full, retrying {}", self.id, id);
                        item = back;
                    }
                    Err(PutError::Cancelled(_)) => {
                        outcome = ProducerOutcome::Cancelled;
                        break 'items;
                    }
                    Err(PutError::Closed(_)) => {
                        log::warn!("producer {}: queue closed before {}", self.id, id);
                        outcome = ProducerOutcome::QueueClosed;
                        break 'items;
                    }
                }
            }
            produced += 1;

            if !self.delay.is_zero() && sequence + 1 < count && wake_rx.recv_timeout(self.delay).is_ok()
            {
                outcome = ProducerOutcome::Cancelled;
                break;
            }
        }

        log::debug!(
            "producer {} finished: {} items, {:?}",
            self.id,
            produced,
            outcome
        );

        ProducerReport {
            producer_id: self.id,
            produced,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::GetError;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_sequences_strictly_increase() {
        let queue = BoundedQueue::unbounded();
        let report = Producer::new(1, |id| id.sequence).run(20, &queue, &CancellationToken::new());
        assert_eq!(report.produced, 20);

        let mut last = None;
        while let Ok(item) = queue.try_get() {
            assert_eq!(item.id().producer, 1);
            assert!(last.map_or(true, |prev| item.id().sequence > prev));
            assert_eq!(*item.payload(), item.id().sequence);
            last = Some(item.id().sequence);
        }
        assert_eq!(last, Some(19));
    }

    #[test]
    fn test_does_not_close_queue() {
        let queue = BoundedQueue::unbounded();
        Producer::new(0, |_| ()).run(3, &queue, &CancellationToken::new());
        assert!(!queue.is_closed());
    }

    #[test]
    fn test_random_payload_range() {
        let queue = BoundedQueue::unbounded();
        Producer::random(0).run(200, &queue, &CancellationToken::new());
        while let Ok(item) = queue.try_get() {
            assert!((1..=100).contains(item.payload()));
        }
    }

    #[test]
    fn test_blocks_on_backpressure() {
        let queue = BoundedQueue::bounded(2).unwrap();
        let q = queue.clone();
        let handle = thread::spawn(move || {
            Producer::new(0, |id| id.sequence)
                .with_put_timeout(Duration::from_millis(5))
                .run(10, &q, &CancellationToken::new())
        });

        let mut received = Vec::new();
        while received.len() < 10 {
            match queue.get(Duration::from_millis(20)) {
                Ok(item) => {
                    assert!(queue.size() <= 2);
                    received.push(item.id().sequence);
                    thread::sleep(Duration::from_millis(2));
                }
                Err(GetError::Timeout) => continue,
                Err(e) => panic!("unexpected {}", e),
            }
        }

        let report = handle.join().unwrap();
        assert_eq!(report.outcome, ProducerOutcome::Completed);
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_cancel_while_blocked() {
        let queue = BoundedQueue::bounded(1).unwrap();
        let token = CancellationToken::new();
        let (q, t) = (queue.clone(), token.clone());
        let handle = thread::spawn(move || {
            Producer::new(0, |_| 0u8)
                .with_put_timeout(Duration::from_secs(10))
                .run(5, &q, &t)
        });

        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        token.cancel();

        let report = handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(report.outcome, ProducerOutcome::Cancelled);
        assert_eq!(report.produced, 1);
    }

    #[test]
    fn test_cancel_interrupts_delay() {
        let queue = BoundedQueue::unbounded();
        let token = CancellationToken::new();
        let (q, t) = (queue.clone(), token.clone());
        let handle = thread::spawn(move || {
            Producer::new(0, |_| 0u8)
                .with_delay(Duration::from_secs(10))
                .run(5, &q, &t)
        });

        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        token.cancel();

        let report = handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(report.outcome, ProducerOutcome::Cancelled);
        assert_eq!(report.produced, 1);
    }

    #[test]
    fn test_closed_queue_stops_producer() {
        let queue = BoundedQueue::unbounded();
        queue.close();
        let report = Producer::new(0, |_| 0u8).run(5, &queue, &CancellationToken::new());
        assert_eq!(report.outcome, ProducerOutcome::QueueClosed);
        assert_eq!(report.produced, 0);
    }
}
