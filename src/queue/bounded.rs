//! Mutex/condvar FIFO with close and cancellation support.

use super::{Capacity, GetError, PutError};
use crate::core::{CancellationCallbackGuard, CancellationToken, PipelineError, Result};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

struct State<T> {
    buffer: VecDeque<T>,
    closed: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: Capacity,
    /// Tokens whose cancellation wakes this queue for its whole lifetime
    bindings: RwLock<Vec<(CancellationToken, CancellationCallbackGuard)>>,
}

impl<T> Shared<T> {
    fn new(capacity: Capacity, buffer: VecDeque<T>) -> Self {
        Self {
            state: Mutex::new(State {
                buffer,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            bindings: RwLock::new(Vec::new()),
        }
    }

    fn has_room(&self, state: &State<T>) -> bool {
        match self.capacity {
            Capacity::Bounded(n) => state.buffer.len() < n,
            Capacity::Unbounded => true,
        }
    }

    fn wake_all(&self) {
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn wake_on_cancel(&self) {
        // Taking the lock orders this wake-up after any waiter's
        // cancellation check.
        let _state = self.state.lock();
        self.wake_all();
    }
}

/// A thread-safe FIFO queue with optional capacity limit and a one-way close.
///
/// Cloning the handle is cheap; all clones share the same queue.
///
/// Every blocking call takes an explicit timeout. `close()` wakes every
/// waiter: blocked writers fail with [`PutError::Closed`], blocked readers
/// keep receiving what is left and then see [`GetError::Drained`].
///
/// # Example
///
/// ```rust
/// use bounded_pipeline::queue::{BoundedQueue, Capacity, PutError};
/// use std::time::Duration;
///
/// let queue = BoundedQueue::new(Capacity::Bounded(1))?;
/// queue.put("first", Duration::from_millis(10))?;
///
/// // No room: the item comes back with the error
/// match queue.put("second", Duration::from_millis(10)) {
///     Err(PutError::Timeout(item)) => assert_eq!(item, "second"),
///     other => panic!("expected Timeout, got {:?}", other),
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct BoundedQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.shared.capacity)
            .field("len", &state.buffer.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T: Send + 'static> BoundedQueue<T> {
    /// Creates a new queue.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for `Capacity::Bounded(0)`.
    pub fn new(capacity: Capacity) -> Result<Self> {
        let buffer = match capacity {
            Capacity::Bounded(0) => {
                return Err(PipelineError::invalid_config(
                    "capacity",
                    "bounded capacity must be greater than 0",
                ))
            }
            Capacity::Bounded(n) => VecDeque::with_capacity(n),
            Capacity::Unbounded => VecDeque::new(),
        };

        Ok(Self {
            shared: Arc::new(Shared::new(capacity, buffer)),
        })
    }

    /// Creates a bounded queue.
    pub fn bounded(capacity: usize) -> Result<Self> {
        Self::new(Capacity::Bounded(capacity))
    }

    /// Creates an unbounded queue.
    pub fn unbounded() -> Self {
        Self {
            shared: Arc::new(Shared::new(Capacity::Unbounded, VecDeque::new())),
        }
    }

    /// Enqueues `item`, waiting up to `timeout` for space.
    ///
    /// # Errors
    ///
    /// - [`PutError::Timeout`] if the queue stayed full for the whole timeout
    /// - [`PutError::Closed`] if the queue is, or becomes, closed
    pub fn put(&self, item: T, timeout: Duration) -> std::result::Result<(), PutError<T>> {
        self.put_inner(item, timeout, None)
    }

    /// Like [`put`](Self::put), but returns [`PutError::Cancelled`] as soon
    /// as `token` is cancelled.
    ///
    /// With a token passed to [`bind_cancellation`](Self::bind_cancellation)
    /// the call only touches this queue's lock. Any other token gets a
    /// wake-up callback registered for the duration of the call.
    pub fn put_cancellable(
        &self,
        item: T,
        timeout: Duration,
        token: &CancellationToken,
    ) -> std::result::Result<(), PutError<T>> {
        self.put_inner(item, timeout, Some(token))
    }

    /// Enqueues `item` only if there is room right now.
    pub fn try_put(&self, item: T) -> std::result::Result<(), PutError<T>> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(PutError::Closed(item));
        }
        if !self.shared.has_room(&state) {
            return Err(PutError::Full(item));
        }
        state.buffer.push_back(item);
        drop(state);
        self.shared.not_empty.notify_all();
        Ok(())
    }

    /// Dequeues the oldest item, waiting up to `timeout` for one to arrive.
    ///
    /// # Errors
    ///
    /// - [`GetError::Timeout`] if nothing arrived and the queue is still open
    /// - [`GetError::Drained`] once the queue is closed and empty
    pub fn get(&self, timeout: Duration) -> std::result::Result<T, GetError> {
        self.get_inner(timeout, None)
    }

    /// Like [`get`](Self::get), but returns [`GetError::Cancelled`] as soon
    /// as `token` is cancelled.
    pub fn get_cancellable(
        &self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> std::result::Result<T, GetError> {
        self.get_inner(timeout, Some(token))
    }

    /// Dequeues the oldest item if one is available right now.
    pub fn try_get(&self) -> std::result::Result<T, GetError> {
        let mut state = self.shared.state.lock();
        match state.buffer.pop_front() {
            Some(item) => {
                drop(state);
                self.shared.not_full.notify_all();
                Ok(item)
            }
            None if state.closed => Err(GetError::Drained),
            None => Err(GetError::Empty),
        }
    }

    /// Wakes every waiter of this queue when `token` is cancelled.
    ///
    /// The wake-up callback is registered once and stays for the lifetime of
    /// the queue. Binding the same token again is a no-op.
    pub fn bind_cancellation(&self, token: &CancellationToken) {
        let mut bindings = self.shared.bindings.write();
        if bindings.iter().any(|(bound, _)| bound.same_as(token)) {
            return;
        }
        let shared = Arc::downgrade(&self.shared);
        let guard = token.on_cancel(move || {
            if let Some(shared) = shared.upgrade() {
                Shared::wake_on_cancel(&shared);
            }
        });
        bindings.push((token.clone(), guard));
    }

    /// Closes the queue for writes. Idempotent.
    ///
    /// Items already queued stay available to readers.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if !state.closed {
            state.closed = true;
            log::trace!("queue closed with {} items left", state.buffer.len());
        }
        drop(state);
        self.shared.wake_all();
    }

    /// Whether `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Whether the queue is closed and empty
    pub fn is_drained(&self) -> bool {
        let state = self.shared.state.lock();
        state.closed && state.buffer.is_empty()
    }

    /// Number of queued items.
    ///
    /// A snapshot for observability; it may be stale by the time it is read.
    pub fn size(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    /// Whether no items are queued (snapshot)
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Configured capacity
    pub fn capacity(&self) -> Capacity {
        self.shared.capacity
    }

    fn put_inner(
        &self,
        item: T,
        timeout: Duration,
        token: Option<&CancellationToken>,
    ) -> std::result::Result<(), PutError<T>> {
        let _wake = token.and_then(|t| self.wake_for_call(t));
        let deadline = Instant::now().checked_add(timeout);

        let mut state = self.shared.state.lock();
        loop {
            if token.is_some_and(CancellationToken::is_cancelled) {
                return Err(PutError::Cancelled(item));
            }
            if state.closed {
                return Err(PutError::Closed(item));
            }
            if self.shared.has_room(&state) {
                state.buffer.push_back(item);
                drop(state);
                self.shared.not_empty.notify_all();
                return Ok(());
            }
            if !Self::wait(&self.shared.not_full, &mut state, deadline) {
                return Err(PutError::Timeout(item));
            }
        }
    }

    fn get_inner(
        &self,
        timeout: Duration,
        token: Option<&CancellationToken>,
    ) -> std::result::Result<T, GetError> {
        let _wake = token.and_then(|t| self.wake_for_call(t));
        let deadline = Instant::now().checked_add(timeout);

        let mut state = self.shared.state.lock();
        loop {
            if token.is_some_and(CancellationToken::is_cancelled) {
                return Err(GetError::Cancelled);
            }
            if let Some(item) = state.buffer.pop_front() {
                drop(state);
                self.shared.not_full.notify_all();
                return Ok(item);
            }
            if state.closed {
                return Err(GetError::Drained);
            }
            if !Self::wait(&self.shared.not_empty, &mut state, deadline) {
                return Err(GetError::Timeout);
            }
        }
    }

    /// Waits on `condvar` until notified or `deadline`. Returns `false` once
    /// the deadline has passed; callers recheck their condition otherwise.
    fn wait(
        condvar: &Condvar,
        state: &mut MutexGuard<'_, State<T>>,
        deadline: Option<Instant>,
    ) -> bool {
        match deadline {
            Some(deadline) => {
                if Instant::now() >= deadline {
                    return false;
                }
                condvar.wait_until(state, deadline);
                true
            }
            None => {
                condvar.wait(state);
                true
            }
        }
    }

    /// Wake-up callback for one call, unless `token` is already bound.
    fn wake_for_call(&self, token: &CancellationToken) -> Option<CancellationCallbackGuard> {
        if self
            .shared
            .bindings
            .read()
            .iter()
            .any(|(bound, _)| bound.same_as(token))
        {
            return None;
        }
        let shared: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        Some(token.on_cancel(move || {
            if let Some(shared) = shared.upgrade() {
                Shared::wake_on_cancel(&shared);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn test_put_get_fifo() {
        let queue = BoundedQueue::bounded(10).unwrap();
        for i in 0..5 {
            queue.put(i, SHORT).unwrap();
        }
        let out: Vec<_> = (0..5).map(|_| queue.get(SHORT).unwrap()).collect();
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = BoundedQueue::<u8>::new(Capacity::Bounded(0));
        assert!(matches!(result, Err(PipelineError::InvalidConfig { .. })));
    }

    #[test]
    fn test_capacity_and_size() {
        let queue = BoundedQueue::bounded(5).unwrap();
        assert_eq!(queue.capacity(), Capacity::Bounded(5));
        assert!(queue.is_empty());

        queue.put('a', SHORT).unwrap();
        assert_eq!(queue.size(), 1);
        assert!(!queue.is_empty());
    }

    #[test]
    fn test_put_timeout_when_full() {
        let queue = BoundedQueue::bounded(1).unwrap();
        queue.put(1, SHORT).unwrap();

        let start = Instant::now();
        match queue.put(2, SHORT) {
            Err(PutError::Timeout(item)) => assert_eq!(item, 2),
            other => panic!("expected Timeout, got {:?}", other),
        }
        assert!(start.elapsed() >= SHORT);
    }

    #[test]
    fn test_try_put_full() {
        let queue = BoundedQueue::bounded(1).unwrap();
        queue.try_put(1).unwrap();
        assert!(matches!(queue.try_put(2), Err(PutError::Full(2))));
    }

    #[test]
    fn test_try_get() {
        let queue = BoundedQueue::bounded(2).unwrap();
        assert_eq!(queue.try_get(), Err(GetError::Empty));
        queue.put(9, SHORT).unwrap();
        assert_eq!(queue.try_get(), Ok(9));
        queue.close();
        assert_eq!(queue.try_get(), Err(GetError::Drained));
    }

    #[test]
    fn test_unbounded_never_blocks() {
        let queue = BoundedQueue::unbounded();
        for i in 0..10_000 {
            queue.try_put(i).unwrap();
        }
        assert_eq!(queue.size(), 10_000);
        assert_eq!(queue.capacity(), Capacity::Unbounded);
    }

    #[test]
    fn test_get_timeout_while_open() {
        let queue = BoundedQueue::<u32>::bounded(4).unwrap();
        assert_eq!(queue.get(SHORT), Err(GetError::Timeout));
        assert!(!queue.is_closed());
    }

    #[test]
    fn test_close_rejects_put_and_drains() {
        let queue = BoundedQueue::bounded(4).unwrap();
        queue.put(1, SHORT).unwrap();
        queue.put(2, SHORT).unwrap();
        queue.close();
        queue.close();

        assert!(queue.is_closed());
        assert!(!queue.is_drained());
        assert!(matches!(queue.put(3, SHORT), Err(PutError::Closed(3))));

        assert_eq!(queue.get(SHORT), Ok(1));
        assert_eq!(queue.get(SHORT), Ok(2));
        assert_eq!(queue.get(SHORT), Err(GetError::Drained));
        assert!(queue.is_drained());
    }

    #[test]
    fn test_close_wakes_blocked_getters() {
        let queue = BoundedQueue::<u32>::bounded(4).unwrap();
        let long = Duration::from_secs(10);

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let q = queue.clone();
                thread::spawn(move || {
                    let start = Instant::now();
                    (q.get(long), start.elapsed())
                })
            })
            .collect();

        thread::sleep(SHORT);
        queue.close();

        for handle in handles {
            let (result, elapsed) = handle.join().unwrap();
            assert_eq!(result, Err(GetError::Drained));
            assert!(elapsed < Duration::from_secs(5));
        }
    }

    #[test]
    fn test_close_wakes_blocked_putter() {
        let queue = BoundedQueue::bounded(1).unwrap();
        queue.put(0, SHORT).unwrap();

        let q = queue.clone();
        let handle = thread::spawn(move || q.put(1, Duration::from_secs(10)));

        thread::sleep(SHORT);
        queue.close();

        assert!(matches!(handle.join().unwrap(), Err(PutError::Closed(1))));
    }

    #[test]
    fn test_put_blocks_until_space() {
        let queue = BoundedQueue::bounded(1).unwrap();
        queue.put(0, SHORT).unwrap();

        let q = queue.clone();
        let handle = thread::spawn(move || q.put(1, Duration::from_secs(5)));

        thread::sleep(SHORT);
        assert_eq!(queue.get(SHORT), Ok(0));

        handle.join().unwrap().unwrap();
        assert_eq!(queue.get(SHORT), Ok(1));
    }

    #[test]
    fn test_cancel_wakes_blocked_get() {
        let queue = BoundedQueue::<u32>::bounded(4).unwrap();
        let token = CancellationToken::new();

        let q = queue.clone();
        let t = token.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            (q.get_cancellable(Duration::from_secs(10), &t), start.elapsed())
        });

        thread::sleep(SHORT);
        token.cancel();

        let (result, elapsed) = handle.join().unwrap();
        assert_eq!(result, Err(GetError::Cancelled));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_cancel_wakes_blocked_put() {
        let queue = BoundedQueue::bounded(1).unwrap();
        queue.put(0, SHORT).unwrap();
        let token = CancellationToken::new();

        let q = queue.clone();
        let t = token.clone();
        let handle = thread::spawn(move || q.put_cancellable(7, Duration::from_secs(10), &t));

        thread::sleep(SHORT);
        token.cancel();

        assert!(matches!(handle.join().unwrap(), Err(PutError::Cancelled(7))));
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_already_cancelled_returns_immediately() {
        let queue = BoundedQueue::bounded(1).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        assert!(matches!(
            queue.put_cancellable(1, Duration::from_secs(10), &token),
            Err(PutError::Cancelled(1))
        ));
        assert_eq!(
            queue.get_cancellable(Duration::from_secs(10), &token),
            Err(GetError::Cancelled)
        );
    }

    #[test]
    fn test_bound_token_registers_once() {
        let queue: BoundedQueue<u32> = BoundedQueue::bounded(1).unwrap();
        let token = CancellationToken::new();
        queue.bind_cancellation(&token);
        queue.bind_cancellation(&token.clone());
        assert_eq!(token.callback_count(), 1);

        let (q, t) = (queue.clone(), token.clone());
        let handle = thread::spawn(move || {
            let start = Instant::now();
            (q.get_cancellable(Duration::from_secs(10), &t), start.elapsed())
        });

        thread::sleep(SHORT);
        // The blocked get relies on the binding, not on its own callback
        assert_eq!(token.callback_count(), 1);
        queue.put_cancellable(1, SHORT, &token).unwrap();
        assert_eq!(token.callback_count(), 1);

        let (first, _) = handle.join().unwrap();
        assert_eq!(first, Ok(1));

        let (q, t) = (queue.clone(), token.clone());
        let handle = thread::spawn(move || {
            let start = Instant::now();
            (q.get_cancellable(Duration::from_secs(10), &t), start.elapsed())
        });
        thread::sleep(SHORT);
        token.cancel();

        let (result, elapsed) = handle.join().unwrap();
        assert_eq!(result, Err(GetError::Cancelled));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_unbound_token_callback_removed_after_call() {
        let queue: BoundedQueue<u32> = BoundedQueue::bounded(1).unwrap();
        let token = CancellationToken::new();

        assert_eq!(queue.get_cancellable(SHORT, &token), Err(GetError::Timeout));
        assert_eq!(token.callback_count(), 0);
    }

    #[test]
    fn test_dropping_queue_releases_binding() {
        let token = CancellationToken::new();
        let queue: BoundedQueue<u32> = BoundedQueue::unbounded();
        queue.bind_cancellation(&token);
        drop(queue);
        assert_eq!(token.callback_count(), 0);
        token.cancel();
    }

    #[test]
    fn test_concurrent_producers_consumers() {
        let queue = BoundedQueue::bounded(8).unwrap();
        let per_producer = 500;

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = queue.clone();
                thread::spawn(move || {
                    for i in 0..per_producer {
                        let mut item = p * per_producer + i;
                        loop {
                            match q.put(item, SHORT) {
                                Ok(()) => break,
                                Err(PutError::Timeout(back)) => item = back,
                                Err(e) => panic!("unexpected {}", e),
                            }
                        }
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let q = queue.clone();
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    loop {
                        match q.get(SHORT) {
                            Ok(item) => seen.push(item),
                            Err(GetError::Timeout) => continue,
                            Err(_) => return seen,
                        }
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        queue.close();

        let mut all: Vec<_> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..4 * per_producer).collect::<Vec<_>>());
    }
}
