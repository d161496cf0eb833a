//! Bounded FIFO queue connecting pipeline stages.
//!
//! [`BoundedQueue`] is the only shared mutable state in a pipeline. Producers
//! and workers `put` into it, workers and the collector `get` from it, and
//! the coordinator `close`s it once no more items are coming.
//!
//! `get` distinguishes two kinds of "nothing here":
//!
//! - [`GetError::Timeout`]: the queue is open but nothing arrived in time.
//!   Transient; the caller retries.
//! - [`GetError::Drained`]: the queue is closed and empty. Terminal; no item
//!   will ever arrive again.
//!
//! ```rust
//! use bounded_pipeline::queue::{BoundedQueue, Capacity, GetError};
//! use std::time::Duration;
//!
//! let queue = BoundedQueue::new(Capacity::Bounded(4))?;
//! queue.put(1, Duration::from_millis(10))?;
//! queue.close();
//!
//! assert_eq!(queue.get(Duration::from_millis(10)), Ok(1));
//! assert_eq!(queue.get(Duration::from_millis(10)), Err(GetError::Drained));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod bounded;

pub use bounded::BoundedQueue;

use serde::{Deserialize, Serialize};
use std::fmt;

/// How many items a queue may hold
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    /// At most this many items; `put` blocks when full
    Bounded(usize),
    /// No limit; `put` never blocks
    Unbounded,
}

impl Capacity {
    /// Maximum number of items, `None` if unbounded
    pub fn limit(&self) -> Option<usize> {
        match self {
            Capacity::Bounded(n) => Some(*n),
            Capacity::Unbounded => None,
        }
    }
}

impl Default for Capacity {
    fn default() -> Self {
        Capacity::Bounded(1024)
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capacity::Bounded(n) => write!(f, "bounded({})", n),
            Capacity::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Why a `put` did not enqueue its item. The item is handed back.
#[derive(PartialEq, Eq)]
pub enum PutError<T> {
    /// No space became available before the timeout
    Timeout(T),
    /// The queue is closed for writes
    Closed(T),
    /// The cancellation token fired while waiting
    Cancelled(T),
    /// The queue is full (non-blocking `try_put` only)
    Full(T),
}

impl<T> PutError<T> {
    /// Recover the item that was not enqueued
    pub fn into_inner(self) -> T {
        match self {
            PutError::Timeout(item)
            | PutError::Closed(item)
            | PutError::Cancelled(item)
            | PutError::Full(item) => item,
        }
    }

    /// Whether retrying the same put can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, PutError::Timeout(_) | PutError::Full(_))
    }
}

impl<T> fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            PutError::Timeout(_) => "Timeout",
            PutError::Closed(_) => "Closed",
            PutError::Cancelled(_) => "Cancelled",
            PutError::Full(_) => "Full",
        };
        write!(f, "PutError::{}(..)", kind)
    }
}

impl<T> fmt::Display for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutError::Timeout(_) => write!(f, "put timed out"),
            PutError::Closed(_) => write!(f, "queue is closed"),
            PutError::Cancelled(_) => write!(f, "put cancelled"),
            PutError::Full(_) => write!(f, "queue is full"),
        }
    }
}

impl<T> std::error::Error for PutError<T> {}

/// Why a `get` returned no item
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GetError {
    /// Nothing arrived before the timeout; the queue is still open
    Timeout,
    /// The queue is closed and empty; nothing will ever arrive
    Drained,
    /// The cancellation token fired while waiting
    Cancelled,
    /// Nothing is queued right now (non-blocking `try_get` only)
    Empty,
}

impl GetError {
    /// Whether the consumer should stop reading
    pub fn is_terminal(&self) -> bool {
        matches!(self, GetError::Drained | GetError::Cancelled)
    }
}

impl fmt::Display for GetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GetError::Timeout => write!(f, "get timed out"),
            GetError::Drained => write!(f, "queue is drained"),
            GetError::Cancelled => write!(f, "get cancelled"),
            GetError::Empty => write!(f, "queue is empty"),
        }
    }
}

impl std::error::Error for GetError {}
