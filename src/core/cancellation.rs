//! Pipeline cancellation
//!
//! A [`CancellationToken`] is shared by every producer, worker and queue wait
//! of a pipeline. Cancelling it makes blocked queue operations return
//! promptly instead of waiting out their timeout: a queue bound to the token
//! registers one wake-up callback with [`CancellationToken::on_cancel`] for
//! the whole run.
//!
//! # Example
//!
//! ```rust
//! use bounded_pipeline::CancellationToken;
//!
//! let parent = CancellationToken::new();
//! let child = parent.child();
//!
//! parent.cancel();
//!
//! assert!(parent.is_cancelled());
//! assert!(child.is_cancelled());
//! ```

use crate::core::{PipelineError, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

static NEXT_CALLBACK_ID: AtomicUsize = AtomicUsize::new(1);

fn next_callback_id() -> usize {
    NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Why a token was cancelled
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CancellationReason {
    /// Explicitly cancelled via `cancel()`
    Manual,
    /// Cancelled because the parent token was cancelled
    ParentCancelled,
    /// Cancelled due to an error condition inside the pipeline
    Error(String),
    /// Custom cancellation reason
    Custom(String),
}

impl std::fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancellationReason::Manual => write!(f, "manually cancelled"),
            CancellationReason::ParentCancelled => write!(f, "parent was cancelled"),
            CancellationReason::Error(msg) => write!(f, "error: {}", msg),
            CancellationReason::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

struct StoredCallback {
    id: usize,
    callback: Box<dyn FnOnce() + Send + Sync>,
}

struct TokenInner {
    cancelled: AtomicBool,
    children: RwLock<Vec<Weak<TokenInner>>>,
    callbacks: RwLock<Vec<StoredCallback>>,
    reason: RwLock<Option<CancellationReason>>,
}

impl TokenInner {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            children: RwLock::new(Vec::new()),
            callbacks: RwLock::new(Vec::new()),
            reason: RwLock::new(None),
        }
    }
}

/// A thread-safe, cloneable cancellation flag with wake-up callbacks
///
/// Clones share state. Cancellation is monotonic: once cancelled a token
/// stays cancelled and keeps the first reason it was given.
///
/// # Example
///
/// ```rust
/// use bounded_pipeline::{CancellationReason, CancellationToken};
///
/// let token = CancellationToken::new();
/// token.cancel_with_reason(CancellationReason::Error("sink unavailable".to_string()));
///
/// assert!(token.is_cancelled());
/// assert!(token.check().is_err());
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

impl CancellationToken {
    /// Create a new, uncancelled token
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner::new()),
        }
    }

    /// Creates a child token that is cancelled whenever this token is
    ///
    /// Cancelling the child does not affect the parent. A child of an already
    /// cancelled token starts out cancelled.
    pub fn child(&self) -> Self {
        let child = CancellationToken {
            inner: Arc::new(TokenInner::new()),
        };

        self.inner
            .children
            .write()
            .push(Arc::downgrade(&child.inner));

        if self.is_cancelled() {
            child.cancel_with_reason(CancellationReason::ParentCancelled);
        }

        child
    }

    /// Cancel with [`CancellationReason::Manual`]
    pub fn cancel(&self) {
        self.cancel_with_reason(CancellationReason::Manual);
    }

    /// Cancel with a specific reason
    ///
    /// Runs every registered callback, then cancels all live children.
    /// Only the first call has any effect.
    pub fn cancel_with_reason(&self, reason: CancellationReason) {
        {
            // The reason is in place before the flag is visible, so a
            // cancelled token always reports why.
            let mut slot = self.inner.reason.write();
            if self.inner.cancelled.load(Ordering::Acquire) {
                return;
            }
            *slot = Some(reason);
            self.inner.cancelled.store(true, Ordering::Release);
        }

        // Taking the callbacks under the write lock pairs with the check in
        // `on_cancel`, so a callback is either drained here or run there.
        let callbacks: Vec<_> = self.inner.callbacks.write().drain(..).collect();
        for stored in callbacks {
            (stored.callback)();
        }

        let children = self.inner.children.read();
        for child_weak in children.iter() {
            if let Some(child_inner) = child_weak.upgrade() {
                let child_token = CancellationToken { inner: child_inner };
                child_token.cancel_with_reason(CancellationReason::ParentCancelled);
            }
        }
    }

    /// Check if this token has been cancelled
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Returns the cancellation reason, `None` while not cancelled
    pub fn reason(&self) -> Option<CancellationReason> {
        self.inner.reason.read().clone()
    }

    /// Returns [`PipelineError::Cancelled`] if cancelled, `Ok(())` otherwise
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            let reason = self
                .reason()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            Err(PipelineError::cancelled(reason))
        } else {
            Ok(())
        }
    }

    /// Registers a callback to run on cancellation
    ///
    /// If the token is already cancelled the callback runs immediately on the
    /// calling thread. Dropping the returned guard unregisters the callback.
    ///
    /// ```rust
    /// use bounded_pipeline::CancellationToken;
    /// use std::sync::atomic::{AtomicBool, Ordering};
    /// use std::sync::Arc;
    ///
    /// let token = CancellationToken::new();
    /// let called = Arc::new(AtomicBool::new(false));
    /// let called_clone = Arc::clone(&called);
    ///
    /// let _guard = token.on_cancel(move || called_clone.store(true, Ordering::SeqCst));
    ///
    /// token.cancel();
    /// assert!(called.load(Ordering::SeqCst));
    /// ```
    pub fn on_cancel<F>(&self, callback: F) -> CancellationCallbackGuard
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        let id = next_callback_id();

        let run_now = {
            let mut callbacks = self.inner.callbacks.write();
            if self.is_cancelled() {
                Some(callback)
            } else {
                callbacks.push(StoredCallback {
                    id,
                    callback: Box::new(callback),
                });
                None
            }
        };
        if let Some(callback) = run_now {
            callback();
        }

        CancellationCallbackGuard {
            token: Some(self.clone()),
            callback_id: id,
        }
    }

    fn remove_callback(&self, callback_id: usize) {
        self.inner.callbacks.write().retain(|c| c.id != callback_id);
    }

    /// Whether both handles refer to the same token
    pub(crate) fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[cfg(test)]
    pub(crate) fn callback_count(&self) -> usize {
        self.inner.callbacks.read().len()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Unregisters its callback when dropped
///
/// Returned by [`CancellationToken::on_cancel`].
pub struct CancellationCallbackGuard {
    token: Option<CancellationToken>,
    callback_id: usize,
}

impl Drop for CancellationCallbackGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if !token.is_cancelled() {
                token.remove_callback(self.callback_id);
            }
        }
    }
}

impl CancellationCallbackGuard {
    /// Keeps the callback registered after the guard is dropped
    pub fn detach(mut self) {
        self.token = None;
    }
}
