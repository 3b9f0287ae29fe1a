//! # Call Context
//!
//! Request-scoped cancellation for every engine operation.
//!
//! A `CallContext` carries a shared cancellation flag and an optional
//! deadline. Store implementations check it before touching the database
//! and keep polling it while a statement runs, so a cancelled or expired
//! context aborts the in-flight query instead of waiting for it.

use crate::CanopyError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Cancellable execution context passed as the first argument of every
/// store, core and service operation.
///
/// Clones share the same cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled unless `cancel` is called.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Cancel this context and every clone of it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the context was cancelled or its deadline has passed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail with `CanopyError::Cancelled` once the context is done.
    pub fn check(&self) -> Result<(), CanopyError> {
        if self.is_done() {
            Err(CanopyError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Guard that cancels this context when dropped.
    ///
    /// Held by async callers so that dropping the request future (client
    /// disconnect) stops the blocking work it started.
    #[must_use]
    pub fn cancel_on_drop(&self) -> CancelOnDrop {
        CancelOnDrop { ctx: self.clone() }
    }

    /// Polling closure suitable for a database progress handler.
    ///
    /// Returns `true` when the running statement should be interrupted.
    pub(crate) fn interrupt_probe(&self) -> impl FnMut() -> bool + Send + 'static {
        let cancelled = Arc::clone(&self.cancelled);
        let deadline = self.deadline;
        move || {
            cancelled.load(Ordering::Acquire) || deadline.is_some_and(|d| Instant::now() >= d)
        }
    }
}

/// Cancels the wrapped context on drop. See `CallContext::cancel_on_drop`.
#[derive(Debug)]
pub struct CancelOnDrop {
    ctx: CallContext,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.ctx.cancel();
    }
}
