//! Pending-result handles for deferred core-thread commands.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

struct AsyncOpInner {
    resolved: AtomicBool,
    value: Mutex<Option<Box<dyn Any + Send>>>,
    completed: Condvar,
}

/// The eventual outcome of a result-producing deferred command.
///
/// Handed out by [`CoreDispatcher::enqueue_for_result`]; the command resolves
/// it on the core thread with [`complete`], and any other thread may poll it
/// with [`has_completed`], block on it with [`wait`], or extract the typed
/// result with [`take`]. Clones share the same underlying slot.
///
/// There is no timeout: a command that is never executed leaves waiters
/// blocked, the same starvation hazard the lifecycle gate carries.
///
/// [`CoreDispatcher::enqueue_for_result`]: crate::dispatch::CoreDispatcher::enqueue_for_result
/// [`complete`]: AsyncOp::complete
/// [`has_completed`]: AsyncOp::has_completed
/// [`wait`]: AsyncOp::wait
/// [`take`]: AsyncOp::take
///
/// # Examples
///
/// ```
/// use corebound::AsyncOp;
///
/// let op = AsyncOp::new();
/// assert!(!op.has_completed());
///
/// op.complete(1024usize);
/// op.wait();
/// assert_eq!(op.take::<usize>(), Some(1024));
/// ```
#[derive(Clone)]
pub struct AsyncOp {
    inner: Arc<AsyncOpInner>,
}

impl AsyncOp {
    /// Creates an unresolved handle.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AsyncOpInner {
                resolved: AtomicBool::new(false),
                value: Mutex::new(None),
                completed: Condvar::new(),
            }),
        }
    }

    /// Resolves the handle with `value` and wakes every waiter.
    ///
    /// Completing an already-resolved handle replaces the stored value; the
    /// resolved state never reverts.
    pub fn complete<T: Send + 'static>(&self, value: T) {
        {
            let mut slot = self.inner.value.lock();
            *slot = Some(Box::new(value));
            self.inner.resolved.store(true, Ordering::SeqCst);
        }
        self.inner.completed.notify_all();
    }

    /// Whether the command has resolved this handle yet.
    pub fn has_completed(&self) -> bool {
        self.inner.resolved.load(Ordering::SeqCst)
    }

    /// Blocks the calling thread until the handle resolves.
    pub fn wait(&self) {
        let mut slot = self.inner.value.lock();
        while !self.inner.resolved.load(Ordering::SeqCst) {
            self.inner.completed.wait(&mut slot);
        }
    }

    /// Extracts the stored value, if resolved and of type `T`.
    ///
    /// Takes ownership: a second call returns `None`, as does a downcast to
    /// the wrong type (the value is consumed either way).
    pub fn take<T: 'static>(&self) -> Option<T> {
        let boxed = self.inner.value.lock().take()?;
        boxed.downcast::<T>().ok().map(|value| *value)
    }
}

impl Default for AsyncOp {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AsyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOp")
            .field("resolved", &self.has_completed())
            .finish()
    }
}
