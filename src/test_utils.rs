//! Deterministic mock services and fixtures for lifecycle tests.
//!
//! The real [`CoreThread`](crate::dispatch::CoreThread) runs commands as they
//! arrive, which is exactly what protocol tests don't want. The mocks here
//! queue everything and only run it when the test says so, track their call
//! counts, and can impersonate the core thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::async_op::AsyncOp;
use crate::context::CoreContext;
use crate::dispatch::{CoreCommand, CoreDispatcher, CoreResultCommand, CoreThreadIdentity};
use crate::object::CoreResource;

/// A dispatcher that queues commands until [`drain`](ManualDispatcher::drain)
/// is called, standing in for the core thread's queue in unit tests.
///
/// # Examples
///
/// ```
/// use corebound::test_utils::ManualDispatcher;
/// use corebound::CoreDispatcher;
///
/// let dispatcher = ManualDispatcher::new();
/// dispatcher.enqueue(Box::new(|| {}));
/// assert_eq!(dispatcher.queued(), 1);
/// assert_eq!(dispatcher.drain(), 1);
/// assert_eq!(dispatcher.queued(), 0);
/// ```
pub struct ManualDispatcher {
    queue: Mutex<VecDeque<CoreCommand>>,
    enqueues: AtomicUsize,
    pretend_core: AtomicBool,
    closed: AtomicBool,
}

impl ManualDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            enqueues: AtomicUsize::new(0),
            pretend_core: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Runs the commands queued so far, in submission order, and returns how
    /// many ran. Commands enqueued while draining are left for the next call,
    /// so tests can observe the intermediate queue states.
    pub fn drain(&self) -> usize {
        let batch: Vec<CoreCommand> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        let count = batch.len();
        for command in batch {
            command();
        }
        count
    }

    /// Commands currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Total enqueue calls observed, drained or not.
    pub fn enqueue_count(&self) -> usize {
        self.enqueues.load(Ordering::SeqCst)
    }

    /// Makes `is_core_thread` answer `value` for the calling test.
    pub fn set_core_thread(&self, value: bool) {
        self.pretend_core.store(value, Ordering::SeqCst);
    }

    fn push(&self, command: CoreCommand) {
        self.enqueues.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.queue.lock().push_back(command);
    }
}

impl CoreDispatcher for ManualDispatcher {
    fn enqueue(&self, command: CoreCommand) {
        self.push(command);
    }

    fn enqueue_for_result(&self, command: CoreResultCommand) -> AsyncOp {
        let op = AsyncOp::new();
        let resolve = op.clone();
        self.push(Box::new(move || command(&resolve)));
        op
    }
}

impl CoreThreadIdentity for ManualDispatcher {
    fn is_core_thread(&self) -> bool {
        self.pretend_core.load(Ordering::SeqCst)
    }
}

impl Drop for ManualDispatcher {
    fn drop(&mut self) {
        // Dropping a queued command can release an owner whose teardown tries
        // to enqueue again; the closed flag discards those, and the loop
        // keeps taking the queue out of the lock until nothing refills it.
        self.closed.store(true, Ordering::SeqCst);
        loop {
            let batch: Vec<CoreCommand> = {
                let mut queue = self.queue.lock();
                queue.drain(..).collect()
            };
            if batch.is_empty() {
                break;
            }
            drop(batch);
        }
    }
}

/// A dispatcher that loses every command, for exercising the
/// lost-command failure paths. Never claims to be the core thread.
pub struct LossyDispatcher {
    lost: AtomicUsize,
}

impl LossyDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lost: AtomicUsize::new(0),
        })
    }

    /// Commands accepted and dropped so far.
    pub fn lost(&self) -> usize {
        self.lost.load(Ordering::SeqCst)
    }
}

impl CoreDispatcher for LossyDispatcher {
    fn enqueue(&self, command: CoreCommand) {
        self.lost.fetch_add(1, Ordering::SeqCst);
        drop(command);
    }

    fn enqueue_for_result(&self, command: CoreResultCommand) -> AsyncOp {
        self.lost.fetch_add(1, Ordering::SeqCst);
        drop(command);
        AsyncOp::new()
    }
}

impl CoreThreadIdentity for LossyDispatcher {
    fn is_core_thread(&self) -> bool {
        false
    }
}

/// A context wired to a fresh [`ManualDispatcher`]. Each call is fully
/// isolated from every other test.
pub fn test_context() -> (CoreContext, Arc<ManualDispatcher>) {
    let dispatcher = ManualDispatcher::new();
    let context = CoreContext::new(dispatcher.clone(), dispatcher.clone());
    (context, dispatcher)
}

/// A context wired to a [`LossyDispatcher`].
pub fn lossy_context() -> (CoreContext, Arc<LossyDispatcher>) {
    let dispatcher = LossyDispatcher::new();
    let context = CoreContext::new(dispatcher.clone(), dispatcher.clone());
    (context, dispatcher)
}

/// A payload with empty initialize/destroy bodies.
pub struct NullResource;

impl CoreResource for NullResource {
    fn initialize(&self) {}
    fn destroy(&self) {}
}

/// Shared counters observing one [`CountingResource`] from the outside.
#[derive(Clone)]
pub struct ResourceCounters {
    initialized: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
}

impl ResourceCounters {
    /// Times the initialize body ran.
    pub fn initialized(&self) -> usize {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Times the destroy body ran.
    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Times the payload's memory was reclaimed. Anything other than one at
    /// the end of a full lifecycle is a leak or a double free.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// A payload that counts every lifecycle event, including its own drop.
pub struct CountingResource {
    initialized: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
}

impl CountingResource {
    pub fn new() -> (Self, ResourceCounters) {
        let counters = ResourceCounters {
            initialized: Arc::new(AtomicUsize::new(0)),
            destroyed: Arc::new(AtomicUsize::new(0)),
            dropped: Arc::new(AtomicUsize::new(0)),
        };
        let resource = Self {
            initialized: Arc::clone(&counters.initialized),
            destroyed: Arc::clone(&counters.destroyed),
            dropped: Arc::clone(&counters.dropped),
        };
        (resource, counters)
    }
}

impl CoreResource for CountingResource {
    fn initialize(&self) {
        self.initialized.fetch_add(1, Ordering::SeqCst);
    }

    fn destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for CountingResource {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}
