//! Dispatch interfaces and the production core-thread runner.
//!
//! The lifecycle state machine talks to its execution environment through two
//! narrow traits: [`CoreThreadIdentity`] answers "am I on the core thread?",
//! and [`CoreDispatcher`] accepts deferred commands for it. [`CoreThread`] is
//! the production implementation of both: a dedicated worker thread draining
//! an unbounded FIFO channel. Mock implementations for deterministic tests
//! live in [`crate::test_utils`].

use std::io;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;

use crate::async_op::AsyncOp;

/// A deferred unit of work bound for the core thread.
pub type CoreCommand = Box<dyn FnOnce() + Send>;

/// A deferred unit of work that resolves a pending-result handle.
pub type CoreResultCommand = Box<dyn FnOnce(&AsyncOp) + Send>;

/// Identifies whether the calling thread is the core execution context.
pub trait CoreThreadIdentity: Send + Sync {
    fn is_core_thread(&self) -> bool;
}

/// Accepts commands for later execution on the core thread.
///
/// Commands submitted through one dispatcher execute strictly in submission
/// order relative to each other.
pub trait CoreDispatcher: Send + Sync {
    /// Queues a fire-and-forget command.
    fn enqueue(&self, command: CoreCommand);

    /// Queues a result-producing command and returns the handle it resolves.
    fn enqueue_for_result(&self, command: CoreResultCommand) -> AsyncOp;
}

/// Configuration for spawning a [`CoreThread`].
#[derive(Debug, Clone)]
pub struct CoreThreadBuilder {
    name: String,
}

impl Default for CoreThreadBuilder {
    fn default() -> Self {
        Self {
            name: "core-thread".to_string(),
        }
    }
}

impl CoreThreadBuilder {
    /// Overrides the OS thread name of the worker.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Spawns the worker thread and returns the running runner.
    pub fn spawn(self) -> io::Result<CoreThread> {
        CoreThread::spawn(self)
    }
}

/// The production core-thread runner.
///
/// One worker thread owns the receive side of an unbounded channel and runs
/// every command in submission order. [`stop`] disconnects the channel and
/// joins; the worker drains everything already submitted before exiting, so
/// teardown commands queued by released objects still run at shutdown.
/// Commands enqueued after [`stop`] are logged and dropped.
///
/// [`stop`]: CoreThread::stop
pub struct CoreThread {
    sender: Mutex<Option<flume::Sender<CoreCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    core_thread_id: ThreadId,
}

impl CoreThread {
    fn spawn(builder: CoreThreadBuilder) -> io::Result<Self> {
        let (sender, receiver) = flume::unbounded::<CoreCommand>();
        let (id_sender, id_receiver) = flume::bounded(1);

        let worker = thread::Builder::new().name(builder.name).spawn(move || {
            let _ = id_sender.send(thread::current().id());
            // recv() keeps yielding queued commands after the sender drops
            // and errors only once the channel is both empty and closed.
            while let Ok(command) = receiver.recv() {
                command();
            }
        })?;

        let core_thread_id = id_receiver
            .recv()
            .expect("core thread exited before reporting its id");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            core_thread_id,
        })
    }

    /// Disconnects the command channel and joins the worker after it drains
    /// every command already submitted.
    ///
    /// Release all core-bound objects first: teardown commands enqueued after
    /// this point are dropped, and the objects they belonged to will fault
    /// when their memory is finally reclaimed still initialized.
    pub fn stop(&self) {
        drop(self.sender.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("core thread worker terminated by a panic");
            }
        }
    }

    fn submit(&self, command: CoreCommand) {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => {
                if sender.send(command).is_err() {
                    tracing::error!("core thread hung up; command dropped");
                }
            }
            None => tracing::error!("command enqueued after stop(); dropped"),
        }
    }
}

impl CoreThreadIdentity for CoreThread {
    fn is_core_thread(&self) -> bool {
        thread::current().id() == self.core_thread_id
    }
}

impl CoreDispatcher for CoreThread {
    fn enqueue(&self, command: CoreCommand) {
        self.submit(command);
    }

    fn enqueue_for_result(&self, command: CoreResultCommand) -> AsyncOp {
        let op = AsyncOp::new();
        let resolve = op.clone();
        self.submit(Box::new(move || command(&resolve)));
        op
    }
}

impl Drop for CoreThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn commands_run_in_submission_order() {
        let core = CoreThreadBuilder::default().spawn().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for value in 0..8 {
            let order = Arc::clone(&order);
            core.enqueue(Box::new(move || order.lock().push(value)));
        }
        core.stop();

        assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn identity_distinguishes_the_worker() {
        let core = Arc::new(CoreThreadBuilder::default().spawn().unwrap());
        assert!(!core.is_core_thread());

        let on_worker = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&on_worker);
        let inner = Arc::clone(&core);
        core.enqueue(Box::new(move || {
            if inner.is_core_thread() {
                flag.store(1, Ordering::SeqCst);
            }
        }));
        core.stop();

        assert_eq!(on_worker.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn result_commands_resolve_their_handle() {
        let core = CoreThreadBuilder::default().spawn().unwrap();
        let op = core.enqueue_for_result(Box::new(|op| op.complete(21usize * 2)));

        op.wait();
        assert_eq!(op.take::<usize>(), Some(42));
        core.stop();
    }

    #[test]
    fn stop_drains_pending_commands() {
        let core = CoreThreadBuilder::default().spawn().unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..32 {
            let ran = Arc::clone(&ran);
            core.enqueue(Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }
        core.stop();

        assert_eq!(ran.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn enqueue_after_stop_is_dropped() {
        let core = CoreThreadBuilder::default().spawn().unwrap();
        core.stop();
        // Logged and dropped rather than panicking; release paths enqueue
        // from destructors.
        core.enqueue(Box::new(|| unreachable!("must not run")));
    }
}
