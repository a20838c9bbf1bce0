//! The shared initialization gate.
//!
//! One process-wide mutex/condvar pair gates every wait for a core-thread
//! initialization, across all lifecycle objects. Coarse on purpose: a
//! completing object wakes every waiter and each waiter rechecks its own
//! object's flags, so correctness never depends on who got woken. Contention
//! here is bounded by how often callers block on `synchronize()`, which is
//! rare outside load spikes.

use parking_lot::{Condvar, Mutex, MutexGuard};

pub(crate) struct InitGate {
    lock: Mutex<()>,
    loaded: Condvar,
}

static INIT_GATE: InitGate = InitGate {
    lock: Mutex::new(()),
    loaded: Condvar::new(),
};

/// The process-wide gate instance.
pub(crate) fn init_gate() -> &'static InitGate {
    &INIT_GATE
}

impl InitGate {
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Blocks until the next notification. Callers loop and recheck their
    /// predicate; wakeups may be spurious or meant for another object.
    pub(crate) fn wait(&self, held: &mut MutexGuard<'_, ()>) {
        self.loaded.wait(held);
    }

    pub(crate) fn notify_all(&self) {
        self.loaded.notify_all();
    }
}
