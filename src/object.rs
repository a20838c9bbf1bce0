//! The lifecycle state machine for core-thread-bound resources.
//!
//! A [`CoreObject`] wraps a payload whose initialization and teardown bodies
//! may be pinned to the core thread. Callers on any thread request
//! `initialize`/`destroy`; the state machine either runs the body in place or
//! packages it as a deferred command that rides the dispatcher queue together
//! with an owning handle, so the object outlives the command. `synchronize`
//! blocks a caller until a pending initialization completes.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use bitflags::bitflags;

use crate::context::CoreContext;
use crate::error::LifecycleError;
use crate::gate::init_gate;
use crate::handle::CoreRef;
use crate::registry::CoreObjectId;

/// Which thread runs the payload's initialize/destroy bodies.
///
/// Fixed at construction for the object's entire lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadAffinity {
    /// Bodies run on the core thread; cross-thread requests are queued.
    Core,
    /// Bodies run synchronously on whichever thread makes the request.
    Caller,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct LifecycleFlags: u8 {
        const CORE_BOUND        = 0b0001;
        const INITIALIZED       = 0b0010;
        const SCHEDULED_INIT    = 0b0100;
        const SCHEDULED_DESTROY = 0b1000;
    }
}

/// Lifecycle flags behind a single atomic byte.
struct AtomicFlags(AtomicU8);

impl AtomicFlags {
    fn new(flags: LifecycleFlags) -> Self {
        Self(AtomicU8::new(flags.bits()))
    }

    fn load(&self) -> LifecycleFlags {
        LifecycleFlags::from_bits_truncate(self.0.load(Ordering::SeqCst))
    }

    fn insert(&self, flags: LifecycleFlags) {
        self.0.fetch_or(flags.bits(), Ordering::SeqCst);
    }

    fn remove(&self, flags: LifecycleFlags) {
        self.0.fetch_and(!flags.bits(), Ordering::SeqCst);
    }
}

/// The payload contract: the initialize/destroy bodies supplied by a concrete
/// resource type (a texture, a buffer, a pipeline object).
///
/// The lifecycle machinery is type-agnostic over the payload; it only decides
/// *where* and *when* these bodies run. Both bodies take `&self`: payloads
/// keep their mutable state behind their own interior synchronization, since
/// the initialize body may run on the core thread while other threads already
/// hold handles.
pub trait CoreResource: Send + Sync + 'static {
    /// Acquires whatever the resource represents. Runs exactly once, on the
    /// core thread when the object's affinity is [`ThreadAffinity::Core`].
    fn initialize(&self);

    /// Releases whatever the resource represents. Runs exactly once, after
    /// `initialize`, on the same execution context rules.
    fn destroy(&self);
}

/// A lifecycle-managed resource.
///
/// Constructed through [`CoreContext::create`], which registers it and hands
/// back the first [`CoreRef`]. The registry keeps one strong handle per live
/// object; user handles and queued commands account for themselves in
/// `owners`, and the last one out triggers the deferred-deletion path in
/// [`CoreRef`]'s drop.
pub struct CoreObject<R>
where
    R: CoreResource + ?Sized,
{
    id: CoreObjectId,
    flags: AtomicFlags,
    owners: AtomicUsize,
    services: CoreContext,
    resource: R,
}

/// A [`CoreObject`] with its payload type erased; the form the registry owns.
pub type AnyCoreObject = CoreObject<dyn CoreResource>;

impl<R: CoreResource> CoreObject<R> {
    pub(crate) fn new(
        id: CoreObjectId,
        affinity: ThreadAffinity,
        resource: R,
        services: CoreContext,
    ) -> Self {
        let flags = match affinity {
            ThreadAffinity::Core => LifecycleFlags::CORE_BOUND,
            ThreadAffinity::Caller => LifecycleFlags::empty(),
        };
        Self {
            id,
            flags: AtomicFlags::new(flags),
            owners: AtomicUsize::new(0),
            services,
            resource,
        }
    }
}

impl<R: CoreResource + ?Sized> CoreObject<R> {
    pub fn id(&self) -> CoreObjectId {
        self.id
    }

    pub fn affinity(&self) -> ThreadAffinity {
        if self.flags.load().contains(LifecycleFlags::CORE_BOUND) {
            ThreadAffinity::Core
        } else {
            ThreadAffinity::Caller
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.flags.load().contains(LifecycleFlags::INITIALIZED)
    }

    pub fn is_scheduled_to_initialize(&self) -> bool {
        self.flags.load().contains(LifecycleFlags::SCHEDULED_INIT)
    }

    pub fn is_scheduled_to_destroy(&self) -> bool {
        self.flags.load().contains(LifecycleFlags::SCHEDULED_DESTROY)
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    pub(crate) fn services(&self) -> &CoreContext {
        &self.services
    }

    pub(crate) fn lifecycle_flags(&self) -> LifecycleFlags {
        self.flags.load()
    }

    #[cfg(test)]
    pub(crate) fn insert_flags(&self, flags: LifecycleFlags) {
        self.flags.insert(flags);
    }

    pub(crate) fn acquire_owner(&self) {
        self.owners.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrements the owner count, returning the previous value.
    pub(crate) fn release_owner(&self) -> usize {
        self.owners.fetch_sub(1, Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn owner_count(&self) -> usize {
        self.owners.load(Ordering::SeqCst)
    }

    /// Requests initialization of the payload.
    ///
    /// Fatal if the object is already initialized or already scheduled to
    /// initialize. The flag check and the enqueue are not one atomic step:
    /// two threads racing this call on the same object can both pass the
    /// check and double-schedule. Callers serialize initialization requests
    /// per object themselves.
    pub(crate) fn initialize(this: &Arc<Self>) {
        let flags = this.flags.load();
        if flags.intersects(LifecycleFlags::INITIALIZED | LifecycleFlags::SCHEDULED_INIT) {
            LifecycleError::DoubleInitialize(this.id).raise();
        }

        if flags.contains(LifecycleFlags::CORE_BOUND) {
            this.flags.insert(LifecycleFlags::SCHEDULED_INIT);
            if this.services.identity().is_core_thread() {
                this.initialize_on_core();
            } else {
                tracing::trace!(id = %this.id, "initialize deferred to core thread");
                let held = CoreRef::adopt(Arc::clone(this));
                this.services.dispatcher().enqueue(Box::new(move || {
                    // `held` keeps the object alive for the lifetime of the
                    // command, queued and executing.
                    held.object().initialize_on_core();
                }));
            }
        } else {
            this.resource.initialize();
            // Nobody can be waiting on a caller-affine object; no lock, no
            // notification.
            this.flags.insert(LifecycleFlags::INITIALIZED);
        }
    }

    /// The core-thread completion body for a core-bound initialization.
    pub(crate) fn initialize_on_core(&self) {
        self.resource.initialize();
        {
            let _held = init_gate().lock();
            self.flags.insert(LifecycleFlags::INITIALIZED);
            self.flags.remove(LifecycleFlags::SCHEDULED_INIT);
        }
        init_gate().notify_all();
        tracing::trace!(id = %self.id, "initialized");
    }

    /// Requests teardown of the payload.
    ///
    /// Subject to the same check-versus-enqueue race as `initialize`.
    pub(crate) fn destroy(this: &Arc<Self>) {
        if this.flags.load().contains(LifecycleFlags::CORE_BOUND) {
            this.flags.insert(LifecycleFlags::SCHEDULED_DESTROY);
            if this.services.identity().is_core_thread() {
                this.destroy_on_core();
            } else {
                tracing::trace!(id = %this.id, "destroy deferred to core thread");
                let held = CoreRef::adopt(Arc::clone(this));
                this.services.dispatcher().enqueue(Box::new(move || {
                    held.object().destroy_on_core();
                }));
            }
        } else {
            this.destroy_on_core();
        }
    }

    /// The teardown body. The object must currently be initialized.
    pub(crate) fn destroy_on_core(&self) {
        if !self.flags.load().contains(LifecycleFlags::INITIALIZED) {
            LifecycleError::DestroyWithoutInitialize(self.id).raise();
        }
        self.resource.destroy();
        self.flags
            .remove(LifecycleFlags::INITIALIZED | LifecycleFlags::SCHEDULED_DESTROY);
        self.services.registry().release(self.id);
        tracing::trace!(id = %self.id, "destroyed");
    }

    /// Blocks the calling thread until the payload is initialized.
    ///
    /// Returns immediately if it already is. Fatal from the core thread
    /// itself, which is the only executor able to complete the pending
    /// initialization, and fatal when nothing is initialized or scheduled.
    /// The wait loop rechecks its predicate on every wake: notifications are
    /// shared across all objects and wakeups may be spurious.
    pub fn synchronize(&self) {
        if self.flags.load().contains(LifecycleFlags::INITIALIZED) {
            return;
        }
        if !self.flags.load().contains(LifecycleFlags::CORE_BOUND) {
            LifecycleError::NothingToWaitFor(self.id).raise();
        }
        if self.services.identity().is_core_thread() {
            LifecycleError::SynchronizeOnCoreThread(self.id).raise();
        }

        let gate = init_gate();
        let mut held = gate.lock();
        while !self.flags.load().contains(LifecycleFlags::INITIALIZED) {
            if !self.flags.load().contains(LifecycleFlags::SCHEDULED_INIT) {
                LifecycleError::NothingToWaitFor(self.id).raise();
            }
            gate.wait(&mut held);
        }
    }
}

impl<R: CoreResource + ?Sized> Drop for CoreObject<R> {
    fn drop(&mut self) {
        // Reclaiming an initialized object means destroy() was bypassed and
        // a queued command may still point at this memory.
        if self.flags.load().contains(LifecycleFlags::INITIALIZED) {
            LifecycleError::DroppedWhileInitialized(self.id).raise();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{lossy_context, test_context, CountingResource, NullResource};

    #[test]
    fn caller_affinity_runs_synchronously_without_enqueueing() {
        let (context, dispatcher) = test_context();
        let (resource, counters) = CountingResource::new();
        let handle = context.create(resource, ThreadAffinity::Caller);

        handle.initialize();
        assert!(handle.is_initialized());
        assert_eq!(counters.initialized(), 1);

        handle.synchronize(); // immediate: already initialized

        handle.destroy();
        assert!(!handle.is_initialized());
        assert_eq!(counters.destroyed(), 1);
        assert_eq!(dispatcher.enqueue_count(), 0);
    }

    #[test]
    fn core_affinity_defers_to_the_queue() {
        let (context, dispatcher) = test_context();
        let (resource, counters) = CountingResource::new();
        let handle = context.create(resource, ThreadAffinity::Core);

        handle.initialize();
        assert!(!handle.is_initialized());
        assert!(handle.is_scheduled_to_initialize());
        assert_eq!(counters.initialized(), 0);
        assert_eq!(dispatcher.queued(), 1);
        // The queued command itself owns the object.
        assert_eq!(handle.object().owner_count(), 2);

        dispatcher.drain();
        assert!(handle.is_initialized());
        assert!(!handle.is_scheduled_to_initialize());
        assert_eq!(counters.initialized(), 1);
        assert_eq!(handle.object().owner_count(), 1);

        handle.destroy();
        assert!(handle.is_initialized());
        assert_eq!(dispatcher.queued(), 1);
        dispatcher.drain();
        assert!(!handle.is_initialized());
        assert_eq!(counters.destroyed(), 1);
    }

    #[test]
    fn core_affinity_on_the_core_thread_runs_in_place() {
        let (context, dispatcher) = test_context();
        let (resource, counters) = CountingResource::new();
        let handle = context.create(resource, ThreadAffinity::Core);

        dispatcher.set_core_thread(true);
        handle.initialize();
        assert!(handle.is_initialized());
        assert_eq!(counters.initialized(), 1);
        assert_eq!(dispatcher.enqueue_count(), 0);

        handle.destroy();
        assert_eq!(counters.destroyed(), 1);
        assert_eq!(dispatcher.enqueue_count(), 0);
    }

    #[test]
    #[should_panic(expected = "already initialized or has initialization pending")]
    fn initialize_twice_while_pending_is_fatal() {
        let (context, _dispatcher) = test_context();
        let handle = context.create(NullResource, ThreadAffinity::Core);
        handle.initialize();
        handle.initialize();
    }

    #[test]
    #[should_panic(expected = "already initialized or has initialization pending")]
    fn initialize_twice_after_completion_is_fatal() {
        let (context, _dispatcher) = test_context();
        let handle = context.create(NullResource, ThreadAffinity::Caller);
        handle.initialize();
        handle.initialize();
    }

    #[test]
    #[should_panic(expected = "destroyed while not initialized")]
    fn teardown_before_initialize_is_fatal() {
        let (context, dispatcher) = test_context();
        let handle = context.create(NullResource, ThreadAffinity::Core);
        handle.destroy();
        dispatcher.drain();
    }

    #[test]
    #[should_panic(expected = "neither initialized nor scheduled to initialize")]
    fn synchronize_with_nothing_in_flight_is_fatal() {
        let (context, _dispatcher) = test_context();
        let handle = context.create(NullResource, ThreadAffinity::Caller);
        handle.synchronize();
    }

    #[test]
    #[should_panic(expected = "neither initialized nor scheduled to initialize")]
    fn synchronize_on_unscheduled_core_bound_object_is_fatal() {
        let (context, _dispatcher) = test_context();
        let handle = context.create(NullResource, ThreadAffinity::Core);
        handle.synchronize();
    }

    #[test]
    #[should_panic(expected = "this would deadlock")]
    fn synchronize_from_the_core_thread_is_fatal() {
        let (context, dispatcher) = test_context();
        let handle = context.create(NullResource, ThreadAffinity::Core);
        handle.initialize();

        dispatcher.set_core_thread(true);
        handle.synchronize();
    }

    #[test]
    #[should_panic(expected = "released its last owner while scheduled to initialize")]
    fn losing_a_queued_initialize_is_detected_on_release() {
        let (context, _dispatcher) = lossy_context();
        let handle = context.create(NullResource, ThreadAffinity::Core);
        // The dispatcher silently drops the command, and with it the owner
        // that was riding along.
        handle.initialize();
        drop(handle);
    }

    #[test]
    #[should_panic(expected = "dropped while still initialized")]
    fn reclaiming_an_initialized_object_is_fatal() {
        let (context, _dispatcher) = test_context();
        let object = CoreObject::new(
            context.registry().allocate_id(),
            ThreadAffinity::Caller,
            NullResource,
            context.clone(),
        );
        object.insert_flags(LifecycleFlags::INITIALIZED);
        drop(object);
    }
}
