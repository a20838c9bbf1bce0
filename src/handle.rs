//! Owning handles and the deferred-deletion path.

use std::fmt;
use std::sync::Arc;

use crate::async_op::AsyncOp;
use crate::error::LifecycleError;
use crate::object::{CoreObject, CoreResource, LifecycleFlags, ThreadAffinity};
use crate::registry::CoreObjectId;

/// An owning handle to a lifecycle-managed resource.
///
/// Handles are the only way user code and queued commands hold a
/// [`CoreObject`]; each live handle is one entry in the object's owner count.
/// Dropping the last one triggers the deferred-deletion path: an object whose
/// core-thread teardown has not run yet is kept alive by a freshly minted
/// handle that rides the destroy command through the queue, and its memory is
/// reclaimed exactly once, after teardown.
///
/// `R` is the concrete payload type, giving typed access through
/// [`resource`]; the runtime's own handle is erased to `dyn CoreResource`.
///
/// [`resource`]: CoreRef::resource
pub struct CoreRef<R>
where
    R: CoreResource + ?Sized,
{
    object: Arc<CoreObject<R>>,
}

impl<R: CoreResource + ?Sized> CoreRef<R> {
    /// Wraps `object` in a new handle, registering it as an owner.
    pub(crate) fn adopt(object: Arc<CoreObject<R>>) -> Self {
        object.acquire_owner();
        Self { object }
    }

    pub(crate) fn object(&self) -> &Arc<CoreObject<R>> {
        &self.object
    }

    pub fn id(&self) -> CoreObjectId {
        self.object.id()
    }

    pub fn affinity(&self) -> ThreadAffinity {
        self.object.affinity()
    }

    pub fn is_initialized(&self) -> bool {
        self.object.is_initialized()
    }

    pub fn is_scheduled_to_initialize(&self) -> bool {
        self.object.is_scheduled_to_initialize()
    }

    /// The payload. Lifecycle state is not checked here; payloads guard
    /// their own not-yet-initialized accesses.
    pub fn resource(&self) -> &R {
        self.object.resource()
    }

    /// Requests initialization; see the state-machine rules on
    /// [`CoreObject`]. Fatal if already initialized or scheduled. The flag
    /// check and the enqueue are not one atomic step, so concurrent
    /// `initialize` calls on the same object from different threads must be
    /// serialized by the caller.
    pub fn initialize(&self) {
        CoreObject::initialize(&self.object);
    }

    /// Requests teardown of an initialized object.
    pub fn destroy(&self) {
        CoreObject::destroy(&self.object);
    }

    /// Blocks until a pending core-thread initialization completes.
    pub fn synchronize(&self) {
        self.object.synchronize();
    }

    /// Queues `f` to run on the core thread with access to the payload.
    ///
    /// The command owns a clone of this handle, so the object stays alive
    /// until `f` has returned even if every other owner is released first.
    pub fn run_on_core<F>(&self, f: F)
    where
        F: FnOnce(&R) + Send + 'static,
    {
        let held = self.clone();
        self.object
            .services()
            .dispatcher()
            .enqueue(Box::new(move || f(held.resource())));
    }

    /// Queues `f` like [`run_on_core`] and returns the pending-result handle
    /// `f` is expected to resolve.
    ///
    /// [`run_on_core`]: CoreRef::run_on_core
    pub fn run_on_core_returned<F>(&self, f: F) -> AsyncOp
    where
        F: FnOnce(&R, &AsyncOp) + Send + 'static,
    {
        let held = self.clone();
        self.object
            .services()
            .dispatcher()
            .enqueue_for_result(Box::new(move |op: &AsyncOp| f(held.resource(), op)))
    }
}

impl<R: CoreResource + ?Sized> Clone for CoreRef<R> {
    fn clone(&self) -> Self {
        Self::adopt(Arc::clone(&self.object))
    }
}

impl<R: CoreResource + ?Sized> Drop for CoreRef<R> {
    fn drop(&mut self) {
        if self.object.release_owner() != 1 {
            return;
        }

        // Last owner out. Decide whether the object can be let go or still
        // owes the core thread a teardown.
        let object = &self.object;
        let flags = object.lifecycle_flags();

        if flags.contains(LifecycleFlags::SCHEDULED_INIT) {
            // A pending initialize command holds an owner of its own, so a
            // zero count here means the dispatcher lost the command or the
            // ownership rules were bypassed.
            LifecycleError::DroppedWhileScheduled(object.id()).raise();
        }

        if flags.contains(LifecycleFlags::INITIALIZED)
            && !flags.contains(LifecycleFlags::SCHEDULED_DESTROY)
        {
            // Teardown never ran and was never scheduled: mint a fresh owner
            // from the registry's strong handle and route destroy() through
            // it. That owner rides the destroy command; when the command
            // completes and releases it, this drop runs again on an
            // uninitialized object and falls through to the release below.
            let strong = object.services().registry().strong(object.id());
            debug_assert!(
                strong.is_some(),
                "initialized object {} missing from the registry",
                object.id()
            );
            if let Some(strong) = strong {
                tracing::debug!(id = %object.id(), "last owner released; scheduling teardown");
                CoreRef::adopt(strong).destroy();
            }
            return;
        }

        // Never initialized, or teardown already completed: drop the
        // registry's strong handle. Memory goes with the last `Arc`.
        object.services().registry().release(object.id());
    }
}

impl<R: CoreResource + ?Sized> fmt::Debug for CoreRef<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreRef")
            .field("id", &self.object.id())
            .field("initialized", &self.object.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_context, CountingResource, NullResource};

    #[test]
    fn clones_share_the_object_and_count_owners() {
        let (context, _dispatcher) = test_context();
        let handle = context.create(NullResource, ThreadAffinity::Caller);
        assert_eq!(handle.object().owner_count(), 1);

        let second = handle.clone();
        assert_eq!(second.id(), handle.id());
        assert_eq!(handle.object().owner_count(), 2);

        drop(second);
        assert_eq!(handle.object().owner_count(), 1);
    }

    #[test]
    fn releasing_an_initialized_object_schedules_its_teardown() {
        let (context, dispatcher) = test_context();
        let (resource, counters) = CountingResource::new();
        let handle = context.create(resource, ThreadAffinity::Core);
        let id = handle.id();

        handle.initialize();
        dispatcher.drain();
        drop(handle);

        // The guard minted a new owner and queued the destroy; nothing has
        // been torn down or reclaimed yet.
        assert_eq!(dispatcher.queued(), 1);
        assert_eq!(counters.destroyed(), 0);
        assert_eq!(counters.dropped(), 0);
        assert!(context.registry().contains(id));

        dispatcher.drain();
        assert_eq!(counters.initialized(), 1);
        assert_eq!(counters.destroyed(), 1);
        assert_eq!(counters.dropped(), 1);
        assert!(!context.registry().contains(id));
    }

    #[test]
    fn releasing_a_never_initialized_object_reclaims_immediately() {
        let (context, dispatcher) = test_context();
        let (resource, counters) = CountingResource::new();
        let handle = context.create(resource, ThreadAffinity::Core);
        let id = handle.id();

        drop(handle);
        assert_eq!(dispatcher.enqueue_count(), 0);
        assert_eq!(counters.initialized(), 0);
        assert_eq!(counters.destroyed(), 0);
        assert_eq!(counters.dropped(), 1);
        assert!(!context.registry().contains(id));
    }

    #[test]
    fn explicit_destroy_then_release_does_not_reschedule() {
        let (context, dispatcher) = test_context();
        let (resource, counters) = CountingResource::new();
        let handle = context.create(resource, ThreadAffinity::Core);

        handle.initialize();
        dispatcher.drain();
        handle.destroy();
        dispatcher.drain();
        assert_eq!(counters.destroyed(), 1);

        drop(handle);
        assert_eq!(dispatcher.queued(), 0);
        assert_eq!(counters.destroyed(), 1);
        assert_eq!(counters.dropped(), 1);
    }

    #[test]
    fn caller_affine_release_tears_down_in_place() {
        let (context, dispatcher) = test_context();
        let (resource, counters) = CountingResource::new();
        let handle = context.create(resource, ThreadAffinity::Caller);

        handle.initialize();
        drop(handle);

        assert_eq!(dispatcher.enqueue_count(), 0);
        assert_eq!(counters.destroyed(), 1);
        assert_eq!(counters.dropped(), 1);
    }

    #[test]
    fn run_on_core_keeps_the_object_alive_through_the_command() {
        let (context, dispatcher) = test_context();
        let (resource, counters) = CountingResource::new();
        let handle = context.create(resource, ThreadAffinity::Core);
        let id = handle.id();

        handle.initialize();
        handle.run_on_core(|_resource| {});
        drop(handle);

        // Queue: initialize, user command, then nothing else yet; the user
        // command still owns the object.
        assert!(context.registry().contains(id));
        dispatcher.drain();

        // Draining ran initialize and the user command; releasing the user
        // command's owner scheduled the teardown, which needs one more pass.
        assert_eq!(dispatcher.queued(), 1);
        dispatcher.drain();
        assert_eq!(counters.destroyed(), 1);
        assert_eq!(counters.dropped(), 1);
        assert!(!context.registry().contains(id));
    }

    #[test]
    fn run_on_core_returned_resolves_through_the_payload() {
        let (context, dispatcher) = test_context();
        let handle = context.create(NullResource, ThreadAffinity::Caller);
        handle.initialize();

        let op = handle.run_on_core_returned(|_resource, op| op.complete(7u32));
        assert!(!op.has_completed());
        dispatcher.drain();
        assert_eq!(op.take::<u32>(), Some(7));

        handle.destroy();
    }
}
