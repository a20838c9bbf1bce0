//! The service bundle lifecycle objects are created through.
//!
//! Everything the state machine calls out to — the registry, the command
//! dispatcher, the core-thread identity check — is injected here rather than
//! reached through globals, so tests run against deterministic mock services
//! and production wires a real [`CoreThread`] in one call.

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::dispatch::{CoreDispatcher, CoreThread, CoreThreadBuilder, CoreThreadIdentity};
use crate::handle::CoreRef;
use crate::object::{AnyCoreObject, CoreObject, CoreResource, ThreadAffinity};
use crate::registry::CoreObjectRegistry;

struct ContextShared {
    registry: CoreObjectRegistry,
    dispatcher: Arc<dyn CoreDispatcher>,
    identity: Arc<dyn CoreThreadIdentity>,
}

/// Shared services for one family of lifecycle objects.
///
/// Cheap to clone; every object keeps a clone for the lifetime of its
/// registration.
///
/// # Examples
///
/// ```
/// use corebound::test_utils::ManualDispatcher;
/// use corebound::{CoreContext, CoreResource, ThreadAffinity};
///
/// struct Texture;
///
/// impl CoreResource for Texture {
///     fn initialize(&self) {}
///     fn destroy(&self) {}
/// }
///
/// let dispatcher = ManualDispatcher::new();
/// let context = CoreContext::new(dispatcher.clone(), dispatcher.clone());
/// let texture = context.create(Texture, ThreadAffinity::Core);
///
/// texture.initialize();
/// assert!(!texture.is_initialized()); // queued, not yet run
/// dispatcher.drain();
/// assert!(texture.is_initialized());
///
/// drop(texture); // teardown rides the queue too
/// dispatcher.drain();
/// assert_eq!(context.registry().live_count(), 0);
/// ```
#[derive(Clone)]
pub struct CoreContext {
    shared: Arc<ContextShared>,
}

impl CoreContext {
    /// Builds a context around explicit dispatcher and identity services.
    pub fn new(
        dispatcher: Arc<dyn CoreDispatcher>,
        identity: Arc<dyn CoreThreadIdentity>,
    ) -> Self {
        Self {
            shared: Arc::new(ContextShared {
                registry: CoreObjectRegistry::new(),
                dispatcher,
                identity,
            }),
        }
    }

    /// Spawns a [`CoreThread`] and builds a context using it for both
    /// dispatch and identity. The runner is returned alongside so the caller
    /// controls shutdown.
    pub fn with_core_thread(
        builder: CoreThreadBuilder,
    ) -> io::Result<(Self, Arc<CoreThread>)> {
        let core = Arc::new(builder.spawn()?);
        let context = Self::new(
            Arc::clone(&core) as Arc<dyn CoreDispatcher>,
            Arc::clone(&core) as Arc<dyn CoreThreadIdentity>,
        );
        Ok((context, core))
    }

    /// Registers a new lifecycle object around `resource` and returns its
    /// first owning handle. The object starts uninitialized; nothing runs
    /// until [`CoreRef::initialize`] is requested.
    pub fn create<R: CoreResource>(&self, resource: R, affinity: ThreadAffinity) -> CoreRef<R> {
        let id = self.shared.registry.allocate_id();
        let object = Arc::new(CoreObject::new(id, affinity, resource, self.clone()));
        let erased: Arc<AnyCoreObject> = object.clone();
        self.shared.registry.attach(erased);
        tracing::debug!(id = %id, ?affinity, "created core object");
        CoreRef::adopt(object)
    }

    pub fn registry(&self) -> &CoreObjectRegistry {
        &self.shared.registry
    }

    pub(crate) fn dispatcher(&self) -> &Arc<dyn CoreDispatcher> {
        &self.shared.dispatcher
    }

    pub(crate) fn identity(&self) -> &Arc<dyn CoreThreadIdentity> {
        &self.shared.identity
    }
}

impl fmt::Debug for CoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreContext")
            .field("live_objects", &self.shared.registry.live_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_context, NullResource};

    #[test]
    fn create_registers_and_hands_out_the_first_owner() {
        let (context, _dispatcher) = test_context();
        let handle = context.create(NullResource, ThreadAffinity::Core);

        assert_eq!(context.registry().live_count(), 1);
        assert!(context.registry().contains(handle.id()));
        assert_eq!(handle.affinity(), ThreadAffinity::Core);
        assert!(!handle.is_initialized());
        assert_eq!(handle.object().owner_count(), 1);
    }

    #[test]
    fn contexts_are_isolated_from_each_other() {
        let (first, _a) = test_context();
        let (second, _b) = test_context();

        let _one = first.create(NullResource, ThreadAffinity::Caller);
        assert_eq!(first.registry().live_count(), 1);
        assert_eq!(second.registry().live_count(), 0);
    }
}
