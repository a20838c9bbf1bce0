//! Object identity and the owning handle table.
//!
//! Every lifecycle object is registered here at construction and addressed by
//! an opaque id. The table holds the one strong handle the runtime itself
//! owns per live object; the deferred-deletion path mints fresh references by
//! looking that handle up, so an object stays reachable by id for exactly as
//! long as teardown may still need it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::object::AnyCoreObject;

/// Opaque identifier of a registered lifecycle object.
///
/// Allocated once at construction, unique for the lifetime of the registry,
/// released when the object is destroyed.
///
/// # Examples
///
/// ```
/// use corebound::CoreObjectId;
///
/// let id = CoreObjectId::from_raw(11);
/// assert_eq!(id.as_u64(), 11);
/// assert_eq!(id.to_string(), "#11");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoreObjectId(u64);

impl CoreObjectId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CoreObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registry of live lifecycle objects.
///
/// Ids come from an atomic counter; the map keeps one strong handle per live
/// object. Lookup and release are lock-free reads/writes on the concurrent
/// map, matching how caller threads and the core thread touch the registry
/// from both sides of the queue.
#[derive(Default)]
pub struct CoreObjectRegistry {
    next_id: AtomicU64,
    live: DashMap<CoreObjectId, Arc<AnyCoreObject>>,
}

impl CoreObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the next unique id.
    pub(crate) fn allocate_id(&self) -> CoreObjectId {
        CoreObjectId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Stores the runtime-owned strong handle for a freshly built object.
    pub(crate) fn attach(&self, object: Arc<AnyCoreObject>) {
        self.live.insert(object.id(), object);
    }

    /// Clones the runtime-owned strong handle for `id`, if still registered.
    pub(crate) fn strong(&self, id: CoreObjectId) -> Option<Arc<AnyCoreObject>> {
        self.live.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Drops the runtime-owned strong handle for `id`.
    ///
    /// Idempotent: the destroyed path and the deferred-deletion path may both
    /// reach it for the same object.
    pub(crate) fn release(&self, id: CoreObjectId) {
        if self.live.remove(&id).is_some() {
            tracing::debug!(id = %id, "unregistered core object");
        }
    }

    /// Whether `id` is still registered.
    pub fn contains(&self, id: CoreObjectId) -> bool {
        self.live.contains_key(&id)
    }

    /// Number of currently registered objects.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}
