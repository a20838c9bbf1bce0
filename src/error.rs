//! Error types for the lifecycle protocol.

use thiserror::Error;

use crate::registry::CoreObjectId;

/// Violations of the resource lifecycle protocol.
///
/// Every variant is a programming error in the calling code, never a
/// recoverable runtime condition: an object was initialized twice, torn down
/// out of order, or released while the core thread still owed it work. They
/// are surfaced through [`LifecycleError::raise`], which aborts the offending
/// call with a panic carrying the formatted message.
///
/// # Examples
///
/// ```
/// use corebound::{CoreObjectId, LifecycleError};
///
/// let error = LifecycleError::DoubleInitialize(CoreObjectId::from_raw(7));
/// assert_eq!(
///     error.to_string(),
///     "object #7 is already initialized or has initialization pending",
/// );
/// ```
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// `initialize()` was called while the object is initialized or has an
    /// initialize command in flight.
    #[error("object {0} is already initialized or has initialization pending")]
    DoubleInitialize(CoreObjectId),
    /// The teardown body ran on an object that is not currently initialized,
    /// either because it never was or because it was already destroyed.
    #[error("object {0} destroyed while not initialized")]
    DestroyWithoutInitialize(CoreObjectId),
    /// The object's memory was reclaimed while it was still initialized,
    /// meaning `destroy()` was bypassed and queued commands may still
    /// reference it.
    #[error("object {0} dropped while still initialized; destroy() was bypassed")]
    DroppedWhileInitialized(CoreObjectId),
    /// `synchronize()` was called from the core thread, the only thread able
    /// to complete the initialization being waited on.
    #[error("object {0} synchronized from the core thread; this would deadlock")]
    SynchronizeOnCoreThread(CoreObjectId),
    /// `synchronize()` was called while the object is neither initialized nor
    /// scheduled to initialize.
    #[error("object {0} is neither initialized nor scheduled to initialize")]
    NothingToWaitFor(CoreObjectId),
    /// The last owner was released while an initialize command is still
    /// pending. The command itself holds an owner, so this state is
    /// unreachable unless the dispatcher lost the command or the ownership
    /// rules were bypassed.
    #[error("object {0} released its last owner while scheduled to initialize")]
    DroppedWhileScheduled(CoreObjectId),
}

impl LifecycleError {
    /// Surfaces the violation fatally at the call site that detected it.
    ///
    /// There is no recovery path for any of these conditions; continuing
    /// would risk use-after-free or double-free on the core thread.
    pub fn raise(self) -> ! {
        tracing::error!(violation = %self, "lifecycle protocol violation");
        panic!("lifecycle protocol violation: {self}");
    }
}
