//! Cross-thread lifecycle protocol for core-thread-bound engine resources.
//!
//! Engine objects backed by external state (GPU textures, buffers, pipeline
//! objects) can be created and released from any thread, but their actual
//! initialization and teardown bodies must run on one designated core thread.
//! This crate provides the protocol that makes that safe: requests made off
//! the core thread are packaged as deferred commands that own the object
//! while they sit in the queue, callers can block until a pending
//! initialization lands, and the last owner to let go of an initialized
//! object automatically routes its teardown through the core thread before
//! the memory is reclaimed. Protocol misuse — double initialization,
//! out-of-order teardown, waits that could never finish — is detected and
//! surfaced as an immediate fatal error.
//!
//! # Examples
//!
//! ```
//! use corebound::{CoreContext, CoreResource, CoreThreadBuilder, ThreadAffinity};
//!
//! struct Texture;
//!
//! impl CoreResource for Texture {
//!     fn initialize(&self) { /* upload */ }
//!     fn destroy(&self) { /* release */ }
//! }
//!
//! let (context, core) = CoreContext::with_core_thread(CoreThreadBuilder::default()).unwrap();
//! let texture = context.create(Texture, ThreadAffinity::Core);
//!
//! texture.initialize();   // returns immediately; the body runs on the core thread
//! texture.synchronize();  // blocks until it has
//! assert!(texture.is_initialized());
//!
//! drop(texture);          // teardown is queued to the core thread
//! core.stop();            // drains the queue, then joins
//! assert_eq!(context.registry().live_count(), 0);
//! ```

pub mod async_op;
pub mod context;
pub mod dispatch;
pub mod error;
mod gate;
pub mod handle;
pub mod object;
pub mod registry;
pub mod test_utils;

pub use async_op::AsyncOp;
pub use context::CoreContext;
pub use dispatch::{
    CoreCommand, CoreDispatcher, CoreResultCommand, CoreThread, CoreThreadBuilder,
    CoreThreadIdentity,
};
pub use error::LifecycleError;
pub use handle::CoreRef;
pub use object::{AnyCoreObject, CoreObject, CoreResource, ThreadAffinity};
pub use registry::{CoreObjectId, CoreObjectRegistry};
