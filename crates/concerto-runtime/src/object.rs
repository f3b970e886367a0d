//! Active object trait and invocation context

use async_trait::async_trait;
use bytes::Bytes;

use concerto_core::error::Result;
use concerto_core::object::ObjectId;

use crate::handle::ObjectHandle;
use crate::reentrancy::ServingFrame;

// =============================================================================
// ActiveObject Trait
// =============================================================================

/// Active object trait - implement to serve requests
///
/// # TigerStyle
/// - Bodies of compatible methods run concurrently on `&self`; state they
///   share needs interior mutability
/// - The scheduler never runs two incompatible bodies at the same time, so
///   locks taken inside bodies are uncontended by construction
/// - Errors are reported through the request's own result only
#[async_trait]
pub trait ActiveObject: Send + Sync + 'static {
    /// Handle an invocation
    ///
    /// # Arguments
    /// * `ctx` - Invocation context, including a handle to this object
    /// * `method` - The method name, always one the class declared
    /// * `args` - Serialized arguments
    ///
    /// # Returns
    /// Serialized result, or an error delivered to the caller
    async fn invoke(&self, ctx: &ObjectContext, method: &str, args: Bytes) -> Result<Bytes>;
}

// =============================================================================
// ObjectContext
// =============================================================================

/// Context passed to every invocation body
pub struct ObjectContext {
    handle: ObjectHandle,
    frame: ServingFrame,
}

impl ObjectContext {
    pub(crate) fn new(handle: ObjectHandle, frame: ServingFrame) -> Self {
        Self { handle, frame }
    }

    /// Handle to the object being served
    ///
    /// Calls made through it from inside the body are self-calls.
    pub fn handle(&self) -> &ObjectHandle {
        &self.handle
    }

    /// ID of the object being served
    pub fn id(&self) -> &ObjectId {
        self.handle.id()
    }

    /// Method being executed
    pub fn method(&self) -> &str {
        self.frame.method()
    }

    /// Sequence number of the dispatched request; `None` for inline calls
    pub fn sequence(&self) -> Option<u64> {
        self.frame.sequence()
    }

    /// Inline nesting depth
    pub fn depth(&self) -> usize {
        self.frame.depth()
    }
}
