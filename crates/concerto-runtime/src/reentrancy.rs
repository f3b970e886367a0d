//! Reentrancy context
//!
//! Every request body runs inside a task-local [`ServingFrame`] recording
//! which object instance the worker is serving and which invocation it is
//! executing. A call made from inside a body can therefore tell whether it
//! targets the object that is already serving it.
//!
//! Frames do not propagate into tasks spawned by a body; such tasks call
//! back like any external client.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;

use concerto_core::compat::{Invocation, InvocationDescriptor};
use concerto_core::constants::REENTRANT_DEPTH_MAX;
use concerto_core::error::{Error, Result};
use concerto_core::object::ObjectId;

tokio::task_local! {
    static SERVING: ServingFrame;
}

/// The invocation a worker is currently executing
#[derive(Debug, Clone)]
pub struct ServingFrame {
    instance: u64,
    object: ObjectId,
    sequence: Option<u64>,
    descriptor: Arc<InvocationDescriptor>,
    args: Bytes,
    depth: usize,
    /// Frame this inline call was made from
    parent: Option<Arc<ServingFrame>>,
}

impl ServingFrame {
    /// Frame of a dispatched request
    pub(crate) fn dispatched(
        instance: u64,
        object: ObjectId,
        sequence: u64,
        descriptor: Arc<InvocationDescriptor>,
        args: Bytes,
    ) -> Self {
        Self {
            instance,
            object,
            sequence: Some(sequence),
            descriptor,
            args,
            depth: 0,
            parent: None,
        }
    }

    /// Frame of a self-call served inline on top of this one
    pub(crate) fn nested(
        &self,
        descriptor: Arc<InvocationDescriptor>,
        args: Bytes,
    ) -> Result<Self> {
        let depth = self.depth + 1;
        if depth > REENTRANT_DEPTH_MAX {
            return Err(Error::ReentrancyDepthExceeded {
                depth,
                limit: REENTRANT_DEPTH_MAX,
            });
        }

        Ok(Self {
            instance: self.instance,
            object: self.object.clone(),
            sequence: None,
            descriptor,
            args,
            depth,
            parent: Some(Arc::new(self.clone())),
        })
    }

    /// Activation the worker is serving
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Object the worker is serving
    pub fn object(&self) -> &ObjectId {
        &self.object
    }

    /// Sequence number of the dispatched request; `None` for inline calls
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// Method being executed
    pub fn method(&self) -> &str {
        &self.descriptor.method
    }

    /// Descriptor of the method being executed
    pub fn descriptor(&self) -> &Arc<InvocationDescriptor> {
        &self.descriptor
    }

    /// Inline nesting depth (0 for a dispatched request)
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// View for the resolver
    pub fn invocation(&self) -> Invocation<'_> {
        Invocation::new(&self.descriptor, &self.args)
    }

    /// This frame and every frame it is nested in, innermost first
    ///
    /// The last one is the dispatched request holding the running slot.
    pub fn lineage(&self) -> impl Iterator<Item = &ServingFrame> {
        std::iter::successors(Some(self), |frame| frame.parent.as_deref())
    }
}

/// Frame of the invocation executing on the current task, if any
pub fn current_frame() -> Option<ServingFrame> {
    SERVING.try_with(ServingFrame::clone).ok()
}

/// Run `future` with `frame` as the current frame
pub(crate) async fn serve<F: Future>(frame: ServingFrame, future: F) -> F::Output {
    SERVING.scope(frame, future).await
}
