//! Object handles
//!
//! TigerStyle: Cheap to clone, explicit error handling, optional watchdog.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use concerto_core::compat::{Invocation, InvocationDescriptor};
use concerto_core::config::ReentrancyMode;
use concerto_core::error::{Error, Result};
use concerto_core::object::ObjectId;

use crate::activation::ObjectState;
use crate::object::ObjectContext;
use crate::pending::ReplySender;
use crate::reentrancy::{self, ServingFrame};
use crate::scheduler::{Scheduler, SchedulerSnapshot};

/// Result slot of a submitted request
#[derive(Debug)]
pub struct PendingReply {
    sequence: u64,
    object: String,
    method: String,
    rx: oneshot::Receiver<Result<Bytes>>,
}

impl PendingReply {
    /// Arrival sequence number assigned to the request
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Wait for the request to complete
    ///
    /// A body that panics never fills its slot; the caller sees
    /// `InvocationPanicked`.
    pub async fn wait(self) -> Result<Bytes> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::InvocationPanicked {
                object: self.object,
                method: self.method,
            }),
        }
    }
}

/// Handle to a served active object
///
/// Cloned freely and shared across tasks. Calls made through a handle from
/// inside one of the object's own bodies are self-calls.
#[derive(Clone)]
pub struct ObjectHandle {
    scheduler: Arc<Scheduler>,
    /// Default timeout for `invoke`
    default_timeout: Option<Duration>,
}

impl std::fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("object", &self.scheduler.id)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ObjectHandle {
    pub(crate) fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            default_timeout: None,
        }
    }

    /// Stop waiting for `invoke` results after `timeout`
    ///
    /// The request itself is neither cancelled nor withdrawn.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Object ID
    pub fn id(&self) -> &ObjectId {
        &self.scheduler.id
    }

    // -------------------------------------------------------------------------
    // Invocation
    // -------------------------------------------------------------------------

    /// Enqueue a request with a caller-provided result slot
    ///
    /// This is the entry point for transports that own their reply channel.
    /// On rejection (unknown method, terminated object) the error is
    /// returned and also delivered through `reply_tx`.
    pub fn enqueue(&self, method: &str, args: Bytes, reply_tx: ReplySender) -> Result<u64> {
        self.scheduler.enqueue(method, args, reply_tx)
    }

    /// Enqueue a request and return its result slot
    pub fn submit(&self, method: &str, args: Bytes) -> Result<PendingReply> {
        let (reply_tx, rx) = oneshot::channel();
        let sequence = self.scheduler.enqueue(method, args, reply_tx)?;

        Ok(PendingReply {
            sequence,
            object: self.scheduler.id.to_string(),
            method: method.to_string(),
            rx,
        })
    }

    /// Invoke a method and wait for its result
    ///
    /// Under `ReentrantSameThread`, a self-call runs inline on the calling
    /// worker when it is compatible with every invocation on the worker's
    /// inline chain, from the issuing one down to the dispatched request
    /// holding the running slot. Any other call is enqueued; an
    /// incompatible self-call made while the caller holds its running slot
    /// never completes.
    pub async fn invoke(&self, method: &str, args: Bytes) -> Result<Bytes> {
        if let Some(caller) = self.reentrant_caller() {
            if let Some(descriptor) = self.scheduler.resolver.table().descriptor(method) {
                let candidate = Invocation::new(&descriptor, &args);
                let compatible = caller
                    .lineage()
                    .all(|frame| self.scheduler.resolver.compatible(&candidate, &frame.invocation()));
                if compatible {
                    return self.invoke_inline(&caller, descriptor, args).await;
                }
            }
        }

        let reply = self.submit(method, args)?;

        match self.default_timeout {
            Some(timeout) => tokio::time::timeout(timeout, reply.wait())
                .await
                .map_err(|_| Error::InvocationTimeout {
                    object: self.scheduler.id.to_string(),
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })?,
            None => reply.wait().await,
        }
    }

    /// Invoke with a typed request and response
    ///
    /// Serializes the request to JSON, invokes the object, and deserializes
    /// the response.
    pub async fn request<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let payload = serde_json::to_vec(request).map_err(|e| Error::SerializationFailed {
            reason: format!("request for '{}': {}", method, e),
        })?;

        let response = self.invoke(method, Bytes::from(payload)).await?;

        serde_json::from_slice(&response).map_err(|e| Error::DeserializationFailed {
            reason: format!("response of '{}': {}", method, e),
        })
    }

    /// Frame of the current worker if it serves this very object
    fn reentrant_caller(&self) -> Option<ServingFrame> {
        if self.scheduler.reentrancy != ReentrancyMode::ReentrantSameThread {
            return None;
        }
        reentrancy::current_frame().filter(|frame| frame.instance() == self.scheduler.instance)
    }

    /// Run a self-call on the current worker, bypassing the queue
    async fn invoke_inline(
        &self,
        caller: &ServingFrame,
        descriptor: Arc<InvocationDescriptor>,
        args: Bytes,
    ) -> Result<Bytes> {
        let frame = caller.nested(descriptor.clone(), args.clone())?;
        self.scheduler.record_inline(&descriptor.method, frame.depth());

        let ctx = ObjectContext::new(ObjectHandle::new(Arc::clone(&self.scheduler)), frame.clone());
        reentrancy::serve(
            frame,
            self.scheduler.object.invoke(&ctx, &descriptor.method, args),
        )
        .await
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Terminate the object
    ///
    /// Every pending request fails with `ObjectTerminated`, later submissions
    /// are rejected with the same error, running requests finish and the
    /// dispatch loop stops. Returns the number of withdrawn requests.
    pub fn terminate(&self) -> usize {
        self.scheduler.terminate()
    }

    /// Lifecycle state
    pub fn state(&self) -> ObjectState {
        self.scheduler.state()
    }

    /// Check if the object was terminated
    pub fn is_terminated(&self) -> bool {
        self.state() == ObjectState::Terminated
    }

    /// Resolve once nothing is pending or running
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await
    }

    /// Current queue, running set and counters
    pub fn snapshot(&self) -> SchedulerSnapshot {
        self.scheduler.snapshot()
    }

    // -------------------------------------------------------------------------
    // Serving controller
    // -------------------------------------------------------------------------

    /// Current concurrency degree
    pub fn degree(&self) -> usize {
        self.scheduler.degree()
    }

    /// Replace the degree; ignored unless `degree >= 1`
    pub fn set_degree(&self, degree: usize) -> bool {
        self.scheduler.set_degree(degree)
    }

    /// Raise the degree by `by`
    pub fn increment_degree(&self, by: usize) -> bool {
        self.scheduler.increment_degree(by)
    }

    /// Lower the degree by `by`; ignored if the result would drop below 1
    pub fn decrement_degree(&self, by: usize) -> bool {
        self.scheduler.decrement_degree(by)
    }
}
